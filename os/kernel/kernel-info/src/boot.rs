//! # Boot Region Table

use crate::memory::MAX_REGIONS;
use core::fmt;

/// Semantic class of a boot-discovered extent.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegionType {
    /// Allocatable RAM.
    Physical = 1,
    /// Virtual address range reserved for the kernel.
    Virtual = 2,
    /// Physical run mapped 1:1 during boot.
    Identity = 3,
    /// Where the boot filesystem image lives on the boot device.
    Filesystem = 4,
    /// Anything the firmware told us not to touch.
    Reserved = 5,
}

impl From<u32> for RegionType {
    /// Unknown firmware codes are treated as reserved.
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Physical,
            2 => Self::Virtual,
            3 => Self::Identity,
            4 => Self::Filesystem,
            _ => Self::Reserved,
        }
    }
}

/// Descriptor layout as the firmware probe writes it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRegion {
    pub base: u64,
    pub length: u64,
    pub kind: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionType,
    pub base: u64,
    pub length: u64,
}

impl Region {
    #[must_use]
    pub const fn new(kind: RegionType, base: u64, length: u64) -> Self {
        Self { kind, base, length }
    }

    /// Exclusive end address.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

impl From<RawRegion> for Region {
    fn from(raw: RawRegion) -> Self {
        Self::new(RegionType::from(raw.kind), raw.base, raw.length)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} [{:#x}, {:#x})",
            self.kind,
            self.base,
            self.end()
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("region table full ({MAX_REGIONS} entries)")]
pub struct RegionTableFull;

/// Fixed-capacity, insertion-ordered table of boot regions.
#[derive(Clone)]
pub struct RegionTable {
    entries: [Region; MAX_REGIONS],
    len: usize,
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [Region::new(RegionType::Reserved, 0, 0); MAX_REGIONS],
            len: 0,
        }
    }

    /// Build the table from the firmware's raw descriptors.
    ///
    /// # Errors
    /// More descriptors than [`MAX_REGIONS`].
    pub fn from_raw(raw: &[RawRegion]) -> Result<Self, RegionTableFull> {
        let mut table = Self::new();
        for r in raw {
            table.push(Region::from(*r))?;
        }
        Ok(table)
    }

    /// Append a region.
    ///
    /// # Errors
    /// The table already holds [`MAX_REGIONS`] entries.
    pub fn push(&mut self, region: Region) -> Result<(), RegionTableFull> {
        let slot = self.entries.get_mut(self.len).ok_or(RegionTableFull)?;
        *slot = region;
        self.len += 1;
        Ok(())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Region> {
        self.entries[..self.len].iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Region> {
        self.entries[..self.len].iter_mut()
    }

    pub fn of_type(&self, kind: RegionType) -> impl Iterator<Item = &Region> {
        self.iter().filter(move |r| r.kind == kind)
    }
}

impl fmt::Debug for RegionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a RegionTable {
    type Item = &'a Region;
    type IntoIter = core::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
