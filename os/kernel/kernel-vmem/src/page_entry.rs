use crate::addresses::PhysicalAddress;
use bitfield_struct::bitfield;

/// One 64-bit x86-64 paging entry, common superset of PML4E/PDPTE/PDE/PTE.
///
/// | Bits   | Field |
/// |--------|-------|
/// | 0      | `P` present |
/// | 1      | `RW` writable |
/// | 2      | `US` user accessible |
/// | 3, 4   | `PWT`, `PCD` caching |
/// | 5, 6   | `A` accessed, `D` dirty (leaf only) |
/// | 7      | `PS` large page (PDPTE/PDE only) |
/// | 8      | `G` global (leaf only) |
/// | 12–51  | physical frame bits [51:12] |
/// | 59–62  | protection key |
/// | 63     | `NX` execute disable |
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    pub present: bool,
    pub writable: bool,
    pub user_access: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global_translation: bool,
    #[bits(3)]
    pub os_available_low: u8,
    #[bits(40)]
    phys_addr_bits_51_12: u64,
    #[bits(7)]
    pub os_available_high: u8,
    #[bits(4)]
    pub protection_key: u8,
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Non-leaf entry pointing at the next table. Permissions stay open here;
    /// leaves restrict them.
    #[inline]
    #[must_use]
    pub const fn next_table(table: PhysicalAddress) -> Self {
        let mut e = Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true);
        e.set_physical_address(table);
        e
    }
}

/// One 4 KiB page-table frame: 512 entries, any level.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; 512],
}

impl PageTable {
    #[inline]
    pub fn zero(&mut self) {
        self.entries = [PageEntryBits::new(); 512];
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub const fn set_entry(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries.iter().copied().enumerate()
    }
}

const _: () = assert!(size_of::<PageTable>() == 4096);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_field_masks_low_bits() {
        let mut e = PageEntryBits::new().with_present(true).with_no_execute(true);
        e.set_physical_address(PhysicalAddress::new(0x0000_0012_3456_7000));
        assert_eq!(e.physical_address().as_u64(), 0x0000_0012_3456_7000);
        assert_eq!(e.into_bits(), 0x8000_0012_3456_7001);
    }

    #[test]
    fn next_table_is_open() {
        let e = PageEntryBits::next_table(PhysicalAddress::new(0x5000));
        assert!(e.present() && e.writable() && e.user_access());
        assert!(!e.no_execute() && !e.large_page());
    }
}
