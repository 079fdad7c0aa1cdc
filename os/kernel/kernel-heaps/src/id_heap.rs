use crate::bitmap::Bitmap;
use crate::rng::XorShift64;
use crate::{Heap, HeapError};
use core::fmt;
use kernel_sync::SpinLock;
use log::{trace, warn};

/// Bitmap allocator over `[base, base + length)` in multiples of `unit`.
///
/// Every allocation is a run of whole units. Placement is first-fit unless
/// randomization is enabled, in which case a uniformly chosen start is probed
/// before falling back to first-fit.
pub struct IdHeap {
    base: u64,
    length: u64,
    unit: u64,
    state: SpinLock<State>,
}

struct State {
    bitmap: Bitmap,
    /// Units currently allocated.
    allocated: u64,
    randomize: bool,
    rng: XorShift64,
}

impl IdHeap {
    /// # Errors
    /// `unit` is not a power of two, `base` is not unit-aligned, or the range
    /// is shorter than one unit or wraps the address space.
    pub fn new(base: u64, length: u64, unit: u64) -> Result<Self, HeapError> {
        if !unit.is_power_of_two() {
            return Err(HeapError::InvalidUnit(unit));
        }
        if !base.is_multiple_of(unit) {
            return Err(HeapError::Misaligned { base, unit });
        }
        if length < unit || base.checked_add(length - 1).is_none() {
            return Err(HeapError::InvalidRange { base, length });
        }

        Ok(Self {
            base,
            length,
            unit,
            state: SpinLock::new(State {
                bitmap: Bitmap::new(),
                allocated: 0,
                randomize: false,
                rng: XorShift64::from_global(),
            }),
        })
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub const fn unit(&self) -> u64 {
        self.unit
    }

    /// Bytes currently handed out.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.state.lock().allocated * self.unit
    }

    /// Bytes under management.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.length
    }

    const fn capacity(&self) -> u64 {
        self.length / self.unit
    }

    const fn units(&self, size: u64) -> Option<u64> {
        if size == 0 {
            None
        } else {
            Some(size.div_ceil(self.unit))
        }
    }

    pub fn set_randomize(&self, randomize: bool) {
        self.state.lock().randomize = randomize;
    }

    /// Allocate `size` bytes (whole units).
    pub fn alloc(&self, size: u64) -> Option<u64> {
        let count = self.units(size)?;
        let cap = self.capacity();
        let mut state = self.state.lock();

        let found = if state.randomize && count <= cap {
            let probe = state.rng.below(cap - count + 1);
            first_fit(&state.bitmap, count, probe, cap)
                .or_else(|| first_fit(&state.bitmap, count, 0, cap))
        } else {
            first_fit(&state.bitmap, count, 0, cap)
        };

        self.commit(&mut state, found, count, size)
    }

    /// Allocate `size` bytes at an address no lower than `min`.
    pub fn alloc_gte(&self, size: u64, min: u64) -> Option<u64> {
        let count = self.units(size)?;
        let cap = self.capacity();
        let from = if min <= self.base {
            0
        } else {
            (min - self.base).div_ceil(self.unit)
        };

        let mut state = self.state.lock();
        let found = first_fit(&state.bitmap, count, from, cap);
        self.commit(&mut state, found, count, size)
    }

    fn commit(&self, state: &mut State, found: Option<u64>, count: u64, size: u64) -> Option<u64> {
        let Some(start) = found else {
            warn!(
                "id heap [{:#x}, +{:#x}): no room for {size:#x} bytes ({} of {} units used)",
                self.base,
                self.length,
                state.allocated,
                self.capacity()
            );
            return None;
        };
        if !state.bitmap.set_range(start, count, true) {
            warn!(
                "id heap [{:#x}, +{:#x}): cannot track unit {start:#x}",
                self.base, self.length
            );
            return None;
        }
        state.allocated += count;
        Some(self.base + start * self.unit)
    }

    /// Release `[addr, addr + size)`. Ranges that were not fully allocated are
    /// logged and left untouched.
    pub fn dealloc(&self, addr: u64, size: u64) {
        let Some(count) = self.units(size) else {
            return;
        };
        if !self.contains(addr) || !(addr - self.base).is_multiple_of(self.unit) {
            warn!(
                "id heap [{:#x}, +{:#x}): dealloc of foreign address {addr:#x}",
                self.base, self.length
            );
            return;
        }

        let start = (addr - self.base) / self.unit;
        if start.saturating_add(count) > self.capacity() {
            warn!("id heap: dealloc {addr:#x}+{size:#x} runs past the heap end");
            return;
        }

        let mut state = self.state.lock();
        if !state.bitmap.all_used(start, count) {
            warn!("id heap: dealloc of unallocated range {addr:#x}+{size:#x}");
            return;
        }
        let _ = state.bitmap.set_range(start, count, false);
        state.allocated -= count;
    }

    /// Mark `[base, base + length)` as used or free in one step.
    ///
    /// Fails without changing anything if the range leaves the heap, if any
    /// unit is already in the requested state, or if the map cannot grow.
    pub fn set_area(&self, base: u64, length: u64, used: bool) -> bool {
        if length == 0 {
            return true;
        }
        let Some(end) = base.checked_add(length) else {
            return false;
        };
        if base < self.base || end - self.base > self.length {
            return false;
        }

        let start = (base - self.base) / self.unit;
        let count = (end - self.base).div_ceil(self.unit) - start;

        let mut state = self.state.lock();
        let conflict = if used {
            state.bitmap.any_used(start, count)
        } else {
            !state.bitmap.all_used(start, count)
        };
        if conflict {
            trace!("id heap: set_area {base:#x}+{length:#x} used={used} conflicts");
            return false;
        }

        if !state.bitmap.set_range(start, count, used) {
            return false;
        }
        if used {
            state.allocated += count;
        } else {
            state.allocated -= count;
        }
        true
    }
}

/// First run of `count` free bits in `[from, cap)`.
fn first_fit(bitmap: &Bitmap, count: u64, from: u64, cap: u64) -> Option<u64> {
    let mut start = from;
    loop {
        start = bitmap.next_free_below(start, cap)?;
        let end = start.checked_add(count)?;
        if end > cap {
            return None;
        }
        match bitmap.next_used(start, end) {
            None => return Some(start),
            Some(used) => start = used + 1,
        }
    }
}

impl Heap for IdHeap {
    fn alloc(&self, size: u64) -> Option<u64> {
        Self::alloc(self, size)
    }

    fn dealloc(&self, addr: u64, size: u64) {
        Self::dealloc(self, addr, size);
    }

    fn granularity(&self) -> u64 {
        self.unit
    }

    fn set_randomize(&self, randomize: bool) {
        Self::set_randomize(self, randomize);
    }
}

impl fmt::Debug for IdHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdHeap")
            .field("base", &format_args!("{:#x}", self.base))
            .field("length", &format_args!("{:#x}", self.length))
            .field("unit", &format_args!("{:#x}", self.unit))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(IdHeap::new(0, 100, 3).unwrap_err(), HeapError::InvalidUnit(3));
        assert_eq!(IdHeap::new(0, 100, 0).unwrap_err(), HeapError::InvalidUnit(0));
        assert!(matches!(
            IdHeap::new(0x800, 0x10000, 0x1000),
            Err(HeapError::Misaligned { .. })
        ));
        assert!(matches!(
            IdHeap::new(u64::MAX - 1, 4, 1),
            Err(HeapError::InvalidRange { .. })
        ));
    }

    #[test]
    fn zero_is_a_valid_allocation() {
        let h = IdHeap::new(0, 16, 1).unwrap();
        assert_eq!(h.alloc(1), Some(0));
        assert_eq!(h.alloc(1), Some(1));
    }

    #[test]
    fn first_fit_is_deterministic_and_increasing() {
        let h = IdHeap::new(0x1000, 0x10_0000, 0x1000).unwrap();
        let a = h.alloc(0x1000).unwrap();
        let b = h.alloc(0x1000).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b, 0x2000);
        assert_eq!(h.alloc(0x1800), Some(0x3000));
        assert_eq!(h.allocated(), 0x4000);
    }

    #[test]
    fn freed_range_is_reused() {
        let h = IdHeap::new(0, 8, 1).unwrap();
        let ids: Vec<_> = (0..8).map(|_| h.alloc(1).unwrap()).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
        assert_eq!(h.alloc(1), None);

        h.dealloc(5, 1);
        assert_eq!(h.alloc(1), Some(5));
    }

    #[test]
    fn alloc_gte_honors_minimum() {
        let h = IdHeap::new(0, u64::MAX, 1).unwrap();
        assert_eq!(h.alloc_gte(1, 2), Some(2));
        assert_eq!(h.alloc_gte(1, 0), Some(0));
        assert_eq!(h.alloc_gte(1, 0), Some(1));
        assert_eq!(h.alloc_gte(1, 0), Some(3));
        assert_eq!(h.alloc_gte(1, 1000), Some(1000));
    }

    #[test]
    fn alloc_gte_fails_iff_no_room_above_minimum() {
        let h = IdHeap::new(0, 10, 1).unwrap();
        assert_eq!(h.alloc_gte(3, 8), None);
        assert_eq!(h.alloc_gte(2, 8), Some(8));
        assert_eq!(h.alloc_gte(1, 8), None);
        assert_eq!(h.alloc_gte(1, 20), None);
        assert_eq!(h.alloc_gte(1, 7), Some(7));
    }

    #[test]
    fn untrackable_floor_fails_without_side_effects() {
        let h = IdHeap::new(0, u64::MAX, 1).unwrap();
        assert_eq!(h.alloc_gte(1, u64::MAX - 2), None);
        assert_eq!(h.allocated(), 0);
        assert_eq!(h.alloc(1), Some(0));
        assert!(!h.set_area(u64::MAX - 4, 2, true));
        assert_eq!(h.allocated(), 1);
    }

    #[test]
    fn multi_unit_runs_skip_fragments() {
        let h = IdHeap::new(0, 16, 1).unwrap();
        assert!(h.set_area(2, 1, true));
        assert!(h.set_area(5, 1, true));
        assert_eq!(h.alloc(3), Some(6));
        assert_eq!(h.alloc(2), Some(0));
        assert_eq!(h.alloc(2), Some(3));
    }

    #[test]
    fn set_area_is_all_or_nothing() {
        let h = IdHeap::new(0x1000, 0x10000, 0x1000).unwrap();
        assert!(h.set_area(0x3000, 0x2000, true));
        assert!(!h.set_area(0x2000, 0x2000, true));
        assert_eq!(h.allocated(), 0x2000);
        assert!(!h.set_area(0x2000, 0x2000, false));
        assert!(h.set_area(0x3000, 0x1000, false));
        assert_eq!(h.allocated(), 0x1000);
        assert!(!h.set_area(0x0, 0x2000, true));
        assert!(!h.set_area(0x10000, 0x2000, true));
    }

    #[test]
    fn bogus_dealloc_is_ignored() {
        let h = IdHeap::new(0x1000, 0x4000, 0x1000).unwrap();
        let a = h.alloc(0x1000).unwrap();
        h.dealloc(0x2000, 0x1000);
        h.dealloc(0x10_0000, 0x1000);
        h.dealloc(a + 1, 0x1000);
        assert_eq!(h.allocated(), 0x1000);
        h.dealloc(a, 0x1000);
        assert_eq!(h.allocated(), 0);
    }

    #[test]
    fn zero_size_requests_fail() {
        let h = IdHeap::new(0, 16, 1).unwrap();
        assert_eq!(h.alloc(0), None);
        assert_eq!(h.alloc_gte(0, 3), None);
    }

    #[test]
    fn randomized_placement_varies_and_stays_in_range() {
        let mut firsts = Vec::new();
        for _ in 0..16 {
            let h = IdHeap::new(0x10_0000, 0x1_0000_0000, 0x1000).unwrap();
            h.set_randomize(true);
            let a = h.alloc(0x4000).unwrap();
            assert!(a >= 0x10_0000 && a + 0x4000 <= 0x10_0000 + 0x1_0000_0000);
            assert!(a.is_multiple_of(0x1000));
            firsts.push(a);
        }
        firsts.sort_unstable();
        firsts.dedup();
        assert!(firsts.len() > 1);
    }

    #[test]
    fn randomized_heap_falls_back_to_first_fit() {
        let h = IdHeap::new(0, 4, 1).unwrap();
        h.set_randomize(true);
        let mut got: Vec<_> = (0..4).map(|_| h.alloc(1).unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, [0, 1, 2, 3]);
        assert_eq!(h.alloc(1), None);
    }
}
