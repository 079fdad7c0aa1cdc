use crate::address_space::PageSize;
use crate::addresses::PhysicalAddress;
use crate::page_entry::PageEntryBits;

bitflags::bitflags! {
    /// Requested permissions of a leaf mapping. Anything not granted is
    /// denied: no `WRITABLE` ⇒ read-only, no `EXEC` ⇒ NX, no `USER` ⇒
    /// supervisor only.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct MapFlags: u8 {
        const WRITABLE = 1 << 0;
        const USER     = 1 << 1;
        const EXEC     = 1 << 2;
        const GLOBAL   = 1 << 3;
        const NO_CACHE = 1 << 4;
    }
}

impl MapFlags {
    /// Kernel read/write/execute, as used for the boot identity map.
    pub const KERNEL_RWX: Self = Self::WRITABLE.union(Self::EXEC);

    #[must_use]
    pub const fn leaf(self, pa: PhysicalAddress, size: PageSize) -> PageEntryBits {
        let mut e = PageEntryBits::new()
            .with_present(true)
            .with_writable(self.contains(Self::WRITABLE))
            .with_user_access(self.contains(Self::USER))
            .with_no_execute(!self.contains(Self::EXEC))
            .with_global_translation(self.contains(Self::GLOBAL))
            .with_cache_disabled(self.contains(Self::NO_CACHE))
            .with_large_page(!matches!(size, PageSize::Size4K));
        e.set_physical_address(pa);
        e
    }
}
