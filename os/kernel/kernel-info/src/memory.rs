//! # Memory Layout

/// Base page granularity.
pub const PAGE_SIZE: u64 = 4096;

/// Huge page granularity; unit of the kernel's virtual huge-page heap.
pub const HUGE_PAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Start of the kernel-wide virtual huge-page heap.
pub const VIRTUAL_HUGE_HEAP_START: u64 = 0x0000_0001_0000_0000;

/// Length of the kernel-wide virtual huge-page heap.
pub const VIRTUAL_HUGE_HEAP_LENGTH: u64 = 0x0000_7f00_0000_0000 - VIRTUAL_HUGE_HEAP_START;

/// Start of the window each user process carves its address space from.
pub const PROCESS_VIRTUAL_HEAP_START: u64 = 0x0000_0070_0000_0000;

/// Length of the per-process virtual window (1 TiB).
pub const PROCESS_VIRTUAL_HEAP_LENGTH: u64 = 0x0000_0100_0000_0000;

/// Span of the 32-bit constrained heap (`MAP_32BIT`-style mappings).
pub const LOW_4G: u64 = 0x1_0000_0000;

/// Physical run identity-mapped at boot. Callers placing anything the
/// early kernel touches must stay inside this span.
pub const IDENTITY_MAP_LENGTH: u64 = 0x30_0000;

/// Legacy low memory (real-mode services, boot stack page) kept mapped 1:1.
pub const LEGACY_LOW_LENGTH: u64 = 0xa000;

/// First byte of the stage-2 working area handed out by the bump heap.
pub const BOOT_WORKING_BASE: u64 = 0x1000;

/// Load address of the boot sector; the working area ends here.
pub const BOOT_SECTOR_BASE: u64 = 0x7c00;

/// Stack carved from physical memory before entering the kernel.
pub const BOOT_STACK_SIZE: u64 = 8 * 1024;

/// Block size of the boot filesystem.
pub const BOOT_FS_BLOCK_SIZE: u64 = 512;

/// Size of the boot filesystem image.
pub const BOOT_FS_SIZE: u64 = 2 * 1024 * 1024;

/// First process id; pid 1 is the kernel pseudo-process.
pub const PID_BASE: u64 = 1;

/// Exclusive upper bound for process ids.
pub const PID_LIMIT: u64 = 65535;

/// Initial slot count of a process fd table (grows on demand).
pub const INITIAL_FD_CAPACITY: usize = 64;

/// Exclusive upper bound for file descriptor numbers.
pub const FD_LIMIT: u64 = 65536;

/// Exclusive upper bound for POSIX timer ids.
pub const POSIX_TIMER_ID_LIMIT: u64 = u32::MAX as u64;

/// Initial capacity of the POSIX timer vector.
pub const INITIAL_POSIX_TIMERS: usize = 8;

/// `ITIMER_REAL`, `ITIMER_VIRTUAL`, `ITIMER_PROF`.
pub const ITIMER_COUNT: usize = 3;

/// Number of signals, and entries in the signal-action table.
pub const NSIG: usize = 64;

/// Upper bound on execution units.
pub const MAX_CPUS: usize = 16;

/// Port the in-band debug listener binds on a fatal fault.
pub const DEBUG_PORT: u16 = 9090;

/// Capacity of the boot region table.
pub const MAX_REGIONS: usize = 16;

/// Align `x` down to a multiple of `a` (`a` a power of two).
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to a multiple of `a` (`a` a power of two).
///
/// Saturates at the highest aligned value instead of wrapping.
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    match x.checked_add(a - 1) {
        Some(v) => v & !(a - 1),
        None => align_down(u64::MAX, a),
    }
}

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(HUGE_PAGE_SIZE.is_power_of_two());
    assert!(PROCESS_VIRTUAL_HEAP_START.is_multiple_of(HUGE_PAGE_SIZE));
    assert!(PROCESS_VIRTUAL_HEAP_LENGTH.is_multiple_of(HUGE_PAGE_SIZE));
    assert!(PROCESS_VIRTUAL_HEAP_START >= VIRTUAL_HUGE_HEAP_START);
    assert!(
        PROCESS_VIRTUAL_HEAP_START + PROCESS_VIRTUAL_HEAP_LENGTH
            <= VIRTUAL_HUGE_HEAP_START + VIRTUAL_HUGE_HEAP_LENGTH
    );
    assert!(IDENTITY_MAP_LENGTH.is_multiple_of(PAGE_SIZE));
    assert!(LEGACY_LOW_LENGTH.is_multiple_of(PAGE_SIZE));
    assert!(BOOT_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(BOOT_WORKING_BASE < BOOT_SECTOR_BASE);
    assert!(PID_BASE < PID_LIMIT);
    assert!(INITIAL_FD_CAPACITY as u64 <= FD_LIMIT);
};
