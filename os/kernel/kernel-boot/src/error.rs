use kernel_info::boot::RegionTableFull;
use kernel_info::fs::FsError;
use kernel_vmem::VmemError;

/// Conditions that stop the boot. None of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error("invalid filesystem offset")]
    InvalidFilesystemOffset,
    #[error("out of physical memory for {0}")]
    NoPhysicalMemory(&'static str),
    #[error("working heap exhausted or retired")]
    WorkingHeap,
    #[error("page table setup failed: {0}")]
    PageTable(#[from] VmemError),
    #[error("filesystem mount failed: {0}")]
    Mount(FsError),
    #[error("kernel read failed: {0}")]
    KernelRead(FsError),
    #[error("kernel elf parse failed")]
    KernelElfParse,
    #[error("boot region table is full")]
    RegionTableFull,
}

impl From<RegionTableFull> for BootError {
    fn from(_: RegionTableFull) -> Self {
        Self::RegionTableFull
    }
}

/// A failed sector transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sector read of {length:#x} bytes at disk offset {offset:#x} failed")]
pub struct DiskError {
    pub offset: u64,
    pub length: u64,
}
