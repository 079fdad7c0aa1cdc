use kernel_heaps::HeapError;
use kernel_vmem::VmemError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmapError {
    #[error("empty vmap [{start:#x}, {end:#x})")]
    Empty { start: u64, end: u64 },
    #[error("vmap bound {0:#x} is not page aligned")]
    Unaligned(u64),
    #[error("vmap [{start:#x}, {end:#x}) overlaps an existing vmap")]
    Overlap { start: u64, end: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("process id space exhausted")]
    PidExhausted,
    #[error("thread id space exhausted")]
    TidExhausted,
    #[error("fd space exhausted")]
    FdExhausted,
    #[error("virtual address space exhausted")]
    VirtualSpaceExhausted,
    #[error("timer id space exhausted")]
    TimerIdExhausted,
    #[error("standard descriptor landed on fd {got} instead of {expected}")]
    StdioSlot { expected: u64, got: u64 },
    #[error("process window [{base:#x}, +{length:#x}) already reserved")]
    ReservationConflict { base: u64, length: u64 },
    #[error("heap setup failed: {0}")]
    Heap(#[from] HeapError),
    #[error("{0} failed")]
    Collaborator(&'static str),
}

/// Why a demand-pageable fault could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DemandError {
    #[error("out of physical pages")]
    NoPhysicalPage,
    #[error("backing store could not fill the page at file offset {0:#x}")]
    Fill(u64),
    #[error("mapping failed: {0}")]
    Map(#[from] VmemError),
}
