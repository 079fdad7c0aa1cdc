//! Per-CPU bookkeeping the fault path consults.

use crate::fault::{FaultHandler, FrameId};
use crate::thread::Thread;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};
use kernel_info::memory::MAX_CPUS;
use kernel_sync::SpinLock;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CpuState {
    Idle = 0,
    Kernel = 1,
    User = 2,
    Interrupt = 3,
}

impl CpuState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Kernel,
            2 => Self::User,
            3 => Self::Interrupt,
            _ => Self::Idle,
        }
    }
}

pub struct Cpu {
    id: usize,
    state: AtomicU8,
    current_thread: SpinLock<Option<Arc<Thread>>>,
    /// Frame of the system call this CPU is executing, if any.
    kernel_frame: SpinLock<Option<FrameId>>,
}

impl Cpu {
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self {
            id,
            state: AtomicU8::new(CpuState::Idle as u8),
            current_thread: SpinLock::new(None),
            kernel_frame: SpinLock::new(None),
        }
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> CpuState {
        CpuState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: CpuState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[must_use]
    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.current_thread.lock().clone()
    }

    /// Returns the previously installed thread.
    pub fn set_current_thread(&self, thread: Option<Arc<Thread>>) -> Option<Arc<Thread>> {
        core::mem::replace(&mut *self.current_thread.lock(), thread)
    }

    #[must_use]
    pub fn kernel_frame(&self) -> Option<FrameId> {
        *self.kernel_frame.lock()
    }

    pub fn set_kernel_frame(&self, frame: Option<FrameId>) {
        *self.kernel_frame.lock() = frame;
    }
}

impl core::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cpu")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("kernel_frame", &self.kernel_frame())
            .finish_non_exhaustive()
    }
}

/// All CPUs plus the handler for faults taken in interrupt context.
pub struct CpuTable {
    cpus: Vec<Cpu>,
    fallback: SpinLock<Option<Arc<dyn FaultHandler>>>,
}

impl CpuTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpus: (0..MAX_CPUS).map(Cpu::new).collect(),
            fallback: SpinLock::new(None),
        }
    }

    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Cpu> {
        self.cpus.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cpu> {
        self.cpus.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn install_fallback_fault_handler(&self, handler: Arc<dyn FaultHandler>) {
        *self.fallback.lock() = Some(handler);
    }

    /// The current thread's handler, or the fallback while the CPU is in
    /// interrupt context or has no thread.
    #[must_use]
    pub fn handler_for(&self, cpu: &Cpu) -> Option<Arc<dyn FaultHandler>> {
        if cpu.state() != CpuState::Interrupt
            && let Some(thread) = cpu.current_thread()
        {
            return Some(thread as Arc<dyn FaultHandler>);
        }
        self.fallback.lock().clone()
    }
}

impl Default for CpuTable {
    fn default() -> Self {
        Self::new()
    }
}
