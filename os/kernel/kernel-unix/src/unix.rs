//! Bring-up of the process layer and the trap-side entry into it.

use crate::cpu::{Cpu, CpuTable};
use crate::fault::{FaultFrame, FaultHandler, FaultOutcome};
use crate::process::Process;
use crate::services::Services;
use crate::thread::Thread;
use crate::ProcessError;
use alloc::sync::Arc;
use kernel_heaps::{Heap, HeapError, IdHeap, seed_aslr};
use kernel_info::config::Tuple;
use kernel_info::fs::Filesystem;
use kernel_info::memory::{PID_BASE, PID_LIMIT};
use kernel_vmem::PageMapping;
use log::{error, info};

/// Kernel-wide allocators the process layer draws from.
pub struct KernelHeaps {
    /// Physical pages for demand paging.
    pub physical: Arc<dyn Heap>,
    /// Huge-page granular kernel virtual heap; process windows are reserved here.
    pub virtual_huge: Arc<IdHeap>,
    /// The live page tables.
    pub pages: Arc<dyn PageMapping>,
}

pub struct UnixHeaps {
    pub kernel: KernelHeaps,
    /// Pids in `[PID_BASE, PID_LIMIT)`.
    pub processes: IdHeap,
}

impl UnixHeaps {
    /// # Errors
    /// The pid heap could not be set up.
    pub fn new(kernel: KernelHeaps) -> Result<Self, HeapError> {
        Ok(Self {
            kernel,
            processes: IdHeap::new(PID_BASE, PID_LIMIT - PID_BASE, 1)?,
        })
    }
}

pub struct Unix {
    heaps: Arc<UnixHeaps>,
    services: Arc<Services>,
    cpus: CpuTable,
    kernel_process: Arc<Process>,
    dummy_thread: Arc<Thread>,
}

/// Create the kernel process and its placeholder thread, and install that
/// thread on every CPU and as the fallback fault handler.
///
/// The placeholder stays current on a CPU until the first real thread is
/// installed there with [`Unix::install_thread`].
///
/// # Errors
/// Any allocation failure. Callers treat this as fatal.
pub fn init_unix(
    kernel: KernelHeaps,
    root: Arc<Tuple>,
    fs: Arc<dyn Filesystem>,
    services: Services,
) -> Result<Unix, ProcessError> {
    let result = build(kernel, root, fs, services);
    match &result {
        Ok(unix) => info!(
            "unix up: kernel process {}, {} cpus",
            unix.kernel_process.pid(),
            unix.cpus.len()
        ),
        Err(e) => error!("failed to allocate kernel objects: {e}"),
    }
    result
}

fn build(
    kernel: KernelHeaps,
    root: Arc<Tuple>,
    fs: Arc<dyn Filesystem>,
    services: Services,
) -> Result<Unix, ProcessError> {
    seed_aslr(services.clock.now());
    let heaps = Arc::new(UnixHeaps::new(kernel)?);
    let services = Arc::new(services);
    let kernel_process = Process::create(&heaps, root, fs, &services)?;
    let dummy_thread = kernel_process.create_thread("dummy_thread")?;

    let cpus = CpuTable::new();
    for cpu in cpus.iter() {
        cpu.set_current_thread(Some(Arc::clone(&dummy_thread)));
    }
    cpus.install_fallback_fault_handler(Arc::clone(&dummy_thread) as Arc<dyn FaultHandler>);

    Ok(Unix {
        heaps,
        services,
        cpus,
        kernel_process,
        dummy_thread,
    })
}

impl Unix {
    /// # Errors
    /// See [`Process::create`].
    pub fn create_process(
        &self,
        root: Arc<Tuple>,
        fs: Arc<dyn Filesystem>,
    ) -> Result<Arc<Process>, ProcessError> {
        Process::create(&self.heaps, root, fs, &self.services)
    }

    /// Make `thread` current on `cpu_id`. Returns the thread it replaces.
    pub fn install_thread(&self, cpu_id: usize, thread: Arc<Thread>) -> Option<Arc<Thread>> {
        self.cpus.get(cpu_id)?.set_current_thread(Some(thread))
    }

    /// Route a fault taken on `cpu_id` to the responsible handler.
    pub fn handle_fault(&self, cpu_id: usize, frame: &FaultFrame) -> FaultOutcome {
        let Some(cpu) = self.cpus.get(cpu_id) else {
            error!("fault on unknown cpu {cpu_id}: {frame}");
            return FaultOutcome::Halt;
        };
        match self.cpus.handler_for(cpu) {
            Some(handler) => handler.handle(cpu, frame),
            None => {
                error!("cpu {cpu_id}: no fault handler installed: {frame}");
                FaultOutcome::Halt
            }
        }
    }

    #[must_use]
    pub fn cpu(&self, id: usize) -> Option<&Cpu> {
        self.cpus.get(id)
    }

    #[must_use]
    pub const fn cpus(&self) -> &CpuTable {
        &self.cpus
    }

    #[must_use]
    pub const fn kernel_process(&self) -> &Arc<Process> {
        &self.kernel_process
    }

    #[must_use]
    pub const fn dummy_thread(&self) -> &Arc<Thread> {
        &self.dummy_thread
    }

    #[must_use]
    pub fn heaps(&self) -> &UnixHeaps {
        &self.heaps
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }
}

impl core::fmt::Debug for Unix {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Unix")
            .field("kernel_process", &self.kernel_process)
            .field("dummy_thread", &self.dummy_thread)
            .finish_non_exhaustive()
    }
}

/// Trap exit for a page fault: handle it, then leave through the platform.
pub fn dispatch_fault(unix: &Unix, cpu_id: usize, frame: &FaultFrame) -> ! {
    let outcome = unix.handle_fault(cpu_id, frame);
    let platform = &unix.services().platform;
    match outcome {
        FaultOutcome::SignalDelivered | FaultOutcome::KernelFrameResumed => {
            platform.frame_return(frame)
        }
        FaultOutcome::Rescheduled | FaultOutcome::RunLoop => platform.runloop(),
        FaultOutcome::DebugSuspend => platform.sleep_uninterruptible(),
        FaultOutcome::Halt => platform.halt("unhandled page fault"),
    }
}
