//! Collaborators the resource core calls out to.
//!
//! Everything the core does not implement itself (console, clock, signal
//! dispatch, the debug protocol, the scheduler and trap return) is reached
//! through these traits and bundled into one [`Services`] value shared by
//! every process.

use crate::fault::FaultFrame;
use crate::process::Process;
use crate::signal::SigInfo;
use crate::thread::Thread;
use crate::time::Clock;
use crate::vmap::Vmap;
use crate::ProcessError;
use alloc::sync::Arc;
use kernel_qemu::Console;
use log::warn;

/// Hands a fault-info record to a thread's signal machinery. Must not run the
/// handler synchronously.
pub trait SignalDelivery: Send + Sync {
    fn deliver_signal_to_thread(&self, thread: &Thread, info: SigInfo);
}

/// Queues the info on the thread; the scheduler dispatches it later.
#[derive(Debug, Default, Copy, Clone)]
pub struct QueueSignals;

impl SignalDelivery for QueueSignals {
    fn deliver_signal_to_thread(&self, thread: &Thread, info: SigInfo) {
        thread.signals().lock().post(info);
    }
}

/// In-band debug protocol listener.
pub trait DebugListener: Send + Sync {
    /// Bind `port` and serve `process`. The faulting thread is suspended
    /// after this returns.
    fn start(&self, process: &Arc<Process>, port: u16);
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NoDebugListener;

impl DebugListener for NoDebugListener {
    fn start(&self, process: &Arc<Process>, port: u16) {
        warn!("no debug listener available for pid {} on port {port}", process.pid());
    }
}

/// CPU-level operations of the platform layer.
pub trait Platform: Send + Sync {
    /// Ask every other CPU to stop making progress.
    fn broadcast_shutdown(&self);

    fn print_stack(&self, frame: &FaultFrame);

    /// Mark the frame's thread runnable.
    fn schedule_frame(&self, frame: &FaultFrame);

    /// Return from the trap into `frame`.
    fn frame_return(&self, frame: &FaultFrame) -> !;

    /// Enter the scheduler loop.
    fn runloop(&self) -> !;

    fn sleep_uninterruptible(&self) -> !;

    fn halt(&self, reason: &str) -> !;
}

/// Construction-time calls into the mmap and vDSO subsystems.
pub trait ProcessHooks: Send + Sync {
    /// # Errors
    /// Propagated as a process-creation failure.
    fn mmap_process_init(&self, process: &Process) -> Result<(), ProcessError>;

    /// # Errors
    /// Propagated as a process-creation failure.
    fn init_vdso(&self, process: &Process) -> Result<(), ProcessError>;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NoHooks;

impl ProcessHooks for NoHooks {
    fn mmap_process_init(&self, _process: &Process) -> Result<(), ProcessError> {
        Ok(())
    }

    fn init_vdso(&self, _process: &Process) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Fills demand pages of file-backed vmaps.
pub trait PageFiller: Send + Sync {
    /// Copy the backing bytes at `offset` into `page`. The page arrives
    /// zeroed. Returns `false` if the read failed.
    fn fill(&self, vmap: &Vmap, offset: u64, page: &mut [u8]) -> bool;
}

/// Refuses every file-backed fill.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoBacking;

impl PageFiller for NoBacking {
    fn fill(&self, vmap: &Vmap, offset: u64, _page: &mut [u8]) -> bool {
        warn!("no backing store for vmap {:#x}..{:#x} at offset {offset:#x}", vmap.start, vmap.end);
        false
    }
}

#[derive(Clone)]
pub struct Services {
    pub console: Arc<dyn Console>,
    pub clock: Arc<dyn Clock>,
    pub platform: Arc<dyn Platform>,
    pub signals: Arc<dyn SignalDelivery>,
    pub debug: Arc<dyn DebugListener>,
    pub hooks: Arc<dyn ProcessHooks>,
    pub filler: Arc<dyn PageFiller>,
}

impl Services {
    /// Queued signals, no debug listener, no hooks, no file backing.
    #[must_use]
    pub fn new(
        console: Arc<dyn Console>,
        clock: Arc<dyn Clock>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            console,
            clock,
            platform,
            signals: Arc::new(QueueSignals),
            debug: Arc::new(NoDebugListener),
            hooks: Arc::new(NoHooks),
            filler: Arc::new(NoBacking),
        }
    }

    #[must_use]
    pub fn with_signals(mut self, signals: Arc<dyn SignalDelivery>) -> Self {
        self.signals = signals;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: Arc<dyn DebugListener>) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn ProcessHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_filler(mut self, filler: Arc<dyn PageFiller>) -> Self {
        self.filler = filler;
        self
    }
}

impl core::fmt::Debug for Services {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
