use crate::cpu::Cpu;
use crate::fault::{FaultFrame, FaultHandler, FaultOutcome, ThreadFaultHandler};
use crate::process::Process;
use crate::signal::SignalState;
use alloc::string::String;
use alloc::sync::Arc;
use kernel_sync::SpinLock;

/// A schedulable thread of a [`Process`].
///
/// Threads are created through [`Process::create_thread`]; the tid returns to
/// the process when the last reference drops.
pub struct Thread {
    tid: u64,
    name: SpinLock<String>,
    process: Arc<Process>,
    fault_handler: ThreadFaultHandler,
    signals: SpinLock<SignalState>,
}

impl Thread {
    pub(crate) fn new(tid: u64, name: &str, process: Arc<Process>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            tid,
            name: SpinLock::new(name.into()),
            process,
            fault_handler: ThreadFaultHandler::new(weak.clone()),
            signals: SpinLock::new(SignalState::new()),
        })
    }

    #[must_use]
    pub const fn tid(&self) -> u64 {
        self.tid
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.into();
    }

    #[must_use]
    pub const fn process(&self) -> &Arc<Process> {
        &self.process
    }

    #[must_use]
    pub const fn signals(&self) -> &SpinLock<SignalState> {
        &self.signals
    }
}

impl FaultHandler for Thread {
    fn handle(&self, cpu: &Cpu, frame: &FaultFrame) -> FaultOutcome {
        self.fault_handler.handle(cpu, frame)
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.process.release_tid(self.tid);
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &*self.name.lock())
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}
