//! # Processes
//!
//! A [`Process`] owns its identifier spaces (fds, tids, timer ids), its vmaps,
//! signal and time state, and for user processes the virtual address heaps
//! carved out of the kernel's huge-page heap.
//!
//! ```text
//!  kernel virtual_huge ──reserve──► [PROCESS_VIRTUAL_HEAP_START, +LENGTH)
//!                                     │
//!                                     ├─ virtual_huge  (2 MiB units)
//!                                     │    └─ virtual_page (4 KiB, grows on demand)
//!  [0, 4 GiB) ───────────────────────── virtual32 (4 KiB units)
//! ```
//!
//! Pid 1 is the kernel pseudo-process and has no process heaps.

use crate::config::ProcessConfig;
use crate::error::VmapError;
use crate::fd::{FdTable, File};
use crate::services::Services;
use crate::signal::{SigAction, SigActions, SignalState};
use crate::stdfiles::create_stdfiles;
use crate::thread::Thread;
use crate::time::{ProcessTimes, Timestamp};
use crate::timer::Timers;
use crate::unix::{KernelHeaps, UnixHeaps};
use crate::vmap::{Vmap, VmapSet};
use crate::ProcessError;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_heaps::{BackedIdHeap, IdHeap};
use kernel_info::config::Tuple;
use kernel_info::fs::Filesystem;
use kernel_info::memory::{
    HUGE_PAGE_SIZE, INITIAL_FD_CAPACITY, LOW_4G, NSIG, PAGE_SIZE, PID_BASE,
    PROCESS_VIRTUAL_HEAP_LENGTH, PROCESS_VIRTUAL_HEAP_START,
};
use kernel_sync::{RwLock, SpinLock};
use log::{error, info};

/// Virtual address heaps of a user process.
pub struct ProcessHeaps {
    /// Huge-page granular view of the process window. Always first-fit.
    pub virtual_huge: Arc<IdHeap>,
    /// Page-granular heap growing out of `virtual_huge`.
    pub virtual_page: BackedIdHeap<Arc<IdHeap>>,
    /// Mappings that must stay below 4 GiB.
    pub virtual32: IdHeap,
    /// Kernel heap holding the window reservation.
    reserved_in: Arc<IdHeap>,
}

impl ProcessHeaps {
    fn create(kernel: &KernelHeaps, aslr: bool) -> Result<Self, ProcessError> {
        let (base, length) = (PROCESS_VIRTUAL_HEAP_START, PROCESS_VIRTUAL_HEAP_LENGTH);
        let virtual_huge = Arc::new(IdHeap::new(base, length, HUGE_PAGE_SIZE)?);
        let virtual_page = BackedIdHeap::new(Arc::clone(&virtual_huge), PAGE_SIZE)?;
        let virtual32 = IdHeap::new(0, LOW_4G, PAGE_SIZE)?;

        if !kernel.virtual_huge.set_area(base, length, true) {
            error!("process window [{base:#x}, +{length:#x}) is already reserved");
            return Err(ProcessError::ReservationConflict { base, length });
        }

        if aslr {
            virtual_page.set_randomize(true);
            virtual32.set_randomize(true);
        }

        Ok(Self {
            virtual_huge,
            virtual_page,
            virtual32,
            reserved_in: Arc::clone(&kernel.virtual_huge),
        })
    }
}

impl Drop for ProcessHeaps {
    fn drop(&mut self) {
        let (base, length) = (self.virtual_huge.base(), self.virtual_huge.length());
        if !self.reserved_in.set_area(base, length, false) {
            error!("process window [{base:#x}, +{length:#x}) was not reserved");
        }
    }
}

impl core::fmt::Debug for ProcessHeaps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessHeaps")
            .field("virtual_huge", &self.virtual_huge)
            .field("virtual_page", &self.virtual_page)
            .field("virtual32", &self.virtual32)
            .finish_non_exhaustive()
    }
}

struct ThreadRegistry {
    ids: IdHeap,
    live: SpinLock<Vec<Weak<Thread>>>,
}

pub struct Process {
    pid: u64,
    config: ProcessConfig,
    root: Arc<Tuple>,
    fs: Arc<dyn Filesystem>,
    heaps: Option<ProcessHeaps>,
    vmaps: RwLock<VmapSet>,
    fds: FdTable,
    threads: ThreadRegistry,
    times: ProcessTimes,
    signals: SpinLock<SignalState>,
    sigactions: SpinLock<SigActions>,
    timers: Timers,
    brk: AtomicU64,
    unix: Arc<UnixHeaps>,
    services: Arc<Services>,
}

impl Process {
    /// Allocate a pid and build a process around it.
    ///
    /// Nothing is left behind on failure: the pid, the window reservation
    /// and any descriptors are released again.
    ///
    /// # Errors
    /// Any exhausted identifier space, a conflicting window reservation, or a
    /// failing mmap/vDSO hook.
    pub fn create(
        unix: &Arc<UnixHeaps>,
        root: Arc<Tuple>,
        fs: Arc<dyn Filesystem>,
        services: &Arc<Services>,
    ) -> Result<Arc<Self>, ProcessError> {
        let fds = FdTable::new(INITIAL_FD_CAPACITY)?;
        let tids = IdHeap::new(1, u64::MAX - 1, 1)?;
        let timers = Timers::new()?;

        let Some(pid) = unix.processes.alloc(1) else {
            error!("pid space exhausted");
            return Err(ProcessError::PidExhausted);
        };
        let config = ProcessConfig::from_root(&root);

        let heaps = if pid > PID_BASE {
            match ProcessHeaps::create(&unix.kernel, config.aslr) {
                Ok(heaps) => Some(heaps),
                Err(e) => {
                    unix.processes.dealloc(pid, 1);
                    return Err(e);
                }
            }
        } else {
            None
        };

        // From here on, dropping the process releases everything.
        let process = Arc::new(Self {
            pid,
            root,
            fs,
            heaps,
            vmaps: RwLock::new(VmapSet::new()),
            fds,
            threads: ThreadRegistry {
                ids: tids,
                live: SpinLock::new(Vec::new()),
            },
            times: ProcessTimes::new(services.clock.now()),
            signals: SpinLock::new(SignalState::new()),
            sigactions: SpinLock::new([SigAction::default(); NSIG]),
            timers,
            brk: AtomicU64::new(0),
            unix: Arc::clone(unix),
            services: Arc::clone(services),
            config,
        });

        if process.heaps.is_some() {
            services.hooks.mmap_process_init(&process)?;
            services.hooks.init_vdso(&process)?;
        }
        create_stdfiles(&process.fds, &services.console)?;

        info!(
            "created process {pid} (aslr {})",
            if process.config.aslr { "on" } else { "off" }
        );
        Ok(process)
    }

    #[must_use]
    pub const fn pid(&self) -> u64 {
        self.pid
    }

    #[must_use]
    pub const fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Root configuration tuple; also the initial working directory.
    #[must_use]
    pub fn root(&self) -> &Tuple {
        &self.root
    }

    #[must_use]
    pub fn filesystem(&self) -> &dyn Filesystem {
        &*self.fs
    }

    #[must_use]
    pub const fn heaps(&self) -> Option<&ProcessHeaps> {
        self.heaps.as_ref()
    }

    #[must_use]
    pub fn kernel_heaps(&self) -> &KernelHeaps {
        &self.unix.kernel
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    #[must_use]
    pub const fn vmaps(&self) -> &RwLock<VmapSet> {
        &self.vmaps
    }

    /// # Errors
    /// See [`VmapSet::insert`].
    pub fn add_vmap(&self, vmap: Vmap) -> Result<(), VmapError> {
        self.vmaps.write().insert(vmap)
    }

    pub fn remove_vmap(&self, start: u64) -> Option<Vmap> {
        self.vmaps.write().remove(start)
    }

    #[must_use]
    pub const fn signals(&self) -> &SpinLock<SignalState> {
        &self.signals
    }

    #[must_use]
    pub const fn sigactions(&self) -> &SpinLock<SigActions> {
        &self.sigactions
    }

    #[must_use]
    pub const fn timers(&self) -> &Timers {
        &self.timers
    }

    #[must_use]
    pub fn brk(&self) -> u64 {
        self.brk.load(Ordering::Acquire)
    }

    pub fn set_brk(&self, brk: u64) {
        self.brk.store(brk, Ordering::Release);
    }

    fn now(&self) -> Timestamp {
        self.services.clock.now()
    }

    pub fn enter_user(&self) {
        self.times.enter_user(self.now());
    }

    pub fn enter_system(&self) {
        self.times.enter_system(self.now());
    }

    pub fn pause(&self) {
        self.times.pause(self.now());
    }

    pub fn resume(&self) {
        self.times.resume(self.now());
    }

    #[must_use]
    pub fn utime(&self) -> Timestamp {
        self.times.utime(self.now())
    }

    #[must_use]
    pub fn stime(&self) -> Timestamp {
        self.times.stime(self.now())
    }

    #[must_use]
    pub const fn times(&self) -> &ProcessTimes {
        &self.times
    }

    pub fn allocate_fd(&self, file: Arc<dyn File>) -> Option<u64> {
        self.fds.allocate(file)
    }

    pub fn allocate_fd_gte(&self, min: u64, file: Arc<dyn File>) -> Option<u64> {
        self.fds.allocate_gte(min, file)
    }

    pub fn deallocate_fd(&self, fd: u64) -> Option<Arc<dyn File>> {
        self.fds.deallocate(fd)
    }

    #[must_use]
    pub fn file(&self, fd: u64) -> Option<Arc<dyn File>> {
        self.fds.get(fd)
    }

    #[must_use]
    pub const fn fds(&self) -> &FdTable {
        &self.fds
    }

    /// # Errors
    /// [`ProcessError::TidExhausted`].
    pub fn create_thread(self: &Arc<Self>, name: &str) -> Result<Arc<Thread>, ProcessError> {
        let Some(tid) = self.threads.ids.alloc(1) else {
            error!("pid {}: tid space exhausted", self.pid);
            return Err(ProcessError::TidExhausted);
        };
        let thread = Thread::new(tid, name, Arc::clone(self));
        let mut live = self.threads.live.lock();
        live.retain(|t| t.strong_count() > 0);
        live.push(Arc::downgrade(&thread));
        Ok(thread)
    }

    /// Threads that are still alive.
    #[must_use]
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.live.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn release_tid(&self, tid: u64) {
        self.threads.ids.dealloc(tid, 1);
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.unix.processes.dealloc(self.pid, 1);
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("config", &self.config)
            .field("heaps", &self.heaps)
            .field("fds", &self.fds)
            .finish_non_exhaustive()
    }
}
