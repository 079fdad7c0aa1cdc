#![allow(dead_code)]

use kernel_heaps::IdHeap;
use kernel_info::config::Tuple;
use kernel_info::fs::{FsError, Filesystem};
use kernel_info::memory::{HUGE_PAGE_SIZE, PAGE_SIZE, VIRTUAL_HUGE_HEAP_LENGTH, VIRTUAL_HUGE_HEAP_START};
use kernel_qemu::Console;
use kernel_unix::fault::{FaultFrame, FrameId, PageFaultError};
use kernel_unix::services::{DebugListener, PageFiller, Platform};
use kernel_unix::time::{Clock, Timestamp};
use kernel_unix::vmap::Vmap;
use kernel_unix::{KernelHeaps, Process, Services, Thread, Unix, init_unix};
use kernel_vmem::arena::FrameArena;
use kernel_vmem::{AddressSpace, SharedAddressSpace};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ARENA_BASE: u64 = 0x10_0000;
pub const ARENA_FRAMES: usize = 96;

pub type Pages = SharedAddressSpace<Arc<FrameArena>, Arc<IdHeap>>;

#[derive(Default)]
pub struct RecordingPlatform {
    pub shutdowns: AtomicUsize,
    pub stacks: AtomicUsize,
    pub scheduled: Mutex<Vec<FrameId>>,
}

impl Platform for RecordingPlatform {
    fn broadcast_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn print_stack(&self, _frame: &FaultFrame) {
        self.stacks.fetch_add(1, Ordering::SeqCst);
    }

    fn schedule_frame(&self, frame: &FaultFrame) {
        self.scheduled.lock().unwrap().push(frame.id);
    }

    fn frame_return(&self, _frame: &FaultFrame) -> ! {
        panic!("frame_return")
    }

    fn runloop(&self) -> ! {
        panic!("runloop")
    }

    fn sleep_uninterruptible(&self) -> ! {
        panic!("sleep_uninterruptible")
    }

    fn halt(&self, reason: &str) -> ! {
        panic!("halt: {reason}")
    }
}

#[derive(Default)]
pub struct RecordingConsole {
    pub bytes: Mutex<Vec<u8>>,
}

impl Console for RecordingConsole {
    fn write(&self, bytes: &[u8]) {
        self.bytes.lock().unwrap().extend_from_slice(bytes);
    }
}

#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, by: Timestamp) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingDebug {
    pub started: Mutex<Vec<(u64, u16)>>,
}

impl DebugListener for RecordingDebug {
    fn start(&self, process: &Arc<Process>, port: u16) {
        self.started.lock().unwrap().push((process.pid(), port));
    }
}

/// Writes the low byte of the file offset across the page.
pub struct OffsetFiller;

impl PageFiller for OffsetFiller {
    fn fill(&self, _vmap: &Vmap, offset: u64, page: &mut [u8]) -> bool {
        page.fill((offset >> 12) as u8);
        true
    }
}

pub struct NoFiles;

impl Filesystem for NoFiles {
    fn read_entire(&self, name: &str) -> Result<Vec<u8>, FsError> {
        Err(FsError::NotFound(name.into()))
    }
}

pub struct Harness {
    pub arena: Arc<FrameArena>,
    pub physical: Arc<IdHeap>,
    pub virtual_huge: Arc<IdHeap>,
    pub pages: Arc<Pages>,
    pub platform: Arc<RecordingPlatform>,
    pub console: Arc<RecordingConsole>,
    pub clock: Arc<ManualClock>,
    pub debug: Arc<RecordingDebug>,
    pub unix: Unix,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|s| s)
    }

    pub fn with(customize: impl FnOnce(Services) -> Services) -> Self {
        let arena = Arc::new(FrameArena::new(ARENA_BASE, ARENA_FRAMES));
        let physical = Arc::new(IdHeap::new(ARENA_BASE, ARENA_FRAMES as u64 * PAGE_SIZE, PAGE_SIZE).unwrap());
        let aspace = AddressSpace::new(Arc::clone(&arena), Arc::clone(&physical)).unwrap();
        let pages = Arc::new(SharedAddressSpace::new(aspace));
        let virtual_huge = Arc::new(
            IdHeap::new(VIRTUAL_HUGE_HEAP_START, VIRTUAL_HUGE_HEAP_LENGTH, HUGE_PAGE_SIZE).unwrap(),
        );

        let platform = Arc::new(RecordingPlatform::default());
        let console = Arc::new(RecordingConsole::default());
        let clock = Arc::new(ManualClock::default());
        let debug = Arc::new(RecordingDebug::default());
        let services = Services::new(console.clone(), clock.clone(), platform.clone())
            .with_debug(debug.clone())
            .with_filler(Arc::new(OffsetFiller));

        let kernel = KernelHeaps {
            physical: physical.clone(),
            virtual_huge: Arc::clone(&virtual_huge),
            pages: pages.clone(),
        };
        let unix = init_unix(kernel, Arc::new(Tuple::new()), Arc::new(NoFiles), customize(services)).unwrap();

        Self {
            arena,
            physical,
            virtual_huge,
            pages,
            platform,
            console,
            clock,
            debug,
            unix,
        }
    }

    pub fn process(&self, root: Tuple) -> Arc<Process> {
        self.unix.create_process(Arc::new(root), Arc::new(NoFiles)).unwrap()
    }

    /// A user process with one thread current on CPU 0.
    pub fn running(&self, root: Tuple) -> (Arc<Process>, Arc<Thread>) {
        let process = self.process(root);
        let thread = process.create_thread("main").unwrap();
        self.unix.install_thread(0, Arc::clone(&thread));
        (process, thread)
    }

    pub fn shutdowns(&self) -> usize {
        self.platform.shutdowns.load(Ordering::SeqCst)
    }

    pub fn scheduled(&self) -> Vec<FrameId> {
        self.platform.scheduled.lock().unwrap().clone()
    }
}

pub fn user_fault(id: u64, addr: u64, write: bool) -> FaultFrame {
    FaultFrame::page_fault(
        FrameId(id),
        addr,
        PageFaultError::new().with_user(true).with_write(write),
    )
}

pub fn kernel_fault(id: u64, addr: u64) -> FaultFrame {
    FaultFrame::page_fault(FrameId(id), addr, PageFaultError::new())
}
