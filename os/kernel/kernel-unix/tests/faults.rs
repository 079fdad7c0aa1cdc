mod common;

use common::{Harness, kernel_fault, user_fault};
use kernel_info::config::Tuple;
use kernel_info::memory::{DEBUG_PORT, PAGE_SIZE};
use kernel_unix::fault::PageFaultError;
use kernel_unix::signal::{SegvCode, SigInfo};
use kernel_unix::vmap::{Vmap, VmapFlags};
use kernel_unix::{CpuState, FaultFrame, FaultOutcome, FrameId};
use kernel_vmem::{PageMapping, VirtualAddress};

const HEAP: u64 = 0x0000_0040_0000_0000;

fn anon(start: u64, pages: u64, flags: VmapFlags) -> Vmap {
    Vmap::new(start, start + pages * PAGE_SIZE, VmapFlags::ANONYMOUS | flags)
}

#[test]
fn user_fault_without_vmap_delivers_maperr() {
    let h = Harness::new();
    let (_process, thread) = h.running(Tuple::new());

    let frame = user_fault(1, 0xdead_b000, true);
    assert_eq!(h.unix.handle_fault(0, &frame), FaultOutcome::RunLoop);

    assert_eq!(
        thread.signals().lock().dequeue(),
        Some(SigInfo::segv(0xdead_b000, SegvCode::MapErr))
    );
    assert_eq!(h.scheduled(), [FrameId(1)]);
    assert_eq!(h.shutdowns(), 0);
}

#[test]
fn kernel_fault_without_vmap_is_fatal() {
    let h = Harness::new();
    let (_process, thread) = h.running(Tuple::new());

    assert_eq!(h.unix.handle_fault(0, &kernel_fault(2, 0x1234)), FaultOutcome::Halt);
    assert_eq!(h.shutdowns(), 1);
    assert_eq!(h.platform.stacks.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(thread.signals().lock().dequeue().is_none());
    assert!(h.scheduled().is_empty());
    assert!(h.debug.started.lock().unwrap().is_empty());
}

#[test]
fn user_trap_other_than_page_fault_is_fatal() {
    let h = Harness::new();
    let (_process, thread) = h.running(Tuple::new());

    let mut frame = user_fault(4, 0xdead_b000, false);
    frame.vector = 13;
    assert_eq!(h.unix.handle_fault(0, &frame), FaultOutcome::Halt);

    assert!(thread.signals().lock().dequeue().is_none());
    assert!(h.scheduled().is_empty());
    assert_eq!(h.shutdowns(), 1);
}

#[test]
fn fault_key_starts_debug_listener_instead_of_halting() {
    let h = Harness::new();
    let (process, _thread) = h.running(Tuple::new().with("fault", "t"));

    assert_eq!(h.unix.handle_fault(0, &kernel_fault(3, 0x1234)), FaultOutcome::DebugSuspend);
    assert_eq!(h.shutdowns(), 1);
    assert_eq!(*h.debug.started.lock().unwrap(), [(process.pid(), DEBUG_PORT)]);
}

#[test]
fn write_to_read_only_vmap_delivers_accerr_without_paging() {
    let h = Harness::new();
    let (process, thread) = h.running(Tuple::new());
    process.add_vmap(anon(HEAP, 4, VmapFlags::empty())).unwrap();
    let before = h.physical.allocated();

    let addr = HEAP + 0x1010;
    assert_eq!(h.unix.handle_fault(0, &user_fault(4, addr, true)), FaultOutcome::SignalDelivered);

    assert_eq!(
        thread.signals().lock().dequeue(),
        Some(SigInfo::segv(addr, SegvCode::AccErr))
    );
    assert!(h.pages.query(VirtualAddress::new(addr)).is_none());
    assert_eq!(h.physical.allocated(), before);
    assert_eq!(h.shutdowns(), 0);
}

#[test]
fn first_touch_maps_a_zeroed_page_once() {
    let h = Harness::new();
    let (process, thread) = h.running(Tuple::new());
    process.add_vmap(anon(HEAP, 4, VmapFlags::WRITABLE)).unwrap();

    let addr = HEAP + 2 * PAGE_SIZE + 0x80;
    let va = VirtualAddress::new(addr);
    assert_eq!(h.unix.handle_fault(0, &user_fault(5, addr, true)), FaultOutcome::Rescheduled);

    let pa = h.pages.query(va).expect("page mapped");
    let entry = h.pages.entry(va).unwrap();
    assert!(entry.present() && entry.writable() && entry.user_access() && entry.no_execute());
    assert!(h.arena.read(pa.align_down(PAGE_SIZE).as_u64(), PAGE_SIZE as usize).iter().all(|&b| b == 0));
    assert!(thread.signals().lock().dequeue().is_none());
    assert_eq!(h.scheduled(), [FrameId(5)]);

    // A racing second fault finds the page present and gives its frame back.
    let after_first = h.physical.allocated();
    assert_eq!(h.unix.handle_fault(0, &user_fault(6, addr, false)), FaultOutcome::Rescheduled);
    assert_eq!(h.physical.allocated(), after_first);
    assert_eq!(h.pages.query(va), Some(pa));
    assert_eq!(h.shutdowns(), 0);
}

#[test]
fn read_only_executable_vmap_maps_without_write_and_with_exec() {
    let h = Harness::new();
    let (process, _thread) = h.running(Tuple::new());
    process.add_vmap(anon(HEAP, 1, VmapFlags::EXEC)).unwrap();

    let frame = FaultFrame::page_fault(
        FrameId(7),
        HEAP,
        PageFaultError::new().with_user(true).with_instruction_fetch(true),
    );
    assert_eq!(h.unix.handle_fault(0, &frame), FaultOutcome::Rescheduled);
    let entry = h.pages.entry(VirtualAddress::new(HEAP)).unwrap();
    assert!(!entry.writable());
    assert!(!entry.no_execute());
}

#[test]
fn file_backed_vmap_is_filled_from_its_offset() {
    let h = Harness::new();
    let (process, _thread) = h.running(Tuple::new());
    let vmap = Vmap::new(HEAP, HEAP + 4 * PAGE_SIZE, VmapFlags::MMAP).with_backing(0x5000);
    process.add_vmap(vmap).unwrap();

    let addr = HEAP + 3 * PAGE_SIZE;
    assert_eq!(h.unix.handle_fault(0, &user_fault(8, addr, false)), FaultOutcome::Rescheduled);

    let pa = h.pages.query(VirtualAddress::new(addr)).unwrap();
    // offset 0x5000 + 3 pages = 0x8000
    assert_eq!(h.arena.read(pa.as_u64(), 4), [8, 8, 8, 8]);
}

#[test]
fn demand_page_under_kernel_frame_resumes_it() {
    let h = Harness::new();
    let (process, _thread) = h.running(Tuple::new());
    process.add_vmap(anon(HEAP, 1, VmapFlags::WRITABLE)).unwrap();

    let cpu = h.unix.cpu(0).unwrap();
    cpu.set_state(CpuState::User);
    cpu.set_kernel_frame(Some(FrameId(77)));

    assert_eq!(
        h.unix.handle_fault(0, &kernel_fault(77, HEAP + 8)),
        FaultOutcome::KernelFrameResumed
    );
    assert_eq!(cpu.state(), CpuState::Kernel);
    assert!(h.scheduled().is_empty());
    assert!(h.pages.query(VirtualAddress::new(HEAP)).is_some());
}

#[test]
fn corrupt_pte_is_fatal() {
    let h = Harness::new();
    let (process, _thread) = h.running(Tuple::new());
    process.add_vmap(anon(HEAP, 1, VmapFlags::WRITABLE)).unwrap();

    let frame = FaultFrame::page_fault(
        FrameId(9),
        HEAP,
        PageFaultError::new().with_user(true).with_present(true).with_reserved_bit(true),
    );
    assert_eq!(h.unix.handle_fault(0, &frame), FaultOutcome::Halt);
    assert_eq!(h.shutdowns(), 1);
}

#[test]
fn interrupt_context_uses_the_fallback_handler() {
    let h = Harness::new();
    let (process, thread) = h.running(Tuple::new());
    process.add_vmap(anon(HEAP, 1, VmapFlags::WRITABLE)).unwrap();

    let cpu = h.unix.cpu(0).unwrap();
    cpu.set_state(CpuState::Interrupt);

    // Blamed on the kernel process, which has no vmaps.
    assert_eq!(h.unix.handle_fault(0, &kernel_fault(10, HEAP)), FaultOutcome::Halt);
    assert!(thread.signals().lock().dequeue().is_none());
    assert!(h.pages.query(VirtualAddress::new(HEAP)).is_none());
    assert_eq!(h.shutdowns(), 1);
}

#[test]
fn unknown_cpu_halts() {
    let h = Harness::new();
    assert_eq!(h.unix.handle_fault(999, &kernel_fault(11, 0)), FaultOutcome::Halt);
}
