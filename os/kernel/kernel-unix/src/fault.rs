//! # Page-fault classification and handling
//!
//! ```text
//!  trap ─► not #PF ──────────────────────────────────► fatal
//!   │
//!  #PF ─► vmap lookup ──┬─ none ─────────┬─ user   ─► SIGSEGV(MAPERR), run loop
//!                       │                └─ kernel ─► fatal
//!                       ├─ reserved bit ───────────► fatal (walk dump)
//!                       ├─ protection ─────────────► SIGSEGV(ACCERR), return
//!                       └─ not present ────────────► demand page, resume
//! ```
//!
//! Fatal faults stop the other CPUs first, dump the frame, then halt or hand
//! the process to the debug listener if its root tuple carries `fault`.

use crate::cpu::{Cpu, CpuState};
use crate::error::DemandError;
use crate::process::Process;
use crate::signal::{SegvCode, SigInfo};
use crate::thread::Thread;
use crate::vmap::{Vmap, VmapFlags};
use alloc::sync::{Arc, Weak};
use bitfield_struct::bitfield;
use core::fmt;
use kernel_info::memory::{DEBUG_PORT, PAGE_SIZE, align_down};
use kernel_vmem::{MapFlags, PhysicalAddress, VirtualAddress};
use log::{debug, error};

pub const PAGE_FAULT_VECTOR: u8 = 0x0E; // 14

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 “Page-Fault Exception (#PF)”.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64, // reserved / ignored bits
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging structure (corrupt PTE)"
        } else if !self.present() {
            "Non-present page (page not mapped or swapped out)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page (likely NX or SMEP)"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }

    /// `W/R`, `U/S` and `I/D` letters.
    #[must_use]
    pub const fn letters(&self) -> [char; 3] {
        [
            if self.write() { 'W' } else { 'R' },
            if self.user() { 'U' } else { 'S' },
            if self.instruction_fetch() { 'I' } else { 'D' },
        ]
    }
}

/// Identity of a saved trap frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

/// Saved state of a trap, as far as the fault path reads it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FaultFrame {
    pub id: FrameId,
    pub vector: u8,
    pub error: PageFaultError,
    /// CR2.
    pub fault_address: u64,
    pub rip: u64,
    pub rsp: u64,
}

impl FaultFrame {
    #[must_use]
    pub const fn page_fault(id: FrameId, fault_address: u64, error: PageFaultError) -> Self {
        Self {
            id,
            vector: PAGE_FAULT_VECTOR,
            error,
            fault_address,
            rip: 0,
            rsp: 0,
        }
    }

    #[must_use]
    pub const fn is_user(&self) -> bool {
        self.error.user()
    }
}

impl fmt::Display for FaultFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {:#x}: vector {} error {:#x} cr2 {:#x} rip {:#x} rsp {:#x} ({})",
            self.id.0,
            self.vector,
            self.error.into_bits(),
            self.fault_address,
            self.rip,
            self.rsp,
            self.error.explain()
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultClass {
    /// No vmap covers the address.
    Unmapped,
    /// A paging structure has a reserved bit set.
    PteCorrupt,
    /// Access disallowed by the page or the vmap.
    Protection,
    /// Not present but permitted; populate on demand.
    Demand,
    /// Not a page fault, or nothing above applies.
    Other,
}

fn is_protection_fault(error: PageFaultError, vmap: &Vmap) -> bool {
    error.present()
        || (error.write() && !vmap.flags.contains(VmapFlags::WRITABLE))
        || (error.instruction_fetch() && !vmap.flags.contains(VmapFlags::EXEC))
}

/// Classify a fault against the vmap covering its address. Traps other than
/// #PF are [`FaultClass::Other`]; page faults are checked in a fixed order:
/// missing vmap, corrupt PTE, protection, demand.
#[must_use]
pub fn classify_fault(frame: &FaultFrame, vmap: Option<&Vmap>) -> FaultClass {
    if frame.vector != PAGE_FAULT_VECTOR {
        return FaultClass::Other;
    }
    let Some(vmap) = vmap else {
        return FaultClass::Unmapped;
    };
    if frame.error.reserved_bit() {
        FaultClass::PteCorrupt
    } else if is_protection_fault(frame.error, vmap) {
        FaultClass::Protection
    } else if !frame.error.present() {
        FaultClass::Demand
    } else {
        FaultClass::Other
    }
}

/// What the trap exit should do next.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultOutcome {
    /// ACCERR queued; return into the frame.
    SignalDelivered,
    /// Page populated; the frame was handed to the scheduler.
    Rescheduled,
    /// MAPERR queued; the frame was handed to the scheduler.
    RunLoop,
    /// Page populated under the CPU's own kernel frame; resume it directly.
    KernelFrameResumed,
    /// Fatal; stop the machine.
    Halt,
    /// Fatal; the debug listener owns the process now.
    DebugSuspend,
}

pub trait FaultHandler: Send + Sync {
    fn handle(&self, cpu: &Cpu, frame: &FaultFrame) -> FaultOutcome;
}

/// Per-thread handler. Faults are blamed on the CPU's current thread, or on
/// the bound thread in interrupt context or when the CPU has none.
#[derive(Debug, Clone)]
pub struct ThreadFaultHandler {
    thread: Weak<Thread>,
}

impl ThreadFaultHandler {
    #[must_use]
    pub const fn new(thread: Weak<Thread>) -> Self {
        Self { thread }
    }
}

impl FaultHandler for ThreadFaultHandler {
    fn handle(&self, cpu: &Cpu, frame: &FaultFrame) -> FaultOutcome {
        let current = if cpu.state() == CpuState::Interrupt {
            None
        } else {
            cpu.current_thread()
        };
        let Some(thread) = current.or_else(|| self.thread.upgrade()) else {
            error!("cpu {}: fault with no thread to blame: {frame}", cpu.id());
            return FaultOutcome::Halt;
        };
        handle_page_fault(&thread, cpu, frame)
    }
}

fn deliver_segv(thread: &Thread, frame: &FaultFrame, code: SegvCode) {
    debug!(
        "tid {}: {} at {:#x}",
        thread.tid(),
        code.name(),
        frame.fault_address
    );
    let process = thread.process();
    process
        .services()
        .signals
        .deliver_signal_to_thread(thread, SigInfo::segv(frame.fault_address, code));
}

fn handle_page_fault(thread: &Arc<Thread>, cpu: &Cpu, frame: &FaultFrame) -> FaultOutcome {
    let process = thread.process();
    let vaddr = frame.fault_address;
    // Copy out so the vmap lock is not held while paging.
    let vmap = process.vmaps().read().lookup(vaddr).copied();
    let class = classify_fault(frame, vmap.as_ref());

    let [w, u, i] = frame.error.letters();
    match &vmap {
        Some(v) => debug!(
            "fault {class:?}: vaddr {vaddr:#x} rip {:#x} {w}{u}{i} vmap [{:#x}, {:#x}) {}",
            frame.rip, v.start, v.end, v.flags
        ),
        None => debug!(
            "fault {class:?}: vaddr {vaddr:#x} rip {:#x} {w}{u}{i} no vmap",
            frame.rip
        ),
    }

    match (class, vmap) {
        (FaultClass::Unmapped, _) if frame.is_user() => {
            deliver_segv(thread, frame, SegvCode::MapErr);
            process.services().platform.schedule_frame(frame);
            FaultOutcome::RunLoop
        }
        (FaultClass::Unmapped, _) => {
            error!("no vmap found for kernel fault at {vaddr:#x}");
            fatal(process, cpu, frame, false)
        }
        (FaultClass::PteCorrupt, _) => {
            error!("bad PTE for {vaddr:#x}");
            fatal(process, cpu, frame, true)
        }
        (FaultClass::Protection, _) => {
            deliver_segv(thread, frame, SegvCode::AccErr);
            FaultOutcome::SignalDelivered
        }
        (FaultClass::Demand, Some(vmap)) => match demand_page(process, &vmap, vaddr) {
            Ok(()) if cpu.kernel_frame() == Some(frame.id) => {
                cpu.set_state(CpuState::Kernel);
                FaultOutcome::KernelFrameResumed
            }
            Ok(()) => {
                process.services().platform.schedule_frame(frame);
                FaultOutcome::Rescheduled
            }
            Err(e) => {
                error!("unable to demand page {vaddr:#x}: {e}");
                fatal(process, cpu, frame, false)
            }
        },
        _ => fatal(process, cpu, frame, false),
    }
}

/// Back the page holding `vaddr` with a fresh physical page.
///
/// A concurrent fault on another CPU may have mapped the page already; the
/// loser returns its page and succeeds.
fn demand_page(process: &Process, vmap: &Vmap, vaddr: u64) -> Result<(), DemandError> {
    let kernel = process.kernel_heaps();
    let page_va = align_down(vaddr, PAGE_SIZE);
    let pa = kernel
        .physical
        .alloc(PAGE_SIZE)
        .ok_or(DemandError::NoPhysicalPage)?;

    let file_offset = vmap.backing.map(|base| base + (page_va - vmap.start));
    let filler = &process.services().filler;
    let mut filled = true;
    kernel.pages.with_page(PhysicalAddress::new(pa), &mut |page: &mut [u8]| {
        page.fill(0);
        if let Some(offset) = file_offset {
            filled = filler.fill(vmap, offset, page);
        }
    });
    if !filled {
        kernel.physical.dealloc(pa, PAGE_SIZE);
        return Err(DemandError::Fill(file_offset.unwrap_or_default()));
    }

    let mut flags = MapFlags::USER;
    if vmap.flags.contains(VmapFlags::WRITABLE) {
        flags |= MapFlags::WRITABLE;
    }
    if vmap.flags.contains(VmapFlags::EXEC) {
        flags |= MapFlags::EXEC;
    }
    match kernel
        .pages
        .map_page_if_absent(VirtualAddress::new(page_va), PhysicalAddress::new(pa), flags)
    {
        Ok(true) => Ok(()),
        Ok(false) => {
            debug!("page {page_va:#x} already present");
            kernel.physical.dealloc(pa, PAGE_SIZE);
            Ok(())
        }
        Err(e) => {
            kernel.physical.dealloc(pa, PAGE_SIZE);
            Err(e.into())
        }
    }
}

fn fatal(process: &Arc<Process>, cpu: &Cpu, frame: &FaultFrame, dump_walk: bool) -> FaultOutcome {
    let services = process.services();
    services.platform.broadcast_shutdown();

    error!("cpu {}: unhandled fault in pid {}", cpu.id(), process.pid());
    error!("{frame}");
    services.platform.print_stack(frame);
    if dump_walk {
        process
            .kernel_heaps()
            .pages
            .dump_walk(VirtualAddress::new(frame.fault_address));
    }

    if process.config().debug_on_fault {
        error!("starting debug listener on port {DEBUG_PORT}");
        services.debug.start(process, DEBUG_PORT);
        FaultOutcome::DebugSuspend
    } else {
        FaultOutcome::Halt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(error: PageFaultError) -> FaultFrame {
        FaultFrame::page_fault(FrameId(1), 0x7000_1234, error)
    }

    fn vmap(flags: VmapFlags) -> Vmap {
        Vmap::new(0x7000_0000, 0x7001_0000, flags)
    }

    #[test]
    fn missing_vmap_wins_over_every_page_fault_bit() {
        let e = PageFaultError::new().with_reserved_bit(true).with_present(true);
        assert_eq!(classify_fault(&frame(e), None), FaultClass::Unmapped);
    }

    #[test]
    fn reserved_bit_before_protection() {
        let e = PageFaultError::new().with_reserved_bit(true).with_write(true);
        let v = vmap(VmapFlags::ANONYMOUS);
        assert_eq!(classify_fault(&frame(e), Some(&v)), FaultClass::PteCorrupt);
    }

    #[test]
    fn protection_cases() {
        let ro = vmap(VmapFlags::ANONYMOUS);
        let rw = vmap(VmapFlags::ANONYMOUS | VmapFlags::WRITABLE);

        let write = PageFaultError::new().with_write(true).with_user(true);
        assert_eq!(classify_fault(&frame(write), Some(&ro)), FaultClass::Protection);
        assert_eq!(classify_fault(&frame(write), Some(&rw)), FaultClass::Demand);

        let fetch = PageFaultError::new().with_instruction_fetch(true);
        assert_eq!(classify_fault(&frame(fetch), Some(&rw)), FaultClass::Protection);

        let present_read = PageFaultError::new().with_present(true);
        assert_eq!(classify_fault(&frame(present_read), Some(&rw)), FaultClass::Protection);
    }

    #[test]
    fn read_of_absent_page_is_demand() {
        let v = vmap(VmapFlags::ANONYMOUS);
        assert_eq!(classify_fault(&frame(PageFaultError::new()), Some(&v)), FaultClass::Demand);
    }

    #[test]
    fn other_vectors_are_not_classified() {
        let mut f = frame(PageFaultError::new());
        f.vector = 13;
        let v = vmap(VmapFlags::ANONYMOUS);
        assert_eq!(classify_fault(&f, Some(&v)), FaultClass::Other);
        assert_eq!(classify_fault(&f, None), FaultClass::Other);
    }

    #[test]
    fn error_letters() {
        let e = PageFaultError::from_bits(0b1_0110);
        assert_eq!(e.letters(), ['W', 'U', 'I']);
        assert_eq!(PageFaultError::new().letters(), ['R', 'S', 'D']);
    }
}
