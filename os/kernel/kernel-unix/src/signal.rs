//! Signal numbers, fault info records and per-process/per-thread state.

use alloc::collections::VecDeque;
use kernel_info::memory::NSIG;

pub const SIGSEGV: u32 = 11;

/// `si_code` values for `SIGSEGV`.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SegvCode {
    /// Address not mapped to an object.
    MapErr = 1,
    /// Invalid permissions for a mapped object.
    AccErr = 2,
}

impl SegvCode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MapErr => "SEGV_MAPERR",
            Self::AccErr => "SEGV_ACCERR",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SigInfo {
    pub signo: u32,
    /// Unused on Linux; always zero here.
    pub errno: i32,
    pub code: i32,
    /// Faulting address for `SIGSEGV`/`SIGBUS`.
    pub addr: u64,
}

impl SigInfo {
    #[must_use]
    pub const fn segv(addr: u64, code: SegvCode) -> Self {
        Self {
            signo: SIGSEGV,
            errno: 0,
            code: code as i32,
            addr,
        }
    }
}

/// Disposition installed with `rt_sigaction`. All zero means `SIG_DFL`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SigAction {
    pub handler: u64,
    pub flags: u64,
    pub restorer: u64,
    pub mask: u64,
}

pub type SigActions = [SigAction; NSIG];

/// Pending set, blocked mask and queued infos.
#[derive(Debug, Default)]
pub struct SignalState {
    pending: u64,
    blocked: u64,
    queued: VecDeque<SigInfo>,
}

const fn sig_bit(signo: u32) -> u64 {
    1 << (signo.wrapping_sub(1) & 63)
}

impl SignalState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            queued: VecDeque::new(),
        }
    }

    pub fn post(&mut self, info: SigInfo) {
        self.pending |= sig_bit(info.signo);
        self.queued.push_back(info);
    }

    #[must_use]
    pub const fn is_pending(&self, signo: u32) -> bool {
        self.pending & sig_bit(signo) != 0
    }

    pub const fn set_blocked(&mut self, mask: u64) {
        self.blocked = mask;
    }

    /// Oldest queued info whose signal is not blocked.
    pub fn dequeue(&mut self) -> Option<SigInfo> {
        let index = self
            .queued
            .iter()
            .position(|i| self.blocked & sig_bit(i.signo) == 0)?;
        let info = self.queued.remove(index)?;
        if !self.queued.iter().any(|i| i.signo == info.signo) {
            self.pending &= !sig_bit(info.signo);
        }
        Some(info)
    }
}
