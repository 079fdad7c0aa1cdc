//! Per-process user/system time accounting.
//!
//! Each mode transition closes the open interval into the bucket of the mode
//! being left. Queries add the still-open interval without taking a lock.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Monotonic nanoseconds.
pub type Timestamp = u64;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug)]
pub struct ProcessTimes {
    utime: AtomicU64,
    stime: AtomicU64,
    /// Start of the open interval.
    start_time: AtomicU64,
    sysctx: AtomicBool,
    paused: AtomicBool,
}

impl ProcessTimes {
    /// Starts in user mode with nothing accrued.
    #[must_use]
    pub const fn new(now: Timestamp) -> Self {
        Self {
            utime: AtomicU64::new(0),
            stime: AtomicU64::new(0),
            start_time: AtomicU64::new(now),
            sysctx: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn in_system(&self) -> bool {
        self.sysctx.load(Ordering::Acquire)
    }

    fn bucket(&self, system: bool) -> &AtomicU64 {
        if system { &self.stime } else { &self.utime }
    }

    /// Close the open interval into the current bucket, unless paused.
    fn accrue(&self, now: Timestamp) {
        if self.paused.swap(false, Ordering::AcqRel) {
            self.start_time.store(now, Ordering::Release);
            return;
        }
        let start = self.start_time.swap(now, Ordering::AcqRel);
        self.bucket(self.in_system())
            .fetch_add(now.saturating_sub(start), Ordering::AcqRel);
    }

    fn switch(&self, now: Timestamp, system: bool) {
        if self.in_system() != system {
            self.accrue(now);
            self.sysctx.store(system, Ordering::Release);
        }
    }

    pub fn enter_user(&self, now: Timestamp) {
        self.switch(now, false);
    }

    pub fn enter_system(&self, now: Timestamp) {
        self.switch(now, true);
    }

    /// Stop the clock without leaving the current mode.
    pub fn pause(&self, now: Timestamp) {
        if !self.paused.load(Ordering::Acquire) {
            self.accrue(now);
            self.paused.store(true, Ordering::Release);
        }
    }

    /// Restart the clock after [`pause`](Self::pause). No effect otherwise.
    pub fn resume(&self, now: Timestamp) {
        if self.paused.load(Ordering::Acquire) {
            self.start_time.store(now, Ordering::Release);
            self.paused.store(false, Ordering::Release);
        }
    }

    fn read(&self, now: Timestamp, system: bool) -> Timestamp {
        let accrued = self.bucket(system).load(Ordering::Acquire);
        if self.in_system() == system && !self.paused.load(Ordering::Acquire) {
            accrued + now.saturating_sub(self.start_time.load(Ordering::Acquire))
        } else {
            accrued
        }
    }

    #[must_use]
    pub fn utime(&self, now: Timestamp) -> Timestamp {
        self.read(now, false)
    }

    #[must_use]
    pub fn stime(&self, now: Timestamp) -> Timestamp {
        self.read(now, true)
    }
}
