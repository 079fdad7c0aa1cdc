//! POSIX timer ids and interval-timer slots. Arming and expiry belong to the
//! timer subsystem; only the bookkeeping lives here.

use crate::time::Timestamp;
use alloc::vec::Vec;
use kernel_heaps::{HeapError, IdHeap};
use kernel_info::memory::{INITIAL_POSIX_TIMERS, ITIMER_COUNT, POSIX_TIMER_ID_LIMIT};
use kernel_sync::SpinLock;
use log::error;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timer {
    pub expiry: Timestamp,
    /// Zero for one-shot timers.
    pub interval: Timestamp,
}

#[derive(Debug)]
pub struct Timers {
    ids: IdHeap,
    posix: SpinLock<Vec<Option<Timer>>>,
    itimers: SpinLock<[Option<Timer>; ITIMER_COUNT]>,
}

impl Timers {
    /// # Errors
    /// The id heap could not be set up.
    pub fn new() -> Result<Self, HeapError> {
        Ok(Self {
            ids: IdHeap::new(0, POSIX_TIMER_ID_LIMIT, 1)?,
            posix: SpinLock::new(Vec::with_capacity(INITIAL_POSIX_TIMERS)),
            itimers: SpinLock::new([None; ITIMER_COUNT]),
        })
    }

    /// Register a POSIX timer under the lowest free id.
    pub fn create_posix(&self, timer: Timer) -> Option<u64> {
        let Some(id) = self.ids.alloc(1) else {
            error!("timer ids exhausted");
            return None;
        };
        let Ok(index) = usize::try_from(id) else {
            self.ids.dealloc(id, 1);
            return None;
        };
        let mut posix = self.posix.lock();
        if index >= posix.len() {
            posix.resize(index + 1, None);
        }
        posix[index] = Some(timer);
        Some(id)
    }

    #[must_use]
    pub fn posix(&self, id: u64) -> Option<Timer> {
        let index = usize::try_from(id).ok()?;
        self.posix.lock().get(index).copied().flatten()
    }

    /// Clear the slot, then release the id.
    pub fn delete_posix(&self, id: u64) -> Option<Timer> {
        let index = usize::try_from(id).ok()?;
        let timer = self.posix.lock().get_mut(index).and_then(Option::take);
        if timer.is_some() {
            self.ids.dealloc(id, 1);
        }
        timer
    }

    #[must_use]
    pub fn itimer(&self, which: usize) -> Option<Timer> {
        self.itimers.lock().get(which).copied().flatten()
    }

    /// Replace interval timer `which` (`ITIMER_REAL`, `_VIRTUAL`, `_PROF`).
    /// Returns the previous setting, or `None` for an unknown slot.
    pub fn set_itimer(&self, which: usize, timer: Option<Timer>) -> Option<Option<Timer>> {
        let mut itimers = self.itimers.lock();
        let slot = itimers.get_mut(which)?;
        Some(core::mem::replace(slot, timer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Timer = Timer {
        expiry: 100,
        interval: 0,
    };

    #[test]
    fn posix_ids_are_reused_after_delete() {
        let timers = Timers::new().unwrap();
        assert_eq!(timers.create_posix(T), Some(0));
        assert_eq!(timers.create_posix(Timer { interval: 5, ..T }), Some(1));
        assert_eq!(timers.delete_posix(0), Some(T));
        assert_eq!(timers.delete_posix(0), None);
        assert_eq!(timers.posix(1).map(|t| t.interval), Some(5));
        assert_eq!(timers.create_posix(T), Some(0));
    }

    #[test]
    fn itimer_slots_are_fixed() {
        let timers = Timers::new().unwrap();
        assert_eq!(timers.set_itimer(2, Some(T)), Some(None));
        assert_eq!(timers.itimer(2), Some(T));
        assert_eq!(timers.set_itimer(2, None), Some(Some(T)));
        assert_eq!(timers.set_itimer(ITIMER_COUNT, Some(T)), None);
    }
}
