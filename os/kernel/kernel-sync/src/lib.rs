//! # Kernel synchronization primitives
//!
//! Two spinning locks cover every shared structure in the resource core:
//!
//! * [`SpinLock`] guards a single allocator instance (one lock per id-heap,
//!   per region table, per fd slot vector). Callers never hold two of them at
//!   once.
//! * [`RwLock`] guards per-process collections that are read on every page
//!   fault but only written by mmap-family operations.
//!
//! Both guards release on drop, including during unwinding.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod rw_lock;
mod spin_lock;

pub use rw_lock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
