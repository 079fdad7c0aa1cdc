//! # Unix Process Core
//!
//! Processes, threads, file descriptors, vmaps and the page-fault path of
//! the kernel. Everything outside this core (console, clock, scheduler,
//! signal dispatch, debug protocol, mmap and vDSO setup) is reached through
//! the collaborator traits in [`services`].
//!
//! ## Bring-up
//!
//! ```text
//!  init_unix ─► pid heap ─► kernel process (pid 1) ─► "dummy_thread"
//!                                                      ├─► current on every CPU
//!                                                      └─► fallback fault handler
//! ```
//!
//! ## Faults
//!
//! [`dispatch_fault`] is the divergent trap exit. The decision itself is made
//! by [`Unix::handle_fault`], which returns a [`FaultOutcome`] and never
//! diverges; see [`fault`] for the classification order.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod config;
pub mod cpu;
mod error;
pub mod fault;
pub mod fd;
mod process;
pub mod services;
pub mod signal;
pub mod stdfiles;
mod thread;
pub mod time;
pub mod timer;
mod unix;
pub mod vmap;

pub use config::ProcessConfig;
pub use cpu::{Cpu, CpuState, CpuTable};
pub use error::{DemandError, ProcessError, VmapError};
pub use fault::{FaultClass, FaultFrame, FaultHandler, FaultOutcome, FrameId, PageFaultError, classify_fault};
pub use process::{Process, ProcessHeaps};
pub use services::Services;
pub use thread::Thread;
pub use unix::{KernelHeaps, Unix, UnixHeaps, dispatch_fault, init_unix};
