//! # Kernel Configuration and Boot Interface
//!
//! Shared definitions for the boot stage and the kernel proper. Nothing in
//! here allocates address space or touches hardware; it only describes it.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for the page sizes, the per-process virtual
//! windows, the identity span built at boot and the identifier spaces
//! (pids, fds, timer ids).
//!
//! ### Boot Regions ([`boot`])
//! The region table the firmware probe fills before the boot stage runs:
//! a bounded, ordered list of `(type, base, length)` descriptors. It is
//! written once during boot (physical bases may be raised past the loaded
//! image) and only read afterwards.
//!
//! ### Root Configuration ([`config`])
//! The root configuration tuple read from the boot filesystem. The resource
//! core consults three keys:
//!
//! | Key      | Effect |
//! |----------|--------|
//! | `kernel` | name of the kernel image to load |
//! | `noaslr` | present ⇒ address-space randomization disabled |
//! | `fault`  | present ⇒ fatal faults start the debug listener instead of halting |
//!
//! ### Filesystem Collaborator ([`fs`])
//! The query shape the core needs from the filesystem: read a whole file by
//! name. The on-disk layout lives elsewhere.
//!
//! ## Physical Memory at Boot
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────┐
//!             │ legacy low memory           │  mapped 1:1 while booting (0..0xA000)
//! 0x0000_1000 ├─────────────────────────────┤
//!             │ stage-2 working area (bump) │
//! 0x0000_7c00 ├─────────────────────────────┤
//!             │ boot sector + filesystem    │
//!             ├─────────────────────────────┤  pad(0x7c00 + fs_base, PAGE_SIZE)
//!             │ physical RAM (allocatable)  │
//!             └─────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod boot;
pub mod config;
pub mod fs;
pub mod memory;
