//! # Stage-2 Boot
//!
//! Runs between the boot sector and the kernel, before any general heap
//! exists:
//!
//! ```text
//!  firmware regions ─► BootContext ─► filesystem_base ─► reclaim_boot_area
//!                          │                                   │
//!                     working heap                       physical heap
//!                   (transfer buffer)                  ┌──────┴──────┐
//!                          │                       boot stack   identity run
//!                        retire ─► mount ─► read "kernel"          │
//!                                                 └──► kernel_read_complete
//!                                                       ├─► load_elf
//!                                                       └─► run64
//! ```
//!
//! The disk, filesystem, ELF loader and the final jump are collaborators
//! ([`Stage2`]); the sequence itself is host-testable through [`boot`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod context;
pub mod disk;
mod error;
mod identity;
mod stage2;

pub use crate::context::{BootContext, BootStack};
pub use crate::error::{BootError, DiskError};
pub use crate::identity::build_identity_map;
pub use crate::stage2::{
    BootPlatform, ElfLoader, Handoff, KERNEL_KEY, Mount, Stage2, boot, kernel_read_complete,
    stage2_main,
};
