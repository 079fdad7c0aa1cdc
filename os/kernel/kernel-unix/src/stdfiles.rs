//! Standard input, output and error on the boot console.
//!
//! All three write to the console, including stdin: there is a single
//! console and no terminal emulation behind it. Reads always return zero
//! bytes.

use crate::fd::{EPOLLOUT, FdTable, File, IoCompletion, O_RDWR, SysReturn};
use crate::thread::Thread;
use crate::ProcessError;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_qemu::Console;
use log::debug;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StdKind {
    In,
    Out,
    Err,
}

impl StdKind {
    #[must_use]
    pub const fn fd(self) -> u64 {
        match self {
            Self::In => 0,
            Self::Out => 1,
            Self::Err => 2,
        }
    }
}

pub struct StdFile {
    kind: StdKind,
    console: Arc<dyn Console>,
    closed: AtomicBool,
}

impl StdFile {
    #[must_use]
    pub fn new(kind: StdKind, console: Arc<dyn Console>) -> Self {
        Self {
            kind,
            console,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> StdKind {
        self.kind
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn complete(thread: &Thread, completion: Option<IoCompletion>, rv: SysReturn) -> SysReturn {
    if let Some(completion) = completion {
        completion(thread, rv);
    }
    rv
}

impl File for StdFile {
    fn read(
        &self,
        dest: &mut [u8],
        offset: u64,
        thread: &Thread,
        completion: Option<IoCompletion>,
    ) -> SysReturn {
        debug!(
            "std read: dest {:p}, length {}, offset {offset}",
            dest.as_ptr(),
            dest.len()
        );
        complete(thread, completion, 0)
    }

    fn write(
        &self,
        src: &[u8],
        _offset: u64,
        thread: &Thread,
        completion: Option<IoCompletion>,
    ) -> SysReturn {
        self.console.write(src);
        let written = SysReturn::try_from(src.len()).unwrap_or(SysReturn::MAX);
        complete(thread, completion, written)
    }

    fn events(&self, _thread: &Thread) -> u32 {
        match self.kind {
            StdKind::In => 0,
            StdKind::Out | StdKind::Err => EPOLLOUT,
        }
    }

    fn close(&self) -> SysReturn {
        self.closed.store(true, Ordering::Release);
        0
    }

    fn flags(&self) -> u32 {
        O_RDWR
    }
}

/// Install stdin, stdout and stderr on descriptors 0, 1 and 2.
///
/// # Errors
/// The table is exhausted, or a descriptor landed above its fixed number
/// because the lower one was already taken.
pub fn create_stdfiles(fds: &FdTable, console: &Arc<dyn Console>) -> Result<(), ProcessError> {
    for kind in [StdKind::In, StdKind::Out, StdKind::Err] {
        let expected = kind.fd();
        let file = Arc::new(StdFile::new(kind, Arc::clone(console)));
        let got = fds
            .allocate_gte(expected, file)
            .ok_or(ProcessError::FdExhausted)?;
        if got != expected {
            fds.deallocate(got);
            return Err(ProcessError::StdioSlot { expected, got });
        }
    }
    Ok(())
}
