//! Kernel image load and hand-off.

use crate::disk::{BlockDevice, SectorIo, Stage2Disk};
use crate::identity::build_identity_map;
use crate::{BootContext, BootError, BootStack};
use alloc::string::ToString;
use alloc::sync::Arc;
use core::fmt::Display;
use kernel_heaps::Heap;
use kernel_info::boot::RawRegion;
use kernel_info::config::Tuple;
use kernel_info::fs::{Filesystem, FsError};
use kernel_info::memory::{BOOT_FS_BLOCK_SIZE, BOOT_FS_SIZE};
use kernel_vmem::{PageMapping, PhysMapper};
use log::{LevelFilter, error, info};

/// Root tuple key naming the kernel image.
pub const KERNEL_KEY: &str = "kernel";

/// Builds the filesystem view over the boot disk.
pub trait Mount: Send + Sync {
    /// # Errors
    /// The image on `disk` is unreadable or malformed.
    fn mount(
        &self,
        disk: Arc<dyn BlockDevice>,
        block_size: u64,
        size: u64,
    ) -> Result<(Tuple, Arc<dyn Filesystem>), FsError>;
}

/// Maps the segments of an ELF image into `pages` and returns its entry,
/// `None` if the image does not parse.
pub trait ElfLoader: Send + Sync {
    fn load_elf(
        &self,
        image: &[u8],
        base: u64,
        pages: &dyn PageMapping,
        physical: &dyn Heap,
    ) -> Option<u64>;
}

/// The two ways out of stage 2.
pub trait BootPlatform: Send + Sync {
    /// Enter long mode at `entry` on the stack ending at `stack_top`.
    fn run64(&self, entry: u64, stack_top: u64) -> !;

    fn halt(&self, reason: &dyn Display) -> !;
}

/// Collaborators of stage 2.
#[derive(Clone)]
pub struct Stage2 {
    pub io: Arc<dyn SectorIo>,
    pub mount: Arc<dyn Mount>,
    pub loader: Arc<dyn ElfLoader>,
    pub platform: Arc<dyn BootPlatform>,
}

/// Where the kernel starts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub entry: u64,
    pub stack: BootStack,
}

/// Map the identity run and load `image` into it.
///
/// # Errors
/// [`BootError::KernelElfParse`] if the loader rejects the image, or any
/// failure of [`build_identity_map`].
pub fn kernel_read_complete<M: PhysMapper>(
    ctx: &BootContext,
    mapper: M,
    physical: &dyn Heap,
    stack: &BootStack,
    image: &[u8],
    loader: &dyn ElfLoader,
) -> Result<u64, BootError> {
    let pages = build_identity_map(ctx, mapper, physical, stack)?;
    // SAFETY: the tree maps the identity run, the stack we run on and the
    // legacy low area this code lives in.
    pages.with(|aspace| unsafe { aspace.activate() });

    let entry = loader
        .load_elf(image, 0, &pages, physical)
        .ok_or(BootError::KernelElfParse)?;
    info!("kernel entry at {entry:#x}");
    Ok(entry)
}

/// Everything between the firmware region table and the kernel entry.
///
/// # Errors
/// Any [`BootError`]; none of them can be recovered from.
pub fn boot<M: PhysMapper>(
    ctx: &BootContext,
    mapper: M,
    stage2: &Stage2,
) -> Result<Handoff, BootError> {
    let fsb = ctx.filesystem_base()?;
    info!("filesystem at disk offset {fsb:#x}");
    ctx.reclaim_boot_area(fsb);

    let physical = ctx.physical_heap();
    let stack = ctx.allocate_stack(&physical)?;

    let transfer = ctx
        .alloc_working(BOOT_FS_BLOCK_SIZE)
        .ok_or(BootError::WorkingHeap)?;
    let disk = Arc::new(Stage2Disk::new(fsb, transfer, Arc::clone(&stage2.io)));
    ctx.retire_working();

    let (root, fs) = stage2
        .mount
        .mount(disk, BOOT_FS_BLOCK_SIZE, BOOT_FS_SIZE)
        .map_err(BootError::Mount)?;
    let name = root
        .get_str(KERNEL_KEY)
        .ok_or_else(|| BootError::KernelRead(FsError::NotFound(KERNEL_KEY.to_string())))?;
    let image = fs.read_entire(name).map_err(BootError::KernelRead)?;
    info!("kernel image {name}: {:#x} bytes", image.len());

    let entry = kernel_read_complete(ctx, mapper, &physical, &stack, &image, stage2.loader.as_ref())?;
    Ok(Handoff { entry, stack })
}

/// Stage-2 entry. Never returns: it either jumps to the kernel or halts.
pub fn stage2_main<M: PhysMapper>(raw: &[RawRegion], mapper: M, stage2: &Stage2) -> ! {
    // A logger installed by an earlier stage stays in place.
    let _ = kernel_qemu::init_logger(LevelFilter::Info);

    let result = BootContext::from_raw(raw).and_then(|ctx| boot(&ctx, mapper, stage2));
    match result {
        Ok(handoff) => stage2
            .platform
            .run64(handoff.entry, handoff.stack.top()),
        Err(e) => {
            error!("boot failed: {e}");
            stage2.platform.halt(&e)
        }
    }
}
