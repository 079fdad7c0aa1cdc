use crate::{BootContext, BootError, BootStack};
use kernel_heaps::{Heap, RegionHeap};
use kernel_info::boot::{Region, RegionType};
use kernel_info::memory::{IDENTITY_MAP_LENGTH, LEGACY_LOW_LENGTH};
use kernel_vmem::{
    AddressSpace, MapFlags, PhysMapper, PhysicalAddress, SharedAddressSpace, VirtualAddress,
};
use log::info;

/// The first page tables: a physical run, the boot stack and legacy low
/// memory, all mapped 1:1.
///
/// The run is taken from the physical heap and recorded as an IDENTITY
/// region; the tables themselves are carved from that region.
///
/// ```text
///  0 ──────── 0xa000        stack           pmem ─────────── pmem + 3 MiB
///  │ legacy low │    ...   │ 8K │    ...    │ identity run (tables on top) │
/// ```
///
/// # Errors
/// Physical memory exhaustion, a full region table or a page-table failure.
pub fn build_identity_map<'c, M: PhysMapper>(
    ctx: &'c BootContext,
    mapper: M,
    physical: &dyn Heap,
    stack: &BootStack,
) -> Result<SharedAddressSpace<M, RegionHeap<'c>>, BootError> {
    let pmem = physical
        .alloc(IDENTITY_MAP_LENGTH)
        .ok_or(BootError::NoPhysicalMemory("identity map"))?;
    ctx.regions()
        .lock()
        .push(Region::new(RegionType::Identity, pmem, IDENTITY_MAP_LENGTH))?;

    let mut aspace = AddressSpace::new(mapper, ctx.identity_heap())?;
    identity(&mut aspace, pmem, IDENTITY_MAP_LENGTH)?;
    identity(&mut aspace, stack.base, stack.size)?;
    identity(&mut aspace, 0, LEGACY_LOW_LENGTH)?;

    info!(
        "identity map at {}: {pmem:#x}+{IDENTITY_MAP_LENGTH:#x}, stack {:#x}",
        aspace.root(),
        stack.base
    );
    Ok(SharedAddressSpace::new(aspace))
}

fn identity<M: PhysMapper, H: Heap>(
    aspace: &mut AddressSpace<M, H>,
    base: u64,
    len: u64,
) -> Result<(), BootError> {
    aspace.map(
        VirtualAddress::new(base),
        PhysicalAddress::new(base),
        len,
        MapFlags::KERNEL_RWX,
    )?;
    Ok(())
}
