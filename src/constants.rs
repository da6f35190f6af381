//! Layout/ABI constants, trimmed to the ones this crate's syscall core
//! actually consults. Ground truth for the values: `inc/mmu.h` /
//! `inc/memlayout.h` in the original lab sources.

pub(crate) const PGSIZE: u32 = 4096;

pub(crate) const PTE_U: u32 = 0x4;
pub(crate) const PTE_W: u32 = 0x2;
pub(crate) const PTE_P: u32 = 0x1;
pub(crate) const PTE_AVAIL: u32 = 0x00000e00; // unused bits available for software

// Top of user address space. The original derives this from a chain of
// MMIO/recursive-pgdir/RO-envs regions this crate has no hardware
// counterpart for; kept as one flat constant instead.
pub(crate) const UTOP: u32 = 0xef800000;
pub(crate) const ULIM: u32 = UTOP;

pub(crate) const NENV: usize = 1 << 10;
pub(crate) const ENVX_BITS: u32 = 10; // log2(NENV), width of the slot field in an EnvId

pub(crate) const NPAGES: usize = 1 << 15;

// EFLAGS interrupt-enable bit.
pub(crate) const FL_IF: u32 = 0x00000200;

// GDT selector indices for the user code/data segments, matching the
// teacher's segment layout (RPL in the low 2 bits).
pub(crate) const GDT_USER_CODE: u32 = 0x18;
pub(crate) const GDT_USER_DATA: u32 = 0x20;
pub(crate) const DPL_USER: u32 = 3;
