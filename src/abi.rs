//! Syscall numbers, mirroring `inc/syscall.h` in the original lab sources.
//! Public so callers driving [`crate::KernelState::syscall`] don't need to
//! know the dispatcher's internal table layout.

pub const SYS_CPUTS: u32 = 0;
pub const SYS_CGETC: u32 = 1;
pub const SYS_GETENVID: u32 = 2;
pub const SYS_ENV_DESTROY: u32 = 3;
pub const SYS_MAP_KERNEL_PAGE: u32 = 4;
pub const SYS_YIELD: u32 = 5;
pub const SYS_EXOFORK: u32 = 6;
pub const SYS_ENV_SET_STATUS: u32 = 7;
pub const SYS_ENV_SET_TRAPFRAME: u32 = 8;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u32 = 9;
pub const SYS_EXEC_COMMIT: u32 = 10;
pub const SYS_PAGE_ALLOC: u32 = 11;
pub const SYS_PAGE_MAP: u32 = 12;
pub const SYS_PAGE_UNMAP: u32 = 13;
pub const SYS_IPC_TRY_SEND: u32 = 14;
pub const SYS_IPC_RECV: u32 = 15;
pub const SYS_SBRK: u32 = 16;
pub const SYS_TIME_MSEC: u32 = 17;

/// `ENV_RUNNABLE`/`ENV_NOT_RUNNABLE` status values accepted by `sys_env_set_status`.
pub const ENV_RUNNABLE: u32 = 0;
pub const ENV_NOT_RUNNABLE: u32 = 1;

/// Permission bits a caller may pass to `page_alloc`/`page_map`/`ipc_try_send`.
pub const PTE_U: u32 = crate::constants::PTE_U;
pub const PTE_P: u32 = crate::constants::PTE_P;
pub const PTE_W: u32 = crate::constants::PTE_W;

/// Sentinel VA: "I don't want a page transferred / mapped".
pub const UTOP: u32 = crate::constants::UTOP;
