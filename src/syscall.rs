//! Component E: the syscall dispatcher.
//!
//! Ground truth: `syscall()` / `sysenter()` in `kern/syscall.c`. The raw
//! `(syscallno, a1..a5)` tuple is decoded once, here, into a typed
//! [`Syscall`] variant (§9's "dispatcher as table of typed handlers"); the
//! individual `sys_*` handlers below never see an untyped `u32` argument.

use crate::env::{Env, EnvId, EnvStatus, EnvTable};
use crate::error::{SyscallError, SyscallResult};
use crate::ipc;
use crate::kernel_lock;
use crate::mm::{check_perm, check_user_va, PhysPagePool, VirtAddr};
use crate::sched;
use crate::trapframe::Trapframe;

/// Owns all kernel-global state the syscall core needs: the environment
/// table and the physical page pool. A real kernel reaches these through
/// bare statics initialized once at boot; since this crate has no boot path,
/// the state is explicit, owned data instead, which also keeps host tests
/// from treading on each other's environment tables.
pub struct KernelState {
    pub(crate) envs: EnvTable,
    pub(crate) pool: PhysPagePool,
}

impl KernelState {
    pub fn new() -> Self {
        KernelState {
            envs: EnvTable::new(),
            pool: PhysPagePool::new(),
        }
    }

    /// Creates the first environment directly, bypassing `exofork` (which
    /// requires an existing `curenv`). Stands in for the kernel's own
    /// bootstrap call to `env_create` before any user code runs.
    pub fn boot_root_env(&mut self) -> EnvId {
        let root = self
            .envs
            .alloc(EnvId(0))
            .expect("fresh kernel state always has a free env slot");
        if let Some(e) = self.envs.get_mut(root) {
            e.status = EnvStatus::Running;
        }
        self.envs.set_curenv(Some(root));
        root
    }
}

impl Default for KernelState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded syscall, one variant per entry in the syscall table (§6).
enum Syscall {
    Cputs { va: u32, len: u32 },
    Cgetc,
    GetEnvId,
    EnvDestroy { envid: u32 },
    MapKernelPage { kpage: u32, va: u32 },
    Yield,
    Exofork,
    EnvSetStatus { envid: u32, status: u32 },
    EnvSetTrapframe { envid: u32, tf: Trapframe },
    EnvSetPgfaultUpcall { envid: u32, func: u32 },
    ExecCommit { envid: u32 },
    PageAlloc { envid: u32, va: u32, perm: u32 },
    PageMap { src_envid: u32, src_va: u32, dst_envid: u32, dst_va: u32, perm: u32 },
    PageUnmap { envid: u32, va: u32 },
    IpcTrySend { to_envid: u32, value: u32, src_va: u32, perm: u32 },
    IpcRecv { dst_va: u32 },
    Sbrk { inc: u32 },
    TimeMsec,
}

use crate::abi::{
    SYS_CGETC, SYS_CPUTS, SYS_ENV_DESTROY, SYS_ENV_SET_PGFAULT_UPCALL, SYS_ENV_SET_STATUS,
    SYS_ENV_SET_TRAPFRAME, SYS_EXEC_COMMIT, SYS_EXOFORK, SYS_GETENVID, SYS_IPC_RECV,
    SYS_IPC_TRY_SEND, SYS_MAP_KERNEL_PAGE, SYS_PAGE_ALLOC, SYS_PAGE_MAP, SYS_PAGE_UNMAP, SYS_SBRK,
    SYS_TIME_MSEC, SYS_YIELD,
};

/// Decodes the raw syscall ABI tuple. `tf` supplies the trap frame for
/// `env_set_trapframe`, whose fifth argument is a pointer the caller has
/// already copied in from user memory (argument copying itself belongs to
/// the trap-entry collaborator, out of scope here).
fn decode(syscallno: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32, incoming_tf: Trapframe) -> SyscallResult<Syscall> {
    Ok(match syscallno {
        SYS_CPUTS => Syscall::Cputs { va: a1, len: a2 },
        SYS_CGETC => Syscall::Cgetc,
        SYS_GETENVID => Syscall::GetEnvId,
        SYS_ENV_DESTROY => Syscall::EnvDestroy { envid: a1 },
        SYS_MAP_KERNEL_PAGE => Syscall::MapKernelPage { kpage: a1, va: a2 },
        SYS_YIELD => Syscall::Yield,
        SYS_EXOFORK => Syscall::Exofork,
        SYS_ENV_SET_STATUS => Syscall::EnvSetStatus { envid: a1, status: a2 },
        SYS_ENV_SET_TRAPFRAME => Syscall::EnvSetTrapframe { envid: a1, tf: incoming_tf },
        SYS_ENV_SET_PGFAULT_UPCALL => Syscall::EnvSetPgfaultUpcall { envid: a1, func: a2 },
        SYS_EXEC_COMMIT => Syscall::ExecCommit { envid: a1 },
        SYS_PAGE_ALLOC => Syscall::PageAlloc { envid: a1, va: a2, perm: a3 },
        SYS_PAGE_MAP => Syscall::PageMap {
            src_envid: a1,
            src_va: a2,
            dst_envid: a3,
            dst_va: a4,
            perm: a5,
        },
        SYS_PAGE_UNMAP => Syscall::PageUnmap { envid: a1, va: a2 },
        SYS_IPC_TRY_SEND => Syscall::IpcTrySend {
            to_envid: a1,
            value: a2,
            src_va: a3,
            perm: a4,
        },
        SYS_IPC_RECV => Syscall::IpcRecv { dst_va: a1 },
        SYS_SBRK => Syscall::Sbrk { inc: a1 },
        SYS_TIME_MSEC => Syscall::TimeMsec,
        _ => return Err(SyscallError::Invalid),
    })
}

/// Entry point from the fast-syscall trap. Acquires the big kernel lock,
/// snapshots `tf` into `curenv.env_tf`, dispatches, and releases the lock
/// before returning. Matches `sysenter()` in `kern/syscall.c`.
pub(crate) fn sysenter(
    state: &mut KernelState,
    syscallno: u32,
    a1: u32,
    a2: u32,
    a3: u32,
    a4: u32,
    a5: u32,
    tf: Trapframe,
) -> i32 {
    let _guard = kernel_lock::lock_kernel();

    if let Some(env) = state.envs.curenv_mut() {
        env.tf = tf;
    }

    let result = decode(syscallno, a1, a2, a3, a4, a5, tf).and_then(|call| dispatch(state, call));

    match result {
        Ok(v) => v as i32,
        Err(e) => i32::from(e),
    }
}

fn dispatch(state: &mut KernelState, call: Syscall) -> SyscallResult<u32> {
    let curenv = state.envs.curenv_id().ok_or(SyscallError::BadEnv)?;
    match call {
        Syscall::Cputs { va, len } => sys_cputs(state, curenv, va, len).map(|_| 0),
        Syscall::Cgetc => Ok(sys_cgetc() as u32),
        Syscall::GetEnvId => Ok(curenv.0),
        Syscall::EnvDestroy { envid } => sys_env_destroy(state, curenv, envid).map(|_| 0),
        Syscall::MapKernelPage { kpage, va } => sys_map_kernel_page(state, curenv, kpage, va).map(|_| 0),
        Syscall::Yield => {
            sched::sched_yield(&mut state.envs);
            Ok(0)
        }
        Syscall::Exofork => sys_exofork(state, curenv),
        Syscall::EnvSetStatus { envid, status } => sys_env_set_status(state, curenv, envid, status).map(|_| 0),
        Syscall::EnvSetTrapframe { envid, tf } => sys_env_set_trapframe(state, curenv, envid, tf).map(|_| 0),
        Syscall::EnvSetPgfaultUpcall { envid, func } => {
            sys_env_set_pgfault_upcall(state, curenv, envid, func).map(|_| 0)
        }
        Syscall::ExecCommit { envid } => sys_exec_commit(state, curenv, envid).map(|_| 0),
        Syscall::PageAlloc { envid, va, perm } => sys_page_alloc(state, curenv, envid, va, perm).map(|_| 0),
        Syscall::PageMap {
            src_envid,
            src_va,
            dst_envid,
            dst_va,
            perm,
        } => sys_page_map(state, curenv, src_envid, src_va, dst_envid, dst_va, perm).map(|_| 0),
        Syscall::PageUnmap { envid, va } => sys_page_unmap(state, curenv, envid, va).map(|_| 0),
        Syscall::IpcTrySend {
            to_envid,
            value,
            src_va,
            perm,
        } => ipc::ipc_try_send(&mut state.envs, &mut state.pool, curenv, to_envid, value, src_va, perm),
        Syscall::IpcRecv { dst_va } => ipc::ipc_recv(&mut state.envs, &mut state.pool, curenv, dst_va),
        Syscall::Sbrk { inc } => sys_sbrk(state, curenv, inc),
        Syscall::TimeMsec => sys_time_msec(),
    }
}

// --- Component A: argument validation helpers -------------------------------

fn lookup(state: &KernelState, curenv: EnvId, envid: u32, need_perm: bool) -> SyscallResult<EnvId> {
    state.envs.lookup(envid, need_perm, curenv)
}

/// Destroys `env` if any byte in `[addr, addr+len)` is not user-accessible.
/// Here "accessible" means mapped with at least the USER+PRESENT bits in the
/// caller's own address space, since this crate has no raw-pointer user
/// memory to fault on; a real build additionally walks the hardware page
/// table. Matches `user_mem_assert`'s aggressive kill-on-violation policy
/// (§4.A, §7).
fn user_mem_assert(state: &mut KernelState, env: EnvId, addr: u32, len: u32) -> SyscallResult<()> {
    let pgsize = crate::constants::PGSIZE;
    let ok = if len == 0 {
        true
    } else {
        // The range [addr, addr+len) spans every page from addr's own page
        // through the page containing its last byte, inclusive — not just
        // len/PGSIZE pages starting at addr's page, since addr itself may be
        // misaligned.
        let first_page = addr & !(pgsize - 1);
        let last_page = addr.wrapping_add(len - 1) & !(pgsize - 1);
        let num_pages = (last_page - first_page) / pgsize + 1;
        (0..num_pages).all(|i| {
            let va = first_page + i * pgsize;
            state
                .envs
                .get(env)
                .and_then(|e| e.pgdir.lookup(VirtAddr(va)))
                .map(|(_, perm)| perm & (crate::constants::PTE_U | crate::constants::PTE_P) != 0)
                .unwrap_or(false)
        })
    };
    if ok {
        Ok(())
    } else {
        destroy(state, env, "bad user pointer");
        Err(SyscallError::Invalid)
    }
}

fn destroy(state: &mut KernelState, env: EnvId, reason: &str) {
    if let Some(e) = state.envs.get_mut(env) {
        log::warn!("destroying env {:#x}: {}", e.env_id.0, reason);
        e.pgdir.clear(&mut state.pool);
    }
    state.envs.free_slot(env);
}

// --- Component F: console ----------------------------------------------------

fn sys_cputs(state: &mut KernelState, curenv: EnvId, va: u32, len: u32) -> SyscallResult<()> {
    user_mem_assert(state, curenv, va, len)?;
    let bytes = state
        .envs
        .get(curenv)
        .ok_or(SyscallError::BadEnv)?
        .pgdir
        .read_bytes(&state.pool, va, len);
    crate::console::cputs(&bytes);
    Ok(())
}

fn sys_cgetc() -> u8 {
    crate::console::cgetc()
}

// --- Component C: environment operations ------------------------------------

fn sys_env_destroy(state: &mut KernelState, curenv: EnvId, envid: u32) -> SyscallResult<()> {
    let target = lookup(state, curenv, envid, true)?;
    if target == curenv {
        log::info!("env {:#x} exiting gracefully", curenv.0);
    } else {
        log::info!("env {:#x} destroying env {:#x}", curenv.0, target.0);
    }
    destroy(state, target, "env_destroy");
    Ok(())
}

/// `kpage` names an existing page by its pool index (standing in for a
/// kernel physical address, since this crate models physical memory as an
/// indexed pool rather than raw addresses); it is rejected if out of range.
fn sys_map_kernel_page(state: &mut KernelState, curenv: EnvId, kpage: u32, va: u32) -> SyscallResult<()> {
    check_user_va(VirtAddr(va))?;
    if kpage as usize >= crate::constants::NPAGES {
        return Err(SyscallError::Invalid);
    }
    let page = crate::mm::PageHandle(crate::mm::PageIndex(kpage as usize));
    let env = state.envs.get_mut(curenv).ok_or(SyscallError::BadEnv)?;
    env.pgdir.insert(
        &mut state.pool,
        VirtAddr(va),
        page,
        crate::constants::PTE_U | crate::constants::PTE_P | crate::constants::PTE_W,
    );
    Ok(())
}

fn sys_exofork(state: &mut KernelState, curenv: EnvId) -> SyscallResult<u32> {
    let child = state.envs.alloc(curenv)?;
    let (tf, brk) = {
        let parent = state.envs.get(curenv).ok_or(SyscallError::BadEnv)?;
        (parent.tf, parent.brk)
    };
    let child_env = state.envs.get_mut(child).ok_or(SyscallError::BadEnv)?;
    child_env.tf = tf;
    child_env.tf.set_return_value(0);
    child_env.brk = brk;
    child_env.status = EnvStatus::NotRunnable;
    Ok(child.0)
}

fn sys_env_set_status(state: &mut KernelState, curenv: EnvId, envid: u32, status: u32) -> SyscallResult<()> {
    let target = lookup(state, curenv, envid, true)?;
    let new_status = match status {
        crate::abi::ENV_RUNNABLE => EnvStatus::Runnable,
        crate::abi::ENV_NOT_RUNNABLE => EnvStatus::NotRunnable,
        _ => return Err(SyscallError::Invalid),
    };
    let env = state.envs.get_mut(target).ok_or(SyscallError::BadEnv)?;
    env.status = new_status;
    Ok(())
}

fn sys_env_set_trapframe(state: &mut KernelState, curenv: EnvId, envid: u32, tf: Trapframe) -> SyscallResult<()> {
    let target = lookup(state, curenv, envid, true)?;
    let env = state.envs.get_mut(target).ok_or(SyscallError::BadEnv)?;
    env.tf = Trapframe::sanitized_for_user(tf);
    Ok(())
}

fn sys_env_set_pgfault_upcall(state: &mut KernelState, curenv: EnvId, envid: u32, func: u32) -> SyscallResult<()> {
    let target = lookup(state, curenv, envid, true)?;
    let env = state.envs.get_mut(target).ok_or(SyscallError::BadEnv)?;
    env.pgfault_upcall = Some(func);
    Ok(())
}

/// `sys_exec_commit`. Steals the donor's address space, trap frame, upcall,
/// and break into `curenv`, then destroys the donor. Does not resume
/// `curenv` itself (no trampoline to user mode here); the caller of
/// `sysenter` observes this only as "the syscall did not return an error".
fn sys_exec_commit(state: &mut KernelState, curenv: EnvId, envid: u32) -> SyscallResult<()> {
    let donor = lookup(state, curenv, envid, true)?;
    if donor == curenv {
        return Err(SyscallError::Invalid);
    }

    let (donor_tf, donor_upcall, donor_brk) = {
        let d = state.envs.get(donor).ok_or(SyscallError::BadEnv)?;
        (d.tf, d.pgfault_upcall, d.brk)
    };

    // Swap the page directories so the donor ends up owning curenv's old
    // (now-discarded) address space and can be destroyed without leaking
    // the one curenv is about to take over.
    {
        let (cur_ptr, donor_ptr): (*mut Env, *mut Env) = {
            let cur = state.envs.get_mut(curenv).ok_or(SyscallError::BadEnv)? as *mut Env;
            let d = state.envs.get_mut(donor).ok_or(SyscallError::BadEnv)? as *mut Env;
            (cur, d)
        };
        // SAFETY: curenv != donor was checked above, so these are two
        // distinct, non-overlapping slots in the arena.
        unsafe {
            core::mem::swap(&mut (*cur_ptr).pgdir, &mut (*donor_ptr).pgdir);
        }
    }

    let cur = state.envs.get_mut(curenv).ok_or(SyscallError::BadEnv)?;
    cur.tf = donor_tf;
    cur.tf.set_return_value(0);
    cur.pgfault_upcall = donor_upcall;
    cur.brk = donor_brk;

    destroy(state, donor, "exec_commit donor");
    Ok(())
}

// --- Component B: address-space operations ----------------------------------

fn sys_page_alloc(state: &mut KernelState, curenv: EnvId, envid: u32, va: u32, perm: u32) -> SyscallResult<()> {
    let target = lookup(state, curenv, envid, true)?;
    check_user_va(VirtAddr(va))?;
    check_perm(perm)?;
    let page = state.pool.alloc()?;
    let env = state.envs.get_mut(target).ok_or(SyscallError::BadEnv)?;
    env.pgdir.insert(&mut state.pool, VirtAddr(va), page, perm);
    Ok(())
}

fn sys_page_map(
    state: &mut KernelState,
    curenv: EnvId,
    src_envid: u32,
    src_va: u32,
    dst_envid: u32,
    dst_va: u32,
    perm: u32,
) -> SyscallResult<()> {
    let src = lookup(state, curenv, src_envid, true)?;
    let dst = lookup(state, curenv, dst_envid, true)?;
    check_user_va(VirtAddr(src_va))?;
    check_user_va(VirtAddr(dst_va))?;
    check_perm(perm)?;

    let (page, src_perm) = state
        .envs
        .get(src)
        .ok_or(SyscallError::BadEnv)?
        .pgdir
        .lookup(VirtAddr(src_va))
        .ok_or(SyscallError::Invalid)?;

    if perm & crate::constants::PTE_W != 0 && src_perm & crate::constants::PTE_W == 0 {
        return Err(SyscallError::Invalid);
    }

    let dst_env = state.envs.get_mut(dst).ok_or(SyscallError::BadEnv)?;
    dst_env.pgdir.insert(&mut state.pool, VirtAddr(dst_va), page, perm);
    Ok(())
}

fn sys_page_unmap(state: &mut KernelState, curenv: EnvId, envid: u32, va: u32) -> SyscallResult<()> {
    let target = lookup(state, curenv, envid, true)?;
    check_user_va(VirtAddr(va))?;
    let env = state.envs.get_mut(target).ok_or(SyscallError::BadEnv)?;
    env.pgdir.remove(&mut state.pool, VirtAddr(va));
    Ok(())
}

fn sys_sbrk(state: &mut KernelState, curenv: EnvId, inc: u32) -> SyscallResult<u32> {
    let pgsize = crate::constants::PGSIZE;
    let rounded = (inc + pgsize - 1) / pgsize * pgsize;

    let (old_brk, new_brk) = {
        let env = state.envs.get(curenv).ok_or(SyscallError::BadEnv)?;
        let old = env.brk;
        let new = match old.checked_add(rounded) {
            Some(n) if n <= crate::constants::ULIM => n,
            _ => {
                destroy(state, curenv, "sbrk overflow");
                return Err(SyscallError::Invalid);
            }
        };
        (old, new)
    };

    let mut va = old_brk;
    while va < new_brk {
        let page = state.pool.alloc()?;
        let env = state.envs.get_mut(curenv).ok_or(SyscallError::BadEnv)?;
        env.pgdir.insert(
            &mut state.pool,
            VirtAddr(va),
            page,
            crate::constants::PTE_U | crate::constants::PTE_P | crate::constants::PTE_W,
        );
        va += pgsize;
    }

    let env = state.envs.get_mut(curenv).ok_or(SyscallError::BadEnv)?;
    env.brk = new_brk;
    Ok(new_brk)
}

/// `sys_time_msec`. See §4.F.1: the original panics here; this crate has no
/// timer collaborator wired up, so it reports "unimplemented" to the caller
/// instead of aborting the kernel.
pub(crate) fn sys_time_msec() -> SyscallResult<u32> {
    Err(SyscallError::Invalid)
}
