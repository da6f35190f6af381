//! Component D: the rendezvous-with-buffering IPC engine.
//!
//! Ground truth: `sys_ipc_try_send` / `sys_ipc_recv` in
//! `kern/syscall.c` (the "challenge problem" buffered variant, where a
//! sender that arrives first parks its message in its own env rather than
//! busy-waiting or failing).

use crate::env::{EnvId, EnvStatus, EnvTable};
use crate::error::{SyscallError, SyscallResult};
use crate::mm::{check_perm, check_user_va, PageHandle, PhysPagePool, VirtAddr};
use crate::sched;

/// `sys_ipc_try_send`. `src_va < UTOP` signals "I want to share a page";
/// sentinel values >= UTOP mean "value only".
pub(crate) fn ipc_try_send(
    envs: &mut EnvTable,
    pool: &mut PhysPagePool,
    curenv: EnvId,
    to: u32,
    value: u32,
    src_va: u32,
    perm: u32,
) -> SyscallResult<u32> {
    let target = envs.lookup(to, false, curenv)?;

    let wants_page = src_va < crate::constants::UTOP;
    let (page, granted_perm) = if wants_page {
        check_user_va(VirtAddr(src_va))?;
        check_perm(perm)?;
        let sender_pgdir_has = {
            let sender = envs.get(curenv).ok_or(SyscallError::BadEnv)?;
            sender.pgdir.lookup(VirtAddr(src_va))
        };
        let (page, existing_perm) = sender_pgdir_has.ok_or(SyscallError::Invalid)?;
        if perm & crate::constants::PTE_W != 0 && existing_perm & crate::constants::PTE_W == 0 {
            return Err(SyscallError::Invalid);
        }
        (Some(page), perm)
    } else {
        (None, 0)
    };

    let target_env = envs.get(target).ok_or(SyscallError::BadEnv)?;
    let target_ready = matches!(target_env.status, EnvStatus::BlockedRecv { .. });

    if target_ready {
        let dst_va = match &envs.get(target).unwrap().status {
            EnvStatus::BlockedRecv { dst_va } => *dst_va,
            _ => unreachable!(),
        };
        deliver(envs, pool, curenv, target, value, page, granted_perm, dst_va);
        wake(envs, target);
        Ok(0)
    } else {
        // Receiver not ready: park the message in the sender's own env and
        // block, matching the buffered-send path in the original.
        let sender = envs.get_mut(curenv).ok_or(SyscallError::BadEnv)?;
        sender.status = EnvStatus::BlockedSend {
            target,
            value,
            page,
            perm: granted_perm,
        };
        sched::sched_yield(envs);
        Ok(0)
    }
}

/// `sys_ipc_recv`. `dst_va >= UTOP` means "I don't want a page transferred".
pub(crate) fn ipc_recv(
    envs: &mut EnvTable,
    pool: &mut PhysPagePool,
    curenv: EnvId,
    dst_va: u32,
) -> SyscallResult<u32> {
    let dst_va = if dst_va < crate::constants::UTOP {
        check_user_va(VirtAddr(dst_va))?;
        Some(dst_va)
    } else {
        None
    };

    // Scan for a sender already parked waiting for us (ordering 3 in §4.D).
    let parked = envs.iter().find_map(|e| match &e.status {
        EnvStatus::BlockedSend { target, value, page, perm } if *target == curenv => {
            Some((e.env_id, *value, *page, *perm))
        }
        _ => None,
    });

    if let Some((sender, value, page, perm)) = parked {
        deliver(envs, pool, sender, curenv, value, page, perm, dst_va);
        wake(envs, sender);
        return Ok(0);
    }

    // No sender waiting: block (ordering 4 in §4.D).
    let me = envs.get_mut(curenv).ok_or(SyscallError::BadEnv)?;
    me.status = EnvStatus::BlockedRecv { dst_va };
    sched::sched_yield(envs);
    Ok(0)
}

/// Writes the message into `to`'s `ipc_from`/`ipc_value`/`ipc_perm` fields
/// and, if both sides are willing, maps `page` into `to`'s address space at
/// `dst_va`.
fn deliver(
    envs: &mut EnvTable,
    pool: &mut PhysPagePool,
    from: EnvId,
    to: EnvId,
    value: u32,
    page: Option<PageHandle>,
    perm: u32,
    dst_va: Option<u32>,
) {
    let transfer = match (page, dst_va) {
        (Some(p), Some(va)) => Some((p, va)),
        _ => None,
    };

    if let Some((page, va)) = transfer {
        if let Some(recv) = envs.get_mut(to) {
            recv.pgdir.insert(pool, VirtAddr(va), page, perm);
        }
    }

    if let Some(recv) = envs.get_mut(to) {
        recv.ipc_from = from;
        recv.ipc_value = value;
        recv.ipc_perm = if transfer.is_some() { perm } else { 0 };
    }
}

/// Wakes a blocked partner: marks it runnable and sets its saved
/// accumulator to 0, the only channel by which a blocked `ipc_try_send` /
/// `ipc_recv` is observed to return success (§4.D wakeup contract).
fn wake(envs: &mut EnvTable, who: EnvId) {
    if let Some(env) = envs.get_mut(who) {
        env.status = EnvStatus::Runnable;
        env.tf.set_return_value(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PTE_P, PTE_U, PTE_W};

    fn pair() -> (EnvTable, PhysPagePool, EnvId, EnvId) {
        let mut envs = EnvTable::new();
        let pool = PhysPagePool::new();
        let a = envs.alloc(EnvId::NONE).unwrap();
        let b = envs.alloc(EnvId::NONE).unwrap();
        envs.set_curenv(Some(a));
        (envs, pool, a, b)
    }

    #[test]
    fn receiver_already_waiting_is_woken_immediately() {
        let (mut envs, mut pool, sender, receiver) = pair();
        envs.get_mut(receiver).unwrap().status = EnvStatus::BlockedRecv { dst_va: None };

        let ret = ipc_try_send(&mut envs, &mut pool, sender, receiver.0, 7, crate::constants::UTOP, 0).unwrap();
        assert_eq!(ret, 0);

        let r = envs.get(receiver).unwrap();
        assert_eq!(r.ipc_from, sender);
        assert_eq!(r.ipc_value, 7);
        assert_eq!(r.ipc_perm, 0);
        assert_eq!(r.status, EnvStatus::Runnable);
    }

    #[test]
    fn send_before_receive_parks_sender_then_receiver_wakes_it() {
        let (mut envs, mut pool, sender, receiver) = pair();

        ipc_try_send(&mut envs, &mut pool, sender, receiver.0, 42, crate::constants::UTOP, 0).unwrap();
        match &envs.get(sender).unwrap().status {
            EnvStatus::BlockedSend { target, value, .. } => {
                assert_eq!(*target, receiver);
                assert_eq!(*value, 42);
            }
            other => panic!("expected BlockedSend, got {:?}", other),
        }

        envs.set_curenv(Some(receiver));
        let ret = ipc_recv(&mut envs, &mut pool, receiver, crate::constants::UTOP).unwrap();
        assert_eq!(ret, 0);

        let r = envs.get(receiver).unwrap();
        assert_eq!(r.ipc_from, sender);
        assert_eq!(r.ipc_value, 42);
        assert_eq!(envs.get(sender).unwrap().status, EnvStatus::Runnable);
    }

    #[test]
    fn receive_before_send_blocks_receiver_until_sender_arrives() {
        let (mut envs, mut pool, sender, receiver) = pair();

        envs.set_curenv(Some(receiver));
        ipc_recv(&mut envs, &mut pool, receiver, crate::constants::UTOP).unwrap();
        assert_eq!(envs.get(receiver).unwrap().status, EnvStatus::BlockedRecv { dst_va: None });

        envs.set_curenv(Some(sender));
        ipc_try_send(&mut envs, &mut pool, sender, receiver.0, 99, crate::constants::UTOP, 0).unwrap();

        let r = envs.get(receiver).unwrap();
        assert_eq!(r.ipc_value, 99);
        assert_eq!(r.status, EnvStatus::Runnable);
    }

    #[test]
    fn page_transfer_requires_both_sides_willing() {
        let (mut envs, mut pool, sender, receiver) = pair();
        let page = pool.alloc().unwrap();
        pool.write(page)[0] = 0xef;
        envs.get_mut(sender)
            .unwrap()
            .pgdir
            .insert(&mut pool, VirtAddr(0x400000), page, PTE_U | PTE_P | PTE_W);

        envs.get_mut(receiver).unwrap().status = EnvStatus::BlockedRecv {
            dst_va: Some(0x800000),
        };

        ipc_try_send(&mut envs, &mut pool, sender, receiver.0, 1, 0x400000, PTE_U | PTE_P | PTE_W).unwrap();

        let r = envs.get(receiver).unwrap();
        assert_eq!(r.ipc_perm, PTE_U | PTE_P | PTE_W);
        let (mapped, _) = r.pgdir.lookup(VirtAddr(0x800000)).unwrap();
        assert_eq!(pool.read(mapped)[0], 0xef);
    }

    #[test]
    fn value_only_send_when_receiver_did_not_request_a_page() {
        let (mut envs, mut pool, sender, receiver) = pair();
        let page = pool.alloc().unwrap();
        envs.get_mut(sender)
            .unwrap()
            .pgdir
            .insert(&mut pool, VirtAddr(0x400000), page, PTE_U | PTE_P);

        envs.get_mut(receiver).unwrap().status = EnvStatus::BlockedRecv { dst_va: None };

        ipc_try_send(&mut envs, &mut pool, sender, receiver.0, 5, 0x400000, PTE_U | PTE_P).unwrap();

        let r = envs.get(receiver).unwrap();
        assert_eq!(r.ipc_value, 5);
        assert_eq!(r.ipc_perm, 0);
    }

    #[test]
    fn send_cannot_escalate_write_permission() {
        let (mut envs, mut pool, sender, receiver) = pair();
        let page = pool.alloc().unwrap();
        envs.get_mut(sender)
            .unwrap()
            .pgdir
            .insert(&mut pool, VirtAddr(0x400000), page, PTE_U | PTE_P);
        envs.get_mut(receiver).unwrap().status = EnvStatus::BlockedRecv { dst_va: Some(0x800000) };

        let err = ipc_try_send(&mut envs, &mut pool, sender, receiver.0, 1, 0x400000, PTE_U | PTE_P | PTE_W)
            .unwrap_err();
        assert_eq!(err, SyscallError::Invalid);
    }
}
