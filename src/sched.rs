//! Component I: the scheduler stub.
//!
//! Stands in for the round-robin scan in `kern/sched.c`. There is no
//! trap-driven run loop here (the trap entry path is out of scope), so
//! `sched_yield` is a pure state-table operation: it demotes a still-running
//! `curenv` back to `Runnable`, then promotes the next `Runnable` env in
//! slot order to `Running` and `curenv`.

use crate::env::{EnvId, EnvStatus, EnvTable};

pub(crate) fn sched_yield(envs: &mut EnvTable) {
    if let Some(cur) = envs.curenv_id() {
        if let Some(env) = envs.get_mut(cur) {
            if env.status == EnvStatus::Running {
                env.status = EnvStatus::Runnable;
            }
        }
    }

    let next = find_next_runnable(envs, envs.curenv_id());
    match next {
        Some(id) => {
            if let Some(env) = envs.get_mut(id) {
                env.status = EnvStatus::Running;
            }
            envs.set_curenv(Some(id));
        }
        None => {
            // Nobody runnable; leave curenv as-is (idle) unless it was
            // destroyed out from under us.
            if let Some(cur) = envs.curenv_id() {
                if envs.get(cur).is_none() {
                    envs.set_curenv(None);
                }
            }
        }
    }
}

fn find_next_runnable(envs: &EnvTable, after: Option<EnvId>) -> Option<EnvId> {
    let ids: alloc::vec::Vec<EnvId> = envs.iter().map(|e| e.env_id).collect();
    if ids.is_empty() {
        return None;
    }
    let start = match after {
        Some(id) => ids.iter().position(|&i| i == id).map(|p| p + 1).unwrap_or(0),
        None => 0,
    };
    for offset in 0..ids.len() {
        let idx = (start + offset) % ids.len();
        let id = ids[idx];
        if let Some(env) = envs.get(id) {
            if env.status == EnvStatus::Runnable {
                return Some(id);
            }
        }
    }
    None
}
