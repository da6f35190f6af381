//! Component H: the environment table.
//!
//! Stands in for `kern/env.c`. Envs live in a fixed-size arena; `env_id` is
//! `(generation << ENVX_BITS) | slot`, so a stale id from a freed-and-reused
//! slot is rejected instead of aliasing onto the wrong env (§9's arena /
//! generation-counter guidance).

use alloc::boxed::Box;

use crate::constants::{ENVX_BITS, NENV};
use crate::error::{SyscallError, SyscallResult};
use crate::mm::{AddressSpace, PageHandle};
use crate::trapframe::Trapframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EnvId(pub u32);

impl EnvId {
    pub(crate) const NONE: EnvId = EnvId(0);

    fn new(generation: u32, slot: usize) -> EnvId {
        EnvId((generation << ENVX_BITS) | (slot as u32))
    }

    fn slot(self) -> usize {
        (self.0 & ((1 << ENVX_BITS) - 1)) as usize
    }

    fn generation(self) -> u32 {
        self.0 >> ENVX_BITS
    }

    pub(crate) fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Folds the original's `env_status` plus the scattered `ipc_recving` /
/// `ipc_pending_*` fields into one tagged state, per §3.1 / §9.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EnvStatus {
    Runnable,
    Running,
    NotRunnable,
    Dying,
    BlockedRecv { dst_va: Option<u32> },
    BlockedSend {
        target: EnvId,
        value: u32,
        page: Option<PageHandle>,
        perm: u32,
    },
}

pub(crate) struct Env {
    pub(crate) env_id: EnvId,
    pub(crate) env_parent_id: EnvId,
    pub(crate) status: EnvStatus,
    pub(crate) tf: Trapframe,
    pub(crate) pgdir: Box<AddressSpace>,
    pub(crate) pgfault_upcall: Option<u32>,
    pub(crate) brk: u32,

    // Populated only once a receive completes; not part of the blocking
    // state machine, see §3.1.
    pub(crate) ipc_from: EnvId,
    pub(crate) ipc_value: u32,
    pub(crate) ipc_perm: u32,
}

impl Env {
    fn new(env_id: EnvId, parent: EnvId) -> Self {
        Env {
            env_id,
            env_parent_id: parent,
            status: EnvStatus::NotRunnable,
            tf: Trapframe::default(),
            pgdir: Box::new(AddressSpace::new()),
            pgfault_upcall: None,
            brk: 0,
            ipc_from: EnvId::NONE,
            ipc_value: 0,
            ipc_perm: 0,
        }
    }
}

struct Slot {
    generation: u32,
    env: Option<Env>,
}

/// The fixed-size arena of `NENV` env slots plus the single current-env
/// pointer. A real multi-CPU kernel keeps `curenv` per-CPU; this crate
/// models one CPU, recorded as an Open Question resolution in DESIGN.md.
pub(crate) struct EnvTable {
    slots: alloc::vec::Vec<Slot>,
    curenv: Option<EnvId>,
}

impl EnvTable {
    pub(crate) fn new() -> Self {
        let mut slots = alloc::vec::Vec::with_capacity(NENV);
        for _ in 0..NENV {
            slots.push(Slot {
                generation: 0,
                env: None,
            });
        }
        EnvTable {
            slots,
            curenv: None,
        }
    }

    pub(crate) fn curenv_id(&self) -> Option<EnvId> {
        self.curenv
    }

    pub(crate) fn set_curenv(&mut self, id: Option<EnvId>) {
        self.curenv = id;
    }

    pub(crate) fn curenv(&self) -> Option<&Env> {
        self.curenv.and_then(|id| self.get(id))
    }

    pub(crate) fn curenv_mut(&mut self) -> Option<&mut Env> {
        let id = self.curenv?;
        self.get_mut(id)
    }

    /// Finds a free slot, bumps its generation, and constructs a fresh env
    /// with `parent` as its `env_parent_id`. Matches `env_alloc`.
    pub(crate) fn alloc(&mut self, parent: EnvId) -> SyscallResult<EnvId> {
        let slot_idx = self
            .slots
            .iter()
            .position(|s| s.env.is_none())
            .ok_or(SyscallError::NoFreeEnv)?;
        let slot = &mut self.slots[slot_idx];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        let id = EnvId::new(slot.generation, slot_idx);
        slot.env = Some(Env::new(id, parent));
        Ok(id)
    }

    /// Releases a slot back to FREE, dropping its address-space mappings.
    /// Matches `env_destroy`'s final bookkeeping; callers are responsible
    /// for running `pgdir.clear(pool)` first with access to the page pool.
    pub(crate) fn free_slot(&mut self, id: EnvId) {
        if let Some(slot) = self.slots.get_mut(id.slot()) {
            if slot.generation == id.generation() {
                slot.env = None;
            }
        }
        if self.curenv == Some(id) {
            self.curenv = None;
        }
    }

    pub(crate) fn get(&self, id: EnvId) -> Option<&Env> {
        let slot = self.slots.get(id.slot())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.env.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.env.as_mut()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Env> {
        self.slots.iter_mut().filter_map(|s| s.env.as_mut())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Env> {
        self.slots.iter().filter_map(|s| s.env.as_ref())
    }

    /// Looks up `envid` (0 meaning "the caller"), optionally checking that
    /// `curenv` is the target or an ancestor of it. Matches `envid2env`.
    pub(crate) fn lookup(&self, envid: u32, need_perm: bool, curenv: EnvId) -> SyscallResult<EnvId> {
        if envid == 0 {
            return Ok(curenv);
        }
        let id = EnvId(envid);
        let env = self.get(id).ok_or(SyscallError::BadEnv)?;
        if need_perm {
            let mut walk = env.env_id;
            loop {
                if walk == curenv {
                    break;
                }
                let parent = self.get(walk).map(|e| e.env_parent_id);
                match parent {
                    Some(p) if p != walk => walk = p,
                    _ => return Err(SyscallError::BadEnv),
                }
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(table: &mut EnvTable) -> EnvId {
        let id = table.alloc(EnvId(0)).unwrap();
        table.set_curenv(Some(id));
        id
    }

    #[test]
    fn alloc_assigns_distinct_generation_tagged_ids() {
        let mut table = EnvTable::new();
        let a = table.alloc(EnvId::NONE).unwrap();
        let b = table.alloc(EnvId::NONE).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn stale_envid_after_free_is_rejected() {
        let mut table = EnvTable::new();
        let a = table.alloc(EnvId::NONE).unwrap();
        table.free_slot(a);
        assert!(table.get(a).is_none());

        // Recycling the slot must not resurrect the old id.
        let b = table.alloc(EnvId::NONE).unwrap();
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn lookup_allows_self_and_descendants_without_perm_check() {
        let mut table = EnvTable::new();
        let parent = root(&mut table);
        let child = table.alloc(parent).unwrap();

        assert_eq!(table.lookup(0, false, parent).unwrap(), parent);
        assert_eq!(table.lookup(child.0, false, parent).unwrap(), child);
    }

    #[test]
    fn lookup_with_perm_accepts_self_and_own_child() {
        let mut table = EnvTable::new();
        let parent = root(&mut table);
        let child = table.alloc(parent).unwrap();

        assert_eq!(table.lookup(parent.0, true, parent).unwrap(), parent);
        assert_eq!(table.lookup(child.0, true, parent).unwrap(), child);
    }

    #[test]
    fn lookup_with_perm_rejects_unrelated_env() {
        let mut table = EnvTable::new();
        let parent = root(&mut table);
        let unrelated = table.alloc(EnvId::NONE).unwrap();

        assert_eq!(table.lookup(unrelated.0, true, parent), Err(SyscallError::BadEnv));
    }

    #[test]
    fn lookup_of_unknown_envid_is_bad_env() {
        let table = EnvTable::new();
        assert_eq!(table.lookup(0xdead_beef, false, EnvId(0)), Err(SyscallError::BadEnv));
    }
}
