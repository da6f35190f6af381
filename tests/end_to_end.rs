//! Black-box tests exercising only the public syscall ABI, the way a user
//! program would see it — no access to internal `Env` fields. Finer-grained
//! white-box assertions (exact `ipc_value`, permission bits, generation
//! tagging) live in the unit tests alongside each module.

use exo_syscall_core::{abi, EnvId, KernelState, Trapframe};

fn tf() -> Trapframe {
    Trapframe::default()
}

fn call(state: &mut KernelState, no: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
    state.syscall(no, a1, a2, a3, a4, a5, tf())
}

#[test]
fn fork_then_rendezvous_round_trip() {
    let mut state = KernelState::new();
    let root = state.boot_root_env();

    let child_ret = call(&mut state, abi::SYS_EXOFORK, 0, 0, 0, 0, 0);
    assert!(child_ret > 0, "exofork should hand the parent a positive child id");
    let child = EnvId(child_ret as u32);

    let set_status = call(&mut state, abi::SYS_ENV_SET_STATUS, child.0, abi::ENV_RUNNABLE, 0, 0, 0);
    assert_eq!(set_status, 0);

    // Yielding hands control to the child (round-robin).
    let yield_ret = call(&mut state, abi::SYS_YIELD, 0, 0, 0, 0, 0);
    assert_eq!(yield_ret, 0);

    // curenv is now the child: it blocks in receive, which yields control
    // back to the parent as a side effect of parking.
    let recv_ret = call(&mut state, abi::SYS_IPC_RECV, abi::UTOP, 0, 0, 0, 0);
    assert_eq!(recv_ret, 0);

    // Control is back with the parent: send completes the rendezvous
    // immediately since the child is now parked in receive.
    let send_ret = call(&mut state, abi::SYS_IPC_TRY_SEND, child.0, 42, abi::UTOP, 0, 0);
    assert_eq!(send_ret, 0);

    // getenvid from the parent's perspective still reports the parent.
    let who = call(&mut state, abi::SYS_GETENVID, 0, 0, 0, 0, 0);
    assert_eq!(who as u32, root.0);
}

#[test]
fn page_map_cannot_grant_write_beyond_source_permission() {
    let mut state = KernelState::new();
    state.boot_root_env();

    let alloc_ret = call(&mut state, abi::SYS_PAGE_ALLOC, 0, 0x400000, abi::PTE_U | abi::PTE_P, 0, 0);
    assert_eq!(alloc_ret, 0);

    let child_ret = call(&mut state, abi::SYS_EXOFORK, 0, 0, 0, 0, 0);
    let child = EnvId(child_ret as u32);

    let map_ret = call(
        &mut state,
        abi::SYS_PAGE_MAP,
        0,
        0x400000,
        child.0,
        0x400000,
        abi::PTE_U | abi::PTE_P | abi::PTE_W,
    );
    assert!(map_ret < 0, "write escalation must be rejected");
}

#[test]
fn dereferencing_an_unmapped_pointer_destroys_the_caller() {
    let mut state = KernelState::new();
    state.boot_root_env();

    let ret = call(&mut state, abi::SYS_CPUTS, 0xdead_beef, 4, 0, 0, 0);
    assert!(ret < 0);

    // The caller no longer exists: any further syscall sees no current env.
    let follow_up = call(&mut state, abi::SYS_GETENVID, 0, 0, 0, 0, 0);
    assert!(follow_up < 0);
}

#[test]
fn sbrk_grows_the_heap_in_page_increments() {
    let mut state = KernelState::new();
    state.boot_root_env();

    let first = call(&mut state, abi::SYS_SBRK, 1, 0, 0, 0, 0);
    assert_eq!(first, 4096);
    let second = call(&mut state, abi::SYS_SBRK, 4096, 0, 0, 0, 0);
    assert_eq!(second, 8192);
}
