//! Syscall core of an exokernel-style teaching microkernel: argument
//! validation, address-space operations, environment lifecycle, and a
//! rendezvous-with-buffering IPC protocol, dispatched under a single big
//! kernel lock.
//!
//! `no_std` on its real target; built with the ordinary host `#[test]`
//! harness under `cfg(test)` so the state machine can be exercised without a
//! boot path.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(all(not(test), target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(not(test), target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(test))]
extern crate std;
#[cfg(all(not(test), not(target_os = "none")))]
#[global_allocator]
static HOST_ALLOCATOR: std::alloc::System = std::alloc::System;

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}

#[macro_use]
pub(crate) mod console;

pub mod abi;
pub(crate) mod constants;
pub(crate) mod env;
pub(crate) mod error;
pub(crate) mod ipc;
pub(crate) mod kernel_lock;
pub(crate) mod mm;
pub(crate) mod sched;
pub(crate) mod syscall;
pub(crate) mod trapframe;

pub use crate::env::EnvId;
pub use crate::syscall::KernelState;
pub use crate::trapframe::Trapframe;

impl KernelState {
    /// The public entry point a trap handler (or, in this crate, a test)
    /// calls with the decoded syscall ABI tuple. See [`syscall::sysenter`].
    pub fn syscall(&mut self, syscallno: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32, tf: Trapframe) -> i32 {
        syscall::sysenter(self, syscallno, a1, a2, a3, a4, a5, tf)
    }
}
