use spin::{Mutex, MutexGuard};

/// Serializes all syscall dispatch. Acquired by the dispatcher before
/// touching env/page-table state and dropped on every return path,
/// including the non-returning `exec_commit` continuation.
static KERNEL_LOCK: Mutex<()> = Mutex::new(());

pub(crate) fn lock_kernel<'a>() -> MutexGuard<'a, ()> {
    KERNEL_LOCK.lock()
}
