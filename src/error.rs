//! Typed syscall error, converted to a negative ABI code only at the
//! dispatcher boundary (kept internal to this crate; callers across the
//! syscall boundary only ever see the `i32`).

/// Mirrors the small fixed set of negative error codes the dispatcher may
/// hand back to user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyscallError {
    BadEnv,
    Invalid,
    NoMem,
    NoFreeEnv,
    // Reserved for a non-buffered ipc_try_send ("receiver not ready" is a
    // hard failure). This crate implements the buffered variant (see
    // ipc.rs), which parks the sender instead, so this code is never
    // actually returned.
    #[allow(dead_code)]
    IpcNotRecv,
}

impl SyscallError {
    const fn code(self) -> i32 {
        match self {
            SyscallError::BadEnv => -1,
            SyscallError::Invalid => -2,
            SyscallError::NoMem => -3,
            SyscallError::NoFreeEnv => -4,
            SyscallError::IpcNotRecv => -5,
        }
    }
}

impl From<SyscallError> for i32 {
    fn from(e: SyscallError) -> i32 {
        e.code()
    }
}

pub(crate) type SyscallResult<T> = Result<T, SyscallError>;
