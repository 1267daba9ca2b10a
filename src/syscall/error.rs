//! System Call Error Types
//!
//! Two classes of failure cross the system call boundary:
//! - `Fault`: the process misused the interface and is terminated with
//!   exit code -1
//! - `SyscallError`: the request failed; the process sees a sentinel return
//!   value and keeps running

use crate::mm::VirtAddr;

/// Return value seen by user code for every failed call.
pub const SYSCALL_FAILED: i32 = -1;

/// Exit code recorded for a process killed by a fault.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Dispatcher stage in which a fault was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading and decoding the syscall number.
    Decoding,
    /// Reading argument words and validating pointees.
    ArgValidation,
    /// Running the handler body.
    Executing,
}

/// Why a user pointer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UserPtrError {
    /// The pointer is null.
    #[error("null pointer")]
    Null,
    /// The region reaches into kernel address space.
    #[error("kernel address {0}")]
    KernelAddress(VirtAddr),
    /// `base + len` wraps around the address space.
    #[error("range overflows")]
    Overflow,
    /// A page of the region is not mapped.
    #[error("unmapped page {0}")]
    Unmapped(VirtAddr),
    /// A page of a destination buffer is mapped read-only.
    #[error("read-only page {0}")]
    ReadOnly(VirtAddr),
}

/// A process-fatal misuse of the system call interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[must_use]
pub enum Fault {
    /// A pointer argument (or the stack pointer itself) is not safe to use.
    #[error("bad user pointer {addr} during {stage:?}: {reason}")]
    BadPointer {
        addr: VirtAddr,
        reason: UserPtrError,
        stage: Stage,
    },
    /// No NUL terminator within the configured limit.
    #[error("unterminated string at {addr}")]
    UnterminatedString { addr: VirtAddr },
    /// The syscall number is not part of the interface.
    #[error("unknown syscall number {0}")]
    UnknownSyscall(u32),
    /// close/seek/tell on a descriptor that was never valid for them.
    #[error("invalid file descriptor {0}")]
    InvalidFd(i32),
}

impl Fault {
    /// Attach a pointer rejection to the stage that detected it.
    pub fn bad_pointer(addr: VirtAddr, reason: UserPtrError, stage: Stage) -> Self {
        Self::BadPointer {
            addr,
            reason,
            stage,
        }
    }

    /// Stage the dispatcher had reached when the fault was raised.
    pub fn stage(&self) -> Stage {
        match self {
            Self::BadPointer { stage, .. } => *stage,
            Self::UnknownSyscall(_) => Stage::Decoding,
            Self::UnterminatedString { .. } => Stage::ArgValidation,
            Self::InvalidFd(_) => Stage::Executing,
        }
    }
}

/// Recoverable system call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyscallError {
    /// No such file, or the file system refused the operation.
    #[error("no such file or directory")]
    NotFound,
    /// The descriptor is not open in this process.
    #[error("bad file descriptor")]
    BadFd,
    /// stdin used for output or stdout used for input.
    #[error("wrong direction for descriptor {0}")]
    WrongDirection(i32),
    /// Zero-length read or write.
    #[error("empty transfer")]
    EmptyTransfer,
    /// The process has too many open files.
    #[error("too many open files")]
    TooManyFiles,
    /// A file name is not valid UTF-8.
    #[error("invalid file name")]
    InvalidName,
    /// The pid is not a waitable child of the caller.
    #[error("no such child process")]
    NoChild,
    /// The child could not be started or failed to load.
    #[error("exec failed")]
    ExecFailed,
}

impl SyscallError {
    /// Value written to the frame's return slot.
    #[inline]
    pub fn to_return(self) -> i32 {
        SYSCALL_FAILED
    }
}
