//! Scheduler collaborator
//!
//! The system call boundary never switches threads itself; it asks the
//! scheduler to block or wake threads and to retire the current one.

use core::fmt;

/// Identifier of a kernel thread.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

/// Thread scheduler interface.
///
/// # Wakeup contract
/// `unblock(t)` delivered while `t` is still running must not be lost:
/// the next `block()` by `t` returns immediately. Callers re-check their
/// condition after every `block()`, so spurious returns are allowed.
pub trait Scheduler: Send + Sync {
    /// Thread running the current system call.
    fn current(&self) -> Tid;

    /// Suspend the current thread until it is unblocked.
    fn block(&self);

    /// Make `tid` runnable again.
    fn unblock(&self, tid: Tid);

    /// Retire the current thread. Never returns.
    fn exit_current(&self) -> !;
}
