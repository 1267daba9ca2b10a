//! Parent/child rendezvous
//!
//! One `ChildStatus` exists per child. The parent keeps it in its
//! `children` map, the child keeps its own reference. Two one-shot
//! handshakes run through it:
//!
//! ```text
//! parent: exec ──► Loader ──► child thread
//!         loaded.down() ◄──── LoadTicket::succeed / fail / drop
//!
//! parent: wait ──► remove record ──► exited.down()
//! child:  exit ──► publish(code) ──► exited.up()
//! ```
//!
//! Whichever side drops its reference last frees the record, so a parent
//! that never waits does not keep exit codes alive after it is gone.

use alloc::sync::Arc;

use spin::Mutex;

use crate::process::Pid;
use crate::sched::Scheduler;
use crate::sync::Semaphore;

/// Outcome of loading a child's executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed,
}

/// Exit and load status of one child, shared with its parent.
pub struct ChildStatus {
    pid: Pid,
    load: Mutex<LoadState>,
    loaded: Semaphore,
    exit_code: Mutex<Option<i32>>,
    exited: Semaphore,
}

impl ChildStatus {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            load: Mutex::new(LoadState::Pending),
            loaded: Semaphore::new(0),
            exit_code: Mutex::new(None),
            exited: Semaphore::new(0),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Record the load outcome and release the parent blocked in exec.
    fn finish_load(&self, state: LoadState, sched: &dyn Scheduler) {
        {
            let mut load = self.load.lock();
            debug_assert_eq!(*load, LoadState::Pending, "load of {} reported twice", self.pid);
            if *load != LoadState::Pending {
                log::error!("[PROCESS] load of {} reported twice", self.pid);
                return;
            }
            *load = state;
        }
        self.loaded.up(sched);
    }

    /// Block until the child has loaded or failed to load.
    pub fn wait_loaded(&self, sched: &dyn Scheduler) -> LoadState {
        self.loaded.down(sched);
        *self.load.lock()
    }

    /// Publish the child's exit code and wake a waiting parent.
    pub fn publish(&self, code: i32, sched: &dyn Scheduler) {
        {
            let mut slot = self.exit_code.lock();
            debug_assert!(slot.is_none(), "exit status of {} published twice", self.pid);
            if slot.is_some() {
                log::error!("[PROCESS] exit status of {} published twice", self.pid);
                return;
            }
            *slot = Some(code);
        }
        self.exited.up(sched);
    }

    /// Block until the child has exited and return its code.
    pub fn wait_exit(&self, sched: &dyn Scheduler) -> i32 {
        self.exited.down(sched);
        let code = *self.exit_code.lock();
        code.unwrap_or(crate::syscall::error::KILLED_EXIT_CODE)
    }

    /// Exit code, if the child already exited.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }
}

/// The child's half of the load handshake.
///
/// Completing it wakes the parent in `exec`. A ticket dropped without
/// being completed reports a failed load.
#[must_use = "dropping a LoadTicket reports a failed load"]
pub struct LoadTicket {
    status: Option<Arc<ChildStatus>>,
    sched: Arc<dyn Scheduler>,
}

impl LoadTicket {
    pub(crate) fn new(status: Arc<ChildStatus>, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            status: Some(status),
            sched,
        }
    }

    /// Pid the child was assigned.
    pub fn pid(&self) -> Option<Pid> {
        self.status.as_ref().map(|status| status.pid())
    }

    /// The shared record, for the child to keep.
    pub(crate) fn record(&self) -> Option<Arc<ChildStatus>> {
        self.status.clone()
    }

    /// Report a successful load.
    pub(crate) fn succeed(mut self) {
        if let Some(status) = self.status.take() {
            status.finish_load(LoadState::Loaded, &*self.sched);
        }
    }

    /// Report a failed load.
    pub fn fail(mut self) {
        if let Some(status) = self.status.take() {
            status.finish_load(LoadState::Failed, &*self.sched);
        }
    }
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        if let Some(status) = self.status.take() {
            log::debug!("[PROCESS] load ticket for {} dropped", status.pid());
            status.finish_load(LoadState::Failed, &*self.sched);
        }
    }
}
