//! User Processes
//!
//! A process is one user thread plus the state the system call layer keeps
//! for it: its page directory, its open files, and its parent/child links.
//!
//! # Ownership
//! - The fd table and address space are touched only by the process's own
//!   thread; the locks around them only satisfy the borrow rules
//! - Child records are shared with exactly one child (see `wait`)

pub mod fd;
pub mod wait;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use spin::Mutex;

use crate::config::KernelConfig;
use crate::mm::AddressSpace;
use crate::sched::Tid;

pub use fd::FdTable;
pub use wait::{ChildStatus, LoadState, LoadTicket};

/// Process identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// One user process.
pub struct Process {
    pid: Pid,
    tid: Tid,
    name: String,
    parent: Option<Pid>,
    space: Mutex<Box<dyn AddressSpace>>,
    files: Mutex<FdTable>,
    children: Mutex<BTreeMap<Pid, Arc<ChildStatus>>>,
    /// Record shared with the parent; `None` for the initial process.
    status: Option<Arc<ChildStatus>>,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        tid: Tid,
        cmd_line: &str,
        parent: Option<Pid>,
        space: Box<dyn AddressSpace>,
        status: Option<Arc<ChildStatus>>,
        config: &KernelConfig,
    ) -> Self {
        Self {
            pid,
            tid,
            name: program_name(cmd_line).into(),
            parent,
            space: Mutex::new(space),
            files: Mutex::new(FdTable::new(config.fd_policy, config.max_open_files)),
            children: Mutex::new(BTreeMap::new()),
            status,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Program name: the first word of the command line.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    /// The process's page directory.
    pub fn space(&self) -> &Mutex<Box<dyn AddressSpace>> {
        &self.space
    }

    /// The process's open files.
    pub fn files(&self) -> &Mutex<FdTable> {
        &self.files
    }

    pub(crate) fn status(&self) -> Option<&Arc<ChildStatus>> {
        self.status.as_ref()
    }

    pub(crate) fn add_child(&self, record: Arc<ChildStatus>) {
        self.children.lock().insert(record.pid(), record);
    }

    /// Take the record of a direct child. `None` for non-children and for
    /// children already waited on.
    pub(crate) fn take_child(&self, pid: Pid) -> Option<Arc<ChildStatus>> {
        self.children.lock().remove(&pid)
    }

    /// Drop all child records. Returns how many were dropped.
    pub(crate) fn forget_children(&self) -> usize {
        let mut children = self.children.lock();
        let count = children.len();
        children.clear();
        count
    }

    /// True if `pid` is a direct child that has not been waited on.
    pub fn has_child(&self, pid: Pid) -> bool {
        self.children.lock().contains_key(&pid)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

/// First whitespace-separated word of `cmd_line`.
pub fn program_name(cmd_line: &str) -> &str {
    cmd_line.split_whitespace().next().unwrap_or("")
}

/// Live processes, by pid and by thread.
#[derive(Default)]
pub struct ProcessTable {
    by_pid: BTreeMap<Pid, Arc<Process>>,
    by_tid: BTreeMap<Tid, Pid>,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            by_pid: BTreeMap::new(),
            by_tid: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, process: Arc<Process>) {
        self.by_tid.insert(process.tid(), process.pid());
        let previous = self.by_pid.insert(process.pid(), process);
        debug_assert!(previous.is_none(), "pid registered twice");
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Arc<Process>> {
        let process = self.by_pid.remove(&pid)?;
        self.by_tid.remove(&process.tid());
        Some(process)
    }

    pub fn get(&self, pid: Pid) -> Option<&Arc<Process>> {
        self.by_pid.get(&pid)
    }

    pub fn by_thread(&self, tid: Tid) -> Option<&Arc<Process>> {
        self.by_tid.get(&tid).and_then(|pid| self.by_pid.get(pid))
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }
}
