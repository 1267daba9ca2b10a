//! Kernel state behind the system call boundary
//!
//! `Kernel` owns the process table and the handles to every collaborator
//! the handlers need. It is built once at boot and shared by every thread
//! that traps into it.
//!
//! # Process lifecycle
//! ```text
//! exec ──► Loader::spawn ──► (child thread) start_process ──► user code
//!   │                                  │
//!   └── blocks until the load outcome ◄┘
//!
//! exit / fault ──► exit_process ──► status published to the parent
//! ```

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, Ordering};

use spin::Mutex;

use crate::config::KernelConfig;
use crate::drivers::Console;
use crate::exception::{Disposition, InterruptFrame, Machine};
use crate::fs::{FileSystem, FsLock};
use crate::mm::AddressSpace;
use crate::process::{ChildStatus, LoadState, LoadTicket, Pid, Process, ProcessTable};
use crate::sched::Scheduler;
use crate::syscall::error::{SyscallError, KILLED_EXIT_CODE};

/// Pid of the first process.
pub const INIT_PID: Pid = Pid(1);

/// Why a child could not be started at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("no thread available for the new process")]
    NoThread,
    #[error("command line is empty")]
    EmptyCommand,
}

/// Why a child's executable could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("executable not found")]
    NotFound,
    #[error("not a valid executable")]
    BadExecutable,
    #[error("out of memory")]
    OutOfMemory,
}

/// Everything a new thread needs to become a child process.
///
/// Dropping the request without calling `Kernel::start_process` reports a
/// failed load to the parent.
pub struct SpawnRequest {
    pub pid: Pid,
    pub parent: Pid,
    pub cmd_line: String,
    pub ticket: LoadTicket,
}

/// Creates the thread for a new process.
///
/// The new thread loads `request.cmd_line` and then hands the request back
/// to `Kernel::start_process` together with the load outcome.
pub trait Loader: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> Result<(), SpawnError>;
}

/// Collaborators the kernel is wired to at boot.
#[derive(Clone)]
pub struct Services {
    pub scheduler: Arc<dyn Scheduler>,
    pub fs: Arc<dyn FileSystem>,
    pub fs_lock: Arc<FsLock>,
    pub console: Arc<dyn Console>,
    pub loader: Arc<dyn Loader>,
    pub machine: Arc<dyn Machine>,
}

/// The system call layer's view of the kernel.
pub struct Kernel {
    config: KernelConfig,
    services: Services,
    processes: Mutex<ProcessTable>,
    next_pid: AtomicI32,
}

impl Kernel {
    pub fn new(config: KernelConfig, services: Services) -> Self {
        log::info!(
            "[BOOT] syscall layer up: fd policy {:?}, {} files per process",
            config.fd_policy,
            config.max_open_files
        );
        Self {
            config,
            services,
            processes: Mutex::new(ProcessTable::new()),
            next_pid: AtomicI32::new(INIT_PID.0),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        &*self.services.scheduler
    }

    pub fn fs(&self) -> &dyn FileSystem {
        &*self.services.fs
    }

    pub fn fs_lock(&self) -> &FsLock {
        &self.services.fs_lock
    }

    pub fn console(&self) -> &dyn Console {
        &*self.services.console
    }

    pub fn machine(&self) -> &dyn Machine {
        &*self.services.machine
    }

    fn allocate_pid(&self) -> Pid {
        Pid(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    /// Live process with `pid`.
    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().get(pid).cloned()
    }

    /// Process owning the calling thread.
    pub fn current_process(&self) -> Option<Arc<Process>> {
        let tid = self.scheduler().current();
        self.processes.lock().by_thread(tid).cloned()
    }

    /// Number of live processes.
    pub fn process_count(&self) -> usize {
        self.processes.lock().len()
    }

    /// Register the first user process on the calling thread.
    pub fn start_init(&self, cmd_line: &str, space: Box<dyn AddressSpace>) -> Arc<Process> {
        let pid = self.allocate_pid();
        let process = Arc::new(Process::new(
            pid,
            self.scheduler().current(),
            cmd_line,
            None,
            space,
            None,
            &self.config,
        ));
        self.processes.lock().insert(process.clone());
        log::info!("[PROCESS] {} started: {}", pid, process.name());
        process
    }

    /// Complete a spawn on the child's own thread.
    ///
    /// On success the process is registered before the parent is woken, so
    /// the parent's `exec` never returns a pid that cannot be found.
    pub fn start_process(
        &self,
        request: SpawnRequest,
        loaded: Result<Box<dyn AddressSpace>, LoadError>,
    ) -> Option<Arc<Process>> {
        let SpawnRequest {
            pid,
            parent,
            cmd_line,
            ticket,
        } = request;

        let space = match loaded {
            Ok(space) => space,
            Err(err) => {
                log::info!("[PROCESS] {} failed to load {:?}: {}", pid, cmd_line, err);
                ticket.fail();
                return None;
            }
        };

        let process = Arc::new(Process::new(
            pid,
            self.scheduler().current(),
            &cmd_line,
            Some(parent),
            space,
            ticket.record(),
            &self.config,
        ));
        self.processes.lock().insert(process.clone());
        log::info!("[PROCESS] {} started by {}: {}", pid, parent, process.name());
        ticket.succeed();
        Some(process)
    }

    /// Start a child of `parent` running `cmd_line` and wait for it to load.
    pub(crate) fn exec(&self, parent: &Process, cmd_line: &str) -> Result<Pid, SyscallError> {
        let pid = self.allocate_pid();
        let record = Arc::new(ChildStatus::new(pid));
        parent.add_child(record.clone());

        let request = SpawnRequest {
            pid,
            parent: parent.pid(),
            cmd_line: cmd_line.into(),
            ticket: LoadTicket::new(record.clone(), self.services.scheduler.clone()),
        };
        if let Err(err) = self.services.loader.spawn(request) {
            log::debug!("[PROCESS] spawn of {:?} failed: {}", cmd_line, err);
        }

        match record.wait_loaded(self.scheduler()) {
            LoadState::Loaded => Ok(pid),
            state => {
                log::debug!("[PROCESS] exec {:?} from {}: {:?}", cmd_line, parent.pid(), state);
                parent.take_child(pid);
                Err(SyscallError::ExecFailed)
            }
        }
    }

    /// Wait for direct child `pid` and return its exit code.
    ///
    /// A pid can be waited on at most once.
    pub(crate) fn wait(&self, parent: &Process, pid: Pid) -> Result<i32, SyscallError> {
        let record = parent.take_child(pid).ok_or(SyscallError::NoChild)?;
        Ok(record.wait_exit(self.scheduler()))
    }

    /// Tear down `process` with exit code `code`.
    ///
    /// Runs for voluntary exits and for killed processes alike. The caller
    /// retires the thread afterwards.
    pub fn exit_process(&self, process: &Process, code: i32) {
        if self.config.exit_messages {
            let line = format!("{}: exit({})\n", process.name(), code);
            self.console().put_buf(line.as_bytes());
        }

        let closed = self
            .fs_lock()
            .hold(|| process.files().lock().release_all());
        let orphans = process.forget_children();
        log::info!(
            "[PROCESS] {} exited with {} ({} files closed, {} children orphaned)",
            process.pid(),
            code,
            closed,
            orphans
        );

        if let Some(status) = process.status() {
            status.publish(code, self.scheduler());
        }
        let removed = self.processes.lock().remove(process.pid());
        debug_assert!(removed.is_some(), "{} exited twice", process.pid());
    }

    /// Service the system call described by `frame` for the calling thread.
    pub fn handle_syscall(&self, frame: &mut InterruptFrame) -> Disposition {
        match self.current_process() {
            Some(process) => self.dispatch(&process, frame),
            None => {
                log::error!(
                    "[SYSCALL] trap from {} which owns no process",
                    self.scheduler().current()
                );
                Disposition::Exit(KILLED_EXIT_CODE)
            }
        }
    }
}
