//! Kernel configuration for the system call layer.

use log::LevelFilter;

use crate::mm::PAGE_SIZE;

/// How `open` picks a descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FdPolicy {
    /// Smallest unused descriptor >= 2. Closed numbers are reused.
    #[default]
    LowestFree,
    /// Strictly increasing counter starting at 2. Numbers are never reused.
    Monotonic,
}

/// Tunables, fixed when the kernel is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Descriptor allocation policy.
    pub fd_policy: FdPolicy,
    /// Open files per process; `open` fails beyond this.
    pub max_open_files: usize,
    /// Longest string (without NUL) accepted from user memory.
    pub max_string_len: usize,
    /// Print `name: exit(code)` when a process terminates.
    pub exit_messages: bool,
    /// Most verbose level `init_logger` lets through. `Trace` shows every call.
    pub log_level: LevelFilter,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            fd_policy: FdPolicy::LowestFree,
            max_open_files: 128,
            max_string_len: PAGE_SIZE,
            exit_messages: true,
            log_level: LevelFilter::Debug,
        }
    }

    pub const fn with_fd_policy(mut self, policy: FdPolicy) -> Self {
        self.fd_policy = policy;
        self
    }

    pub const fn with_max_open_files(mut self, max: usize) -> Self {
        self.max_open_files = max;
        self
    }

    pub const fn with_max_string_len(mut self, max: usize) -> Self {
        self.max_string_len = max;
        self
    }

    pub const fn with_exit_messages(mut self, enabled: bool) -> Self {
        self.exit_messages = enabled;
        self
    }

    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
