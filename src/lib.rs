//! sysgate - user-to-kernel system call boundary
//!
//! The part of a small single-core teaching kernel that user programs talk
//! to: trap entry, argument extraction, pointer validation, per-process
//! file descriptors, and the exit/wait handshake between parent and child.
//!
//! # Security Features
//! - No user pointer is dereferenced before every page it touches has been
//!   checked against the caller's page directory
//! - Misbehaving processes are terminated with status -1; the kernel never
//!   panics on user input
//! - All file system access is serialized by one explicit lock
//!
//! # Collaborators
//! The scheduler, page tables, file system, console, program loader and
//! power control are traits (`Scheduler`, `AddressSpace`, `FileSystem`,
//! `Console`, `Loader`, `Machine`) supplied when the `Kernel` is built.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod drivers;
pub mod exception;
pub mod fs;
pub mod kernel;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod testing;

pub use config::{FdPolicy, KernelConfig};
pub use exception::{syscall_entry, Disposition, InterruptFrame, Machine};
pub use kernel::{Kernel, LoadError, Loader, Services, SpawnError, SpawnRequest};
pub use process::{Pid, Process};
pub use sched::{Scheduler, Tid};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
