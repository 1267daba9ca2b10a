//! System Call Interface
//!
//! The boundary user programs cross with `int $0x30`.
//!
//! # Security Model
//! - Whitelist approach: only the thirteen calls in `numbers` exist; any
//!   other number kills the caller
//! - Every argument word and every pointee is validated before a handler
//!   body runs
//! - Misuse terminates the offending process, never the kernel
//!
//! # Syscalls
//! | # | Call | Returns |
//! |---|------|---------|
//! | 0 | halt() | never |
//! | 1 | exit(status) | never |
//! | 2 | exec(cmd_line) | pid or -1 |
//! | 3 | wait(pid) | exit status or -1 |
//! | 4 | create(file, initial_size) | bool |
//! | 5 | remove(file) | bool |
//! | 6 | open(file) | fd or -1 |
//! | 7 | filesize(fd) | size or -1 |
//! | 8 | read(fd, buffer, size) | bytes read or -1 |
//! | 9 | write(fd, buffer, size) | bytes written or -1 |
//! | 10 | seek(fd, position) | - |
//! | 11 | tell(fd) | position |
//! | 12 | close(fd) | - |

pub mod args;
pub mod error;
pub mod handler;
pub mod numbers;
pub mod validate;

pub use error::{Fault, Stage, SyscallError, UserPtrError};
pub use handler::{Flow, Request};
pub use numbers::Syscall;
pub use validate::{UserBuffer, UserBufferMut, UserString};
