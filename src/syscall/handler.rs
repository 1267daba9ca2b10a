//! System Call Handler
//!
//! Dispatches system calls and implements individual syscall handlers.
//!
//! # Stages
//! ```text
//! Decoding ──► ArgValidation ──► Executing ──► resume / exit / power off
//!     │              │               │
//!     └──────────────┴───────────────┴──► fault: exit_process(-1)
//! ```
//! `decode` turns the trapped stack into a `Request` whose pointers have all
//! been validated (strings are already copied in). `execute` only ever sees
//! a `Request`, so no handler body runs on an unchecked argument.
//!
//! `read` and `write` move data through one kernel buffer of at most
//! `IO_CHUNK` bytes, whatever size user code asks for.
//!
//! # Security Considerations
//! - Unknown syscall numbers kill the process
//! - A fault never leaves a partial read or write behind: every pointer is
//!   checked before the handler touches a file or the console
//! - All non-console file I/O runs under the file system lock

use alloc::vec;

use super::args::StackArgs;
use super::error::{Fault, Stage, SyscallError, UserPtrError, KILLED_EXIT_CODE};
use super::numbers::Syscall;
use super::validate::{self, StringError, UserBuffer, UserBufferMut, UserString};
use crate::exception::{Disposition, InterruptFrame};
use crate::fs::File;
use crate::kernel::Kernel;
use crate::mm::{AddressSpace, VirtAddr, PAGE_SIZE};
use crate::process::fd::{STDIN_FILENO, STDOUT_FILENO};
use crate::process::{Pid, Process};

/// A decoded system call with validated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Halt,
    Exit { status: i32 },
    Exec { cmd_line: UserString },
    Wait { pid: Pid },
    Create { name: UserString, initial_size: u32 },
    Remove { name: UserString },
    Open { name: UserString },
    Filesize { fd: i32 },
    /// Destination is validated writable; nothing has been read yet.
    Read { fd: i32, buffer: UserBufferMut },
    /// Source is validated readable; nothing has been copied yet.
    Write { fd: i32, buffer: UserBuffer },
    Seek { fd: i32, position: u32 },
    Tell { fd: i32 },
    Close { fd: i32 },
}

impl Request {
    pub fn syscall(&self) -> Syscall {
        match self {
            Self::Halt => Syscall::Halt,
            Self::Exit { .. } => Syscall::Exit,
            Self::Exec { .. } => Syscall::Exec,
            Self::Wait { .. } => Syscall::Wait,
            Self::Create { .. } => Syscall::Create,
            Self::Remove { .. } => Syscall::Remove,
            Self::Open { .. } => Syscall::Open,
            Self::Filesize { .. } => Syscall::Filesize,
            Self::Read { .. } => Syscall::Read,
            Self::Write { .. } => Syscall::Write,
            Self::Seek { .. } => Syscall::Seek,
            Self::Tell { .. } => Syscall::Tell,
            Self::Close { .. } => Syscall::Close,
        }
    }
}

/// Outcome of a handler body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Resume with this value in `eax`.
    Return(i32),
    /// Resume without touching `eax` (seek, close).
    Resume,
    /// The process called exit.
    Exit(i32),
    /// The process called halt.
    Halt,
}

/// Either kind of handler failure.
#[derive(Debug)]
enum Failure {
    Fatal(Fault),
    Failed(SyscallError),
}

impl From<Fault> for Failure {
    fn from(fault: Fault) -> Self {
        Self::Fatal(fault)
    }
}

impl From<SyscallError> for Failure {
    fn from(err: SyscallError) -> Self {
        Self::Failed(err)
    }
}

type HandlerResult = Result<i32, Failure>;

/// Largest piece of a read or write held in kernel memory at once. Console
/// writes longer than this reach the console as several blocks.
pub const IO_CHUNK: usize = PAGE_SIZE;

/// A page validated earlier is no longer there.
fn vanished(addr: VirtAddr) -> Fault {
    Fault::bad_pointer(addr, UserPtrError::Unmapped(addr.align_down()), Stage::Executing)
}

impl Kernel {
    /// Run one system call for `process` and write its result into `frame`.
    pub(crate) fn dispatch(&self, process: &Process, frame: &mut InterruptFrame) -> Disposition {
        let flow = self
            .decode(process, frame.user_stack())
            .and_then(|request| self.execute(process, request));

        match flow {
            Ok(Flow::Return(value)) => {
                frame.set_return(value);
                Disposition::Resume
            }
            Ok(Flow::Resume) => Disposition::Resume,
            Ok(Flow::Exit(code)) => {
                self.exit_process(process, code);
                Disposition::Exit(code)
            }
            Ok(Flow::Halt) => {
                log::info!("[SYSCALL] halt requested by {}", process.pid());
                Disposition::PowerOff
            }
            Err(fault) => {
                log::warn!(
                    "[SYSCALL] killing {} ({}): {}",
                    process.pid(),
                    process.name(),
                    fault
                );
                self.exit_process(process, KILLED_EXIT_CODE);
                Disposition::Exit(KILLED_EXIT_CODE)
            }
        }
    }

    /// Read the call and its arguments off the user stack at `esp`.
    pub fn decode(&self, process: &Process, esp: VirtAddr) -> Result<Request, Fault> {
        let space = process.space().lock();
        let space: &dyn AddressSpace = &**space;
        let stack = StackArgs::new(space, esp);

        let call = stack.syscall()?;
        log::trace!("[SYSCALL] {} {}", process.pid(), call.name());
        let [a0, a1, a2] = stack.args(call)?;
        let string = |word: u32| self.user_string(space, word);

        let request = match call {
            Syscall::Halt => Request::Halt,
            Syscall::Exit => Request::Exit { status: a0 as i32 },
            Syscall::Exec => Request::Exec {
                cmd_line: string(a0)?,
            },
            Syscall::Wait => Request::Wait { pid: Pid(a0 as i32) },
            Syscall::Create => Request::Create {
                name: string(a0)?,
                initial_size: a1,
            },
            Syscall::Remove => Request::Remove { name: string(a0)? },
            Syscall::Open => Request::Open { name: string(a0)? },
            Syscall::Filesize => Request::Filesize { fd: a0 as i32 },
            Syscall::Read => {
                let addr = VirtAddr::from_word(a1);
                let buffer = validate::validate_user_write(space, addr, a2 as usize)
                    .map_err(|reason| Fault::bad_pointer(addr, reason, Stage::ArgValidation))?;
                Request::Read {
                    fd: a0 as i32,
                    buffer,
                }
            }
            Syscall::Write => {
                let addr = VirtAddr::from_word(a1);
                let buffer = validate::validate_user_read(space, addr, a2 as usize)
                    .map_err(|reason| Fault::bad_pointer(addr, reason, Stage::ArgValidation))?;
                Request::Write {
                    fd: a0 as i32,
                    buffer,
                }
            }
            Syscall::Seek => Request::Seek {
                fd: a0 as i32,
                position: a1,
            },
            Syscall::Tell => Request::Tell { fd: a0 as i32 },
            Syscall::Close => Request::Close { fd: a0 as i32 },
        };
        Ok(request)
    }

    fn user_string(&self, space: &dyn AddressSpace, word: u32) -> Result<UserString, Fault> {
        let addr = VirtAddr::from_word(word);
        validate::read_user_string(space, addr, self.config().max_string_len).map_err(|err| match err {
            StringError::Pointer(reason) => Fault::bad_pointer(addr, reason, Stage::ArgValidation),
            StringError::Unterminated => Fault::UnterminatedString { addr },
        })
    }

    /// Run a validated request.
    pub fn execute(&self, process: &Process, request: Request) -> Result<Flow, Fault> {
        let call = request.syscall();
        let result = match request {
            Request::Halt => return Ok(Flow::Halt),
            Request::Exit { status } => return Ok(Flow::Exit(status)),
            Request::Exec { cmd_line } => self.sys_exec(process, &cmd_line),
            Request::Wait { pid } => self.sys_wait(process, pid),
            Request::Create { name, initial_size } => Ok(self.sys_create(&name, initial_size) as i32),
            Request::Remove { name } => Ok(self.sys_remove(&name) as i32),
            Request::Open { name } => self.sys_open(process, &name),
            Request::Filesize { fd } => self.sys_filesize(process, fd),
            Request::Read { fd, buffer } => self.sys_read(process, fd, buffer),
            Request::Write { fd, buffer } => self.sys_write(process, fd, buffer),
            Request::Seek { fd, position } => {
                return self.sys_seek(process, fd, position).map(|()| Flow::Resume)
            }
            Request::Tell { fd } => self.sys_tell(process, fd),
            Request::Close { fd } => return self.sys_close(process, fd).map(|()| Flow::Resume),
        };

        match result {
            Ok(value) => Ok(Flow::Return(value)),
            Err(Failure::Failed(err)) => {
                log::debug!("[SYSCALL] {} {} failed: {}", process.pid(), call.name(), err);
                Ok(Flow::Return(err.to_return()))
            }
            Err(Failure::Fatal(fault)) => Err(fault),
        }
    }

    fn sys_exec(&self, process: &Process, cmd_line: &UserString) -> HandlerResult {
        let cmd_line = cmd_line.as_str().ok_or(SyscallError::InvalidName)?;
        let pid = self.exec(process, cmd_line)?;
        Ok(pid.0)
    }

    fn sys_wait(&self, process: &Process, pid: Pid) -> HandlerResult {
        Ok(self.wait(process, pid)?)
    }

    fn sys_create(&self, name: &UserString, initial_size: u32) -> bool {
        match name.as_str() {
            Some(name) => self.fs_lock().hold(|| self.fs().create(name, initial_size)),
            None => false,
        }
    }

    fn sys_remove(&self, name: &UserString) -> bool {
        match name.as_str() {
            Some(name) => self.fs_lock().hold(|| self.fs().remove(name)),
            None => false,
        }
    }

    fn sys_open(&self, process: &Process, name: &UserString) -> HandlerResult {
        let name = name.as_str().ok_or(SyscallError::InvalidName)?;
        let _guard = self.fs_lock().lock();
        let file = self.fs().open(name).ok_or(SyscallError::NotFound)?;
        // A file handed back by a full table is closed here, under the lock.
        let fd = process
            .files()
            .lock()
            .allocate(file)
            .map_err(|_| SyscallError::TooManyFiles)?;
        Ok(fd)
    }

    fn sys_filesize(&self, process: &Process, fd: i32) -> HandlerResult {
        self.with_file(process, fd, |file| file.length() as i32)
            .ok_or_else(|| SyscallError::BadFd.into())
    }

    fn sys_read(&self, process: &Process, fd: i32, buffer: UserBufferMut) -> HandlerResult {
        if buffer.is_empty() {
            return Err(SyscallError::EmptyTransfer.into());
        }

        let mut bounce = vec![0u8; buffer.len().min(IO_CHUNK)];
        let count = match fd {
            STDIN_FILENO => {
                let mut total = 0;
                for chunk in buffer.chunks(IO_CHUNK) {
                    let bytes = &mut bounce[..chunk.len()];
                    for byte in bytes.iter_mut() {
                        *byte = self.console().getc();
                    }
                    total += self.copy_to_user(process, chunk, bytes)?;
                }
                total
            }
            STDOUT_FILENO => return Err(SyscallError::WrongDirection(fd).into()),
            _ => self
                .with_file(process, fd, |file| -> Result<usize, Fault> {
                    let mut total = 0;
                    for chunk in buffer.chunks(IO_CHUNK) {
                        let n = file.read(&mut bounce[..chunk.len()]);
                        total += self.copy_to_user(process, chunk, &bounce[..n])?;
                        if n < chunk.len() {
                            break;
                        }
                    }
                    Ok(total)
                })
                .ok_or(SyscallError::BadFd)??,
        };
        Ok(count as i32)
    }

    fn sys_write(&self, process: &Process, fd: i32, buffer: UserBuffer) -> HandlerResult {
        if buffer.is_empty() {
            return Err(SyscallError::EmptyTransfer.into());
        }

        let mut bounce = vec![0u8; buffer.len().min(IO_CHUNK)];
        let count = match fd {
            STDOUT_FILENO => {
                for chunk in buffer.chunks(IO_CHUNK) {
                    let bytes = &mut bounce[..chunk.len()];
                    self.copy_from_user(process, chunk, bytes)?;
                    self.console().put_buf(bytes);
                }
                buffer.len()
            }
            STDIN_FILENO => return Err(SyscallError::WrongDirection(fd).into()),
            _ => self
                .with_file(process, fd, |file| -> Result<usize, Fault> {
                    let mut total = 0;
                    for chunk in buffer.chunks(IO_CHUNK) {
                        let bytes = &mut bounce[..chunk.len()];
                        self.copy_from_user(process, chunk, bytes)?;
                        let n = file.write(bytes);
                        total += n;
                        if n < chunk.len() {
                            break;
                        }
                    }
                    Ok(total)
                })
                .ok_or(SyscallError::BadFd)??,
        };
        Ok(count as i32)
    }

    fn copy_from_user(
        &self,
        process: &Process,
        chunk: UserBuffer,
        dst: &mut [u8],
    ) -> Result<(), Fault> {
        let space = process.space().lock();
        chunk.read_into(&**space, dst).ok_or_else(|| vanished(chunk.addr()))
    }

    fn copy_to_user(
        &self,
        process: &Process,
        chunk: UserBufferMut,
        src: &[u8],
    ) -> Result<usize, Fault> {
        let mut space = process.space().lock();
        chunk.copy_out(&mut **space, src).ok_or_else(|| vanished(chunk.addr()))
    }

    fn sys_seek(&self, process: &Process, fd: i32, position: u32) -> Result<(), Fault> {
        self.with_file(process, fd, |file| file.seek(position))
            .ok_or(Fault::InvalidFd(fd))
    }

    fn sys_tell(&self, process: &Process, fd: i32) -> HandlerResult {
        let position = self
            .with_file(process, fd, |file| file.tell())
            .ok_or(Fault::InvalidFd(fd))?;
        Ok(position as i32)
    }

    fn sys_close(&self, process: &Process, fd: i32) -> Result<(), Fault> {
        let _guard = self.fs_lock().lock();
        let mut files = process.files().lock();
        if files.release(fd) || files.was_allocated(fd) {
            Ok(())
        } else {
            Err(Fault::InvalidFd(fd))
        }
    }

    /// Run `f` on the open file `fd` with the file system lock held.
    fn with_file<R>(
        &self,
        process: &Process,
        fd: i32,
        f: impl FnOnce(&mut dyn File) -> R,
    ) -> Option<R> {
        let _guard = self.fs_lock().lock();
        let mut files = process.files().lock();
        let file = files.lookup(fd)?;
        Some(f(file))
    }
}
