//! File system collaborator
//!
//! The system call layer never touches on-disk structures. It names files
//! through `FileSystem`, holds open files as `Box<dyn File>`, and wraps
//! every call into either of them in the shared `FsLock`.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

/// Directory-level operations.
pub trait FileSystem: Send + Sync {
    /// Create `name` with `initial_size` zero bytes. Does not open it.
    fn create(&self, name: &str, initial_size: u32) -> bool;

    /// Delete `name`. Open handles stay usable.
    fn remove(&self, name: &str) -> bool;

    /// Open `name`, or `None` if it does not exist.
    fn open(&self, name: &str) -> Option<Box<dyn File>>;
}

/// An open file. Dropping it closes it.
pub trait File: Send {
    /// Read at the cursor; returns bytes read, 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write at the cursor; returns bytes written.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Move the cursor. Positions past the end are allowed.
    fn seek(&mut self, position: u32);

    /// Current cursor offset.
    fn tell(&self) -> u32;

    /// File size in bytes.
    fn length(&self) -> u32;
}

/// The single lock that serializes all file system calls.
///
/// Owned by whoever builds the kernel and shared with it, so another party
/// (a test, a debugger) can hold it to create contention.
#[derive(Default)]
pub struct FsLock {
    inner: Mutex<()>,
    acquisitions: AtomicUsize,
}

impl FsLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Acquire the lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        let guard = self.inner.lock();
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Run `f` with the lock held.
    pub fn hold<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock();
        f()
    }

    /// Number of times the lock has been taken.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Relaxed)
    }
}
