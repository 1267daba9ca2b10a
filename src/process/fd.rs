//! File Descriptor Table
//!
//! Per-process map from small integers to open files.
//!
//! # Design
//! - Descriptors 0 and 1 are the console and never live in the table
//! - Entries are owned: releasing an entry drops (closes) the file
//! - Allocation follows `FdPolicy`, fixed when the table is created

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::fmt;

use crate::config::FdPolicy;
use crate::fs::File;

/// Keyboard input.
pub const STDIN_FILENO: i32 = 0;
/// Console output.
pub const STDOUT_FILENO: i32 = 1;
/// First descriptor handed out by `allocate`.
pub const FIRST_FD: i32 = 2;

/// No descriptor is left. Holds the file that could not be inserted.
#[derive(thiserror::Error)]
#[error("file descriptor table is full")]
pub struct TableFull(pub Box<dyn File>);

impl fmt::Debug for TableFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TableFull")
    }
}

/// Per-process open file table.
pub struct FdTable {
    entries: BTreeMap<i32, Box<dyn File>>,
    policy: FdPolicy,
    capacity: usize,
    /// Highest descriptor ever handed out, `FIRST_FD - 1` if none.
    high_water: i32,
}

impl FdTable {
    pub fn new(policy: FdPolicy, capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            policy,
            capacity,
            high_water: FIRST_FD - 1,
        }
    }

    /// Insert `file` and return its descriptor.
    ///
    /// Hands the file back if the table is full.
    pub fn allocate(&mut self, file: Box<dyn File>) -> Result<i32, TableFull> {
        if self.entries.len() >= self.capacity {
            return Err(TableFull(file));
        }
        let fd = match self.policy {
            FdPolicy::LowestFree => self.lowest_free(),
            FdPolicy::Monotonic => match self.high_water.checked_add(1) {
                Some(fd) => fd,
                None => return Err(TableFull(file)),
            },
        };
        debug_assert!(!self.entries.contains_key(&fd), "fd {} allocated twice", fd);
        self.entries.insert(fd, file);
        self.high_water = self.high_water.max(fd);
        Ok(fd)
    }

    fn lowest_free(&self) -> i32 {
        let mut candidate = FIRST_FD;
        for &fd in self.entries.keys() {
            if fd != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    /// The open file behind `fd`.
    pub fn lookup(&mut self, fd: i32) -> Option<&mut (dyn File + 'static)> {
        self.entries.get_mut(&fd).map(|file| &mut **file)
    }

    /// True if `fd` is open.
    pub fn contains(&self, fd: i32) -> bool {
        self.entries.contains_key(&fd)
    }

    /// Close `fd`. Returns false if it was not open.
    pub fn release(&mut self, fd: i32) -> bool {
        self.entries.remove(&fd).is_some()
    }

    /// Close every open file. Returns how many were closed.
    pub fn release_all(&mut self) -> usize {
        let closed = self.entries.len();
        self.entries.clear();
        closed
    }

    /// True if `fd` was handed out at some point, open or not.
    pub fn was_allocated(&self, fd: i32) -> bool {
        (FIRST_FD..=self.high_water).contains(&fd)
    }

    /// Number of open entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
