//! User Page Directory
//!
//! The page-table collaborator as seen from the system call boundary.
//!
//! # Design
//! - `AddressSpace` is the narrow contract the validator is built on:
//!   translate one user page to its flags and a kernel view of the frame
//! - `UserPageTable` is a software page directory that implements it.
//!   Loaders build process images in it and the test-suite uses it as the
//!   process memory
//!
//! # Security Properties
//! - Kernel addresses can never be mapped into a user page table
//! - Every frame is zeroed when it is mapped

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use bitflags::bitflags;

use super::address::{pages_in, VirtAddr, PAGE_SIZE};

/// One page of physical memory as seen by the kernel.
pub type Frame = [u8; PAGE_SIZE];

bitflags! {
    /// Page table entry flags for user mappings.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry is present.
        const PRESENT = 1 << 0;
        /// Page may be written.
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode.
        const USER = 1 << 2;

        /// Read-only user page (code, rodata).
        const USER_RO = Self::PRESENT.bits() | Self::USER.bits();
        /// Read-write user page (data, heap, stack).
        const USER_RW = Self::USER_RO.bits() | Self::WRITABLE.bits();
    }
}

/// A resident user page: its flags and the kernel's view of the frame.
pub struct Mapping<'a> {
    pub flags: PageFlags,
    pub frame: &'a Frame,
}

/// A resident user page, writable from the kernel side.
pub struct MappingMut<'a> {
    pub flags: PageFlags,
    pub frame: &'a mut Frame,
}

/// The per-process page directory.
///
/// Implementations only report pages that are present and user accessible.
/// `page` is always page-aligned.
pub trait AddressSpace: Send {
    /// Translate a user page to its frame, or `None` if it is not mapped.
    fn translate(&self, page: VirtAddr) -> Option<Mapping<'_>>;

    /// Like `translate`, but hands out the frame for writing.
    fn translate_mut(&mut self, page: VirtAddr) -> Option<MappingMut<'_>>;
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The virtual address is already mapped.
    #[error("virtual address already mapped")]
    AlreadyMapped,
    /// The virtual address is not mapped.
    #[error("virtual address not mapped")]
    NotMapped,
    /// The address is not properly aligned.
    #[error("address not properly aligned")]
    MisalignedAddress,
    /// Attempted to map a kernel address or the null page.
    #[error("address outside of user space")]
    InvalidAddress,
}

/// A single page table entry.
struct PageTableEntry {
    flags: PageFlags,
    frame: Box<Frame>,
}

/// Software page directory for one user process.
///
/// Entries are keyed by virtual page number.
#[derive(Default)]
pub struct UserPageTable {
    entries: BTreeMap<usize, PageTableEntry>,
}

impl UserPageTable {
    /// Create an empty page directory.
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Map a zeroed frame at `page` with `flags`.
    pub fn map(&mut self, page: VirtAddr, flags: PageFlags) -> Result<(), MappingError> {
        if !page.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        if page.is_null() || page.is_kernel() {
            return Err(MappingError::InvalidAddress);
        }
        if self.entries.contains_key(&page.page_number()) {
            return Err(MappingError::AlreadyMapped);
        }

        self.entries.insert(
            page.page_number(),
            PageTableEntry {
                flags: flags | PageFlags::PRESENT | PageFlags::USER,
                frame: Box::new([0; PAGE_SIZE]),
            },
        );
        Ok(())
    }

    /// Map every page touched by `[start, start + len)`.
    pub fn map_range(
        &mut self,
        start: VirtAddr,
        len: usize,
        flags: PageFlags,
    ) -> Result<(), MappingError> {
        start
            .checked_add(len)
            .ok_or(MappingError::InvalidAddress)?;
        for page in pages_in(start, len) {
            self.map(page, flags)?;
        }
        Ok(())
    }

    /// Remove the mapping at `page`.
    pub fn unmap(&mut self, page: VirtAddr) -> Result<(), MappingError> {
        self.entries
            .remove(&page.page_number())
            .map(|_| ())
            .ok_or(MappingError::NotMapped)
    }

    /// Change the flags of an existing mapping.
    pub fn protect(&mut self, page: VirtAddr, flags: PageFlags) -> Result<(), MappingError> {
        let entry = self
            .entries
            .get_mut(&page.page_number())
            .ok_or(MappingError::NotMapped)?;
        entry.flags = flags | PageFlags::PRESENT | PageFlags::USER;
        Ok(())
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no page is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy `data` into already mapped pages, ignoring write protection.
    ///
    /// This is the loader's path for building a process image.
    pub fn load(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), MappingError> {
        let mut cursor = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let entry = self
                .entries
                .get_mut(&cursor.page_number())
                .ok_or(MappingError::NotMapped)?;
            let offset = cursor.page_offset();
            let chunk = rest.len().min(PAGE_SIZE - offset);
            entry.frame[offset..offset + chunk].copy_from_slice(&rest[..chunk]);
            rest = &rest[chunk..];
            cursor = cursor
                .checked_add(chunk)
                .ok_or(MappingError::InvalidAddress)?;
        }
        Ok(())
    }
}

impl AddressSpace for UserPageTable {
    fn translate(&self, page: VirtAddr) -> Option<Mapping<'_>> {
        self.entries.get(&page.page_number()).map(|entry| Mapping {
            flags: entry.flags,
            frame: &entry.frame,
        })
    }

    fn translate_mut(&mut self, page: VirtAddr) -> Option<MappingMut<'_>> {
        self.entries
            .get_mut(&page.page_number())
            .map(|entry| MappingMut {
                flags: entry.flags,
                frame: &mut entry.frame,
            })
    }
}
