//! Memory management view of the system call boundary
//!
//! Provides:
//! - Typed user virtual addresses and the user/kernel split
//! - The `AddressSpace` page directory contract
//! - A software page directory (`UserPageTable`)
//!
//! # Security Principles
//! - User addresses are plain numbers until validated
//! - Kernel-range addresses are never translated on behalf of user code

pub mod address;
pub mod paging;

pub use address::{VirtAddr, PAGE_SIZE, PHYS_BASE, WORD_SIZE};
pub use paging::{AddressSpace, Mapping, MappingError, MappingMut, PageFlags, UserPageTable};
