//! User and Kernel Virtual Addresses
//!
//! Type-safe wrapper for addresses handed to the kernel by user code.
//!
//! # Address Space Layout (32-bit)
//! ```text
//! 0xFFFF_FFFF ┌──────────────────────┐
//!             │   kernel (reserved)  │
//! 0xC000_0000 ├──────────────────────┤  PHYS_BASE
//!             │   user stack         │
//!             │   ...                │
//!             │   user code/data     │
//! 0x0000_0000 └──────────────────────┘  null page, never mapped
//! ```
//!
//! # Security Properties
//! - A `VirtAddr` is never dereferenced directly; user memory is reached
//!   only through an `AddressSpace` after validation
//! - Address arithmetic is checked so ranges cannot wrap around

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: usize = 12;

/// Size of one word on the user stack.
pub const WORD_SIZE: usize = 4;

/// First kernel virtual address. Everything at or above belongs to the kernel.
pub const PHYS_BASE: usize = 0xC000_0000;

/// A user-supplied virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Create a virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Create a virtual address from a raw 32-bit stack word.
    #[inline]
    pub const fn from_word(word: u32) -> Self {
        Self(word as usize)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if this is the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this address lies in the kernel's reserved range.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= PHYS_BASE
    }

    /// Check if this address lies below `PHYS_BASE`.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < PHYS_BASE
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Get the virtual page number.
    #[inline]
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Add an offset, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Iterate over the page-aligned addresses of every page touched by
/// `[start, start + len)`.
///
/// The caller must have checked that the range does not overflow.
pub fn pages_in(start: VirtAddr, len: usize) -> impl Iterator<Item = VirtAddr> {
    let first = start.page_number();
    let last = if len == 0 {
        first
    } else {
        (start.as_usize() + len - 1) >> PAGE_SHIFT
    };
    let count = if len == 0 { 0 } else { last - first + 1 };
    (first..first + count).map(|vpn| VirtAddr::new(vpn << PAGE_SHIFT))
}
