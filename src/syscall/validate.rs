//! System Call Input Validation
//!
//! Decides whether user-supplied addresses are safe for the kernel to touch.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: deny by default
//! - Prevent common vulnerabilities:
//!   - Kernel memory disclosure (reject addresses at or above `PHYS_BASE`)
//!   - Faults inside the kernel (every page of a range must be resident)
//!   - TOCTOU races (strings are copied to kernel space before the
//!     handler runs)
//!   - Unbounded kernel allocations (buffers are moved in fixed-size chunks)
//!   - Null pointer dereference (explicit checks)

use alloc::vec::Vec;

use super::error::UserPtrError;
use crate::mm::address::pages_in;
use crate::mm::{AddressSpace, PageFlags, VirtAddr, PAGE_SIZE};

/// Check a single user address.
///
/// False iff `addr` is null, lies in kernel space, or is not mapped in
/// `space`.
pub fn verify(space: &dyn AddressSpace, addr: VirtAddr) -> bool {
    check(space, addr).is_ok()
}

/// Check every page touched by `[addr, addr + len)`.
pub fn verify_range(space: &dyn AddressSpace, addr: VirtAddr, len: usize) -> bool {
    check_range(space, addr, len, PageFlags::empty()).is_ok()
}

/// Like `verify`, but reports why the address was rejected.
pub fn check(space: &dyn AddressSpace, addr: VirtAddr) -> Result<(), UserPtrError> {
    check_range(space, addr, 1, PageFlags::empty())
}

/// Validate `[addr, addr + len)`, requiring `required` on every page.
///
/// Zero-length ranges are valid without looking at `addr`.
fn check_range(
    space: &dyn AddressSpace,
    addr: VirtAddr,
    len: usize,
    required: PageFlags,
) -> Result<(), UserPtrError> {
    if len == 0 {
        return Ok(());
    }

    if addr.is_null() {
        return Err(reject(addr, UserPtrError::Null));
    }

    if addr.is_kernel() {
        return Err(reject(addr, UserPtrError::KernelAddress(addr)));
    }

    // The last byte must stay below PHYS_BASE as well.
    let last = addr
        .checked_add(len - 1)
        .ok_or_else(|| reject(addr, UserPtrError::Overflow))?;
    if last.is_kernel() {
        return Err(reject(addr, UserPtrError::KernelAddress(last)));
    }

    for page in pages_in(addr, len) {
        let mapping = space
            .translate(page)
            .ok_or_else(|| reject(addr, UserPtrError::Unmapped(page)))?;
        if !mapping.flags.contains(required) {
            return Err(reject(addr, UserPtrError::ReadOnly(page)));
        }
    }

    Ok(())
}

fn reject(addr: VirtAddr, reason: UserPtrError) -> UserPtrError {
    log::debug!("[VALIDATE] rejected user pointer {}: {}", addr, reason);
    reason
}

/// A validated user-space buffer the kernel reads from
///
/// This type guarantees that:
/// - The buffer is below `PHYS_BASE`
/// - Every page of the buffer was mapped at validation time
/// - The length doesn't overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBuffer {
    addr: VirtAddr,
    len: usize,
}

impl UserBuffer {
    /// Buffer start.
    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Split into consecutive sub-buffers of at most `size` bytes.
    pub fn chunks(self, size: usize) -> impl Iterator<Item = Self> {
        split(self.addr, self.len, size).map(|(addr, len)| Self { addr, len })
    }

    /// Fill `dst` from the start of the buffer without allocating.
    ///
    /// Returns `None` if a page disappeared since validation.
    pub fn read_into(&self, space: &dyn AddressSpace, dst: &mut [u8]) -> Option<()> {
        let total = dst.len().min(self.len);
        let mut done = 0;
        for page in pages_in(self.addr, total) {
            let mapping = space.translate(page)?;
            let start = if done == 0 { self.addr.page_offset() } else { 0 };
            let chunk = (total - done).min(PAGE_SIZE - start);
            dst[done..done + chunk].copy_from_slice(&mapping.frame[start..start + chunk]);
            done += chunk;
        }
        Some(())
    }
}

/// A validated user-space buffer the kernel writes to
///
/// Same guarantees as `UserBuffer`, plus every page is writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBufferMut {
    addr: VirtAddr,
    len: usize,
}

impl UserBufferMut {
    /// Buffer start.
    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Split into consecutive sub-buffers of at most `size` bytes.
    pub fn chunks(self, size: usize) -> impl Iterator<Item = Self> {
        split(self.addr, self.len, size).map(|(addr, len)| Self { addr, len })
    }

    /// Copy `data` (at most `len` bytes) out to user memory.
    ///
    /// Returns the number of bytes copied, or `None` if a page disappeared
    /// since validation.
    pub fn copy_out(&self, space: &mut dyn AddressSpace, data: &[u8]) -> Option<usize> {
        let total = data.len().min(self.len);
        let mut done = 0;
        for page in pages_in(self.addr, total) {
            let mapping = space.translate_mut(page)?;
            let start = if done == 0 { self.addr.page_offset() } else { 0 };
            let chunk = (total - done).min(PAGE_SIZE - start);
            mapping.frame[start..start + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Some(done)
    }
}

/// `(start, len)` of each piece of a validated range cut into `size` bytes.
fn split(addr: VirtAddr, len: usize, size: usize) -> impl Iterator<Item = (VirtAddr, usize)> {
    let size = size.max(1);
    // The whole range is below PHYS_BASE, so the additions cannot wrap.
    (0..len)
        .step_by(size)
        .map(move |offset| (VirtAddr::new(addr.as_usize() + offset), size.min(len - offset)))
}

/// A NUL-terminated string copied in from user memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserString {
    bytes: Vec<u8>,
}

impl UserString {
    /// The string as UTF-8, if it is valid.
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.bytes).ok()
    }
}

/// Why a string could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// A byte of the string is not safe to read.
    Pointer(UserPtrError),
    /// No terminator within the limit.
    Unterminated,
}

/// Validate a user-space read buffer
///
/// # Returns
/// * `Ok(UserBuffer)` - Validated buffer handle
/// * `Err(UserPtrError)` - Validation failed
///
/// # Security Checks
/// 1. Pointer is non-null
/// 2. Start and end are below `PHYS_BASE`, without overflow
/// 3. Every page of the range is mapped
pub fn validate_user_read(
    space: &dyn AddressSpace,
    addr: VirtAddr,
    len: usize,
) -> Result<UserBuffer, UserPtrError> {
    check_range(space, addr, len, PageFlags::empty())?;
    Ok(UserBuffer { addr, len })
}

/// Validate a user-space write buffer
///
/// Same as read validation, and every page must be writable.
pub fn validate_user_write(
    space: &dyn AddressSpace,
    addr: VirtAddr,
    len: usize,
) -> Result<UserBufferMut, UserPtrError> {
    check_range(space, addr, len, PageFlags::WRITABLE)?;
    Ok(UserBufferMut { addr, len })
}

/// Copy in a NUL-terminated string of at most `max_len` bytes.
///
/// Each page is verified before its first byte is read, so a string
/// running off the end of the mapped region is caught at the boundary.
pub fn read_user_string(
    space: &dyn AddressSpace,
    addr: VirtAddr,
    max_len: usize,
) -> Result<UserString, StringError> {
    let mut bytes = Vec::new();
    let mut cursor = addr;

    loop {
        check(space, cursor).map_err(StringError::Pointer)?;
        let mapping = space
            .translate(cursor.align_down())
            .ok_or(StringError::Pointer(UserPtrError::Unmapped(cursor.align_down())))?;

        for &byte in &mapping.frame[cursor.page_offset()..] {
            if byte == 0 {
                return Ok(UserString { bytes });
            }
            if bytes.len() == max_len {
                return Err(StringError::Unterminated);
            }
            bytes.push(byte);
        }

        let consumed = PAGE_SIZE - cursor.page_offset();
        cursor = cursor
            .checked_add(consumed)
            .ok_or(StringError::Pointer(UserPtrError::Overflow))?;
    }
}
