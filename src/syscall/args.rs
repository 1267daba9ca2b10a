//! Stack Argument Reader
//!
//! Reads the system call number and its arguments from the trapped user
//! stack: number at `[esp]`, argument *i* at `[esp + 4*i]`. Every word is
//! validated in full before it is read, since a word may straddle a page
//! boundary.

use super::error::{Fault, Stage, UserPtrError};
use super::numbers::{Syscall, MAX_ARGS};
use super::validate;
use crate::mm::{AddressSpace, VirtAddr, WORD_SIZE};

/// Argument words of one call; unused slots are zero.
pub type ArgWords = [u32; MAX_ARGS];

/// Reader over one trapped user stack.
pub struct StackArgs<'a> {
    space: &'a dyn AddressSpace,
    esp: VirtAddr,
}

impl<'a> StackArgs<'a> {
    pub fn new(space: &'a dyn AddressSpace, esp: VirtAddr) -> Self {
        Self { space, esp }
    }

    /// Read and decode the syscall number.
    pub fn syscall(&self) -> Result<Syscall, Fault> {
        let number = self.word(0, Stage::Decoding)?;
        Syscall::try_from(number).map_err(Fault::UnknownSyscall)
    }

    /// Read exactly `call.arity()` argument words.
    pub fn args(&self, call: Syscall) -> Result<ArgWords, Fault> {
        let mut words = [0; MAX_ARGS];
        for (index, slot) in words.iter_mut().enumerate().take(call.arity()) {
            *slot = self.word(index + 1, Stage::ArgValidation)?;
        }
        Ok(words)
    }

    /// Read the little-endian word at `esp + index * WORD_SIZE`.
    fn word(&self, index: usize, stage: Stage) -> Result<u32, Fault> {
        let addr = self
            .esp
            .checked_add(index * WORD_SIZE)
            .unwrap_or(VirtAddr::new(usize::MAX));
        let buffer = validate::validate_user_read(self.space, addr, WORD_SIZE)
            .map_err(|reason| Fault::bad_pointer(addr, reason, stage))?;

        let mut bytes = [0u8; WORD_SIZE];
        buffer.read_into(self.space, &mut bytes).ok_or_else(|| {
            Fault::bad_pointer(addr, UserPtrError::Unmapped(addr.align_down()), stage)
        })?;
        Ok(u32::from_le_bytes(bytes))
    }
}
