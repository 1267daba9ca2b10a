//! System Call Trap
//!
//! User code enters the kernel with `int $0x30`. The low-level stub saves
//! the user registers into an `InterruptFrame` and calls `syscall_entry`.
//!
//! # Calling convention
//! - `[esp]`: syscall number
//! - `[esp + 4*i]`: argument *i* (1-based)
//! - `eax`: return value, written before the thread resumes
//!
//! # Security Considerations
//! - The gate has DPL 3 so user code may raise it; no other vector is
//!   reachable from ring 3
//! - `esp` is user-controlled and is never dereferenced without validation

use crate::kernel::Kernel;
use crate::mm::VirtAddr;

/// Interrupt vector of the system call gate.
pub const SYSCALL_VECTOR: u8 = 0x30;

/// Descriptor privilege level of the gate, so ring 3 may invoke it.
pub const SYSCALL_DPL: u8 = 3;

/// Registers saved by the trap stub, in push order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Kernel esp at `pushal`; not the user stack.
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    /// Return value slot.
    pub eax: u32,
    pub vec_no: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    /// User stack pointer at the moment of the trap.
    pub esp: u32,
    pub ss: u32,
}

impl InterruptFrame {
    /// Frame of a system call trap with user stack pointer `esp`.
    pub fn syscall(esp: u32) -> Self {
        Self {
            vec_no: u32::from(SYSCALL_VECTOR),
            esp,
            ..Self::default()
        }
    }

    /// The trapped user stack pointer.
    pub fn user_stack(&self) -> VirtAddr {
        VirtAddr::from_word(self.esp)
    }

    /// Store the value user code sees as the call's result.
    pub fn set_return(&mut self, value: i32) {
        self.eax = value as u32;
    }

    pub fn return_value(&self) -> i32 {
        self.eax as i32
    }
}

/// What happens to the trapping thread after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Return to user mode; `eax` holds the result.
    Resume,
    /// The process is gone. The thread must be retired.
    Exit(i32),
    /// `halt` was called.
    PowerOff,
}

/// Platform power control.
pub trait Machine: Send + Sync {
    fn power_off(&self) -> !;
}

/// Entry point called by the trap stub for vector `SYSCALL_VECTOR`.
///
/// Returns only when the thread goes back to user mode.
pub fn syscall_entry(kernel: &Kernel, frame: &mut InterruptFrame) {
    match kernel.handle_syscall(frame) {
        Disposition::Resume => {}
        Disposition::Exit(_) => kernel.scheduler().exit_current(),
        Disposition::PowerOff => {
            log::info!("[EXCEPTION] powering off");
            kernel.machine().power_off()
        }
    }
}
