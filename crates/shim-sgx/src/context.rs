// SPDX-License-Identifier: Apache-2.0

//! Register contexts
//!
//! A hardware exception hands the shim a [`TrapFrame`], the register state
//! saved by the enclave runtime. The kernel's signal code works on the Linux
//! [`MContext`] instead. Both directions of the translation are lossless for
//! the general purpose registers, the instruction pointer, the stack pointer
//! and the flags.

use const_default::ConstDefault;

bitflags::bitflags! {
    /// Properties of a [`TrapFrame`]
    #[derive(Default)]
    #[repr(transparent)]
    pub struct TrapFlags: u32 {
        /// `faulting_address` and `error_code` were supplied by the hardware
        const EXINFO = 1 << 0;
    }
}

/// General purpose registers saved at a trap
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, ConstDefault, PartialEq, Eq)]
pub struct Gpr {
    /// Register flags
    pub rflags: u64,
    /// Register rax
    pub rax: u64,
    /// Register rbx
    pub rbx: u64,
    /// Register rcx
    pub rcx: u64,
    /// Register rdx
    pub rdx: u64,
    /// Register rbp
    pub rbp: u64,
    /// Register rsp
    pub rsp: u64,
    /// Register rdi
    pub rdi: u64,
    /// Register rsi
    pub rsi: u64,
    /// Register r8
    pub r8: u64,
    /// Register r9
    pub r9: u64,
    /// Register r10
    pub r10: u64,
    /// Register r11
    pub r11: u64,
    /// Register r12
    pub r12: u64,
    /// Register r13
    pub r13: u64,
    /// Register r14
    pub r14: u64,
    /// Register r15
    pub r15: u64,
    /// Register rip
    pub rip: u64,
}

/// The register state of a trapped thread, as handed over by the enclave runtime
///
/// Mutating the frame redirects the thread once the trap is resumed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// Hardware exception vector
    pub vector: u32,
    /// See [`TrapFlags`]
    pub flags: TrapFlags,
    /// Exception error code of a #PF or #GP
    pub error_code: u32,
    /// Reserved
    pub reserved: u32,
    /// Linear address that caused a #PF
    pub faulting_address: u64,
    /// Saved registers
    pub gpr: Gpr,
}

/// Index of r8 in [`MContext::gregs`]
pub const REG_R8: usize = 0;
/// Index of r9 in [`MContext::gregs`]
pub const REG_R9: usize = 1;
/// Index of r10 in [`MContext::gregs`]
pub const REG_R10: usize = 2;
/// Index of r11 in [`MContext::gregs`]
pub const REG_R11: usize = 3;
/// Index of r12 in [`MContext::gregs`]
pub const REG_R12: usize = 4;
/// Index of r13 in [`MContext::gregs`]
pub const REG_R13: usize = 5;
/// Index of r14 in [`MContext::gregs`]
pub const REG_R14: usize = 6;
/// Index of r15 in [`MContext::gregs`]
pub const REG_R15: usize = 7;
/// Index of rdi in [`MContext::gregs`]
pub const REG_RDI: usize = 8;
/// Index of rsi in [`MContext::gregs`]
pub const REG_RSI: usize = 9;
/// Index of rbp in [`MContext::gregs`]
pub const REG_RBP: usize = 10;
/// Index of rbx in [`MContext::gregs`]
pub const REG_RBX: usize = 11;
/// Index of rdx in [`MContext::gregs`]
pub const REG_RDX: usize = 12;
/// Index of rax in [`MContext::gregs`]
pub const REG_RAX: usize = 13;
/// Index of rcx in [`MContext::gregs`]
pub const REG_RCX: usize = 14;
/// Index of rsp in [`MContext::gregs`]
pub const REG_RSP: usize = 15;
/// Index of rip in [`MContext::gregs`]
pub const REG_RIP: usize = 16;
/// Index of the flags in [`MContext::gregs`]
pub const REG_EFL: usize = 17;
/// Index of the error code in [`MContext::gregs`]
pub const REG_ERR: usize = 19;
/// Index of the trap number in [`MContext::gregs`]
pub const REG_TRAPNO: usize = 20;
/// Index of the faulting address in [`MContext::gregs`]
pub const REG_CR2: usize = 22;

/// Number of entries of [`MContext::gregs`]
pub const NGREG: usize = 23;

/// Linux x86_64 `mcontext_t`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MContext {
    /// General registers, indexed by the `REG_*` constants
    pub gregs: [i64; NGREG],
    /// Pointer to the floating point state, always null here
    pub fpregs: u64,
    /// Reserved
    pub reserved: [u64; 8],
}

impl ConstDefault for MContext {
    const DEFAULT: Self = Self {
        gregs: [0; NGREG],
        fpregs: 0,
        reserved: [0; 8],
    };
}

impl Default for MContext {
    fn default() -> Self {
        <Self as ConstDefault>::DEFAULT
    }
}

impl From<&TrapFrame> for MContext {
    fn from(frame: &TrapFrame) -> Self {
        debug_assert!(frame.vector < 32, "bad trap vector {}", frame.vector);

        let gpr = &frame.gpr;
        let mut mc = Self::DEFAULT;

        mc.gregs[REG_R8] = gpr.r8 as i64;
        mc.gregs[REG_R9] = gpr.r9 as i64;
        mc.gregs[REG_R10] = gpr.r10 as i64;
        mc.gregs[REG_R11] = gpr.r11 as i64;
        mc.gregs[REG_R12] = gpr.r12 as i64;
        mc.gregs[REG_R13] = gpr.r13 as i64;
        mc.gregs[REG_R14] = gpr.r14 as i64;
        mc.gregs[REG_R15] = gpr.r15 as i64;

        mc.gregs[REG_RSI] = gpr.rsi as i64;
        mc.gregs[REG_RDI] = gpr.rdi as i64;
        mc.gregs[REG_RBP] = gpr.rbp as i64;
        mc.gregs[REG_RSP] = gpr.rsp as i64;
        mc.gregs[REG_RIP] = gpr.rip as i64;

        mc.gregs[REG_RAX] = gpr.rax as i64;
        mc.gregs[REG_RBX] = gpr.rbx as i64;
        mc.gregs[REG_RCX] = gpr.rcx as i64;
        mc.gregs[REG_RDX] = gpr.rdx as i64;

        mc.gregs[REG_EFL] = gpr.rflags as i64;

        // Informational only, never written back.
        mc.gregs[REG_TRAPNO] = frame.vector.into();
        mc.gregs[REG_ERR] = frame.error_code.into();
        mc.gregs[REG_CR2] = frame.faulting_address as i64;

        mc
    }
}

impl MContext {
    /// Writes the registers back into `frame`.
    pub fn restore(&self, frame: &mut TrapFrame) {
        let gpr = &mut frame.gpr;

        gpr.r8 = self.gregs[REG_R8] as u64;
        gpr.r9 = self.gregs[REG_R9] as u64;
        gpr.r10 = self.gregs[REG_R10] as u64;
        gpr.r11 = self.gregs[REG_R11] as u64;
        gpr.r12 = self.gregs[REG_R12] as u64;
        gpr.r13 = self.gregs[REG_R13] as u64;
        gpr.r14 = self.gregs[REG_R14] as u64;
        gpr.r15 = self.gregs[REG_R15] as u64;

        gpr.rsi = self.gregs[REG_RSI] as u64;
        gpr.rdi = self.gregs[REG_RDI] as u64;
        gpr.rbp = self.gregs[REG_RBP] as u64;
        gpr.rsp = self.gregs[REG_RSP] as u64;
        gpr.rip = self.gregs[REG_RIP] as u64;

        gpr.rax = self.gregs[REG_RAX] as u64;
        gpr.rbx = self.gregs[REG_RBX] as u64;
        gpr.rcx = self.gregs[REG_RCX] as u64;
        gpr.rdx = self.gregs[REG_RDX] as u64;

        gpr.rflags = self.gregs[REG_EFL] as u64;
    }
}
