// SPDX-License-Identifier: Apache-2.0

//! Hardware exception handling
//!
//! Every hardware exception of a guest thread ends up in
//! [`Dispatcher::dispatch`], running on the trapping thread. The dispatcher
//! passes the [`TrapFrame`] through an ordered chain of stages:
//!
//! 1. [`emulate`]: an invalid opcode trap caused by one of the instructions
//!    the enclave cannot execute is emulated in place.
//! 2. [`signal`]: the exception is delivered to the kernel as a signal.
//!
//! A stage either settles the trap or explicitly passes it on. A trap that
//! passes the last stage is declined and left to the next handler of the
//! enclave runtime.
//!
//! Until the kernel has published its hooks, only the instructions which
//! need no kernel are emulated.

pub mod emulate;
pub mod signal;

use crate::context::TrapFrame;
use crate::kernel::Kernel;

use core::ptr::read_unaligned;

use libos_tcall::Host;
use tracing::info;

/// Outcome of handling a trap
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Resume the trapped thread with the (modified) trap frame
    Resume,
    /// Let the next handler of the enclave runtime handle the trap
    Decline,
}

/// Hardware exception vectors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Vector {
    /// #DE
    DivideError = 0,
    /// #DB
    Debug = 1,
    /// #BP
    Breakpoint = 3,
    /// #BR
    BoundRange = 5,
    /// #UD
    InvalidOpcode = 6,
    /// #GP
    GeneralProtection = 13,
    /// #PF
    Page = 14,
    /// #MF
    X87FloatingPoint = 16,
    /// #AC
    AlignmentCheck = 17,
    /// #XM
    SimdFloatingPoint = 19,
}

impl TryFrom<u32> for Vector {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::DivideError,
            1 => Self::Debug,
            3 => Self::Breakpoint,
            5 => Self::BoundRange,
            6 => Self::InvalidOpcode,
            13 => Self::GeneralProtection,
            14 => Self::Page,
            16 => Self::X87FloatingPoint,
            17 => Self::AlignmentCheck,
            19 => Self::SimdFloatingPoint,
            v => return Err(v),
        })
    }
}

/// Instructions emulated by the shim, by their little endian encoding.
///
/// Details in Volume 2 of the Intel 64 and IA-32 Architectures Software
/// Developer's Manual.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// `rdtsc`
    Rdtsc = 0x310f,
    /// `cpuid`
    Cpuid = 0xa20f,
    /// `iretq`
    Iretq = 0xcf48,
    /// `syscall`
    Syscall = 0x050f,
}

/// Length of every [`Opcode`] in bytes
pub const OPCODE_LEN: u64 = 2;

const OPCODES: [(Opcode, &str); 4] = [
    (Opcode::Rdtsc, "rdtsc"),
    (Opcode::Cpuid, "cpuid"),
    (Opcode::Iretq, "iretq"),
    (Opcode::Syscall, "syscall"),
];

impl Opcode {
    /// Returns the mnemonic of the instruction.
    pub fn name(self) -> &'static str {
        OPCODES
            .iter()
            .find(|(op, _)| *op == self)
            .map_or("unknown", |(_, name)| name)
    }
}

impl TryFrom<u16> for Opcode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        OPCODES
            .iter()
            .map(|(op, _)| *op)
            .find(|op| *op as u16 == value)
            .ok_or(value)
    }
}

/// Returns the mnemonic of the instruction encoded as `opcode`.
pub fn opcode_name(opcode: u16) -> &'static str {
    Opcode::try_from(opcode).map_or("unknown", Opcode::name)
}

/// Result of a single stage of the dispatcher
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// The trap is settled
    Done(Verdict),
    /// Pass the trap to the next stage
    Next,
}

type Stage<D> = fn(&D, &mut TrapFrame) -> Step;

/// Routes hardware exceptions to the emulators and the kernel
pub struct Dispatcher<'a, H, K> {
    host: &'a H,
    kernel: Option<&'a K>,
    trace: bool,
}

impl<'a, H: Host, K: Kernel> Dispatcher<'a, H, K> {
    /// Creates a dispatcher. With `trace`, every emulated instruction is logged.
    pub fn new(host: &'a H, kernel: Option<&'a K>, trace: bool) -> Self {
        Self {
            host,
            kernel,
            trace,
        }
    }

    /// Handles the trap described by `frame`.
    pub fn dispatch(&self, frame: &mut TrapFrame) -> Verdict {
        let stages: [Stage<Self>; 2] = [Self::emulate, Self::forward];

        for stage in stages {
            if let Step::Done(verdict) = stage(self, frame) {
                return verdict;
            }
        }

        Verdict::Decline
    }

    fn emulate(&self, frame: &mut TrapFrame) -> Step {
        if Vector::try_from(frame.vector) != Ok(Vector::InvalidOpcode) {
            return Step::Next;
        }

        // The trapping instruction is enclave memory, `rip` points into it.
        let raw: u16 = unsafe { read_unaligned(frame.gpr.rip as *const u16) };
        let opcode = match Opcode::try_from(raw) {
            Ok(opcode) => opcode,
            Err(_) => return Step::Next,
        };

        self.strace(opcode, frame);

        match opcode {
            Opcode::Rdtsc => emulate::rdtsc(frame, self.host),
            Opcode::Cpuid => emulate::cpuid(frame, self.host),
            Opcode::Iretq => unsafe { emulate::iretq(frame) },
            Opcode::Syscall => match self.kernel {
                Some(kernel) => emulate::syscall(frame, kernel),
                None => Step::Next,
            },
        }
    }

    fn forward(&self, frame: &mut TrapFrame) -> Step {
        match self.kernel {
            Some(kernel) => signal::forward(frame, kernel),
            None => Step::Next,
        }
    }

    fn strace(&self, opcode: Opcode, frame: &TrapFrame) {
        if !self.trace {
            return;
        }

        let gpr = &frame.gpr;
        match opcode {
            Opcode::Cpuid => info!(
                target: "libos::trap",
                "{}(rax={:#x}, rcx={:#x})",
                opcode.name(),
                gpr.rax,
                gpr.rcx
            ),
            Opcode::Syscall => info!(
                target: "libos::trap",
                "{}({}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x})",
                opcode.name(),
                gpr.rax,
                gpr.rdi,
                gpr.rsi,
                gpr.rdx,
                gpr.r10,
                gpr.r8,
                gpr.r9
            ),
            _ => info!(target: "libos::trap", "{}()", opcode.name()),
        }
    }
}
