// SPDX-License-Identifier: Apache-2.0

//! Delivery of hardware exceptions to the kernel as signals

use super::{Step, Vector, Verdict};
use crate::context::{MContext, TrapFlags, TrapFrame};
use crate::kernel::Kernel;

use core::ffi::c_int;

use const_default::ConstDefault;
use libos_tcall::libc::{
    FPE_FLTINV, FPE_INTDIV, SEGV_ACCERR, SEGV_MAPERR, SEGV_PKUERR, SIGFPE, SIGILL, SIGSEGV,
    SI_KERNEL,
};
use primordial::Page;
use tracing::debug;
use x86_64::structures::idt::PageFaultErrorCode;

/// Linux x86_64 `siginfo_t`, with the fault address member of the union
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigInfo {
    /// Signal number
    pub signo: c_int,
    /// Errno value, unused
    pub errno: c_int,
    /// Signal code
    pub code: c_int,
    /// Padding
    pub pad: c_int,
    /// Faulting address
    pub addr: u64,
    /// Remainder of the union
    pub rest: [u64; 13],
}

impl ConstDefault for SigInfo {
    const DEFAULT: Self = Self {
        signo: 0,
        errno: 0,
        code: 0,
        pad: 0,
        addr: 0,
        rest: [0; 13],
    };
}

impl Default for SigInfo {
    fn default() -> Self {
        <Self as ConstDefault>::DEFAULT
    }
}

impl SigInfo {
    fn new(signo: c_int, code: c_int, addr: u64) -> Self {
        Self {
            signo,
            code,
            addr,
            ..Self::DEFAULT
        }
    }
}

/// Returns the signal code of a page fault with `error_code`.
pub fn page_fault_code(error_code: u32) -> c_int {
    let error_code = PageFaultErrorCode::from_bits_truncate(error_code.into());

    if error_code.contains(PageFaultErrorCode::PROTECTION_KEY) {
        SEGV_PKUERR
    } else if error_code.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
        SEGV_ACCERR
    } else {
        SEGV_MAPERR
    }
}

/// Returns the faulting address of a page fault.
///
/// Without hardware exception info, the address is a page aligned guess
/// of the enclave runtime.
fn fault_address(frame: &TrapFrame) -> u64 {
    if frame.flags.contains(TrapFlags::EXINFO) {
        frame.faulting_address
    } else {
        frame.faulting_address & !(Page::SIZE as u64 - 1)
    }
}

/// Returns the signal for the trap, `None` if the trap is not forwarded.
pub fn classify(frame: &TrapFrame) -> Option<SigInfo> {
    let info = match Vector::try_from(frame.vector).ok()? {
        Vector::InvalidOpcode => SigInfo::new(SIGILL, SI_KERNEL, 0),
        Vector::Page => SigInfo::new(
            SIGSEGV,
            page_fault_code(frame.error_code),
            fault_address(frame),
        ),
        Vector::GeneralProtection => SigInfo::new(SIGSEGV, SEGV_ACCERR, 0),
        Vector::X87FloatingPoint => SigInfo::new(SIGFPE, FPE_FLTINV, 0),
        Vector::DivideError => SigInfo::new(SIGFPE, FPE_INTDIV, 0),
        _ => return None,
    };

    Some(info)
}

/// Delivers the trap to the kernel's signal code.
///
/// The kernel decides what happens to the trapped thread: whatever it left
/// in the machine context is where the thread resumes.
pub fn forward(frame: &mut TrapFrame, kernel: &impl Kernel) -> Step {
    let info = match classify(frame) {
        Some(info) => info,
        None => {
            debug!("not forwarding exception {}", frame.vector);
            return Step::Next;
        }
    };

    let mut mcontext = MContext::from(&*frame);
    kernel.handle_host_signal(&info, &mut mcontext);
    mcontext.restore(frame);

    Step::Done(Verdict::Resume)
}
