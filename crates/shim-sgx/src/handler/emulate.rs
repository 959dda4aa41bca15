// SPDX-License-Identifier: Apache-2.0

//! Emulation of the instructions an enclave cannot execute

use super::{Step, Verdict, OPCODE_LEN};
use crate::context::TrapFrame;
use crate::kernel::Kernel;
use crate::XSAVE_MIN_SIZE;

use core::ffi::c_long;

use libos_tcall::item::Cpuid;
use libos_tcall::Host;
use tracing::warn;

/// `cpuid` leaf answered without asking the host
const LEAF_SHIM: u32 = 0xff;

/// Answer to [`LEAF_SHIM`]
const SHIM_ANSWER: Cpuid = Cpuid {
    eax: 0xaa,
    ebx: 0xbb,
    ecx: 0xcc,
    edx: 0xdd,
};

/// `cpuid` leaf describing the XSAVE state components
const LEAF_XSAVE: u32 = 0xd;

/// Flags bits kept by `sysret`
const SYSRET_RFLAGS_MASK: u64 = 0x3c7fd7;

/// Always set bit of the flags register
const RFLAGS_FIXED: u64 = 1 << 1;

/// Offsets of the `iretq` frame on the stack, in words
const IRET_RIP: usize = 0;
const IRET_RFLAGS: usize = 2;
const IRET_RSP: usize = 3;

/// Raises the XSAVE area sizes reported for `leaf` and `subleaf`.
///
/// A host reporting an XSAVE area smaller than the real one would make the
/// kernel overflow its buffers when it saves the extended state.
pub fn sanitize_cpuid(leaf: u32, subleaf: u32, mut res: Cpuid) -> Cpuid {
    if leaf == LEAF_XSAVE && subleaf == 0 {
        res.ebx = res.ebx.max(XSAVE_MIN_SIZE);
        res.ecx = res.ecx.max(XSAVE_MIN_SIZE);
    }

    res
}

/// Emulates `rdtsc` with the host's counter.
pub fn rdtsc(frame: &mut TrapFrame, host: &impl Host) -> Step {
    let (eax, edx) = match host.rdtsc() {
        Ok(tsc) => tsc,
        Err(e) => {
            warn!("rdtsc: {e}");
            return Step::Next;
        }
    };

    frame.gpr.rax = eax.into();
    frame.gpr.rdx = edx.into();
    frame.gpr.rip += OPCODE_LEN;
    Step::Done(Verdict::Resume)
}

/// Emulates `cpuid` with the host's answer, sanitized.
pub fn cpuid(frame: &mut TrapFrame, host: &impl Host) -> Step {
    let leaf = frame.gpr.rax as u32;
    let subleaf = frame.gpr.rcx as u32;

    let res = if leaf == LEAF_SHIM {
        SHIM_ANSWER
    } else {
        match host.cpuid(leaf, subleaf) {
            Ok(res) => sanitize_cpuid(leaf, subleaf, res),
            Err(e) => {
                warn!("cpuid({leaf:#x}, {subleaf:#x}): {e}");
                return Step::Next;
            }
        }
    };

    frame.gpr.rax = res.eax.into();
    frame.gpr.rbx = res.ebx.into();
    frame.gpr.rcx = res.ecx.into();
    frame.gpr.rdx = res.edx.into();
    frame.gpr.rip += OPCODE_LEN;
    Step::Done(Verdict::Resume)
}

/// Emulates `iretq` without the segment registers.
///
/// # Safety
///
/// `frame.gpr.rsp` must point to an `iretq` frame of readable memory.
pub unsafe fn iretq(frame: &mut TrapFrame) -> Step {
    let stack = frame.gpr.rsp as *const u64;

    let rip = stack.add(IRET_RIP).read_unaligned();
    let rflags = stack.add(IRET_RFLAGS).read_unaligned();
    let rsp = stack.add(IRET_RSP).read_unaligned();

    frame.gpr.rip = rip;
    frame.gpr.rflags = rflags;
    frame.gpr.rsp = rsp;
    Step::Done(Verdict::Resume)
}

/// Emulates `syscall` followed by `sysret` around a kernel system call.
pub fn syscall(frame: &mut TrapFrame, kernel: &impl Kernel) -> Step {
    let gpr = &mut frame.gpr;

    gpr.rcx = gpr.rip + OPCODE_LEN;
    gpr.rip = gpr.rcx;
    gpr.r11 = gpr.rflags;
    gpr.rflags = (gpr.r11 & SYSRET_RFLAGS_MASK) | RFLAGS_FIXED;

    let args = [
        gpr.rdi as c_long,
        gpr.rsi as c_long,
        gpr.rdx as c_long,
        gpr.r10 as c_long,
        gpr.r8 as c_long,
        gpr.r9 as c_long,
    ];

    gpr.rax = kernel.syscall(gpr.rax as c_long, &args) as u64;
    Step::Done(Verdict::Resume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Gpr;
    use crate::mock::{FakeHost, FakeKernel};

    fn frame(rip: u64) -> TrapFrame {
        TrapFrame {
            vector: 6,
            gpr: Gpr {
                rip,
                ..Gpr::default()
            },
            ..TrapFrame::default()
        }
    }

    #[test]
    fn rdtsc_halves() {
        let host = FakeHost {
            tsc: (0xdead_beef, 0x1234),
            ..FakeHost::default()
        };
        let mut frame = frame(0x1000);
        frame.gpr.rax = u64::MAX;

        assert_eq!(rdtsc(&mut frame, &host), Step::Done(Verdict::Resume));
        assert_eq!(frame.gpr.rax, 0xdead_beef);
        assert_eq!(frame.gpr.rdx, 0x1234);
        assert_eq!(frame.gpr.rip, 0x1002);
    }

    #[test]
    fn rdtsc_broken_host() {
        let host = FakeHost {
            broken: true,
            ..FakeHost::default()
        };
        let mut frame = frame(0x1000);

        assert_eq!(rdtsc(&mut frame, &host), Step::Next);
        assert_eq!(frame.gpr.rip, 0x1000);
    }

    #[test]
    fn cpuid_passthrough() {
        let host = FakeHost {
            cpuid: Cpuid {
                eax: 1,
                ebx: 2,
                ecx: 3,
                edx: 4,
            },
            ..FakeHost::default()
        };
        let mut frame = frame(0x1000);
        frame.gpr.rax = 7;
        frame.gpr.rcx = 0;

        assert_eq!(cpuid(&mut frame, &host), Step::Done(Verdict::Resume));
        assert_eq!(host.cpuid_queries(), vec![(7, 0)]);
        assert_eq!(
            (frame.gpr.rax, frame.gpr.rbx, frame.gpr.rcx, frame.gpr.rdx),
            (1, 2, 3, 4)
        );
        assert_eq!(frame.gpr.rip, 0x1002);
    }

    #[test]
    fn cpuid_shim_leaf() {
        let host = FakeHost {
            broken: true,
            ..FakeHost::default()
        };
        let mut frame = frame(0x1000);
        frame.gpr.rax = 0xff;

        assert_eq!(cpuid(&mut frame, &host), Step::Done(Verdict::Resume));
        assert!(host.cpuid_queries().is_empty());
        assert_eq!(
            (frame.gpr.rax, frame.gpr.rbx, frame.gpr.rcx, frame.gpr.rdx),
            (0xaa, 0xbb, 0xcc, 0xdd)
        );
    }

    #[test]
    fn cpuid_xsave_clamped() {
        for (reported, exposed) in [
            (0, 4096),
            (64, 4096),
            (4095, 4096),
            (4096, 4096),
            (8192, 8192),
        ] {
            let host = FakeHost {
                cpuid: Cpuid {
                    eax: 0x2e7,
                    ebx: reported,
                    ecx: reported,
                    edx: 0,
                },
                ..FakeHost::default()
            };
            let mut frame = frame(0x1000);
            frame.gpr.rax = 0xd;
            frame.gpr.rcx = 0;

            cpuid(&mut frame, &host);

            assert_eq!(frame.gpr.rbx, exposed);
            assert_eq!(frame.gpr.rcx, exposed);
            assert_eq!(frame.gpr.rax, 0x2e7);
        }
    }

    #[test]
    fn cpuid_other_subleaf_untouched() {
        let res = Cpuid {
            eax: 0,
            ebx: 64,
            ecx: 64,
            edx: 0,
        };

        assert_eq!(sanitize_cpuid(0xd, 1, res), res);
        assert_eq!(sanitize_cpuid(0x7, 0, res), res);
    }

    #[test]
    fn iretq_restores() {
        let stack: [u64; 5] = [0x4000, 0x33, 0x202, 0x7000, 0x2b];
        let mut frame = frame(0x1000);
        frame.gpr.rsp = stack.as_ptr() as u64;
        frame.gpr.rax = 5;

        assert_eq!(unsafe { iretq(&mut frame) }, Step::Done(Verdict::Resume));
        assert_eq!(frame.gpr.rip, 0x4000);
        assert_eq!(frame.gpr.rflags, 0x202);
        assert_eq!(frame.gpr.rsp, 0x7000);
        assert_eq!(frame.gpr.rax, 5);
    }

    #[test]
    fn syscall_registers() {
        let kernel = FakeKernel::default();
        let mut frame = frame(0x1000);
        let gpr = &mut frame.gpr;
        gpr.rax = 1;
        gpr.rdi = 10;
        gpr.rsi = 11;
        gpr.rdx = 12;
        gpr.r10 = 13;
        gpr.r8 = 14;
        gpr.r9 = 15;
        gpr.rcx = 99;
        gpr.rflags = 0xffff_ffff;

        assert_eq!(syscall(&mut frame, &kernel), Step::Done(Verdict::Resume));

        assert_eq!(kernel.syscalls(), vec![(1, [10, 11, 12, 13, 14, 15])]);
        assert_eq!(frame.gpr.rax, FakeKernel::syscall_ret(1, 10) as u64);
        assert_eq!(frame.gpr.rip, 0x1002);
        assert_eq!(frame.gpr.rcx, 0x1002);
        assert_eq!(frame.gpr.r11, 0xffff_ffff);
        assert_eq!(frame.gpr.rflags, 0x3c7fd7);
    }

    #[test]
    fn syscall_negative_return() {
        let kernel = FakeKernel::default();
        let mut frame = frame(0x1000);
        frame.gpr.rax = 0;
        frame.gpr.rdi = (-38i64) as u64;

        syscall(&mut frame, &kernel);

        assert_eq!(frame.gpr.rax as i64, -38);
        assert_eq!(frame.gpr.rflags, RFLAGS_FIXED);
    }
}
