// SPDX-License-Identifier: Apache-2.0

//! The guest kernel, as seen from the shim
//!
//! The kernel is an ELF image embedded into the enclave, built on its own.
//! Everything crossing between the shim and the kernel uses the C calling
//! convention and `#[repr(C)]` data: the entry point takes a
//! [`KernelArgs`], and once the kernel runs it publishes its
//! [`KernelHooks`] through [`KernelArgs::publish_hooks`].

use crate::context::MContext;
use crate::handler::signal::SigInfo;
use crate::kargs::KernelArgs;

use core::ffi::{c_int, c_long};
use core::mem::size_of;
use core::ptr::read_unaligned;

use goblin::elf::header::{header64::Header, ELFMAG};
use libos_tcall::libc::{pid_t, EINVAL};
use libos_tcall::Result;

/// Signature of the kernel entry point
pub type KernelEntry = unsafe extern "C" fn(args: &KernelArgs) -> c_int;

/// The services of a running kernel the shim calls into
pub trait Kernel {
    /// Executes system call `n` with `args`, returns the raw result.
    fn syscall(&self, n: c_long, args: &[c_long; 6]) -> c_long;

    /// Delivers a signal raised by the hardware.
    ///
    /// The kernel may modify `mcontext` to redirect the trapped thread.
    fn handle_host_signal(&self, info: &SigInfo, mcontext: &mut MContext);

    /// Runs the kernel thread identified by `cookie` on the calling thread.
    fn run_thread(&self, cookie: u64, event: u64, tid: pid_t) -> c_long;
}

/// Entry points published by the kernel once it is up
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct KernelHooks {
    /// System call dispatcher
    pub syscall: extern "C" fn(n: c_long, args: &[c_long; 6]) -> c_long,
    /// Signal delivery for hardware exceptions
    pub handle_host_signal: extern "C" fn(info: &SigInfo, mcontext: &mut MContext),
    /// Thread entry
    pub run_thread: extern "C" fn(cookie: u64, event: u64, tid: pid_t) -> c_long,
}

impl Kernel for KernelHooks {
    fn syscall(&self, n: c_long, args: &[c_long; 6]) -> c_long {
        (self.syscall)(n, args)
    }

    fn handle_host_signal(&self, info: &SigInfo, mcontext: &mut MContext) {
        (self.handle_host_signal)(info, mcontext)
    }

    fn run_thread(&self, cookie: u64, event: u64, tid: pid_t) -> c_long {
        (self.run_thread)(cookie, event, tid)
    }
}

/// Calls the kernel entry point at address `entry`.
///
/// # Safety
///
/// `entry` must be the address of a function of type [`KernelEntry`], and
/// every pointer in `args` must be valid until it returns.
pub unsafe fn enter(entry: usize, args: &KernelArgs) -> c_int {
    let entry: KernelEntry = core::mem::transmute(entry);
    entry(args)
}

/// Validates the kernel `image` and returns the address of its entry point.
///
/// The image must carry the ELF magic and the entry point must lie inside
/// the image.
pub fn resolve_entry(image: &[u8]) -> Result<usize> {
    if image.len() < size_of::<Header>() {
        return Err(EINVAL);
    }

    // The image is only byte aligned.
    let hdr: Header = unsafe { read_unaligned(image.as_ptr() as *const Header) };
    if !hdr.e_ident[..ELFMAG.len()].eq(ELFMAG) {
        return Err(EINVAL);
    }

    let offset = usize::try_from(hdr.e_entry).map_err(|_| EINVAL)?;
    if offset >= image.len() {
        return Err(EINVAL);
    }

    let base = image.as_ptr() as usize;
    base.checked_add(offset).ok_or(EINVAL)
}
