// SPDX-License-Identifier: Apache-2.0

//! The enclave runtime underneath the shim

use crate::context::TrapFrame;
use crate::handler::Verdict;
use crate::kargs::KernelArgs;
use crate::kernel;

use core::ffi::c_int;

use libos_tcall::Result;

/// Regions embedded into the enclave image at build time
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegionId {
    /// Trusted configuration, optional
    Config,
    /// Kernel image
    Kernel,
    /// Stack used to run the kernel
    KernelEnterStack,
}

/// Receives the hardware exceptions of the enclave
pub trait TrapHandler: Sync {
    /// Handles the trap described by `frame`.
    fn handle(&self, frame: &mut TrapFrame) -> Verdict;
}

/// Services of the enclave runtime
pub trait Enclave {
    /// Returns the memory of the whole enclave.
    fn image(&self) -> &'static [u8];

    /// Returns the region `id`, `None` if the image has none.
    fn region(&self, id: RegionId) -> Option<&'static [u8]>;

    /// Returns the number of thread control structures.
    fn num_tcs(&self) -> usize;

    /// Returns `true` if the enclave runs in debug mode.
    ///
    /// The answer must come from the enclave's own attributes, never from
    /// the host.
    fn debug_mode(&self) -> bool;

    /// Registers `handler` for all hardware exceptions, ahead of the
    /// runtime's own handlers.
    fn add_vectored_handler(&self, handler: &'static dyn TrapHandler) -> Result<()>;

    /// Sets up the clock the host maintains at address `clock`.
    fn setup_clock(&self, clock: u64) -> Result<()>;

    /// Runs `f` on `stack` and returns its result.
    fn call_on_stack(&self, stack: &'static [u8], f: &mut dyn FnMut() -> c_int) -> c_int;

    /// Calls the kernel entry point at `entry`.
    ///
    /// # Safety
    ///
    /// `entry` must be the validated entry point of the kernel image.
    unsafe fn enter_kernel(&self, entry: usize, args: &KernelArgs) -> c_int {
        kernel::enter(entry, args)
    }
}
