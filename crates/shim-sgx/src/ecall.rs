// SPDX-License-Identifier: Apache-2.0

//! Calls from the host into the enclave
//!
//! The host enters the enclave once to start the kernel with
//! [`Shim::enter`], then once per additional thread with
//! [`Shim::run_thread`].

use crate::context::TrapFrame;
use crate::enclave::{Enclave, RegionId, TrapHandler};
use crate::entry;
use crate::handler::{Dispatcher, Verdict};
use crate::kernel::{Kernel, KernelHooks};
use crate::options::{Options, SharedMemory};
use crate::tcall::{self, Relay};

use core::ffi::{c_int, c_long, c_void};
use core::ptr::null;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use libos_tcall::libc::{pid_t, EBUSY, EINVAL, EPERM};
use libos_tcall::Host;
use spin::Once;
use tracing::warn;

/// Arguments of the `enter` ecall, written by the host
///
/// Nothing in here is trusted: every pointer and length is checked before
/// the memory behind it is read.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EnterArgs {
    /// Host options, null for the defaults
    pub options: *const Options,
    /// Memory shared with the host
    pub shared_memory: *const SharedMemory,
    /// Packed process arguments
    pub argv: *const u8,
    /// Size of `argv` in bytes
    pub argv_len: usize,
    /// Packed process environment
    pub envp: *const u8,
    /// Size of `envp` in bytes
    pub envp_len: usize,
    /// Packed `source=target` mount mappings, may be null
    pub mount_mappings: *const u8,
    /// Size of `mount_mappings` in bytes
    pub mount_mappings_len: usize,
    /// Wake event of the main thread
    pub event: u64,
    /// Host thread id of the main thread
    pub target_tid: pid_t,
    /// Seconds part of the start time
    pub start_time_sec: u64,
    /// Nanoseconds part of the start time
    pub start_time_nsec: u64,
}

impl Default for EnterArgs {
    fn default() -> Self {
        Self {
            options: null(),
            shared_memory: null(),
            argv: null(),
            argv_len: 0,
            envp: null(),
            envp_len: 0,
            mount_mappings: null(),
            mount_mappings_len: 0,
            event: 0,
            target_tid: 0,
            start_time_sec: 0,
            start_time_nsec: 0,
        }
    }
}

/// The shim of one enclave
///
/// Lives in a `static`: the trap handler and the kernel refer to it for the
/// whole lifetime of the enclave.
pub struct Shim<E, H> {
    pub(crate) enclave: E,
    pub(crate) host: H,
    entered: AtomicUsize,
    pub(crate) trace: AtomicBool,
    pub(crate) hooks: Once<KernelHooks>,
}

impl<E, H> Shim<E, H> {
    /// Creates the shim of `enclave`, talking to `host`.
    pub const fn new(enclave: E, host: H) -> Self {
        Self {
            enclave,
            host,
            entered: AtomicUsize::new(0),
            trace: AtomicBool::new(false),
            hooks: Once::new(),
        }
    }
}

impl<E, H> Shim<E, H>
where
    E: Enclave + Sync + 'static,
    H: Host + Sync + 'static,
{
    /// Starts the kernel and runs it to completion.
    ///
    /// Only the first call is served. Returns the kernel's exit status, or a
    /// negated errno if the request is rejected.
    pub fn enter(&'static self, req: &EnterArgs) -> c_int {
        if self.entered.fetch_add(1, Ordering::SeqCst) != 0 {
            self.entered.store(1, Ordering::SeqCst);
            warn!("enclave entered more than once");
            return -EPERM;
        }

        let stack = self
            .enclave
            .region(RegionId::KernelEnterStack)
            .unwrap_or_else(|| fatal!("no kernel enter stack"));

        self.enclave
            .call_on_stack(stack, &mut || entry::trampoline(self, req, stack))
    }

    /// Runs the kernel thread `cookie` on the calling host thread.
    pub fn run_thread(&self, cookie: u64, event: u64, tid: pid_t) -> c_long {
        match self.hooks.get() {
            Some(kernel) => kernel.run_thread(cookie, event, tid),
            None => {
                warn!("thread {cookie:#x} entered before the kernel is up");
                -(EINVAL as c_long)
            }
        }
    }

    /// Returns the host services offered to the kernel.
    pub fn relay(&self) -> Relay<'_, H> {
        Relay::new(&self.host)
    }

    /// The [`TcallFn`](crate::kargs::TcallFn) handed to the kernel.
    ///
    /// # Safety
    ///
    /// `context` must point to a `Shim<E, H>`, the pointers among `args` must
    /// be valid for tcall `n`.
    pub(crate) unsafe extern "C" fn tcall_entry(
        context: *const c_void,
        n: c_long,
        args: &[c_long; 6],
    ) -> c_long {
        let shim = &*(context as *const Self);
        tcall::call(&shim.relay(), n, args)
    }

    /// The [`PublishHooksFn`](crate::kargs::PublishHooksFn) handed to the
    /// kernel.
    ///
    /// # Safety
    ///
    /// `context` must point to a `Shim<E, H>`.
    pub(crate) unsafe extern "C" fn publish_hooks(
        context: *const c_void,
        hooks: &KernelHooks,
    ) -> c_int {
        let shim = &*(context as *const Self);
        let mut published = false;

        shim.hooks.call_once(|| {
            published = true;
            *hooks
        });

        if !published {
            warn!("kernel hooks published twice");
            return -EBUSY;
        }

        0
    }
}

impl<E, H> TrapHandler for Shim<E, H>
where
    E: Sync,
    H: Host + Sync,
{
    fn handle(&self, frame: &mut TrapFrame) -> Verdict {
        let trace = self.trace.load(Ordering::Relaxed);
        Dispatcher::new(&self.host, self.hooks.get(), trace).dispatch(frame)
    }
}
