// SPDX-License-Identifier: Apache-2.0

//! Arguments of the kernel entry point
//!
//! [`KernelArgs`] is read by a separately built kernel, so it only holds
//! C types: NUL-terminated strings, pointer and length pairs, and C
//! function pointers. The strings it points to are owned by [`CStrings`]
//! and [`KernelMounts`], which must outlive the kernel call.

use crate::kernel::KernelHooks;
use crate::options::IdMapping;

use alloc::ffi::CString;
use alloc::vec::Vec;
use core::ffi::{c_char, c_int, c_long, c_void};
use core::iter::once;
use core::ptr::null;

use libos_config::{ForkMode, Mount, MountKind};
use libos_tcall::libc::{pid_t, timespec, EINVAL};
use libos_tcall::Result;
use tracing::warn;

bitflags::bitflags! {
    /// Kernel features switched on at bring-up
    #[derive(Default)]
    #[repr(transparent)]
    pub struct Features: u32 {
        /// Trace failing system calls
        const TRACE_ERRORS = 1 << 0;
        /// Trace all system calls
        const TRACE_SYSCALLS = 1 << 1;
        /// Start a debug shell
        const SHELL_MODE = 1 << 2;
        /// Load debug symbols into the host debugger
        const DEBUG_SYMBOLS = 1 << 3;
        /// Check the kernel heap
        const MEMCHECK = 1 << 4;
        /// Disable `brk`
        const NOBRK = 1 << 5;
        /// Collect performance data
        const PERF = 1 << 6;
        /// Report host thread ids
        const REPORT_NATIVE_TIDS = 1 << 7;
        /// The enclave runs in debug mode
        const TEE_DEBUG_MODE = 1 << 8;
        /// The CPU supports the user-space FSGSBASE instructions
        const FSGSBASE = 1 << 9;
        /// Fail unhandled system calls with `ENOSYS` instead of terminating
        const UNHANDLED_SYSCALL_ENOSYS = 1 << 10;
        /// `syscall` can be executed, it is never emulated
        const HAVE_SYSCALL_INSTRUCTION = 1 << 11;
    }
}

impl Features {
    /// Features only available to an enclave running in debug mode
    pub const DEBUG_ONLY: Self = Self::from_bits_truncate(
        Self::TRACE_ERRORS.bits()
            | Self::TRACE_SYSCALLS.bits()
            | Self::SHELL_MODE.bits()
            | Self::DEBUG_SYMBOLS.bits()
            | Self::MEMCHECK.bits()
            | Self::PERF.bits()
            | Self::REPORT_NATIVE_TIDS.bits(),
    );
}

/// Host services entry handed to the kernel
///
/// Runs tcall `n` with `params` for the shim behind `context`, returns the
/// result or a negated errno.
pub type TcallFn =
    unsafe extern "C" fn(context: *const c_void, n: c_long, params: &[c_long; 6]) -> c_long;

/// Publishes the kernel's hooks to the shim behind `context`
///
/// Returns 0, or `-EBUSY` if hooks were published before.
pub type PublishHooksFn =
    unsafe extern "C" fn(context: *const c_void, hooks: &KernelHooks) -> c_int;

/// Converts `s` into a C string, which must not contain a NUL byte.
pub fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| {
        warn!("string {s:?} contains a NUL byte");
        EINVAL
    })
}

fn opt_c_string(s: Option<&str>) -> Result<Option<CString>> {
    s.map(c_string).transpose()
}

fn opt_ptr(s: &Option<CString>) -> *const c_char {
    s.as_ref().map_or(null(), |s| s.as_ptr())
}

/// A NULL-terminated array of C strings
#[derive(Debug)]
pub struct CStrings {
    strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStrings {
    /// Copies `strings`, none of which may contain a NUL byte.
    pub fn new<S: AsRef<str>>(strings: &[S]) -> Result<Self> {
        let strings = strings
            .iter()
            .map(|s| c_string(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        // The heap buffers of the strings never move.
        let ptrs = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(once(null()))
            .collect();

        Ok(Self { strings, ptrs })
    }

    /// Returns the number of strings, without the terminating NULL.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns `true` if there are no strings.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Returns the array.
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

/// A mount as the kernel sees it
#[repr(C)]
#[derive(Debug)]
pub struct KernelMount {
    /// Filesystem type
    pub kind: MountKind,
    /// Mount point
    pub target: *const c_char,
    /// Host path backing the mount, null if none
    pub source: *const c_char,
    /// Public key the image must be signed with, null if none
    pub public_key: *const c_char,
    /// Expected root hash of the image, null if none
    pub roothash: *const c_char,
    /// Mount flags, NULL-terminated
    pub flags: *const *const c_char,
    /// Number of mount flags
    pub num_flags: usize,
}

#[derive(Debug)]
struct MountStrings {
    target: CString,
    source: Option<CString>,
    public_key: Option<CString>,
    roothash: Option<CString>,
    flags: CStrings,
}

/// The mount table as the kernel sees it
#[derive(Debug)]
pub struct KernelMounts {
    strings: Vec<MountStrings>,
    mounts: Vec<KernelMount>,
}

impl KernelMounts {
    /// Copies the mount table `mounts`.
    pub fn new(mounts: &[Mount]) -> Result<Self> {
        let strings = mounts
            .iter()
            .map(|m| {
                Ok(MountStrings {
                    target: c_string(&m.target)?,
                    source: opt_c_string(m.source.as_deref())?,
                    public_key: opt_c_string(m.public_key.as_deref())?,
                    roothash: opt_c_string(m.roothash.as_deref())?,
                    flags: CStrings::new(&m.flags)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mounts = mounts
            .iter()
            .zip(&strings)
            .map(|(m, s)| KernelMount {
                kind: m.kind,
                target: s.target.as_ptr(),
                source: opt_ptr(&s.source),
                public_key: opt_ptr(&s.public_key),
                roothash: opt_ptr(&s.roothash),
                flags: s.flags.as_ptr(),
                num_flags: s.flags.len(),
            })
            .collect();

        Ok(Self { strings, mounts })
    }

    /// Returns the mounts.
    pub fn as_slice(&self) -> &[KernelMount] {
        &self.mounts
    }
}

/// Everything the kernel needs to start
///
/// Built once by the entry trampoline, fully populated before the kernel
/// entry point is called. The memory it points to stays valid until the
/// kernel returns, except for [`KernelArgs::context`], which lives as long
/// as the enclave.
#[repr(C)]
#[derive(Debug)]
pub struct KernelArgs {
    /// Name of the execution target
    pub target: *const c_char,
    /// Number of process arguments
    pub argc: usize,
    /// Process arguments, the application path first, NULL-terminated
    pub argv: *const *const c_char,
    /// Number of environment variables
    pub envc: usize,
    /// Process environment, as `NAME=value` strings, NULL-terminated
    pub envp: *const *const c_char,
    /// Initial working directory
    pub cwd: *const c_char,
    /// Hostname, null for the kernel's default
    pub hostname: *const c_char,
    /// Host to enclave uid mappings
    pub uid_mappings: *const IdMapping,
    /// Number of uid mappings
    pub num_uid_mappings: usize,
    /// Host to enclave gid mappings
    pub gid_mappings: *const IdMapping,
    /// Number of gid mappings
    pub num_gid_mappings: usize,
    /// Mount table, merged and validated
    pub mounts: *const KernelMount,
    /// Number of mounts
    pub num_mounts: usize,
    /// The whole enclave
    pub enclave_image: *const u8,
    /// Size of the enclave
    pub enclave_image_size: usize,
    /// The kernel image
    pub kernel_image: *const u8,
    /// Size of the kernel image
    pub kernel_image_size: usize,
    /// Stack the kernel runs on
    pub enter_stack: *const u8,
    /// Size of the stack the kernel runs on
    pub enter_stack_size: usize,
    /// Maximum number of threads
    pub max_threads: usize,
    /// See [`Features`]
    pub features: Features,
    /// How `fork` is emulated
    pub fork_mode: ForkMode,
    /// Wake event of the main thread
    pub thread_event: u64,
    /// Host thread id of the main thread
    pub target_tid: pid_t,
    /// Number of CPUs reported by `sched_getaffinity`, 0 for all
    pub max_affinity_cpus: usize,
    /// Path of the root filesystem image, null for none
    pub rootfs: *const c_char,
    /// Stack size of the main thread in bytes
    pub main_stack_size: usize,
    /// Time the host started the enclave
    pub start_time: timespec,
    /// The shim, passed back to [`KernelArgs::tcall`] and
    /// [`KernelArgs::publish_hooks`]
    pub context: *const c_void,
    /// Host services
    pub tcall: TcallFn,
    /// Where the kernel publishes its entry points
    pub publish_hooks: PublishHooksFn,
}
