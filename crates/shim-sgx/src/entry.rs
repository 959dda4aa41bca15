// SPDX-License-Identifier: Apache-2.0

//! The entry trampoline
//!
//! Runs once per enclave, on the kernel enter stack, and turns the host's
//! `enter` request into a running kernel. Malformed host input fails the
//! request with an errno before the kernel is entered. A broken enclave
//! (unparsable trusted configuration, missing regions, bad kernel image,
//! a runtime refusing the trap handler or the clock) is fatal.

use crate::ecall::{EnterArgs, Shim};
use crate::enclave::{Enclave, RegionId};
use crate::kargs::{c_string, CStrings, Features, KernelArgs, KernelMounts};
use crate::kernel::resolve_entry;
use crate::options::{IdMapping, Options, SharedMemory};
use crate::{DEBUG, MAIN_STACK_SIZE, TARGET, TARGET_ENV};

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::ffi::{c_int, c_long, c_void, CStr};
use core::mem::size_of;
use core::ptr::{copy_nonoverlapping, null};

use libos_config::{Config, ForkMode};
use libos_tcall::libc::{time_t, timespec, EEXIST, EINVAL};
use libos_tcall::{args, Host, Result};
use tracing::{debug, warn};

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Checks that `[start, start + len)` lies outside of `image`.
fn outside(image: &[u8], start: usize, len: usize) -> Result<()> {
    let end = start.checked_add(len).ok_or(EINVAL)?;
    let image_start = image.as_ptr() as usize;
    let image_end = image_start + image.len();

    if start < image_end && image_start < end {
        warn!("host buffer {start:#x}..{end:#x} overlaps the enclave");
        return Err(EINVAL);
    }

    Ok(())
}

/// Copies the host buffer at `ptr` into enclave memory.
///
/// The buffer must be non-empty and outside of the enclave `image`. The host
/// can change its memory at any time, so it is read exactly once.
///
/// # Safety
///
/// A non-null `ptr` must point to `len` readable bytes of host memory.
unsafe fn host_buffer(image: &[u8], ptr: *const u8, len: usize) -> Result<Vec<u8>> {
    if ptr.is_null() || len == 0 {
        return Err(EINVAL);
    }

    outside(image, ptr as usize, len)?;

    let mut buf = Vec::with_capacity(len);
    copy_nonoverlapping(ptr, buf.as_mut_ptr(), len);
    buf.set_len(len);
    Ok(buf)
}

/// Copies the host structure at `ptr`, `None` if `ptr` is null.
///
/// # Safety
///
/// A non-null `ptr` must point to readable host memory of the size of `T`.
unsafe fn host_copy<T: Copy>(image: &[u8], ptr: *const T) -> Result<Option<T>> {
    if ptr.is_null() {
        return Ok(None);
    }

    outside(image, ptr as usize, size_of::<T>())?;
    Ok(Some(ptr.read_unaligned()))
}

fn start_time(sec: u64, nsec: u64) -> Result<timespec> {
    if nsec >= NSEC_PER_SEC {
        return Err(EINVAL);
    }

    Ok(timespec {
        tv_sec: time_t::try_from(sec).map_err(|_| EINVAL)?,
        tv_nsec: nsec as c_long,
    })
}

/// Builds the process arguments.
///
/// A trusted configuration names the application and its arguments, unless
/// it explicitly leaves them to the host.
pub fn build_argv(config: Option<&Config>, host: &[u8]) -> Result<Vec<String>> {
    match config {
        Some(config) if !config.allow_host_parameters => {
            let mut argv = Vec::with_capacity(1 + config.application_parameters.len());
            argv.push(config.application_path.clone());
            argv.extend(config.application_parameters.iter().cloned());
            Ok(argv)
        }
        _ => args::unpack(host),
    }
}

/// Builds the process environment.
///
/// With a trusted configuration, the environment is the configured one plus
/// the host variables the configuration admits. Without, it is the host's.
pub fn build_envp(config: Option<&Config>, host: &[u8]) -> Result<Vec<String>> {
    let config = match config {
        Some(config) => config,
        None => return args::unpack(host),
    };

    let mut envp = config.enclave_environment_variables.clone();

    if !config.host_environment_variables.is_empty() {
        let host = args::unpack(host)?;
        envp.extend(host.into_iter().filter(|v| config.admits_host_variable(v)));
    }

    Ok(envp)
}

/// Defines the execution target in `envp`, which must not define it yet.
pub fn inject_target(envp: &mut Vec<String>) -> Result<()> {
    let prefix = format!("{TARGET_ENV}=");

    if envp.iter().any(|var| var.starts_with(&prefix)) {
        warn!("environment already contains {prefix}");
        return Err(EEXIST);
    }

    envp.push(format!("{prefix}{TARGET}"));
    Ok(())
}

/// Merges the host mount `mappings` into the trusted mount table.
///
/// Without a trusted configuration the mappings are only checked for
/// their format.
pub fn merge_mounts(config: Option<&mut Config>, mappings: Option<&[u8]>) -> Result<()> {
    let mappings = match mappings {
        Some(buf) => args::unpack(buf)?,
        None => Vec::new(),
    };

    if let Some(config) = config {
        config
            .mounts
            .merge(&mappings)
            .and_then(|_| config.mounts.validate())
            .map_err(|e| {
                warn!("invalid mount configuration: {e}");
                EINVAL
            })?;
    }

    Ok(())
}

/// Kernel settings, from the host's options and the trusted configuration
#[derive(Debug, PartialEq, Eq)]
pub struct Settings<'a> {
    /// Feature flags
    pub features: Features,
    /// How `fork` is emulated
    pub fork_mode: ForkMode,
    /// Number of CPUs reported by `sched_getaffinity`, 0 for all
    pub max_affinity_cpus: usize,
    /// Stack size of the main thread, 0 for the default
    pub main_stack_size: usize,
    /// Initial working directory
    pub cwd: String,
    /// Hostname
    pub hostname: Option<String>,
    /// Root filesystem image
    pub rootfs: Option<&'a CStr>,
    /// Uid mappings
    pub uids: &'a [IdMapping],
    /// Gid mappings
    pub gids: &'a [IdMapping],
}

impl<'a> Settings<'a> {
    /// Validates the host's `options`.
    ///
    /// The debug features are dropped unless the enclave runs in `debug_mode`.
    pub fn new(options: Option<&'a Options>, debug_mode: bool) -> Result<Self> {
        let mut settings = Self {
            features: Features::empty(),
            fork_mode: ForkMode::None,
            max_affinity_cpus: 0,
            main_stack_size: 0,
            cwd: String::from("/"),
            hostname: None,
            rootfs: None,
            uids: &[],
            gids: &[],
        };

        if let Some(o) = options {
            let flags = [
                (o.trace_errors, Features::TRACE_ERRORS),
                (o.trace_syscalls, Features::TRACE_SYSCALLS),
                (o.shell_mode, Features::SHELL_MODE),
                (o.debug_symbols, Features::DEBUG_SYMBOLS),
                (o.memcheck, Features::MEMCHECK),
                (o.nobrk, Features::NOBRK),
                (o.perf, Features::PERF),
                (o.report_native_tids, Features::REPORT_NATIVE_TIDS),
                (o.have_fsgsbase_instructions, Features::FSGSBASE),
                (
                    o.unhandled_syscall_enosys,
                    Features::UNHANDLED_SYSCALL_ENOSYS,
                ),
            ];

            for (value, feature) in flags {
                settings.features.set(feature, value != 0);
            }

            let nul = o.rootfs.iter().position(|b| *b == 0).ok_or_else(|| {
                warn!("rootfs path is not terminated");
                EINVAL
            })?;
            if nul > 0 {
                let rootfs = CStr::from_bytes_with_nul(&o.rootfs[..=nul]);
                settings.rootfs = Some(rootfs.map_err(|_| EINVAL)?);
            }

            settings.fork_mode = ForkMode::try_from(o.fork_mode).map_err(|_| EINVAL)?;
            settings.max_affinity_cpus =
                usize::try_from(o.max_affinity_cpus).map_err(|_| EINVAL)?;
            settings.main_stack_size =
                usize::try_from(o.main_stack_size).map_err(|_| EINVAL)?;
            settings.uids = o.id_mappings.uids().ok_or(EINVAL)?;
            settings.gids = o.id_mappings.gids().ok_or(EINVAL)?;
        }

        if debug_mode {
            settings.features |= Features::TEE_DEBUG_MODE;
        } else {
            settings.features.remove(Features::DEBUG_ONLY);
        }

        Ok(settings)
    }

    /// Applies the overrides of the trusted `config`.
    pub fn apply(&mut self, config: &Config) {
        if let Some(cwd) = &config.current_working_directory {
            self.cwd = cwd.clone();
        }

        if let Some(hostname) = &config.hostname {
            self.hostname = Some(hostname.clone());
        }

        if let Some(cpus) = config.max_affinity_cpus.filter(|n| *n != 0) {
            self.max_affinity_cpus = cpus;
        }

        if let Some(size) = config.main_stack_size.filter(|n| *n != 0) {
            self.main_stack_size = size;
        }

        if let Some(fork_mode) = config.fork_mode {
            self.fork_mode = fork_mode;
        }

        if config.no_brk {
            self.features |= Features::NOBRK;
        }

        if let Some(enosys) = config.unhandled_syscall_enosys {
            let flag = Features::UNHANDLED_SYSCALL_ENOSYS;
            self.features.set(flag, enosys);
        }
    }
}

/// Brings up the kernel for the `enter` request `req`.
///
/// Returns the kernel's exit status, or the negated errno if the request is
/// rejected.
pub(crate) fn trampoline<E, H>(
    shim: &'static Shim<E, H>,
    req: &EnterArgs,
    stack: &'static [u8],
) -> c_int
where
    E: Enclave + Sync + 'static,
    H: Host + Sync + 'static,
{
    match bring_up(shim, req, stack) {
        Ok(status) => status,
        Err(errno) => {
            warn!("enter rejected: errno {errno}");
            -errno
        }
    }
}

fn bring_up<E, H>(
    shim: &'static Shim<E, H>,
    req: &EnterArgs,
    stack: &'static [u8],
) -> Result<c_int>
where
    E: Enclave + Sync + 'static,
    H: Host + Sync + 'static,
{
    let enclave = &shim.enclave;
    let image = enclave.image();
    let req = *req;

    // Everything the host handed over is copied and checked before use.
    let argv_buf = unsafe { host_buffer(image, req.argv, req.argv_len)? };
    let envp_buf = unsafe { host_buffer(image, req.envp, req.envp_len)? };
    let mappings_buf = match (req.mount_mappings, req.mount_mappings_len) {
        (ptr, len) if ptr.is_null() || len == 0 => None,
        (ptr, len) => Some(unsafe { host_buffer(image, ptr, len)? }),
    };
    let options: Option<Options> = unsafe { host_copy(image, req.options)? };
    let shm: SharedMemory = unsafe { host_copy(image, req.shared_memory)? }.ok_or(EINVAL)?;
    let start_time = start_time(req.start_time_sec, req.start_time_nsec)?;

    let mut config = enclave
        .region(RegionId::Config)
        .map(|region| match libos_config::parse(region) {
            Ok(config) => config,
            Err(e) => fatal!("failed to parse the trusted configuration: {e}"),
        });

    let argv = build_argv(config.as_ref(), &argv_buf)?;
    let mut envp = build_envp(config.as_ref(), &envp_buf)?;

    let debug_mode = enclave.debug_mode();
    let mut settings = Settings::new(options.as_ref(), debug_mode)?;
    if let Some(config) = &config {
        settings.apply(config);
    }

    inject_target(&mut envp)?;
    merge_mounts(config.as_mut(), mappings_buf.as_deref())?;

    if DEBUG {
        debug!("argv: {argv:?}");
        debug!("envp: {envp:?}");
        debug!("settings: {settings:?}");
    }

    // The kernel gets C strings only.
    let target = c_string(TARGET)?;
    let argv = CStrings::new(&argv)?;
    let envp = CStrings::new(&envp)?;
    let cwd = c_string(&settings.cwd)?;
    let hostname = settings.hostname.as_deref().map(c_string).transpose()?;
    let mounts = KernelMounts::new(config.as_ref().map_or(&[][..], |c| &c.mounts[..]))?;

    shim.trace.store(
        settings.features.contains(Features::TRACE_SYSCALLS),
        core::sync::atomic::Ordering::Relaxed,
    );

    if let Err(errno) = enclave.add_vectored_handler(shim) {
        fatal!("failed to register the trap handler: errno {errno}");
    }

    if let Err(errno) = enclave.setup_clock(shm.clock) {
        fatal!("failed to set up the clock: errno {errno}");
    }

    let kernel_image = enclave
        .region(RegionId::Kernel)
        .unwrap_or_else(|| fatal!("no kernel image"));
    let entry = resolve_entry(kernel_image)
        .unwrap_or_else(|_| fatal!("invalid kernel image or entry point"));

    let kargs = KernelArgs {
        target: target.as_ptr(),
        argc: argv.len(),
        argv: argv.as_ptr(),
        envc: envp.len(),
        envp: envp.as_ptr(),
        cwd: cwd.as_ptr(),
        hostname: hostname.as_ref().map_or(null(), |h| h.as_ptr()),
        uid_mappings: settings.uids.as_ptr(),
        num_uid_mappings: settings.uids.len(),
        gid_mappings: settings.gids.as_ptr(),
        num_gid_mappings: settings.gids.len(),
        mounts: mounts.as_slice().as_ptr(),
        num_mounts: mounts.as_slice().len(),
        enclave_image: image.as_ptr(),
        enclave_image_size: image.len(),
        kernel_image: kernel_image.as_ptr(),
        kernel_image_size: kernel_image.len(),
        enter_stack: stack.as_ptr(),
        enter_stack_size: stack.len(),
        max_threads: enclave.num_tcs(),
        features: settings.features,
        fork_mode: settings.fork_mode,
        thread_event: req.event,
        target_tid: req.target_tid,
        max_affinity_cpus: settings.max_affinity_cpus,
        rootfs: settings.rootfs.map_or(null(), CStr::as_ptr),
        main_stack_size: match settings.main_stack_size {
            0 => MAIN_STACK_SIZE,
            n => n,
        },
        start_time,
        context: shim as *const Shim<E, H> as *const c_void,
        tcall: Shim::<E, H>::tcall_entry,
        publish_hooks: Shim::<E, H>::publish_hooks,
    };

    Ok(unsafe { enclave.enter_kernel(entry, &kargs) })
}
