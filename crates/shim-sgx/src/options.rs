// SPDX-License-Identifier: Apache-2.0

//! Structures the host passes to the `enter` ecall
//!
//! Everything in here is written by the host. Flags are bytes, not `bool`s,
//! so that any bit pattern is a valid value.

use const_default::ConstDefault;
use libos_tcall::libc::PATH_MAX;

/// Maximum number of uid or gid mappings
pub const MAX_ID_MAPPINGS: usize = 8;

/// Maps a host id to an enclave id
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, ConstDefault, PartialEq, Eq)]
pub struct IdMapping {
    /// Id on the host
    pub host: u32,
    /// Id inside the enclave
    pub enclave: u32,
}

/// User and group id mappings
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdMappings {
    /// Uid mappings, the first `num_uids` are valid
    pub uids: [IdMapping; MAX_ID_MAPPINGS],
    /// Gid mappings, the first `num_gids` are valid
    pub gids: [IdMapping; MAX_ID_MAPPINGS],
    /// Number of valid uid mappings
    pub num_uids: u32,
    /// Number of valid gid mappings
    pub num_gids: u32,
}

impl ConstDefault for IdMappings {
    const DEFAULT: Self = Self {
        uids: [IdMapping::DEFAULT; MAX_ID_MAPPINGS],
        gids: [IdMapping::DEFAULT; MAX_ID_MAPPINGS],
        num_uids: 0,
        num_gids: 0,
    };
}

impl IdMappings {
    /// Returns the valid uid mappings, `None` if the count is out of range.
    pub fn uids(&self) -> Option<&[IdMapping]> {
        self.uids.get(..usize::try_from(self.num_uids).ok()?)
    }

    /// Returns the valid gid mappings, `None` if the count is out of range.
    pub fn gids(&self) -> Option<&[IdMapping]> {
        self.gids.get(..usize::try_from(self.num_gids).ok()?)
    }
}

/// Runtime options chosen by the host
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Trace failing system calls
    pub trace_errors: u8,
    /// Trace all system calls
    pub trace_syscalls: u8,
    /// Start a debug shell
    pub shell_mode: u8,
    /// Load debug symbols into the host debugger
    pub debug_symbols: u8,
    /// Check the kernel heap
    pub memcheck: u8,
    /// Disable `brk`
    pub nobrk: u8,
    /// Collect performance data
    pub perf: u8,
    /// Report host thread ids
    pub report_native_tids: u8,
    /// The CPU supports the user-space FSGSBASE instructions
    pub have_fsgsbase_instructions: u8,
    /// Fail unhandled system calls with `ENOSYS` instead of terminating
    pub unhandled_syscall_enosys: u8,
    /// Reserved
    pub reserved: [u8; 2],
    /// How `fork` is emulated, see [`libos_config::ForkMode`]
    pub fork_mode: u32,
    /// Number of CPUs reported by `sched_getaffinity`, 0 for the default
    pub max_affinity_cpus: u64,
    /// Stack size of the main thread, 0 for the default
    pub main_stack_size: u64,
    /// Host to enclave id mappings
    pub id_mappings: IdMappings,
    /// NUL terminated path of the root filesystem image
    pub rootfs: [u8; PATH_MAX],
}

impl ConstDefault for Options {
    const DEFAULT: Self = Self {
        trace_errors: 0,
        trace_syscalls: 0,
        shell_mode: 0,
        debug_symbols: 0,
        memcheck: 0,
        nobrk: 0,
        perf: 0,
        report_native_tids: 0,
        have_fsgsbase_instructions: 0,
        unhandled_syscall_enosys: 0,
        reserved: [0; 2],
        fork_mode: 0,
        max_affinity_cpus: 0,
        main_stack_size: 0,
        id_mappings: IdMappings::DEFAULT,
        rootfs: [0; PATH_MAX],
    };
}

impl Default for Options {
    fn default() -> Self {
        <Self as ConstDefault>::DEFAULT
    }
}

/// Memory shared with the host for the lifetime of the enclave
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, ConstDefault, PartialEq, Eq)]
pub struct SharedMemory {
    /// Address of the host maintained clock
    pub clock: u64,
}
