// SPDX-License-Identifier: Apache-2.0

use crate::item::{Block, Cpuid, FsSignature};
use crate::libc::timespec;

use core::ffi::{c_int, c_long, CStr};
use core::fmt;

/// The round-trip to the host did not complete.
///
/// The host never got to answer, so there is no value to report.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransportError;

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host call failed")
    }
}

/// Result of a single round-trip to the host.
pub type HostResult<T> = core::result::Result<T, TransportError>;

/// Capability to reach the untrusted host.
///
/// Every method is a single synchronous round-trip. The returned raw values
/// are whatever the host claims: a negative value conventionally is a
/// negated errno, but nothing enforces that.
pub trait Host {
    /// Reads the time-stamp counter, as `(eax, edx)`.
    fn rdtsc(&self) -> HostResult<(u32, u32)>;

    /// Executes `cpuid` for `leaf` and `subleaf`.
    fn cpuid(&self, leaf: u32, subleaf: u32) -> HostResult<Cpuid>;

    /// Asks the host to create a thread that enters the enclave with `cookie`.
    fn create_thread(&self, cookie: u64) -> HostResult<c_long>;

    /// Waits on `event`, forever if `timeout` is `None`.
    fn wait(&self, event: u64, timeout: Option<&timespec>) -> HostResult<c_long>;

    /// Wakes the thread waiting on `event`.
    fn wake(&self, event: u64) -> HostResult<c_long>;

    /// Wakes `waiter_event`, then waits on `self_event`.
    fn wake_wait(
        &self,
        waiter_event: u64,
        self_event: u64,
        timeout: Option<&timespec>,
    ) -> HostResult<c_long>;

    /// Wakes the host's poll loop.
    fn poll_wake(&self) -> HostResult<c_long>;

    /// Opens the block device at `path`.
    fn open_block_device(&self, path: &CStr, read_only: bool) -> HostResult<c_int>;

    /// Closes a block device opened with [`Host::open_block_device`].
    fn close_block_device(&self, blkdev: c_int) -> HostResult<c_int>;

    /// Reads `blocks.len()` blocks starting at `blkno`.
    ///
    /// Returns the number of blocks read as claimed by the host.
    fn read_block_device(
        &self,
        blkdev: c_int,
        blkno: u64,
        blocks: &mut [Block],
    ) -> HostResult<isize>;

    /// Writes `blocks` starting at `blkno`.
    ///
    /// Returns the number of blocks written as claimed by the host.
    fn write_block_device(&self, blkdev: c_int, blkno: u64, blocks: &[Block]) -> HostResult<isize>;

    /// Registers an ELF file with the host debugger.
    fn add_symbol_file(
        &self,
        file: &[u8],
        text: usize,
        text_size: usize,
        rootfs: &CStr,
    ) -> HostResult<c_int>;

    /// Asks the host debugger to load all registered symbol files.
    fn load_symbols(&self) -> HostResult<c_int>;

    /// Asks the host debugger to unload all registered symbol files.
    fn unload_symbols(&self) -> HostResult<c_int>;

    /// Queries whether `fd` of the host process is a terminal.
    fn isatty(&self, fd: c_int) -> HostResult<c_long>;

    /// Loads the signature of the filesystem image at `path` into `sig`.
    fn load_fssig(&self, path: &CStr, sig: &mut FsSignature) -> HostResult<c_int>;
}
