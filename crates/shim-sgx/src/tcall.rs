// SPDX-License-Identifier: Apache-2.0

//! Host services offered to the kernel
//!
//! The kernel never talks to the [`Host`] directly. It gets a [`Tcall`]
//! implementation which forwards each request and checks the answer: a
//! transport failure becomes `EINVAL`, a negative answer becomes the errno
//! it encodes, and counts or sizes the host reports are bounded by what was
//! asked for.
//!
//! A kernel built on its own reaches the [`Tcall`] methods through [`call`],
//! which takes a tcall [`Number`] and raw C arguments.

use core::ffi::{c_char, c_int, c_long, CStr};
use core::slice;

use libos_tcall::item::{Block, FsSignature, MAX_SIGNATURE_SIZE};
use libos_tcall::libc::{timespec, EINVAL, ENOSYS, EPERM};
use libos_tcall::{Error, Host, HostResult, Result};
use tracing::{instrument, warn};

/// Largest errno value a host may return
const MAX_ERRNO: c_long = 4095;

/// Host services available to the kernel
pub trait Tcall {
    /// Creates a host thread which enters the enclave with `cookie`.
    fn create_thread(&self, cookie: u64) -> Result<c_long>;

    /// Waits on `event`, forever if `timeout` is `None`.
    fn wait(&self, event: u64, timeout: Option<&timespec>) -> Result<c_long>;

    /// Wakes the thread waiting on `event`.
    fn wake(&self, event: u64) -> Result<c_long>;

    /// Wakes `waiter_event`, then waits on `self_event`.
    fn wake_wait(
        &self,
        waiter_event: u64,
        self_event: u64,
        timeout: Option<&timespec>,
    ) -> Result<c_long>;

    /// Wakes the host's poll loop.
    fn poll_wake(&self) -> Result<c_long>;

    /// Opens the host block device at `path`, returns its handle.
    fn open_block_device(&self, path: &CStr, read_only: bool) -> Result<c_int>;

    /// Closes a block device.
    fn close_block_device(&self, blkdev: c_int) -> Result<()>;

    /// Reads into `blocks` starting at `blkno`, returns the number of blocks read.
    fn read_block_device(
        &self,
        blkdev: c_int,
        blkno: u64,
        blocks: &mut [Block],
    ) -> Result<usize>;

    /// Writes `blocks` starting at `blkno`, returns the number of blocks written.
    fn write_block_device(&self, blkdev: c_int, blkno: u64, blocks: &[Block]) -> Result<usize>;

    /// Registers the ELF `file` loaded at `text` with the host debugger.
    fn add_symbol_file(
        &self,
        file: &[u8],
        text: usize,
        text_size: usize,
        rootfs: &CStr,
    ) -> Result<()>;

    /// Loads the registered symbol files into the host debugger.
    fn load_symbols(&self) -> Result<()>;

    /// Unloads the registered symbol files from the host debugger.
    fn unload_symbols(&self) -> Result<()>;

    /// Returns `true` if `fd` of the host process is a terminal.
    fn isatty(&self, fd: c_int) -> Result<bool>;

    /// Loads the signature of the filesystem image at `path` into `sig`.
    fn load_fssig(&self, path: &CStr, sig: &mut FsSignature) -> Result<()>;
}

/// Converts a raw host answer into a [`Result`].
fn check<T>(answer: HostResult<T>) -> Result<c_long>
where
    T: Into<c_long>,
{
    let raw = answer.map_err(|_| EINVAL)?.into();

    if raw >= 0 {
        Ok(raw)
    } else if raw >= -MAX_ERRNO {
        Err((-raw) as c_int)
    } else {
        Err(EINVAL)
    }
}

/// Checks a block count reported by the host against the `requested` one.
fn check_count(answer: HostResult<isize>, requested: usize) -> Result<usize> {
    let count = check(answer.map(|n| n as c_long))?;

    match usize::try_from(count) {
        Ok(count) if count <= requested => Ok(count),
        _ => {
            warn!("host claims {count} blocks, {requested} requested");
            Err(EINVAL)
        }
    }
}

/// The [`Tcall`] implementation forwarding to a [`Host`]
#[derive(Debug)]
pub struct Relay<'a, H> {
    host: &'a H,
}

impl<'a, H: Host> Relay<'a, H> {
    /// Creates a relay to `host`.
    pub fn new(host: &'a H) -> Self {
        Self { host }
    }
}

impl<H: Host> Tcall for Relay<'_, H> {
    #[instrument(level = "trace", skip(self))]
    fn create_thread(&self, cookie: u64) -> Result<c_long> {
        check(self.host.create_thread(cookie))
    }

    #[instrument(level = "trace", skip(self))]
    fn wait(&self, event: u64, timeout: Option<&timespec>) -> Result<c_long> {
        check(self.host.wait(event, timeout))
    }

    #[instrument(level = "trace", skip(self))]
    fn wake(&self, event: u64) -> Result<c_long> {
        check(self.host.wake(event))
    }

    #[instrument(level = "trace", skip(self))]
    fn wake_wait(
        &self,
        waiter_event: u64,
        self_event: u64,
        timeout: Option<&timespec>,
    ) -> Result<c_long> {
        check(self.host.wake_wait(waiter_event, self_event, timeout))
    }

    #[instrument(level = "trace", skip(self))]
    fn poll_wake(&self) -> Result<c_long> {
        check(self.host.poll_wake())
    }

    #[instrument(level = "trace", skip(self))]
    fn open_block_device(&self, path: &CStr, read_only: bool) -> Result<c_int> {
        let blkdev = check(self.host.open_block_device(path, read_only))?;
        c_int::try_from(blkdev).map_err(|_| EINVAL)
    }

    #[instrument(level = "trace", skip(self))]
    fn close_block_device(&self, blkdev: c_int) -> Result<()> {
        check(self.host.close_block_device(blkdev)).map(|_| ())
    }

    #[instrument(level = "trace", skip(self, blocks), fields(n = blocks.len()))]
    fn read_block_device(
        &self,
        blkdev: c_int,
        blkno: u64,
        blocks: &mut [Block],
    ) -> Result<usize> {
        let requested = blocks.len();
        check_count(
            self.host.read_block_device(blkdev, blkno, blocks),
            requested,
        )
    }

    #[instrument(level = "trace", skip(self, blocks), fields(n = blocks.len()))]
    fn write_block_device(&self, blkdev: c_int, blkno: u64, blocks: &[Block]) -> Result<usize> {
        check_count(
            self.host.write_block_device(blkdev, blkno, blocks),
            blocks.len(),
        )
    }

    #[instrument(level = "trace", skip(self, file), fields(file_size = file.len()))]
    fn add_symbol_file(
        &self,
        file: &[u8],
        text: usize,
        text_size: usize,
        rootfs: &CStr,
    ) -> Result<()> {
        if text == 0 || text_size == 0 {
            return Err(EINVAL);
        }

        // The host debugger's answer has no meaning for the kernel.
        self.host
            .add_symbol_file(file, text, text_size, rootfs)
            .map(|_| ())
            .map_err(|_| EINVAL)
    }

    #[instrument(level = "trace", skip(self))]
    fn load_symbols(&self) -> Result<()> {
        match self.host.load_symbols() {
            Ok(0) => Ok(()),
            _ => Err(EINVAL),
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn unload_symbols(&self) -> Result<()> {
        match self.host.unload_symbols() {
            Ok(0) => Ok(()),
            _ => Err(EINVAL),
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn isatty(&self, fd: c_int) -> Result<bool> {
        check(self.host.isatty(fd)).map(|r| r == 1)
    }

    #[instrument(level = "trace", skip(self, sig))]
    fn load_fssig(&self, path: &CStr, sig: &mut FsSignature) -> Result<()> {
        let ret = check(self.host.load_fssig(path, sig));

        // Checked even if the host reported an error, it wrote `sig` anyway.
        if sig.signature_size > MAX_SIGNATURE_SIZE as u64 {
            warn!(
                "host signature size {} exceeds {MAX_SIGNATURE_SIZE}",
                sig.signature_size
            );
            *sig = FsSignature::default();
            return Err(EPERM);
        }

        ret.map(|_| ())
    }
}

/// Number of a tcall made through [`call`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum Number {
    /// [`Tcall::create_thread`]
    CreateThread = 0x00,
    /// [`Tcall::wait`]
    Wait = 0x01,
    /// [`Tcall::wake`]
    Wake = 0x02,
    /// [`Tcall::wake_wait`]
    WakeWait = 0x03,
    /// [`Tcall::poll_wake`]
    PollWake = 0x04,

    /// [`Tcall::open_block_device`]
    OpenBlockDevice = 0x10,
    /// [`Tcall::close_block_device`]
    CloseBlockDevice = 0x11,
    /// [`Tcall::read_block_device`]
    ReadBlockDevice = 0x12,
    /// [`Tcall::write_block_device`]
    WriteBlockDevice = 0x13,

    /// [`Tcall::add_symbol_file`]
    AddSymbolFile = 0x20,
    /// [`Tcall::load_symbols`]
    LoadSymbols = 0x21,
    /// [`Tcall::unload_symbols`]
    UnloadSymbols = 0x22,

    /// [`Tcall::isatty`]
    Isatty = 0x30,
    /// [`Tcall::load_fssig`]
    LoadFssig = 0x31,
}

impl TryFrom<c_long> for Number {
    type Error = Error;

    fn try_from(n: c_long) -> Result<Self> {
        const NUMBERS: [Number; 14] = [
            Number::CreateThread,
            Number::Wait,
            Number::Wake,
            Number::WakeWait,
            Number::PollWake,
            Number::OpenBlockDevice,
            Number::CloseBlockDevice,
            Number::ReadBlockDevice,
            Number::WriteBlockDevice,
            Number::AddSymbolFile,
            Number::LoadSymbols,
            Number::UnloadSymbols,
            Number::Isatty,
            Number::LoadFssig,
        ];

        NUMBERS
            .into_iter()
            .find(|num| *num as c_long == n)
            .ok_or(ENOSYS)
    }
}

fn fd(arg: c_long) -> Result<c_int> {
    c_int::try_from(arg).map_err(|_| EINVAL)
}

unsafe fn path<'a>(arg: c_long) -> Result<&'a CStr> {
    match arg as *const c_char {
        ptr if ptr.is_null() => Err(EINVAL),
        ptr => Ok(CStr::from_ptr(ptr)),
    }
}

unsafe fn timeout<'a>(arg: c_long) -> Option<&'a timespec> {
    (arg as *const timespec).as_ref()
}

unsafe fn array<'a, T>(arg: c_long, len: c_long) -> Result<&'a [T]> {
    let len = usize::try_from(len).map_err(|_| EINVAL)?;

    match arg as *const T {
        ptr if ptr.is_null() => Err(EINVAL),
        ptr => Ok(slice::from_raw_parts(ptr, len)),
    }
}

unsafe fn array_mut<'a, T>(arg: c_long, len: c_long) -> Result<&'a mut [T]> {
    let len = usize::try_from(len).map_err(|_| EINVAL)?;

    match arg as *mut T {
        ptr if ptr.is_null() => Err(EINVAL),
        ptr => Ok(slice::from_raw_parts_mut(ptr, len)),
    }
}

/// Runs tcall `n` with the raw C arguments `args`.
///
/// Returns the result, or a negated errno. An unknown `n` is `-ENOSYS`.
///
/// | tcall | arguments |
/// |---|---|
/// | `CreateThread` | cookie |
/// | `Wait` | event, `*const timespec` or null |
/// | `Wake` | event |
/// | `WakeWait` | waiter event, own event, `*const timespec` or null |
/// | `OpenBlockDevice` | path, read-only flag |
/// | `CloseBlockDevice` | handle |
/// | `ReadBlockDevice`, `WriteBlockDevice` | handle, block number, `*mut Block`, count |
/// | `AddSymbolFile` | file, file size, text, text size, rootfs path |
/// | `Isatty` | fd |
/// | `LoadFssig` | path, `*mut FsSignature` |
///
/// # Safety
///
/// Every non-null pointer among `args` must be valid for the tcall `n`.
pub unsafe fn call(tcall: &impl Tcall, n: c_long, args: &[c_long; 6]) -> c_long {
    match dispatch(tcall, n, args) {
        Ok(ret) => ret,
        Err(errno) => -(errno as c_long),
    }
}

unsafe fn dispatch(tcall: &impl Tcall, n: c_long, args: &[c_long; 6]) -> Result<c_long> {
    let [a, b, c, d, e, _] = *args;

    match Number::try_from(n)? {
        Number::CreateThread => tcall.create_thread(a as u64),
        Number::Wait => tcall.wait(a as u64, timeout(b)),
        Number::Wake => tcall.wake(a as u64),
        Number::WakeWait => tcall.wake_wait(a as u64, b as u64, timeout(c)),
        Number::PollWake => tcall.poll_wake(),

        Number::OpenBlockDevice => tcall.open_block_device(path(a)?, b != 0).map(Into::into),
        Number::CloseBlockDevice => tcall.close_block_device(fd(a)?).map(|_| 0),
        Number::ReadBlockDevice => tcall
            .read_block_device(fd(a)?, b as u64, array_mut::<Block>(c, d)?)
            .map(|n| n as c_long),
        Number::WriteBlockDevice => tcall
            .write_block_device(fd(a)?, b as u64, array::<Block>(c, d)?)
            .map(|n| n as c_long),

        Number::AddSymbolFile => {
            let file = array::<u8>(a, b)?;
            tcall
                .add_symbol_file(file, c as usize, d as usize, path(e)?)
                .map(|_| 0)
        }
        Number::LoadSymbols => tcall.load_symbols().map(|_| 0),
        Number::UnloadSymbols => tcall.unload_symbols().map(|_| 0),

        Number::Isatty => tcall.isatty(fd(a)?).map(c_long::from),
        Number::LoadFssig => {
            let sig = (b as *mut FsSignature).as_mut().ok_or(EINVAL)?;
            tcall.load_fssig(path(a)?, sig).map(|_| 0)
        }
    }
}
