// SPDX-License-Identifier: Apache-2.0

//! Fakes of the host, the kernel and the enclave runtime

use crate::context::{MContext, REG_RIP};
use crate::ecall::{EnterArgs, Shim};
use crate::enclave::{Enclave, RegionId, TrapHandler};
use crate::handler::signal::SigInfo;
use crate::kargs::{Features, KernelArgs, TcallFn};
use crate::kernel::{self, Kernel, KernelHooks};

use core::ffi::{c_char, c_int, c_long, CStr};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use goblin::elf::header::ELFMAG;
use libos_tcall::item::{Block, Cpuid, FsSignature};
use libos_tcall::libc::{pid_t, timespec, EIO};
use libos_tcall::{Host, HostResult, TransportError};

/// A host answering every call with the configured values
#[derive(Debug, Default)]
pub struct FakeHost {
    /// Fail every call in transport
    pub broken: bool,
    /// Answer of the calls returning a status
    pub answer: c_long,
    /// Block count claimed by the block device calls
    pub blocks: isize,
    /// Signature size written by `load_fssig`
    pub signature_size: u64,
    /// Answer to `rdtsc`
    pub tsc: (u32, u32),
    /// Answer to `cpuid`
    pub cpuid: Cpuid,
    pub(crate) queries: Mutex<Vec<(u32, u32)>>,
}

impl FakeHost {
    /// Returns the `cpuid` leaves and subleaves the host was asked for.
    pub fn cpuid_queries(&self) -> Vec<(u32, u32)> {
        self.queries.lock().unwrap().clone()
    }

    fn reply<T: TryFrom<c_long>>(&self) -> HostResult<T> {
        if self.broken {
            return Err(TransportError);
        }

        match T::try_from(self.answer) {
            Ok(answer) => Ok(answer),
            Err(_) => panic!("answer {} too wide", self.answer),
        }
    }
}

impl Host for FakeHost {
    fn rdtsc(&self) -> HostResult<(u32, u32)> {
        self.reply::<c_long>().map(|_| self.tsc)
    }

    fn cpuid(&self, leaf: u32, subleaf: u32) -> HostResult<Cpuid> {
        self.queries.lock().unwrap().push((leaf, subleaf));
        self.reply::<c_long>().map(|_| self.cpuid)
    }

    fn create_thread(&self, _cookie: u64) -> HostResult<c_long> {
        self.reply()
    }

    fn wait(&self, _event: u64, _timeout: Option<&timespec>) -> HostResult<c_long> {
        self.reply()
    }

    fn wake(&self, _event: u64) -> HostResult<c_long> {
        self.reply()
    }

    fn wake_wait(&self, _: u64, _: u64, _: Option<&timespec>) -> HostResult<c_long> {
        self.reply()
    }

    fn poll_wake(&self) -> HostResult<c_long> {
        self.reply()
    }

    fn open_block_device(&self, _path: &CStr, _read_only: bool) -> HostResult<c_int> {
        self.reply()
    }

    fn close_block_device(&self, _blkdev: c_int) -> HostResult<c_int> {
        self.reply()
    }

    fn read_block_device(&self, _: c_int, _: u64, blocks: &mut [Block]) -> HostResult<isize> {
        self.reply::<c_long>()?;

        // Filled whatever count is claimed.
        for block in blocks.iter_mut() {
            block.data.fill(0xa5);
        }

        Ok(self.blocks)
    }

    fn write_block_device(&self, _: c_int, _: u64, _: &[Block]) -> HostResult<isize> {
        self.reply::<c_long>().map(|_| self.blocks)
    }

    fn add_symbol_file(&self, _: &[u8], _: usize, _: usize, _: &CStr) -> HostResult<c_int> {
        self.reply()
    }

    fn load_symbols(&self) -> HostResult<c_int> {
        self.reply()
    }

    fn unload_symbols(&self) -> HostResult<c_int> {
        self.reply()
    }

    fn isatty(&self, _fd: c_int) -> HostResult<c_long> {
        self.reply()
    }

    fn load_fssig(&self, _path: &CStr, sig: &mut FsSignature) -> HostResult<c_int> {
        let ret = self.reply();
        sig.signature_size = self.signature_size;
        sig.signature[0] = 0xa5;
        ret
    }
}

/// A kernel recording what it is asked to do
#[derive(Debug, Default)]
pub struct FakeKernel {
    /// Where to redirect a thread receiving a signal
    pub redirect: Option<u64>,
    pub(crate) syscalls: Mutex<Vec<(c_long, [c_long; 6])>>,
    pub(crate) signals: Mutex<Vec<SigInfo>>,
    pub(crate) last_rip: Mutex<Option<u64>>,
}

impl FakeKernel {
    /// Returns the result of system call `n` with first argument `a0`.
    pub fn syscall_ret(n: c_long, a0: c_long) -> c_long {
        n + a0
    }

    /// Returns the system calls executed so far.
    pub fn syscalls(&self) -> Vec<(c_long, [c_long; 6])> {
        self.syscalls.lock().unwrap().clone()
    }

    /// Returns the signals delivered so far.
    pub fn signals(&self) -> Vec<SigInfo> {
        self.signals.lock().unwrap().clone()
    }

    /// Returns the `rip` of the last thread receiving a signal.
    pub fn last_rip(&self) -> Option<u64> {
        *self.last_rip.lock().unwrap()
    }
}

impl Kernel for FakeKernel {
    fn syscall(&self, n: c_long, args: &[c_long; 6]) -> c_long {
        self.syscalls.lock().unwrap().push((n, *args));
        Self::syscall_ret(n, args[0])
    }

    fn handle_host_signal(&self, info: &SigInfo, mcontext: &mut MContext) {
        self.signals.lock().unwrap().push(*info);
        *self.last_rip.lock().unwrap() = Some(mcontext.gregs[REG_RIP] as u64);

        if let Some(rip) = self.redirect {
            mcontext.gregs[REG_RIP] = rip as i64;
        }
    }

    fn run_thread(&self, cookie: u64, event: u64, tid: pid_t) -> c_long {
        run_thread(cookie, event, tid)
    }
}

/// Exit status of the fake kernel
pub const KERNEL_STATUS: c_int = 42;

/// Thread control structures of [`FakeEnclave`]
pub const NUM_TCS: usize = 4;

const KERNEL_ENTRY: usize = 0x100;

/// What the fake kernel saw when it was entered
#[derive(Debug, Clone)]
pub struct Entered {
    pub target: String,
    pub argv: Vec<String>,
    pub envp: Vec<String>,
    pub cwd: String,
    pub hostname: Option<String>,
    pub mounts: Vec<(String, Option<String>)>,
    pub features: Features,
    pub thread_event: u64,
    pub target_tid: pid_t,
    pub max_threads: usize,
    pub main_stack_size: usize,
    /// Answer to entering the enclave again from inside the kernel
    pub reentered: c_int,
    /// Answer to publishing the hooks a second time
    pub republished: c_int,
    /// The shim, as handed to the kernel
    pub context: usize,
    /// The tcall entry handed to the kernel
    pub tcall: TcallFn,
}

static ENTERED: Mutex<Option<Entered>> = Mutex::new(None);
static SIGNALS: Mutex<Vec<c_int>> = Mutex::new(Vec::new());

/// Returns what the fake kernel saw when it was last entered.
pub fn entered() -> Option<Entered> {
    ENTERED.lock().unwrap().clone()
}

/// Returns the signals the published kernel hooks received.
pub fn kernel_signals() -> Vec<c_int> {
    SIGNALS.lock().unwrap().clone()
}

/// The thread entry published by the fake kernel
pub extern "C" fn run_thread(cookie: u64, event: u64, tid: pid_t) -> c_long {
    (cookie * 100 + event) as c_long + tid as c_long
}

extern "C" fn hook_syscall(n: c_long, args: &[c_long; 6]) -> c_long {
    FakeKernel::syscall_ret(n, args[0])
}

extern "C" fn hook_signal(info: &SigInfo, _mcontext: &mut MContext) {
    SIGNALS.lock().unwrap().push(info.signo);
}

static HOOKS: KernelHooks = KernelHooks {
    syscall: hook_syscall,
    handle_host_signal: hook_signal,
    run_thread,
};

unsafe fn string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }

    Some(CStr::from_ptr(ptr).to_str().unwrap().into())
}

unsafe fn strings(ptrs: *const *const c_char, n: usize) -> Vec<String> {
    let ptrs = slice::from_raw_parts(ptrs, n + 1);
    assert!(ptrs[n].is_null());

    ptrs[..n].iter().map(|p| string(*p).unwrap()).collect()
}

/// The kernel entry point, reading its arguments the way a C kernel would
unsafe extern "C" fn fake_kernel(args: &KernelArgs) -> c_int {
    SIGNALS.lock().unwrap().clear();

    // Only `Shim<FakeEnclave, FakeHost>` runs this kernel.
    let shim = &*(args.context as *const Shim<FakeEnclave, FakeHost>);
    let reentered = shim.enter(&EnterArgs::default());

    let mounts = slice::from_raw_parts(args.mounts, args.num_mounts)
        .iter()
        .map(|m| (string(m.target).unwrap(), string(m.source)))
        .collect();

    let mut entered = Entered {
        target: string(args.target).unwrap(),
        argv: strings(args.argv, args.argc),
        envp: strings(args.envp, args.envc),
        cwd: string(args.cwd).unwrap(),
        hostname: string(args.hostname),
        mounts,
        features: args.features,
        thread_event: args.thread_event,
        target_tid: args.target_tid,
        max_threads: args.max_threads,
        main_stack_size: args.main_stack_size,
        reentered,
        republished: 0,
        context: args.context as usize,
        tcall: args.tcall,
    };

    assert_eq!((args.publish_hooks)(args.context, &HOOKS), 0);
    entered.republished = (args.publish_hooks)(args.context, &HOOKS);

    *ENTERED.lock().unwrap() = Some(entered);
    KERNEL_STATUS
}

fn leak(data: Vec<u8>) -> &'static [u8] {
    Box::leak(data.into_boxed_slice())
}

/// An enclave runtime holding its regions in leaked host memory
#[derive(Debug)]
pub struct FakeEnclave {
    image: &'static [u8],
    config: Option<&'static [u8]>,
    kernel: &'static [u8],
    stack: &'static [u8],
    debug: bool,
    refuse_handler: bool,
    handler: AtomicBool,
    clock: Mutex<Option<u64>>,
    entries: AtomicUsize,
}

impl FakeEnclave {
    /// Creates a debug enclave with an optional trusted `config`.
    pub fn new(config: Option<&str>) -> Self {
        let mut kernel = vec![0u8; 0x1000];
        kernel[..ELFMAG.len()].copy_from_slice(ELFMAG);
        kernel[24..32].copy_from_slice(&(KERNEL_ENTRY as u64).to_le_bytes());

        Self {
            image: leak(vec![0u8; 0x4000]),
            config: config.map(|c| leak(c.as_bytes().to_vec())),
            kernel: leak(kernel),
            stack: leak(vec![0u8; 0x1000]),
            debug: true,
            refuse_handler: false,
            handler: AtomicBool::new(false),
            clock: Mutex::new(None),
            entries: AtomicUsize::new(0),
        }
    }

    /// Turns off debug mode.
    pub fn release(mut self) -> Self {
        self.debug = false;
        self
    }

    /// Fails the registration of the trap handler.
    pub fn refuse_handler(mut self) -> Self {
        self.refuse_handler = true;
        self
    }

    /// Returns the clock set up by the shim.
    pub fn clock(&self) -> Option<u64> {
        *self.clock.lock().unwrap()
    }

    /// Returns `true` if a trap handler was registered.
    pub fn has_handler(&self) -> bool {
        self.handler.load(Ordering::SeqCst)
    }

    /// Returns how often the kernel was entered.
    pub fn kernel_entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

impl Enclave for FakeEnclave {
    fn image(&self) -> &'static [u8] {
        self.image
    }

    fn region(&self, id: RegionId) -> Option<&'static [u8]> {
        match id {
            RegionId::Config => self.config,
            RegionId::Kernel => Some(self.kernel),
            RegionId::KernelEnterStack => Some(self.stack),
        }
    }

    fn num_tcs(&self) -> usize {
        NUM_TCS
    }

    fn debug_mode(&self) -> bool {
        self.debug
    }

    fn add_vectored_handler(&self, _handler: &'static dyn TrapHandler) -> libos_tcall::Result<()> {
        if self.refuse_handler {
            return Err(EIO);
        }

        self.handler.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn setup_clock(&self, clock: u64) -> libos_tcall::Result<()> {
        *self.clock.lock().unwrap() = Some(clock);
        Ok(())
    }

    fn call_on_stack(&self, stack: &'static [u8], f: &mut dyn FnMut() -> c_int) -> c_int {
        assert_eq!(stack.as_ptr(), self.stack.as_ptr());
        f()
    }

    unsafe fn enter_kernel(&self, entry: usize, args: &KernelArgs) -> c_int {
        assert_eq!(entry, self.kernel.as_ptr() as usize + KERNEL_ENTRY);
        assert_eq!(args.kernel_image, self.kernel.as_ptr());
        assert_eq!(args.kernel_image_size, self.kernel.len());
        assert_eq!(args.enter_stack, self.stack.as_ptr());
        assert_eq!(args.enclave_image, self.image.as_ptr());

        self.entries.fetch_add(1, Ordering::SeqCst);
        kernel::enter(fake_kernel as usize, args)
    }
}
