// SPDX-License-Identifier: Apache-2.0

//! The SGX shim of the library OS
//!
//! This crate sits between the untrusted host and the kernel running inside
//! an SGX enclave. It validates the host's request to enter the enclave,
//! brings up the kernel, relays the kernel's requests to the host, and
//! handles the hardware exceptions of the enclave: the instructions an
//! enclave cannot execute (`rdtsc`, `cpuid`, `iretq`, `syscall`) are
//! emulated, everything else is delivered to the kernel as a signal.

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

/// Logs the error and aborts the enclave.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        panic!($($arg)*)
    }};
}

pub mod context;
pub mod ecall;
pub mod enclave;
pub mod entry;
pub mod handler;
pub mod kargs;
pub mod kernel;
pub mod options;
pub mod tcall;

#[cfg(test)]
mod mock;

const DEBUG: bool = cfg!(feature = "dbg");

/// Environment variable telling the application where it runs
pub const TARGET_ENV: &str = "LIBOS_TARGET";

/// Name of this execution target
pub const TARGET: &str = "sgx";

/// Smallest XSAVE area size exposed by `cpuid`
///
/// Covers the legacy region, the XSAVE header and the AVX-512 state.
pub const XSAVE_MIN_SIZE: u32 = 4096;

/// Default stack size of the main thread
pub const MAIN_STACK_SIZE: usize = nbytes::bytes![1; MiB];
