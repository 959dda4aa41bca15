// SPDX-License-Identifier: Apache-2.0

//! Definitions of upstream [libc] items used within the crates.
//!
//! The enclave side is built without an operating system underneath, so the
//! `libc` crate cannot be used there. The values below are the Linux x86_64
//! ones and are checked against `libc` in the tests.

#![allow(missing_docs)]
#![allow(non_camel_case_types)]

use core::ffi::{c_int, c_long};

pub type pid_t = i32;
pub type time_t = i64;

/// Maximum length of a path including the terminating NUL
pub const PATH_MAX: usize = 4096;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct timespec {
    pub tv_sec: time_t,
    pub tv_nsec: c_long,
}

pub const EPERM: c_int = 1;
pub const EIO: c_int = 5;
pub const EAGAIN: c_int = 11;
pub const ENOMEM: c_int = 12;
pub const EBUSY: c_int = 16;
pub const EEXIST: c_int = 17;
pub const EINVAL: c_int = 22;
pub const ENOSYS: c_int = 38;

pub const SIGILL: c_int = 4;
pub const SIGFPE: c_int = 8;
pub const SIGSEGV: c_int = 11;

pub const SI_KERNEL: c_int = 0x80;

pub const FPE_INTDIV: c_int = 1;
pub const FPE_FLTINV: c_int = 7;

pub const SEGV_MAPERR: c_int = 1;
pub const SEGV_ACCERR: c_int = 2;
pub const SEGV_PKUERR: c_int = 4;

#[cfg(test)]
mod tests {
    macro_rules! same {
        ($($name:ident),* $(,)?) => {
            $(assert_eq!(super::$name, ::libc::$name, stringify!($name));)*
        };
    }

    #[test]
    fn errno() {
        same!(EPERM, EIO, EAGAIN, ENOMEM, EBUSY, EEXIST, EINVAL, ENOSYS);
    }

    #[test]
    fn signals() {
        same!(SIGILL, SIGFPE, SIGSEGV);
        assert_eq!(super::PATH_MAX, ::libc::PATH_MAX as usize);
    }

    #[test]
    fn timespec_layout() {
        use core::mem::{align_of, size_of};

        assert_eq!(size_of::<super::timespec>(), size_of::<::libc::timespec>());
        assert_eq!(
            align_of::<super::timespec>(),
            align_of::<::libc::timespec>()
        );
    }
}
