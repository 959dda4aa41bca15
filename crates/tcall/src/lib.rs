// SPDX-License-Identifier: Apache-2.0

//! API for the enclave-host boundary
//!
//! Everything the untrusted host hands to the enclave, and every service the
//! enclave requests from the host, crosses this boundary. A request leaving
//! the enclave is a *tcall*: a single synchronous round-trip with a fixed
//! argument and result shape.
//!
//! This crate only describes the boundary:
//!
//! * [`Host`] is the capability the enclave runtime provides to reach the
//!   host. It has one method per tcall and returns whatever the host claims,
//!   unvalidated.
//! * [`item`] holds the data items exchanged with the host.
//! * [`args`] implements the packed string-vector format used for the
//!   process arguments, the environment and the mount mappings.
//! * [`libc`] holds the errno and signal numbers used on both sides.
//!
//! Validating host answers is the job of the caller. Every value returned by
//! a [`Host`] must be assumed to be adversarial.

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod args;
pub mod item;
pub mod libc;

mod host;

pub use host::*;

/// Error type used within this crate: a positive errno value.
pub type Error = core::ffi::c_int;

/// Result type returned by functionality exposed by this crate.
pub type Result<T> = core::result::Result<T, Error>;
