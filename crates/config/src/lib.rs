// SPDX-License-Identifier: Apache-2.0

//! Trusted configuration of a library OS enclave
//!
//! The configuration is a JSON document compiled into a read-only region of
//! the enclave image. Since it is measured together with the image, the host
//! cannot tamper with it: whatever it says about the application to run, its
//! environment and its mounts takes precedence over the host's wishes.
//!
//! ```
//! use libos_config::{parse, ForkMode};
//!
//! const CONFIG: &[u8] = br#"{
//!     "application_path": "/bin/app",
//!     "application_parameters": ["--serve"],
//!     "host_environment_variables": ["PATH", "HOME"],
//!     "fork_mode": "pseudo"
//! }"#;
//!
//! let config = parse(CONFIG).unwrap();
//! assert_eq!(config.fork_mode, Some(ForkMode::Pseudo));
//! assert!(config.admits_host_variable("PATH=/bin"));
//! assert!(!config.admits_host_variable("SECRET=xyz"));
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

mod mount;

pub use mount::{Mount, MountKind, MountTable};

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;

use serde::{de::Error as _, Deserialize, Deserializer};

/// Error returned when the configuration cannot be used
#[derive(Debug)]
pub enum Error {
    /// The document is not a valid configuration
    Parse(serde_json::Error),

    /// A host mount mapping is not of the form `source=target`
    Mapping(String),

    /// A host mount mapping names a target the mount table does not have
    UnknownTarget(String),

    /// A host mount mapping names a target which already has a source
    AlreadySourced(String),

    /// A mount target is not an absolute path
    RelativeTarget(String),

    /// Two mounts share the same target
    DuplicateTarget(String),

    /// A mount of a kind which needs a source has none
    MissingSource(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid configuration: {e}"),
            Self::Mapping(m) => write!(f, "invalid mount mapping `{m}`"),
            Self::UnknownTarget(t) => write!(f, "no mount configured for target `{t}`"),
            Self::AlreadySourced(t) => write!(f, "mount target `{t}` already has a source"),
            Self::RelativeTarget(t) => write!(f, "mount target `{t}` is not absolute"),
            Self::DuplicateTarget(t) => write!(f, "mount target `{t}` configured twice"),
            Self::MissingSource(t) => write!(f, "mount target `{t}` has no source"),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// Name of a host environment variable the application may inherit
///
/// A name never contains `=`: a host variable `NAME=value` is admitted if
/// its name is exactly one of the configured names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvName(String);

impl EnvName {
    /// Returns `true` if the host variable `var` (`NAME=value`) has this name.
    pub fn admits(&self, var: &str) -> bool {
        var.strip_prefix(self.0.as_str())
            .map_or(false, |rest| rest.starts_with('='))
    }
}

impl From<&str> for EnvName {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl Deref for EnvName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for EnvName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;

        if name.is_empty() {
            return Err(D::Error::custom("empty environment variable name"));
        }

        if name.contains('=') {
            return Err(D::Error::custom(
                "invalid environment variable name contains '='",
            ));
        }

        Ok(Self(name))
    }
}

/// How the kernel emulates `fork`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ForkMode {
    /// `fork` fails
    #[default]
    None = 0,

    /// `fork` is emulated with a thread sharing the address space
    Pseudo = 1,

    /// Like [`ForkMode::Pseudo`], but the parent waits until the child
    /// exits or calls `exec`
    PseudoWaitForExitExec = 2,
}

impl TryFrom<u32> for ForkMode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Pseudo),
            2 => Ok(Self::PseudoWaitForExitExec),
            v => Err(v),
        }
    }
}

/// The trusted configuration
///
/// Optional settings are `None` when the document leaves them to the host.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path of the application inside the root filesystem
    pub application_path: String,

    /// Arguments passed to the application after its path
    #[serde(default)]
    pub application_parameters: Vec<String>,

    /// Use the arguments supplied by the host instead of the ones above
    #[serde(default)]
    pub allow_host_parameters: bool,

    /// Environment of the application, as `NAME=value` strings
    #[serde(default)]
    pub enclave_environment_variables: Vec<String>,

    /// Names of host environment variables the application inherits
    #[serde(default)]
    pub host_environment_variables: Vec<EnvName>,

    /// Mount table
    #[serde(default)]
    pub mounts: MountTable,

    /// Initial working directory
    #[serde(default)]
    pub current_working_directory: Option<String>,

    /// Hostname
    #[serde(default)]
    pub hostname: Option<String>,

    /// Number of CPUs reported by `sched_getaffinity`
    #[serde(default)]
    pub max_affinity_cpus: Option<usize>,

    /// Stack size of the main thread in bytes
    #[serde(default)]
    pub main_stack_size: Option<usize>,

    /// How `fork` is emulated
    #[serde(default)]
    pub fork_mode: Option<ForkMode>,

    /// Disable the `brk` system call
    #[serde(default)]
    pub no_brk: bool,

    /// Fail unhandled system calls with `ENOSYS` instead of terminating
    #[serde(default)]
    pub unhandled_syscall_enosys: Option<bool>,
}

impl Config {
    /// Returns `true` if the host variable `var` may be inherited.
    pub fn admits_host_variable(&self, var: &str) -> bool {
        self.host_environment_variables
            .iter()
            .any(|name| name.admits(var))
    }
}

/// Parses a configuration from the contents of the configuration region.
///
/// The region is page sized, so trailing NUL padding is ignored.
pub fn parse(region: &[u8]) -> Result<Config, Error> {
    let end = region
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);

    Ok(serde_json::from_slice(&region[..end])?)
}
