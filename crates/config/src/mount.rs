// SPDX-License-Identifier: Apache-2.0

use crate::Error;

use alloc::collections::BTreeSet;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::ops::Deref;

use serde::Deserialize;

/// Filesystem type of a mount
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum MountKind {
    /// Directory of the host, passed through
    Hostfs = 0,

    /// In-memory filesystem
    Ramfs = 1,

    /// ext2 image
    Ext2 = 2,
}

impl MountKind {
    /// Returns `true` if a mount of this kind needs a source.
    pub fn needs_source(self) -> bool {
        !matches!(self, Self::Ramfs)
    }
}

/// A single mount
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mount {
    /// Absolute path of the mount point
    pub target: String,

    /// Filesystem type
    #[serde(rename = "type")]
    pub kind: MountKind,

    /// Host path backing the mount, usually supplied by the host at runtime
    #[serde(default)]
    pub source: Option<String>,

    /// Mount flags
    #[serde(default)]
    pub flags: Vec<String>,

    /// Public key the filesystem image must be signed with
    #[serde(default)]
    pub public_key: Option<String>,

    /// Expected root hash of the filesystem image
    #[serde(default)]
    pub roothash: Option<String>,
}

/// The mount table
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct MountTable(Vec<Mount>);

impl From<Vec<Mount>> for MountTable {
    fn from(value: Vec<Mount>) -> Self {
        Self(value)
    }
}

impl Deref for MountTable {
    type Target = [Mount];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MountTable {
    /// Merges the host's `source=target` mappings into the table.
    ///
    /// The host only gets to choose where the data of a configured mount
    /// comes from: it can neither add mounts nor replace a source the
    /// configuration fixed.
    pub fn merge<S: AsRef<str>>(&mut self, mappings: &[S]) -> Result<(), Error> {
        for mapping in mappings {
            let mapping = mapping.as_ref();

            let (source, target) = match mapping.split_once('=') {
                Some((s, t)) if !s.is_empty() && !t.is_empty() => (s, t),
                _ => return Err(Error::Mapping(mapping.to_string())),
            };

            let mount = self
                .0
                .iter_mut()
                .find(|m| m.target == target)
                .ok_or_else(|| Error::UnknownTarget(target.to_string()))?;

            if mount.source.is_some() {
                return Err(Error::AlreadySourced(target.to_string()));
            }

            mount.source = Some(source.to_string());
        }

        Ok(())
    }

    /// Checks that the table can be mounted.
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = BTreeSet::new();

        for mount in &self.0 {
            if !mount.target.starts_with('/') {
                return Err(Error::RelativeTarget(mount.target.clone()));
            }

            if !seen.insert(mount.target.as_str()) {
                return Err(Error::DuplicateTarget(mount.target.clone()));
            }

            if mount.kind.needs_source() && mount.source.is_none() {
                return Err(Error::MissingSource(mount.target.clone()));
            }
        }

        Ok(())
    }
}
