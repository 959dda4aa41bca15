// SPDX-License-Identifier: Apache-2.0

//! Data items exchanged with the host

use const_default::ConstDefault;

/// Size of a block device block in bytes
pub const BLOCK_SIZE: usize = 512;

/// Size of a SHA-256 digest
pub const SHA256_SIZE: usize = 32;

/// Capacity of the signature buffer of a [`FsSignature`]
pub const MAX_SIGNATURE_SIZE: usize = 1024;

/// A single block device block
#[repr(C, align(8))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Block {
    /// Block contents
    pub data: [u8; BLOCK_SIZE],
}

impl ConstDefault for Block {
    const DEFAULT: Self = Self {
        data: [0; BLOCK_SIZE],
    };
}

impl Default for Block {
    fn default() -> Self {
        <Self as ConstDefault>::DEFAULT
    }
}

/// Result of a `cpuid` instruction executed by the host
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, ConstDefault, Eq, PartialEq)]
pub struct Cpuid {
    /// eax
    pub eax: u32,
    /// ebx
    pub ebx: u32,
    /// ecx
    pub ecx: u32,
    /// edx
    pub edx: u32,
}

/// Signature of a filesystem image
///
/// Filled in by the host. `signature_size` is the host's claim of how many
/// bytes of `signature` are used and must be checked before use.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FsSignature {
    /// Format magic, checked by the kernel
    pub magic: u64,
    /// Offset of the hash tree within the image
    pub hash_offset: u64,
    /// Root hash of the hash tree
    pub root_hash: [u8; SHA256_SIZE],
    /// Hash of the signer's public key
    pub signer: [u8; SHA256_SIZE],
    /// Signature of the root hash
    pub signature: [u8; MAX_SIGNATURE_SIZE],
    /// Used bytes of `signature`
    pub signature_size: u64,
}

impl ConstDefault for FsSignature {
    const DEFAULT: Self = Self {
        magic: 0,
        hash_offset: 0,
        root_hash: [0; SHA256_SIZE],
        signer: [0; SHA256_SIZE],
        signature: [0; MAX_SIGNATURE_SIZE],
        signature_size: 0,
    };
}

impl Default for FsSignature {
    fn default() -> Self {
        <Self as ConstDefault>::DEFAULT
    }
}

impl FsSignature {
    /// Returns `true` if every byte of the signature is zero.
    pub fn is_zeroed(&self) -> bool {
        *self == Self::DEFAULT
    }
}
