// SPDX-License-Identifier: Apache-2.0

//! Packed string vectors
//!
//! The host passes the process arguments, the environment and the mount
//! mappings as one flat buffer each. A buffer is a sequence of NUL-terminated
//! UTF-8 strings, so its length describes itself and the number of strings
//! is the number of terminators:
//!
//! ```text
//! "/bin/app\0--verbose\0"  =>  ["/bin/app", "--verbose"]
//! ```

use crate::libc::EINVAL;
use crate::Result;

use alloc::string::String;
use alloc::vec::Vec;

/// Packs `strings` into the wire format.
pub fn pack<S: AsRef<str>>(strings: &[S]) -> Vec<u8> {
    let len = strings.iter().map(|s| s.as_ref().len() + 1).sum();
    let mut buf = Vec::with_capacity(len);

    for s in strings {
        buf.extend_from_slice(s.as_ref().as_bytes());
        buf.push(0);
    }

    buf
}

/// Unpacks a buffer in the wire format into owned strings.
///
/// The buffer must be non-empty, end with a NUL byte and contain valid
/// UTF-8 only. Anything else is [`EINVAL`] and a partial result is never
/// returned. `buf` must be private to the caller: host memory is copied
/// first, it can change underneath the checks.
pub fn unpack(buf: &[u8]) -> Result<Vec<String>> {
    let body = match buf.split_last() {
        Some((0, body)) => body,
        _ => return Err(EINVAL),
    };

    body.split(|b| *b == 0)
        .map(|s| {
            core::str::from_utf8(s)
                .map(String::from)
                .map_err(|_| EINVAL)
        })
        .collect()
}
