// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Driver error type
//!
//! Every fallible operation in the crate returns [`Result`]. Hardware errors
//! reported by the GPU are *not* errors in this sense: they are classified
//! into counters by [`crate::hw_error`] and never surface as `Err`.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,

    #[error("no space left in address space")]
    NoSpace,

    #[error("context is closed")]
    Closed,

    #[error("context is banned")]
    Banned,

    #[error("interrupted while waiting")]
    Interrupted,

    /// Lock contended by an older transaction; the caller must back off.
    #[error("wound-wait deadlock, backoff required")]
    Deadlock,

    #[error("resource busy")]
    Busy,

    /// A register read returned all-ones: the device is gone or in
    /// PCIe containment.
    #[error("device unavailable")]
    DeviceUnavailable,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("timed out")]
    Timeout,

    #[error("firmware error: {0}")]
    Firmware(&'static str),

    #[error("no such device")]
    NoDevice,
}

// Linux errno values, used by the uapi-facing shims.
const ENOENT: i32 = 2;
const EINTR: i32 = 4;
const EIO: i32 = 5;
const ENXIO: i32 = 6;
const ENOEXEC: i32 = 8;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ENOSPC: i32 = 28;
const EDEADLK: i32 = 35;
const ETIMEDOUT: i32 = 110;

impl Error {
    /// Negative POSIX error number for this error.
    pub fn errno(&self) -> i32 {
        -match self {
            Error::OutOfMemory => ENOMEM,
            Error::NoSpace => ENOSPC,
            Error::Closed => ENOENT,
            Error::Banned => EIO,
            Error::Interrupted => EINTR,
            Error::Deadlock => EDEADLK,
            Error::Busy => EBUSY,
            Error::DeviceUnavailable => ENXIO,
            Error::InvalidArgument(_) => EINVAL,
            Error::Timeout => ETIMEDOUT,
            Error::Firmware(_) => ENOEXEC,
            Error::NoDevice => ENODEV,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::OutOfMemory.errno(), -12);
        assert_eq!(Error::Closed.errno(), -2);
        assert_eq!(Error::Banned.errno(), -5);
        assert_eq!(Error::Interrupted.errno(), -4);
        assert_eq!(Error::Deadlock.errno(), -35);
        assert_eq!(Error::InvalidArgument("x").errno(), -22);
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::Closed.to_string(), "context is closed");
        assert_eq!(
            Error::InvalidArgument("nested parallel context").to_string(),
            "invalid argument: nested parallel context"
        );
    }
}
