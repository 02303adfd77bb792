//! Kernel error codes returned by system calls.
//!
//! On the wire a failing syscall returns the negated code in `rax`;
//! [`demux`] is the single point where raw return values become `Result`s.

use core::fmt;

#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernError {
    Unspecified = 1,
    /// Environment does not exist or the caller may not touch it.
    BadEnv = 2,
    Inval = 3,
    NoMem = 4,
    NoFreeEnv = 5,
    Fault = 6,
}

impl KernError {
    pub const fn from_code(code: i32) -> Self {
        match code {
            2 => Self::BadEnv,
            3 => Self::Inval,
            4 => Self::NoMem,
            5 => Self::NoFreeEnv,
            6 => Self::Fault,
            _ => Self::Unspecified,
        }
    }

    /// Negative value placed in the result register.
    #[inline]
    pub const fn as_raw(self) -> i64 {
        -(self as i32 as i64)
    }
}

impl fmt::Display for KernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Unspecified => "unspecified error",
            Self::BadEnv => "bad environment",
            Self::Inval => "invalid parameter",
            Self::NoMem => "out of memory",
            Self::NoFreeEnv => "out of environments",
            Self::Fault => "segmentation fault",
        };
        f.write_str(msg)
    }
}

/// Convert a raw syscall return value into a `Result`.
#[inline]
pub fn demux(raw: i64) -> Result<u64, KernError> {
    if raw < 0 {
        let code = raw.checked_neg().and_then(|c| i32::try_from(c).ok());
        Err(code.map_or(KernError::Unspecified, KernError::from_code))
    } else {
        Ok(raw as u64)
    }
}
