//! Environment (process) identity and status.

use core::fmt;

pub const LOG2NENV: u32 = 10;
/// Maximum number of live environments.
pub const NENV: usize = 1 << LOG2NENV;

/// Environment identifier.
///
/// The low [`LOG2NENV`] bits index the environment table; the remaining bits
/// are a generation counter so a stale id never names a recycled slot.
/// `EnvId(0)` is never a real environment: syscalls read it as "the caller",
/// and `exofork` returns it to the newly created child.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(pub u32);

impl EnvId {
    pub const SELF: Self = Self(0);

    /// Table index of this environment.
    #[inline]
    pub const fn index(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    #[inline]
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Scheduling status of an environment.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EnvStatus {
    /// Slot is not in use.
    #[default]
    Free = 0,
    /// Marked for destruction while running on another CPU; reclaimed the
    /// next time it traps into the kernel.
    Dying = 1,
    Runnable = 2,
    Running = 3,
    /// Exists but must not be scheduled (e.g. a child under construction).
    NotRunnable = 4,
}

impl EnvStatus {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Free),
            1 => Some(Self::Dying),
            2 => Some(Self::Runnable),
            3 => Some(Self::Running),
            4 => Some(Self::NotRunnable),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}
