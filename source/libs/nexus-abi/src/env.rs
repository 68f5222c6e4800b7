// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Env identifiers and scheduling states.

use core::fmt;

/// Identifier of an env (an isolated execution context).
///
/// Live envs always have a strictly positive id. The value `0` is reserved:
/// passed to a syscall it names the caller, and it is the discriminator the
/// child observes when it resumes from fork.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EnvId(u32);

impl EnvId {
    /// Names the calling env in syscalls.
    pub const SELF: Self = Self(0);

    /// Wraps a raw id as returned by the kernel.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw representation.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for the reserved "caller" id.
    #[inline]
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:#010x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Scheduling state of an env.
///
/// Discriminants are ABI: they are what `env_set_status` transports.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvStatus {
    /// Eligible to be picked by the scheduler.
    Runnable = 2,
    /// Currently owns the CPU.
    Running = 3,
    /// Exists but must not be scheduled (freshly exoforked children).
    NotRunnable = 4,
}

impl EnvStatus {
    /// Decodes a raw status value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            2 => Some(Self::Runnable),
            3 => Some(Self::Running),
            4 => Some(Self::NotRunnable),
            _ => None,
        }
    }
}
