// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-fault records and the fatal-termination taxonomy.

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Error bits describing the access that faulted.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FaultErr: u32 {
        /// The page was present (protection violation rather than a miss).
        const PRESENT = 0x1;
        /// The access was a store.
        const WRITE = 0x2;
        /// The access came from user mode.
        const USER = 0x4;
    }
}

/// Fault record pushed onto the user exception stack and handed to the upcall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UTrapframe {
    /// Faulting virtual address (not rounded).
    pub fault_va: u32,
    /// What kind of access faulted.
    pub err: FaultErr,
}

impl UTrapframe {
    /// Size of the encoded record on the exception stack.
    pub const SIZE: usize = 8;

    /// Encodes the record little-endian, as it sits on the exception stack.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(&self.fault_va.to_le_bytes());
        out[4..].copy_from_slice(&self.err.bits().to_le_bytes());
        out
    }

    /// Decodes a record previously produced by [`UTrapframe::to_le_bytes`].
    pub fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let fault_va = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let err = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self { fault_va, err: FaultErr::from_bits_retain(err) }
    }

    /// Returns `true` if the faulting access was a store.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.err.contains(FaultErr::WRITE)
    }
}

/// Unrecoverable conditions that abort an env.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fatal {
    /// A fault was delivered that is not a store to a COW user page.
    InvalidFault,
    /// The memory manager ran out of frames.
    AllocationFailure,
    /// A privileged mapping request was rejected.
    MappingFailure,
    /// Invalid argument to an operation that cannot proceed without it.
    InvalidArgument,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidFault => "invalid fault",
            Self::AllocationFailure => "allocation failure",
            Self::MappingFailure => "mapping failure",
            Self::InvalidArgument => "invalid argument",
        };
        f.write_str(msg)
    }
}

/// Why an env stopped existing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The env destroyed itself.
    Exited,
    /// Another env (its parent) destroyed it.
    Killed,
    /// The fault upcall reported a fatal condition.
    Aborted(Fatal),
    /// A fault occurred with no upcall registered.
    UnhandledFault {
        /// Faulting address.
        va: u32,
        /// Access type.
        err: FaultErr,
    },
    /// The exception stack was missing, not writable, or overflowed.
    BadExceptionStack {
        /// Faulting address that triggered the delivery.
        va: u32,
    },
    /// The upcall returned but the same access kept faulting.
    FaultLoop {
        /// Faulting address.
        va: u32,
    },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited => f.write_str("exited"),
            Self::Killed => f.write_str("killed"),
            Self::Aborted(fatal) => write!(f, "aborted: {fatal}"),
            Self::UnhandledFault { va, err } => {
                write!(f, "unhandled page fault va={va:#010x} err={:#x}", err.bits())
            }
            Self::BadExceptionStack { va } => write!(f, "bad exception stack (fault va={va:#010x})"),
            Self::FaultLoop { va } => write!(f, "fault loop at va={va:#010x}"),
        }
    }
}

/// Outcome of a user memory access that could not complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trap {
    /// No env is currently running.
    NoCurrentEnv,
    /// The accessing env was destroyed while handling the access.
    Destroyed(ExitReason),
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCurrentEnv => f.write_str("no current env"),
            Self::Destroyed(reason) => write!(f, "env destroyed: {reason}"),
        }
    }
}
