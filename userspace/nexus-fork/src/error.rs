// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the fork runtime.

use nexus_abi::{AbiError, Fatal, FaultErr, Trap};
use thiserror::Error;

/// Errors produced while forking or resolving copy-on-write faults.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    /// The fault was not a store to a copy-on-write user page.
    #[error("invalid fault at {va:#010x} (err {:#x})", .err.bits())]
    InvalidFault {
        /// Faulting address.
        va: u32,
        /// Access bits reported by the kernel.
        err: FaultErr,
    },
    /// The memory manager could not provide a frame (or an env).
    #[error("allocation failed: {0}")]
    AllocationFailure(AbiError),
    /// A mapping, status or upcall request was rejected.
    #[error("mapping failed: {0}")]
    MappingFailure(AbiError),
    /// The operation is not supported.
    #[error("invalid argument")]
    InvalidArgument,
    /// A user access trapped and the env did not survive it.
    #[error("memory access trapped: {0}")]
    Trap(Trap),
}

impl ForkError {
    /// Classifies a failed mapping syscall: running out of frames or envs is
    /// an allocation failure, anything else a mapping failure.
    pub fn from_map(err: AbiError) -> Self {
        match err {
            AbiError::NoMemory | AbiError::NoFreeEnv => ForkError::AllocationFailure(err),
            AbiError::InvalidArgument | AbiError::BadEnv => ForkError::MappingFailure(err),
        }
    }

    /// What the kernel should record when this error aborts the env.
    ///
    /// `None` when the env is already gone.
    pub fn fatal(&self) -> Option<Fatal> {
        match self {
            ForkError::InvalidFault { .. } => Some(Fatal::InvalidFault),
            ForkError::AllocationFailure(_) => Some(Fatal::AllocationFailure),
            ForkError::MappingFailure(_) => Some(Fatal::MappingFailure),
            ForkError::InvalidArgument => Some(Fatal::InvalidArgument),
            ForkError::Trap(_) => None,
        }
    }
}
