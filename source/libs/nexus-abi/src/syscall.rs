// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall seam between userland and the privileged memory manager.
//!
//! Userland code is written against [`Context`]: the privileged calls in
//! [`Syscalls`] plus the MMU view in [`Memory`]. The kernel implements both for
//! whichever env currently owns the CPU.

use core::fmt;

use crate::env::{EnvId, EnvStatus};
use crate::fault::{Fatal, Trap, UTrapframe};
use crate::pte::{Pde, Pte, PteFlags};

/// Result returned by privileged syscalls.
pub type SysResult<T> = core::result::Result<T, AbiError>;

/// Errors surfaced by the memory manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiError {
    /// Misaligned or out-of-range address, bad permission bits, or unmapped source.
    InvalidArgument,
    /// Env does not exist or the caller may not act on it.
    BadEnv,
    /// No free frame (or page table) is available.
    NoMemory,
    /// Env table is full.
    NoFreeEnv,
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidArgument => "invalid argument",
            Self::BadEnv => "bad env",
            Self::NoMemory => "out of memory",
            Self::NoFreeEnv => "out of envs",
        };
        f.write_str(msg)
    }
}

/// Entry the kernel invokes on the exception stack when the env faults.
pub type Upcall = fn(&mut dyn Context, &UTrapframe) -> Result<(), Fatal>;

/// Privileged memory-manager operations, executed on behalf of the caller.
///
/// `EnvId::SELF` names the caller. Other ids must name the caller or one of
/// its immediate children.
pub trait Syscalls {
    /// Id of the calling env, or `EnvId::SELF` when no env is running.
    fn getenvid(&self) -> EnvId;

    /// Maps a fresh zeroed frame at `va` in `env`, replacing any mapping.
    fn page_alloc(&mut self, env: EnvId, va: u32, perm: PteFlags) -> SysResult<()>;

    /// Maps the frame behind `srcva` in `src` at `dstva` in `dst` with `perm`.
    fn page_map(
        &mut self,
        src: EnvId,
        srcva: u32,
        dst: EnvId,
        dstva: u32,
        perm: PteFlags,
    ) -> SysResult<()>;

    /// Removes the mapping at `va` in `env`; absent mappings are not an error.
    fn page_unmap(&mut self, env: EnvId, va: u32) -> SysResult<()>;

    /// Creates an inert child whose saved return register is 0.
    fn exofork(&mut self) -> SysResult<EnvId>;

    /// Marks `env` runnable or not runnable.
    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult<()>;

    /// Registers the entry invoked on page faults in `env`.
    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: Upcall) -> SysResult<()>;

    /// Destroys `env`, releasing every frame it maps.
    fn env_destroy(&mut self, env: EnvId) -> SysResult<()>;
}

/// The caller's view of its own address space.
pub trait Memory {
    /// Read-only page-directory view.
    fn uvpd(&self, pdx: usize) -> Pde;

    /// Read-only page-table view; `Pte::EMPTY` when no table covers `vpn`.
    fn uvpt(&self, vpn: u32) -> Pte;

    /// User-mode load; faults are delivered to the registered upcall.
    fn load(&mut self, va: u32, buf: &mut [u8]) -> Result<(), Trap>;

    /// User-mode store; faults are delivered to the registered upcall.
    fn store(&mut self, va: u32, bytes: &[u8]) -> Result<(), Trap>;
}

/// Everything userland code can reach from inside an env.
pub trait Context: Syscalls + Memory {}

impl<T: Syscalls + Memory + ?Sized> Context for T {}
