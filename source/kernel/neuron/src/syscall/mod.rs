// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall request surface of the memory manager
//! OWNERS: @kernel-team
//! PUBLIC API: Request, SYSCALL_* IDs, api::dispatch
//! DEPENDS_ON: mm, task, nexus_abi::{AbiError, Upcall}
//! INVARIANTS: Stable IDs; raw register values enter as u32 and are decoded before any check;
//!             decode/check/execute discipline
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

pub mod api;

use core::fmt;

use nexus_abi::Upcall;

/// Returns the calling env id.
pub const SYSCALL_GETENVID: usize = 2;
/// Destroys an env (self or immediate child).
pub const SYSCALL_ENV_DESTROY: usize = 3;
/// Allocates a zeroed frame and maps it.
pub const SYSCALL_PAGE_ALLOC: usize = 4;
/// Maps an existing frame from one address space into another.
pub const SYSCALL_PAGE_MAP: usize = 5;
/// Removes a mapping.
pub const SYSCALL_PAGE_UNMAP: usize = 6;
/// Creates an inert child env.
pub const SYSCALL_EXOFORK: usize = 7;
/// Sets an env runnable or not runnable.
pub const SYSCALL_ENV_SET_STATUS: usize = 8;
/// Registers the page-fault upcall.
pub const SYSCALL_ENV_SET_PGFAULT_UPCALL: usize = 9;

/// A syscall as issued by user code, with raw register-width arguments.
#[derive(Clone, Copy)]
pub enum Request {
    GetEnvId,
    EnvDestroy { env: u32 },
    PageAlloc { env: u32, va: u32, perm: u32 },
    PageMap { src: u32, srcva: u32, dst: u32, dstva: u32, perm: u32 },
    PageUnmap { env: u32, va: u32 },
    Exofork,
    EnvSetStatus { env: u32, status: u32 },
    EnvSetPgfaultUpcall { env: u32, upcall: Upcall },
}

impl Request {
    /// Stable syscall number of this request.
    pub const fn number(&self) -> usize {
        match self {
            Request::GetEnvId => SYSCALL_GETENVID,
            Request::EnvDestroy { .. } => SYSCALL_ENV_DESTROY,
            Request::PageAlloc { .. } => SYSCALL_PAGE_ALLOC,
            Request::PageMap { .. } => SYSCALL_PAGE_MAP,
            Request::PageUnmap { .. } => SYSCALL_PAGE_UNMAP,
            Request::Exofork => SYSCALL_EXOFORK,
            Request::EnvSetStatus { .. } => SYSCALL_ENV_SET_STATUS,
            Request::EnvSetPgfaultUpcall { .. } => SYSCALL_ENV_SET_PGFAULT_UPCALL,
        }
    }

    /// Short name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Request::GetEnvId => "getenvid",
            Request::EnvDestroy { .. } => "env_destroy",
            Request::PageAlloc { .. } => "page_alloc",
            Request::PageMap { .. } => "page_map",
            Request::PageUnmap { .. } => "page_unmap",
            Request::Exofork => "exofork",
            Request::EnvSetStatus { .. } => "env_set_status",
            Request::EnvSetPgfaultUpcall { .. } => "env_set_pgfault_upcall",
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Request::GetEnvId | Request::Exofork => f.write_str(self.name()),
            Request::EnvDestroy { env } => write!(f, "env_destroy({env:#x})"),
            Request::PageAlloc { env, va, perm } => {
                write!(f, "page_alloc({env:#x}, {va:#010x}, {perm:#x})")
            }
            Request::PageMap { src, srcva, dst, dstva, perm } => write!(
                f,
                "page_map({src:#x}, {srcva:#010x}, {dst:#x}, {dstva:#010x}, {perm:#x})"
            ),
            Request::PageUnmap { env, va } => write!(f, "page_unmap({env:#x}, {va:#010x})"),
            Request::EnvSetStatus { env, status } => {
                write!(f, "env_set_status({env:#x}, {status})")
            }
            Request::EnvSetPgfaultUpcall { env, .. } => {
                write!(f, "env_set_pgfault_upcall({env:#x})")
            }
        }
    }
}

#[cfg(test)]
mod tests;
