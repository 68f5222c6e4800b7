// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Copy-on-write fault resolution.

use nexus_abi::{
    pdx, pgnum, round_down, Context, EnvId, Fatal, Pte, PteFlags, UTrapframe, PFTEMP, PGSIZE,
};

use crate::error::ForkError;
use crate::runtime;

const URW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);

/// Fault handlers the upcall trampoline can dispatch to.
///
/// The discriminant is the tag stored in the libos globals page.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PgfaultHandler {
    /// Resolve stores to copy-on-write pages by copying.
    CopyOnWrite = 1,
}

impl PgfaultHandler {
    /// Tag stored in the globals page.
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Decodes a stored tag; 0 and unknown tags mean "no handler".
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::CopyOnWrite),
            _ => None,
        }
    }
}

/// Entry registered with the kernel; runs on the exception stack.
pub fn pgfault_upcall(ctx: &mut dyn Context, utf: &UTrapframe) -> Result<(), Fatal> {
    let handler = match runtime::installed_handler(ctx) {
        Ok(Some(handler)) => handler,
        Ok(None) => {
            log::error!(target: "pgfault", "fault at {:#010x} with no handler", utf.fault_va);
            return Err(Fatal::InvalidFault);
        }
        Err(err) => return Err(err.fatal().unwrap_or(Fatal::InvalidFault)),
    };
    let result = match handler {
        PgfaultHandler::CopyOnWrite => pgfault(ctx, utf),
    };
    result.map_err(|err| {
        log::error!(target: "pgfault", "env {}: {}", ctx.getenvid(), err);
        err.fatal().unwrap_or(Fatal::InvalidFault)
    })
}

/// Resolves a store to a copy-on-write page by giving the caller a private copy.
///
/// Exactly one frame is allocated; the shared frame loses one reference.
pub fn pgfault(ctx: &mut dyn Context, utf: &UTrapframe) -> Result<(), ForkError> {
    let va = utf.fault_va;
    let pte = if ctx.uvpd(pdx(va)).is_present() { ctx.uvpt(pgnum(va)) } else { Pte::EMPTY };
    if !utf.is_write() || !pte.has(PteFlags::P | PteFlags::U | PteFlags::COW) {
        return Err(ForkError::InvalidFault { va, err: utf.err });
    }

    let page = round_down(va);
    ctx.page_alloc(EnvId::SELF, PFTEMP, URW).map_err(ForkError::AllocationFailure)?;
    let mut copy = [0u8; PGSIZE as usize];
    ctx.load(page, &mut copy).map_err(ForkError::Trap)?;
    ctx.store(PFTEMP, &copy).map_err(ForkError::Trap)?;
    ctx.page_map(EnvId::SELF, PFTEMP, EnvId::SELF, page, URW)
        .map_err(ForkError::from_map)?;
    ctx.page_unmap(EnvId::SELF, PFTEMP).map_err(ForkError::from_map)?;
    log::trace!(target: "pgfault", "copied {:#010x}", page);
    Ok(())
}
