// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Libos globals and fault-handler registration.
//!
//! The globals live in an ordinary user page at `ULIBOS`, so fork copies them
//! like any other data: a forked child starts with the parent's `thisenv` and
//! must refresh it.

use nexus_abi::{pdx, pgnum, Context, EnvId, PteFlags, PGSIZE, ULIBOS, UXSTACKTOP};

use crate::error::ForkError;
use crate::pgfault::{pgfault_upcall, PgfaultHandler};

/// Address of the cached env id (u32, little endian).
pub const THISENV_VA: u32 = ULIBOS;
/// Address of the installed handler tag (u32, little endian; 0 = none).
pub const HANDLER_VA: u32 = ULIBOS + 4;

const URW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);

/// Prepares the globals page for the calling env and returns its id.
pub fn libmain(ctx: &mut dyn Context) -> Result<EnvId, ForkError> {
    if !globals_mapped(ctx) {
        ctx.page_alloc(EnvId::SELF, ULIBOS, URW).map_err(ForkError::AllocationFailure)?;
    }
    let id = ctx.getenvid();
    write_u32(ctx, THISENV_VA, id.raw())?;
    write_u32(ctx, HANDLER_VA, 0)?;
    log::debug!(target: "fork", "libmain env={}", id);
    Ok(id)
}

fn globals_mapped(ctx: &dyn Context) -> bool {
    ctx.uvpd(pdx(ULIBOS)).is_present() && ctx.uvpt(pgnum(ULIBOS)).is_present()
}

/// Cached id of the calling env; the live id when the globals page is absent.
pub fn thisenv(ctx: &mut dyn Context) -> Result<EnvId, ForkError> {
    if !globals_mapped(ctx) {
        return Ok(ctx.getenvid());
    }
    read_u32(ctx, THISENV_VA).map(EnvId::from_raw)
}

pub(crate) fn set_thisenv(ctx: &mut dyn Context, id: EnvId) -> Result<(), ForkError> {
    write_u32(ctx, THISENV_VA, id.raw())
}

/// Handler currently installed in the calling env; `None` when the globals
/// page is absent.
pub fn installed_handler(ctx: &mut dyn Context) -> Result<Option<PgfaultHandler>, ForkError> {
    if !globals_mapped(ctx) {
        return Ok(None);
    }
    read_u32(ctx, HANDLER_VA).map(PgfaultHandler::from_tag)
}

/// Installs `handler` for the calling env.
///
/// The first installation also maps the exception stack and registers the
/// upcall trampoline with the kernel. A missing globals page is created on
/// the way, as `libmain` would.
pub fn set_pgfault_handler(
    ctx: &mut dyn Context,
    handler: PgfaultHandler,
) -> Result<(), ForkError> {
    if !globals_mapped(ctx) {
        libmain(ctx)?;
    }
    let installed = installed_handler(ctx)?;
    if installed.is_none() {
        ctx.page_alloc(EnvId::SELF, UXSTACKTOP - PGSIZE, URW)
            .map_err(ForkError::AllocationFailure)?;
        ctx.env_set_pgfault_upcall(EnvId::SELF, pgfault_upcall)
            .map_err(ForkError::MappingFailure)?;
    }
    if installed != Some(handler) {
        write_u32(ctx, HANDLER_VA, handler.tag())?;
    }
    Ok(())
}

fn read_u32(ctx: &mut dyn Context, va: u32) -> Result<u32, ForkError> {
    let mut raw = [0u8; 4];
    ctx.load(va, &mut raw).map_err(ForkError::Trap)?;
    Ok(u32::from_le_bytes(raw))
}

fn write_u32(ctx: &mut dyn Context, va: u32, value: u32) -> Result<(), ForkError> {
    ctx.store(va, &value.to_le_bytes()).map_err(ForkError::Trap)
}
