// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Child construction.
//!
//! `fork` runs in the parent and returns once. The child observes the same
//! call returning when the kernel first schedules it (the exoforked return
//! register is 0) and finishes it through [`resume_child`].

use nexus_abi::{
    pdx, pgaddr, pgnum, AbiError, Context, EnvId, EnvStatus, PteFlags, NPTENTRIES, PGSIZE, USTACKTOP,
    UXSTACKTOP,
};

use crate::duppage::{duppage, Sharing};
use crate::error::ForkError;
use crate::pgfault::{pgfault_upcall, PgfaultHandler};
use crate::runtime::{set_pgfault_handler, set_thisenv};

const URW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);

/// Which side of a fork the caller is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkRet {
    /// In the parent, carrying the new child's id.
    Parent(EnvId),
    /// In the child.
    Child,
}

impl ForkRet {
    /// Classic fork return value: the child id in the parent, 0 in the child.
    pub fn discriminator(self) -> u32 {
        match self {
            ForkRet::Parent(child) => child.raw(),
            ForkRet::Child => 0,
        }
    }
}

#[derive(Default)]
struct Copied {
    shared: u32,
    cow: u32,
    read_only: u32,
}

/// Creates a copy-on-write child of the calling env.
///
/// The child is runnable only once its whole address space, exception stack
/// and upcall are in place. Any failure after the child exists destroys the
/// child and then the caller. The caller's recorded exit reason is then
/// `Exited`, so the returned error is the only record of what failed.
pub fn fork(ctx: &mut dyn Context) -> Result<ForkRet, ForkError> {
    set_pgfault_handler(ctx, PgfaultHandler::CopyOnWrite)?;
    let child = ctx.exofork().map_err(ForkError::AllocationFailure)?;
    match build_child(ctx, child) {
        Ok(copied) => {
            log::info!(
                target: "fork",
                "env {} forked {} (cow={} shared={} ro={})",
                ctx.getenvid(),
                child,
                copied.cow,
                copied.shared,
                copied.read_only
            );
            Ok(ForkRet::Parent(child))
        }
        Err(err) => {
            let parent = ctx.getenvid();
            log::error!(target: "fork", "env {}: building {} failed: {}", parent, child, err);
            if let Err(destroy) = ctx.env_destroy(child) {
                log::warn!(target: "fork", "destroying {} failed: {}", child, destroy);
            }
            if let Err(destroy) = ctx.env_destroy(EnvId::SELF) {
                log::warn!(target: "fork", "env {}: self-destroy failed: {}", parent, destroy);
            }
            Err(err)
        }
    }
}

fn build_child(ctx: &mut dyn Context, child: EnvId) -> Result<Copied, ForkError> {
    let mut copied = Copied::default();
    let end = pgnum(USTACKTOP);
    let mut vpn = 0;
    while vpn < end {
        if vpn % NPTENTRIES as u32 == 0 && !ctx.uvpd(pdx(pgaddr(vpn))).is_present() {
            vpn += NPTENTRIES as u32;
            continue;
        }
        if ctx.uvpt(vpn).has(PteFlags::P | PteFlags::U) {
            match duppage(ctx, child, vpn) {
                Ok(Sharing::Shared) => copied.shared += 1,
                Ok(Sharing::CopyOnWrite) => copied.cow += 1,
                Ok(Sharing::ReadOnly) => copied.read_only += 1,
                Err(AbiError::InvalidArgument) => {}
                Err(err) => return Err(ForkError::from_map(err)),
            }
        }
        vpn += 1;
    }

    ctx.page_alloc(child, UXSTACKTOP - PGSIZE, URW).map_err(ForkError::AllocationFailure)?;
    ctx.env_set_pgfault_upcall(child, pgfault_upcall).map_err(ForkError::from_map)?;
    ctx.env_set_status(child, EnvStatus::Runnable).map_err(ForkError::from_map)?;
    Ok(copied)
}

/// Completes `fork` in the child: refreshes `thisenv` and reports the child side.
pub fn resume_child(ctx: &mut dyn Context) -> Result<ForkRet, ForkError> {
    let id = ctx.getenvid();
    set_thisenv(ctx, id)?;
    log::debug!(target: "fork", "child {} resumed", id);
    Ok(ForkRet::Child)
}

/// Shared-memory fork. Not supported.
pub fn sfork(_ctx: &mut dyn Context) -> Result<ForkRet, ForkError> {
    log::warn!(target: "fork", "sfork is not supported");
    Err(ForkError::InvalidArgument)
}
