// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-page duplication into a child env.

use nexus_abi::{pgaddr, AbiError, Context, EnvId, PteFlags};

const COW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::COW);

/// How a page ended up in the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    /// Same frame, same bits; writes stay visible to both envs.
    Shared,
    /// Same frame, read-only and marked COW in both envs.
    CopyOnWrite,
    /// Same frame, read-only in both envs.
    ReadOnly,
}

/// Maps page `vpn` of the calling env into `child`.
///
/// Writable and COW pages are mapped COW into the child before the caller's
/// own entry is re-marked COW.
pub fn duppage(ctx: &mut dyn Context, child: EnvId, vpn: u32) -> Result<Sharing, AbiError> {
    let pte = ctx.uvpt(vpn);
    if !pte.is_present() {
        return Err(AbiError::InvalidArgument);
    }
    let va = pgaddr(vpn);
    let flags = pte.flags();
    if flags.contains(PteFlags::SHARE) {
        ctx.page_map(EnvId::SELF, va, child, va, flags & PteFlags::SYSCALL)?;
        Ok(Sharing::Shared)
    } else if flags.intersects(PteFlags::W | PteFlags::COW) {
        ctx.page_map(EnvId::SELF, va, child, va, COW)?;
        ctx.page_map(EnvId::SELF, va, EnvId::SELF, va, COW)?;
        Ok(Sharing::CopyOnWrite)
    } else {
        ctx.page_map(EnvId::SELF, va, child, va, flags & PteFlags::SYSCALL)?;
        Ok(Sharing::ReadOnly)
    }
}
