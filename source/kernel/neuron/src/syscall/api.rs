// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: dispatch(kernel, request)
//! DEPENDS_ON: Kernel (frames, envs, current), mm::PageTable, task::{Env, EnvTable}
//! INVARIANTS: Decode→Check→Execute pattern; user VAs page aligned and below UTOP;
//!             requested perms ⊇ U|P and ⊆ SYSCALL; W only from a writable source;
//!             target env is the caller or an immediate child
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use nexus_abi::{AbiError, EnvId, EnvStatus, ExitReason, PteFlags, SysResult, Upcall, UTOP};

use super::Request;
use crate::kernel::Kernel;
use crate::mm::PageTable;
use crate::task::{Env, EnvStats, Origin};

#[cfg(feature = "failpoints")]
use crate::mm::failpoints::Failpoint;

// Typed decoders for Decode→Check→Execute

/// Page-aligned user virtual address below `UTOP`.
#[derive(Copy, Clone)]
struct UserPage(u32);

impl UserPage {
    #[inline]
    fn decode(raw: u32) -> Result<Self, AbiError> {
        if raw % nexus_abi::PGSIZE != 0 || raw >= UTOP {
            return Err(AbiError::InvalidArgument);
        }
        Ok(Self(raw))
    }
}

/// Permission bits a user mapping may carry.
#[derive(Copy, Clone)]
struct UserPerm(PteFlags);

impl UserPerm {
    #[inline]
    fn decode(raw: u32) -> Result<Self, AbiError> {
        let perm = PteFlags::from_bits_retain(raw);
        if !PteFlags::SYSCALL.contains(perm) {
            return Err(AbiError::InvalidArgument);
        }
        Ok(Self(perm))
    }

    #[inline]
    fn check(&self) -> Result<(), AbiError> {
        if !self.0.contains(PteFlags::U | PteFlags::P) {
            return Err(AbiError::InvalidArgument);
        }
        Ok(())
    }
}

#[derive(Copy, Clone)]
struct PageAllocArgsTyped {
    env: EnvId,
    va: UserPage,
    perm: UserPerm,
}

impl PageAllocArgsTyped {
    #[inline]
    fn decode(env: u32, va: u32, perm: u32) -> Result<Self, AbiError> {
        Ok(Self {
            env: EnvId::from_raw(env),
            va: UserPage::decode(va)?,
            perm: UserPerm::decode(perm)?,
        })
    }

    #[inline]
    fn check(&self) -> Result<(), AbiError> {
        self.perm.check()
    }
}

#[derive(Copy, Clone)]
struct PageMapArgsTyped {
    src: EnvId,
    srcva: UserPage,
    dst: EnvId,
    dstva: UserPage,
    perm: UserPerm,
}

impl PageMapArgsTyped {
    #[inline]
    fn decode(src: u32, srcva: u32, dst: u32, dstva: u32, perm: u32) -> Result<Self, AbiError> {
        Ok(Self {
            src: EnvId::from_raw(src),
            srcva: UserPage::decode(srcva)?,
            dst: EnvId::from_raw(dst),
            dstva: UserPage::decode(dstva)?,
            perm: UserPerm::decode(perm)?,
        })
    }

    #[inline]
    fn check(&self) -> Result<(), AbiError> {
        self.perm.check()
    }
}

#[derive(Copy, Clone)]
struct PageUnmapArgsTyped {
    env: EnvId,
    va: UserPage,
}

impl PageUnmapArgsTyped {
    #[inline]
    fn decode(env: u32, va: u32) -> Result<Self, AbiError> {
        Ok(Self { env: EnvId::from_raw(env), va: UserPage::decode(va)? })
    }
}

#[derive(Copy, Clone)]
struct EnvSetStatusArgsTyped {
    env: EnvId,
    status: EnvStatus,
}

impl EnvSetStatusArgsTyped {
    #[inline]
    fn decode(env: u32, status: u32) -> Result<Self, AbiError> {
        Ok(Self {
            env: EnvId::from_raw(env),
            status: EnvStatus::from_raw(status).ok_or(AbiError::InvalidArgument)?,
        })
    }

    #[inline]
    fn check(&self) -> Result<(), AbiError> {
        match self.status {
            EnvStatus::Runnable | EnvStatus::NotRunnable => Ok(()),
            EnvStatus::Running => Err(AbiError::InvalidArgument),
        }
    }
}

/// Executes `request` on behalf of the current env and returns the raw result register.
pub fn dispatch(kernel: &mut Kernel, request: Request) -> SysResult<u32> {
    if let Some(env) = kernel.current.and_then(|id| kernel.envs.get_mut(id)) {
        env.stats.syscalls += 1;
    }
    let result = match request {
        Request::GetEnvId => Ok(kernel.current.unwrap_or(EnvId::SELF).raw()),
        Request::EnvDestroy { env } => sys_env_destroy(kernel, EnvId::from_raw(env)),
        Request::PageAlloc { env, va, perm } => {
            let args = PageAllocArgsTyped::decode(env, va, perm)?;
            args.check()?;
            sys_page_alloc(kernel, args)
        }
        Request::PageMap { src, srcva, dst, dstva, perm } => {
            let args = PageMapArgsTyped::decode(src, srcva, dst, dstva, perm)?;
            args.check()?;
            sys_page_map(kernel, args)
        }
        Request::PageUnmap { env, va } => {
            let args = PageUnmapArgsTyped::decode(env, va)?;
            sys_page_unmap(kernel, args)
        }
        Request::Exofork => sys_exofork(kernel),
        Request::EnvSetStatus { env, status } => {
            let args = EnvSetStatusArgsTyped::decode(env, status)?;
            args.check()?;
            sys_env_set_status(kernel, args)
        }
        Request::EnvSetPgfaultUpcall { env, upcall } => {
            sys_env_set_pgfault_upcall(kernel, EnvId::from_raw(env), upcall)
        }
    };
    if let Err(err) = result {
        log_debug!(target: "syscall", "{:?} -> {}", request, err);
    }
    result
}

fn sys_page_alloc(kernel: &mut Kernel, args: PageAllocArgsTyped) -> SysResult<u32> {
    let target = kernel.resolve(args.env, true)?;
    #[cfg(feature = "failpoints")]
    if kernel.failpoints.hit(Failpoint::PageAlloc) {
        log_warn!(target: "mm", "failpoint: page_alloc denied at {:#010x}", args.va.0);
        return Err(AbiError::NoMemory);
    }
    let Kernel { frames, envs, .. } = kernel;
    let env = envs.get_mut(target).ok_or(AbiError::BadEnv)?;
    let frame = frames.alloc().ok_or(AbiError::NoMemory)?;
    if env.space.insert(frames, args.va.0, frame, args.perm.0).is_err() {
        frames.reclaim(frame);
        return Err(AbiError::NoMemory);
    }
    env.stats.pages_allocated += 1;
    log_trace!(target: "mm", "page_alloc env={} va={:#010x} frame={:#x}", target, args.va.0, frame);
    Ok(0)
}

fn sys_page_map(kernel: &mut Kernel, args: PageMapArgsTyped) -> SysResult<u32> {
    let src = kernel.resolve(args.src, true)?;
    let dst = kernel.resolve(args.dst, true)?;
    let pte = kernel.envs.get(src).ok_or(AbiError::BadEnv)?.space.lookup(args.srcva.0);
    if !pte.is_present() {
        return Err(AbiError::InvalidArgument);
    }
    if args.perm.0.contains(PteFlags::W) && !pte.has(PteFlags::W) {
        return Err(AbiError::InvalidArgument);
    }
    #[cfg(feature = "failpoints")]
    if kernel.failpoints.hit(Failpoint::PageMap) {
        log_warn!(target: "mm", "failpoint: page_map denied at {:#010x}", args.dstva.0);
        return Err(AbiError::NoMemory);
    }
    let Kernel { frames, envs, .. } = kernel;
    let env = envs.get_mut(dst).ok_or(AbiError::BadEnv)?;
    env.space
        .insert(frames, args.dstva.0, pte.frame(), args.perm.0)
        .map_err(|_| AbiError::NoMemory)?;
    log_trace!(
        target: "mm",
        "page_map {}:{:#010x} -> {}:{:#010x} frame={:#x} perm={:#x}",
        src,
        args.srcva.0,
        dst,
        args.dstva.0,
        pte.frame(),
        args.perm.0.bits()
    );
    Ok(0)
}

fn sys_page_unmap(kernel: &mut Kernel, args: PageUnmapArgsTyped) -> SysResult<u32> {
    let target = kernel.resolve(args.env, true)?;
    let Kernel { frames, envs, .. } = kernel;
    let env = envs.get_mut(target).ok_or(AbiError::BadEnv)?;
    env.space.remove(frames, args.va.0);
    Ok(0)
}

fn sys_exofork(kernel: &mut Kernel) -> SysResult<u32> {
    let parent = kernel.current.ok_or(AbiError::BadEnv)?;
    let parent_tf = kernel.envs.get(parent).ok_or(AbiError::BadEnv)?.tf;
    #[cfg(feature = "failpoints")]
    if kernel.failpoints.hit(Failpoint::Exofork) {
        log_warn!(target: "env", "failpoint: exofork denied for {}", parent);
        return Err(AbiError::NoFreeEnv);
    }
    let id = kernel.envs.reserve().map_err(|_| AbiError::NoFreeEnv)?;
    let space = PageTable::new(&mut kernel.frames).map_err(|_| AbiError::NoMemory)?;
    let mut tf = parent_tf;
    tf.retval = 0;
    kernel.envs.install(Env {
        id,
        parent,
        status: EnvStatus::NotRunnable,
        origin: Origin::Exoforked,
        launched: false,
        tf,
        space,
        upcall: None,
        fault_depth: 0,
        stats: EnvStats::default(),
    });
    log_debug!(target: "env", "exofork {} -> {}", parent, id);
    Ok(id.raw())
}

fn sys_env_set_status(kernel: &mut Kernel, args: EnvSetStatusArgsTyped) -> SysResult<u32> {
    let target = kernel.resolve(args.env, true)?;
    let env = kernel.envs.get_mut(target).ok_or(AbiError::BadEnv)?;
    env.status = args.status;
    Ok(0)
}

fn sys_env_set_pgfault_upcall(kernel: &mut Kernel, env: EnvId, upcall: Upcall) -> SysResult<u32> {
    let target = kernel.resolve(env, true)?;
    let env = kernel.envs.get_mut(target).ok_or(AbiError::BadEnv)?;
    env.upcall = Some(upcall);
    Ok(0)
}

fn sys_env_destroy(kernel: &mut Kernel, env: EnvId) -> SysResult<u32> {
    let target = kernel.resolve(env, true)?;
    let reason =
        if Some(target) == kernel.current { ExitReason::Exited } else { ExitReason::Killed };
    kernel.destroy(target, reason);
    Ok(0)
}
