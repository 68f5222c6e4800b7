// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel state of the NEURON host model and its user-facing seam
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel (new/env_create/run/schedule + inspection), impl Syscalls + Memory
//! DEPENDS_ON: mm::{FrameTable, PageTable}, task::EnvTable, syscall::api, trap
//! INVARIANTS: exactly one current env (or none); syscalls and user accesses act on it;
//!             destroyed envs release every frame they referenced
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use nexus_abi::{
    pdx, pgaddr, AbiError, EnvId, EnvStatus, ExitReason, Memory, Pde, Pte, PteFlags, SysResult,
    Syscalls, Trap, Upcall, PGSIZE, USTACKTOP,
};

use crate::config::KernelConfig;
use crate::mm::{FrameTable, PageTable};
use crate::syscall::{api, Request};
use crate::task::{Env, EnvStats, EnvTable, Origin, Trapframe};
use crate::trap::Access;

#[cfg(feature = "failpoints")]
use crate::mm::failpoints::Failpoints;

/// The privileged memory manager together with its env table.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) frames: FrameTable,
    pub(crate) envs: EnvTable,
    pub(crate) current: Option<EnvId>,
    #[cfg(feature = "failpoints")]
    pub(crate) failpoints: Failpoints,
}

impl Kernel {
    /// Boots an empty kernel sized by `config`.
    pub fn new(config: KernelConfig) -> Self {
        log_info!(
            target: "mm",
            "neuron: {} frames, {} env slots",
            config.frames,
            config.max_envs
        );
        Self {
            config,
            frames: FrameTable::new(config.frames),
            envs: EnvTable::new(config.max_envs),
            current: None,
            #[cfg(feature = "failpoints")]
            failpoints: Failpoints::default(),
        }
    }

    /// Configuration the kernel was booted with.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Creates a runnable env with one user stack page below `USTACKTOP`.
    pub fn env_create(&mut self) -> SysResult<EnvId> {
        let id = self.envs.reserve().map_err(|_| AbiError::NoFreeEnv)?;
        let mut space = PageTable::new(&mut self.frames).map_err(|_| AbiError::NoMemory)?;
        let stack = match self.frames.alloc() {
            Some(frame) => frame,
            None => {
                space.teardown(&mut self.frames);
                return Err(AbiError::NoMemory);
            }
        };
        let perm = PteFlags::P | PteFlags::W | PteFlags::U;
        if space.insert(&mut self.frames, USTACKTOP - PGSIZE, stack, perm).is_err() {
            self.frames.reclaim(stack);
            space.teardown(&mut self.frames);
            return Err(AbiError::NoMemory);
        }
        self.envs.install(Env {
            id,
            parent: EnvId::SELF,
            status: EnvStatus::Runnable,
            origin: Origin::Created,
            launched: false,
            tf: Trapframe::default(),
            space,
            upcall: None,
            fault_depth: 0,
            stats: EnvStats::default(),
        });
        log_debug!(target: "env", "created {}", id);
        Ok(id)
    }

    /// Resolves a syscall env argument. `EnvId::SELF` names the current env.
    ///
    /// With `checkperm`, the target must be the caller or one of its immediate children.
    pub(crate) fn resolve(&self, id: EnvId, checkperm: bool) -> SysResult<EnvId> {
        let caller = self.current.ok_or(AbiError::BadEnv)?;
        if id.is_self() {
            return Ok(caller);
        }
        let env = self.envs.get(id).ok_or(AbiError::BadEnv)?;
        if checkperm && env.id != caller && env.parent != caller {
            return Err(AbiError::BadEnv);
        }
        Ok(env.id)
    }

    /// Tears down `id`, releasing its frames and recording `reason`.
    pub(crate) fn destroy(&mut self, id: EnvId, reason: ExitReason) {
        let Some(env) = self.envs.remove(id, reason) else {
            return;
        };
        env.space.teardown(&mut self.frames);
        if self.current == Some(id) {
            self.current = None;
        }
        match reason {
            ExitReason::Exited | ExitReason::Killed => {
                log_debug!(target: "env", "{} destroyed: {}", id, reason)
            }
            _ => log_error!(target: "env", "{} destroyed: {}", id, reason),
        }
    }

    /// Env currently owning the CPU.
    pub fn current(&self) -> Option<EnvId> {
        self.current
    }

    /// Scheduling state of a live env.
    pub fn status(&self, id: EnvId) -> Option<EnvStatus> {
        self.envs.get(id).map(Env::status)
    }

    /// Parent of a live env.
    pub fn parent(&self, id: EnvId) -> Option<EnvId> {
        self.envs.get(id).map(Env::parent)
    }

    /// Returns `true` while `id` names a live env.
    pub fn is_alive(&self, id: EnvId) -> bool {
        self.envs.get(id).is_some()
    }

    /// Ids of all live envs in slot order.
    pub fn live_envs(&self) -> impl Iterator<Item = EnvId> + '_ {
        self.envs.iter().map(Env::id)
    }

    /// Why `id` went away, if it did.
    pub fn exit_reason(&self, id: EnvId) -> Option<ExitReason> {
        self.envs.exit_reason(id)
    }

    /// Counters of a live env.
    pub fn stats(&self, id: EnvId) -> Option<EnvStats> {
        self.envs.get(id).map(|env| env.stats)
    }

    /// Whether a fault upcall is registered for `id`.
    pub fn has_upcall(&self, id: EnvId) -> bool {
        self.envs.get(id).is_some_and(|env| env.upcall.is_some())
    }

    /// Privileged PTE lookup in any env; `None` for dead envs.
    pub fn pte(&self, id: EnvId, va: u32) -> Option<Pte> {
        self.envs.get(id).map(|env| env.space.lookup(va))
    }

    /// Privileged mutable PTE of a present mapping.
    pub(crate) fn pte_mut(&mut self, id: EnvId, va: u32) -> Option<&mut Pte> {
        self.envs
            .get_mut(id)?
            .space
            .entry_mut(va)
            .filter(|pte| pte.is_present())
    }

    /// Reads physical memory starting at `pa`, which must stay within one frame.
    pub fn read_phys(&self, pa: u32, buf: &mut [u8]) -> Result<(), AbiError> {
        let frame = pa / PGSIZE;
        let offset = (pa % PGSIZE) as usize;
        if !self.frames.contains(frame) || offset + buf.len() > PGSIZE as usize {
            return Err(AbiError::InvalidArgument);
        }
        buf.copy_from_slice(&self.frames.page(frame)[offset..offset + buf.len()]);
        Ok(())
    }

    /// Number of PTEs (and directory slots) referencing `frame`.
    pub fn frame_refcount(&self, frame: u32) -> u32 {
        self.frames.refcount(frame)
    }

    /// Frames currently in use, including page directories and tables.
    pub fn frames_in_use(&self) -> usize {
        self.frames.in_use()
    }

    /// Present user mappings of a live env.
    pub fn mapped_pages(&self, id: EnvId) -> Option<usize> {
        self.envs.get(id).map(|env| env.space.mapped_pages())
    }

    /// Fault-injection controls.
    #[cfg(feature = "failpoints")]
    pub fn failpoints_mut(&mut self) -> &mut Failpoints {
        &mut self.failpoints
    }

    fn current_space(&self) -> Option<&PageTable> {
        self.current.and_then(|id| self.envs.get(id)).map(|env| &env.space)
    }
}

impl Syscalls for Kernel {
    fn getenvid(&self) -> EnvId {
        self.current.unwrap_or(EnvId::SELF)
    }

    fn page_alloc(&mut self, env: EnvId, va: u32, perm: PteFlags) -> SysResult<()> {
        let request = Request::PageAlloc { env: env.raw(), va, perm: perm.bits() };
        api::dispatch(self, request).map(drop)
    }

    fn page_map(
        &mut self,
        src: EnvId,
        srcva: u32,
        dst: EnvId,
        dstva: u32,
        perm: PteFlags,
    ) -> SysResult<()> {
        let request =
            Request::PageMap { src: src.raw(), srcva, dst: dst.raw(), dstva, perm: perm.bits() };
        api::dispatch(self, request).map(drop)
    }

    fn page_unmap(&mut self, env: EnvId, va: u32) -> SysResult<()> {
        api::dispatch(self, Request::PageUnmap { env: env.raw(), va }).map(drop)
    }

    fn exofork(&mut self) -> SysResult<EnvId> {
        api::dispatch(self, Request::Exofork).map(EnvId::from_raw)
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult<()> {
        let request = Request::EnvSetStatus { env: env.raw(), status: status as u32 };
        api::dispatch(self, request).map(drop)
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: Upcall) -> SysResult<()> {
        api::dispatch(self, Request::EnvSetPgfaultUpcall { env: env.raw(), upcall }).map(drop)
    }

    fn env_destroy(&mut self, env: EnvId) -> SysResult<()> {
        api::dispatch(self, Request::EnvDestroy { env: env.raw() }).map(drop)
    }
}

impl Memory for Kernel {
    fn uvpd(&self, index: usize) -> Pde {
        self.current_space().map_or(Pde::EMPTY, |space| space.pde(index))
    }

    fn uvpt(&self, vpn: u32) -> Pte {
        let va = pgaddr(vpn);
        match self.current_space() {
            Some(space) if space.pde(pdx(va)).is_present() => space.lookup(va),
            _ => Pte::EMPTY,
        }
    }

    fn load(&mut self, va: u32, buf: &mut [u8]) -> Result<(), Trap> {
        self.user_access(va, Access::Load(buf))
    }

    fn store(&mut self, va: u32, bytes: &[u8]) -> Result<(), Trap> {
        self.user_access(va, Access::Store(bytes))
    }
}
