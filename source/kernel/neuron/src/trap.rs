// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User memory accesses and page-fault delivery for the NEURON host model
//! OWNERS: @kernel-team
//! PUBLIC API: MAX_FAULT_RETRIES, Kernel::user_access (via Memory::load/store)
//! DEPENDS_ON: mm::PageTable::translate, task::Env (upcall, fault_depth), nexus_abi::UTrapframe
//! INVARIANTS: one record per delivery, pushed below the previous one on the exception stack;
//!             the exception stack must be mapped U|W|P and not COW; the faulting access is
//!             retried after the upcall returns, at most MAX_FAULT_RETRIES times
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use nexus_abi::{EnvId, ExitReason, FaultErr, PteFlags, Trap, UTrapframe, PGSIZE, UXSTACKTOP};
use static_assertions::const_assert;

use crate::kernel::Kernel;

/// Deliveries allowed for a single access before the env is declared stuck.
pub const MAX_FAULT_RETRIES: u32 = 8;

const XSTACK_BOTTOM: u32 = UXSTACKTOP - PGSIZE;
const FRAME_SIZE: u32 = UTrapframe::SIZE as u32;

const_assert!(PGSIZE % (UTrapframe::SIZE as u32) == 0);

/// A user-mode access through the current env's page table.
pub(crate) enum Access<'a> {
    Load(&'a mut [u8]),
    Store(&'a [u8]),
}

impl Access<'_> {
    fn len(&self) -> usize {
        match self {
            Access::Load(buf) => buf.len(),
            Access::Store(bytes) => bytes.len(),
        }
    }

    fn is_store(&self) -> bool {
        matches!(self, Access::Store(_))
    }
}

impl Kernel {
    /// Performs `access` at `va` as the current env, page by page.
    pub(crate) fn user_access(&mut self, va: u32, mut access: Access<'_>) -> Result<(), Trap> {
        let len = access.len();
        let mut done = 0usize;
        while done < len {
            let addr = va.wrapping_add(done as u32);
            let offset = (addr % PGSIZE) as usize;
            let chunk = (len - done).min(PGSIZE as usize - offset);
            let frame = self.resolve_access(addr, access.is_store())?;
            let page = self.frames.page_mut(frame);
            match &mut access {
                Access::Load(buf) => {
                    buf[done..done + chunk].copy_from_slice(&page[offset..offset + chunk])
                }
                Access::Store(bytes) => {
                    page[offset..offset + chunk].copy_from_slice(&bytes[done..done + chunk])
                }
            }
            done += chunk;
        }
        Ok(())
    }

    fn resolve_access(&mut self, va: u32, write: bool) -> Result<u32, Trap> {
        let mut deliveries = 0;
        loop {
            let id = self.current.ok_or(Trap::NoCurrentEnv)?;
            let env = self.envs.get_mut(id).ok_or(Trap::NoCurrentEnv)?;
            let err = match env.space.translate(va, write) {
                Ok(frame) => return Ok(frame),
                Err(err) => err,
            };
            if deliveries == MAX_FAULT_RETRIES {
                return Err(self.kill(id, ExitReason::FaultLoop { va }));
            }
            deliveries += 1;
            self.deliver_fault(id, va, err)?;
        }
    }

    /// Pushes a fault record on `id`'s exception stack and runs its upcall.
    fn deliver_fault(&mut self, id: EnvId, va: u32, err: FaultErr) -> Result<(), Trap> {
        let Some(env) = self.envs.get_mut(id) else {
            return Err(Trap::NoCurrentEnv);
        };
        let Some(upcall) = env.upcall else {
            return Err(self.kill(id, ExitReason::UnhandledFault { va, err }));
        };
        let depth = env.fault_depth;
        let xstack = env.space.lookup(XSTACK_BOTTOM);
        let usable =
            xstack.has(PteFlags::P | PteFlags::U | PteFlags::W) && !xstack.has(PteFlags::COW);
        let slot = UXSTACKTOP.wrapping_sub((depth + 1) * FRAME_SIZE);
        if !usable || depth >= PGSIZE / FRAME_SIZE || slot < XSTACK_BOTTOM {
            return Err(self.kill(id, ExitReason::BadExceptionStack { va }));
        }

        env.fault_depth += 1;
        env.stats.faults += 1;
        env.stats.max_fault_depth = env.stats.max_fault_depth.max(env.fault_depth);
        let utf = UTrapframe { fault_va: va, err };
        let offset = (slot % PGSIZE) as usize;
        self.frames.page_mut(xstack.frame())[offset..offset + UTrapframe::SIZE]
            .copy_from_slice(&utf.to_le_bytes());
        log_trace!(
            target: "trap",
            "fault {} va={:#010x} err={:#x} depth={}",
            id,
            va,
            err.bits(),
            depth + 1
        );

        let result = upcall(self, &utf);

        let Some(env) = self.envs.get_mut(id) else {
            let reason = self.envs.exit_reason(id).unwrap_or(ExitReason::Killed);
            return Err(Trap::Destroyed(reason));
        };
        env.fault_depth -= 1;
        match result {
            Ok(()) => Ok(()),
            Err(fatal) => Err(self.kill(id, ExitReason::Aborted(fatal))),
        }
    }

    fn kill(&mut self, id: EnvId, reason: ExitReason) -> Trap {
        self.destroy(id, reason);
        Trap::Destroyed(reason)
    }
}

#[cfg(test)]
mod tests {
    use nexus_abi::{
        Context, ExitReason, Fatal, Memory, PteFlags, Syscalls, Trap, UTrapframe, PGSIZE, UTEXT,
        UXSTACKTOP,
    };

    use crate::{Kernel, KernelConfig};

    const URW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);

    fn booted() -> Kernel {
        let mut kernel = Kernel::new(KernelConfig::default());
        let env = kernel.env_create().unwrap();
        kernel.run(env).unwrap();
        kernel
    }

    fn map_fresh(ctx: &mut dyn Context, utf: &UTrapframe) -> Result<(), Fatal> {
        let va = nexus_abi::round_down(utf.fault_va);
        ctx.page_alloc(nexus_abi::EnvId::SELF, va, URW).map_err(|_| Fatal::AllocationFailure)
    }

    fn ignore(_: &mut dyn Context, _: &UTrapframe) -> Result<(), Fatal> {
        Ok(())
    }

    fn refuse(_: &mut dyn Context, _: &UTrapframe) -> Result<(), Fatal> {
        Err(Fatal::InvalidFault)
    }

    /// Fixes its own fault only after touching a second unmapped page.
    fn nested(ctx: &mut dyn Context, utf: &UTrapframe) -> Result<(), Fatal> {
        if utf.fault_va == UTEXT {
            ctx.store(UTEXT + PGSIZE, &[7]).map_err(|_| Fatal::InvalidFault)?;
        }
        map_fresh(ctx, utf)
    }

    fn install_xstack(kernel: &mut Kernel) {
        kernel.page_alloc(nexus_abi::EnvId::SELF, UXSTACKTOP - PGSIZE, URW).unwrap();
    }

    #[test]
    fn unhandled_fault_destroys_env() {
        let mut kernel = booted();
        let env = kernel.current().unwrap();
        let err = kernel.store(UTEXT, &[1]).unwrap_err();
        assert!(matches!(err, Trap::Destroyed(ExitReason::UnhandledFault { va: UTEXT, .. })));
        assert!(!kernel.is_alive(env));
        assert_eq!(kernel.current(), None);
        assert_eq!(kernel.load(UTEXT, &mut [0]), Err(Trap::NoCurrentEnv));
    }

    #[test]
    fn missing_exception_stack_is_fatal() {
        let mut kernel = booted();
        kernel.env_set_pgfault_upcall(nexus_abi::EnvId::SELF, map_fresh).unwrap();
        let err = kernel.load(UTEXT, &mut [0]).unwrap_err();
        assert_eq!(err, Trap::Destroyed(ExitReason::BadExceptionStack { va: UTEXT }));
    }

    #[test]
    fn upcall_resolves_and_access_retries() {
        let mut kernel = booted();
        let env = kernel.current().unwrap();
        install_xstack(&mut kernel);
        kernel.env_set_pgfault_upcall(nexus_abi::EnvId::SELF, map_fresh).unwrap();
        kernel.store(UTEXT + 4, &[0xaa, 0xbb]).unwrap();
        let mut buf = [0u8; 2];
        kernel.load(UTEXT + 4, &mut buf).unwrap();
        assert_eq!(buf, [0xaa, 0xbb]);
        let pte = kernel.pte(env, UTEXT).unwrap();
        assert!(pte.has(PteFlags::A | PteFlags::D));
        assert_eq!(kernel.stats(env).unwrap().faults, 1);
    }

    #[test]
    fn record_lands_on_exception_stack() {
        let mut kernel = booted();
        let env = kernel.current().unwrap();
        install_xstack(&mut kernel);
        kernel.env_set_pgfault_upcall(nexus_abi::EnvId::SELF, map_fresh).unwrap();
        kernel.store(UTEXT + 0x10, &[1]).unwrap();
        let xstack = kernel.pte(env, UXSTACKTOP - PGSIZE).unwrap();
        let mut raw = [0u8; UTrapframe::SIZE];
        kernel.read_phys(xstack.phys_addr() + PGSIZE - UTrapframe::SIZE as u32, &mut raw).unwrap();
        let utf = UTrapframe::from_le_bytes(raw);
        assert_eq!(utf.fault_va, UTEXT + 0x10);
        assert!(utf.is_write());
    }

    #[test]
    fn recursive_fault_uses_same_stack() {
        let mut kernel = booted();
        let env = kernel.current().unwrap();
        install_xstack(&mut kernel);
        kernel.env_set_pgfault_upcall(nexus_abi::EnvId::SELF, nested).unwrap();
        kernel.store(UTEXT, &[1]).unwrap();
        let stats = kernel.stats(env).unwrap();
        assert_eq!(stats.faults, 2);
        assert_eq!(stats.max_fault_depth, 2);

        let xstack = kernel.pte(env, UXSTACKTOP - PGSIZE).unwrap();
        let mut raw = [0u8; UTrapframe::SIZE];
        let inner = xstack.phys_addr() + PGSIZE - 2 * UTrapframe::SIZE as u32;
        kernel.read_phys(inner, &mut raw).unwrap();
        assert_eq!(UTrapframe::from_le_bytes(raw).fault_va, UTEXT + PGSIZE);
    }

    #[test]
    fn upcall_error_aborts_env() {
        let mut kernel = booted();
        let env = kernel.current().unwrap();
        install_xstack(&mut kernel);
        kernel.env_set_pgfault_upcall(nexus_abi::EnvId::SELF, refuse).unwrap();
        let err = kernel.store(UTEXT, &[1]).unwrap_err();
        assert_eq!(err, Trap::Destroyed(ExitReason::Aborted(Fatal::InvalidFault)));
        assert_eq!(kernel.exit_reason(env), Some(ExitReason::Aborted(Fatal::InvalidFault)));
    }

    #[test]
    fn upcall_that_fixes_nothing_loops_out() {
        let mut kernel = booted();
        let env = kernel.current().unwrap();
        install_xstack(&mut kernel);
        kernel.env_set_pgfault_upcall(nexus_abi::EnvId::SELF, ignore).unwrap();
        let err = kernel.load(UTEXT, &mut [0]).unwrap_err();
        assert_eq!(err, Trap::Destroyed(ExitReason::FaultLoop { va: UTEXT }));
        assert!(!kernel.is_alive(env));
    }
}
