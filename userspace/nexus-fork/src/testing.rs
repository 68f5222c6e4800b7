// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recording context for unit tests: page-table views backed by a map, every
//! syscall logged in order.

use std::collections::BTreeMap;

use nexus_abi::{
    pdx, pgnum, AbiError, EnvId, EnvStatus, Memory, Pde, Pte, PteFlags, SysResult, Syscalls,
    Trap, Upcall,
};

pub const SELF_ID: EnvId = EnvId::from_raw(0x401);
pub const CHILD_ID: EnvId = EnvId::from_raw(0x402);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    Alloc { env: EnvId, va: u32, perm: PteFlags },
    Map { src: EnvId, srcva: u32, dst: EnvId, dstva: u32, perm: PteFlags },
    Unmap { env: EnvId, va: u32 },
    Exofork,
    SetStatus { env: EnvId, status: EnvStatus },
    SetUpcall { env: EnvId },
    Destroy { env: EnvId },
}

#[derive(Default)]
pub struct RecordingCtx {
    ptes: BTreeMap<u32, PteFlags>,
    pub calls: Vec<Call>,
    pub loads: Vec<(u32, usize)>,
    pub stores: Vec<(u32, usize)>,
    pub fail_alloc: Option<AbiError>,
    /// Index (among page_map calls) of the call that fails, and its error.
    pub fail_map_at: Option<(usize, AbiError)>,
    pub fail_exofork: Option<AbiError>,
    maps: usize,
}

impl RecordingCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pte(&mut self, va: u32, flags: PteFlags) {
        self.ptes.insert(pgnum(va), flags);
    }

    pub fn flags(&self, va: u32) -> Option<PteFlags> {
        self.ptes.get(&pgnum(va)).copied()
    }

    /// Calls other than the user loads/stores, filtered to those naming `env`.
    pub fn calls_for(&self, env: EnvId) -> Vec<Call> {
        self.calls
            .iter()
            .copied()
            .filter(|call| match *call {
                Call::Alloc { env: e, .. }
                | Call::Unmap { env: e, .. }
                | Call::SetStatus { env: e, .. }
                | Call::SetUpcall { env: e }
                | Call::Destroy { env: e } => e == env,
                Call::Map { dst, .. } => dst == env,
                Call::Exofork => false,
            })
            .collect()
    }
}

impl Syscalls for RecordingCtx {
    fn getenvid(&self) -> EnvId {
        SELF_ID
    }

    fn page_alloc(&mut self, env: EnvId, va: u32, perm: PteFlags) -> SysResult<()> {
        self.calls.push(Call::Alloc { env, va, perm });
        if let Some(err) = self.fail_alloc {
            return Err(err);
        }
        if env.is_self() {
            self.set_pte(va, perm);
        }
        Ok(())
    }

    fn page_map(
        &mut self,
        src: EnvId,
        srcva: u32,
        dst: EnvId,
        dstva: u32,
        perm: PteFlags,
    ) -> SysResult<()> {
        self.calls.push(Call::Map { src, srcva, dst, dstva, perm });
        let index = self.maps;
        self.maps += 1;
        if let Some((at, err)) = self.fail_map_at {
            if at == index {
                return Err(err);
            }
        }
        if dst.is_self() {
            self.set_pte(dstva, perm);
        }
        Ok(())
    }

    fn page_unmap(&mut self, env: EnvId, va: u32) -> SysResult<()> {
        self.calls.push(Call::Unmap { env, va });
        if env.is_self() {
            self.ptes.remove(&pgnum(va));
        }
        Ok(())
    }

    fn exofork(&mut self) -> SysResult<EnvId> {
        self.calls.push(Call::Exofork);
        match self.fail_exofork {
            Some(err) => Err(err),
            None => Ok(CHILD_ID),
        }
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult<()> {
        self.calls.push(Call::SetStatus { env, status });
        Ok(())
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, _upcall: Upcall) -> SysResult<()> {
        self.calls.push(Call::SetUpcall { env });
        Ok(())
    }

    fn env_destroy(&mut self, env: EnvId) -> SysResult<()> {
        self.calls.push(Call::Destroy { env });
        Ok(())
    }
}

impl Memory for RecordingCtx {
    fn uvpd(&self, index: usize) -> Pde {
        if self.ptes.keys().any(|vpn| pdx(nexus_abi::pgaddr(*vpn)) == index) {
            Pde::new(1, PteFlags::P | PteFlags::U | PteFlags::W)
        } else {
            Pde::EMPTY
        }
    }

    fn uvpt(&self, vpn: u32) -> Pte {
        match self.ptes.get(&vpn) {
            Some(flags) => Pte::new(vpn, *flags),
            None => Pte::EMPTY,
        }
    }

    fn load(&mut self, va: u32, buf: &mut [u8]) -> Result<(), Trap> {
        self.loads.push((va, buf.len()));
        buf.fill(0);
        Ok(())
    }

    fn store(&mut self, va: u32, bytes: &[u8]) -> Result<(), Trap> {
        self.stores.push((va, bytes.len()));
        Ok(())
    }
}
