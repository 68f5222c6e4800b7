// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall decode/check/execute tests
//! OWNERS: @kernel-team
//! NOTE: Tests only; argument validation, env permission checks, refcounts, failpoints
//!
//! TEST_SCENARIOS:
//!   - perms outside SYSCALL or without U|P are rejected, valid ones accepted
//!   - only self and immediate children can be targeted
//!   - page_map cannot upgrade a read-only source to writable
//!   - exofork exhausts the env table deterministically

use nexus_abi::{AbiError, EnvId, EnvStatus, PteFlags, Syscalls, PGSIZE, UTEXT, UTOP};
use proptest::prelude::*;

use super::{Request, SYSCALL_EXOFORK, SYSCALL_PAGE_MAP};
use crate::{Kernel, KernelConfig};

const URW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);
const UR: PteFlags = PteFlags::P.union(PteFlags::U);

fn booted(config: KernelConfig) -> (Kernel, EnvId) {
    let mut kernel = Kernel::new(config);
    let env = kernel.env_create().unwrap();
    kernel.run(env).unwrap();
    (kernel, env)
}

#[test]
fn numbers_are_stable() {
    assert_eq!(Request::Exofork.number(), SYSCALL_EXOFORK);
    let map = Request::PageMap { src: 0, srcva: 0, dst: 0, dstva: 0, perm: 0 };
    assert_eq!(map.number(), SYSCALL_PAGE_MAP);
    assert_eq!(map.name(), "page_map");
}

#[test]
fn addresses_must_be_aligned_user_pages() {
    let (mut kernel, _) = booted(KernelConfig::default());
    assert_eq!(kernel.page_alloc(EnvId::SELF, UTEXT + 1, URW), Err(AbiError::InvalidArgument));
    assert_eq!(kernel.page_alloc(EnvId::SELF, UTOP, URW), Err(AbiError::InvalidArgument));
    assert_eq!(kernel.page_unmap(EnvId::SELF, UTOP + PGSIZE), Err(AbiError::InvalidArgument));
    assert_eq!(kernel.page_unmap(EnvId::SELF, UTEXT), Ok(()), "absent page unmaps cleanly");
}

#[test]
fn page_map_requires_mapped_source_and_no_write_upgrade() {
    let (mut kernel, env) = booted(KernelConfig::default());
    assert_eq!(
        kernel.page_map(EnvId::SELF, UTEXT, EnvId::SELF, UTEXT + PGSIZE, UR),
        Err(AbiError::InvalidArgument)
    );
    kernel.page_alloc(EnvId::SELF, UTEXT, UR).unwrap();
    assert_eq!(
        kernel.page_map(EnvId::SELF, UTEXT, EnvId::SELF, UTEXT + PGSIZE, URW),
        Err(AbiError::InvalidArgument)
    );
    kernel.page_map(EnvId::SELF, UTEXT, EnvId::SELF, UTEXT + PGSIZE, UR).unwrap();
    let frame = kernel.pte(env, UTEXT).unwrap().frame();
    assert_eq!(kernel.pte(env, UTEXT + PGSIZE).unwrap().frame(), frame);
    assert_eq!(kernel.frame_refcount(frame), 2);
    kernel.page_unmap(EnvId::SELF, UTEXT).unwrap();
    assert_eq!(kernel.frame_refcount(frame), 1);
}

#[test]
fn only_self_and_children_are_reachable() {
    let (mut kernel, parent) = booted(KernelConfig::default());
    let child = kernel.exofork().unwrap();
    let sibling = kernel.env_create().unwrap();
    assert_eq!(kernel.parent(child), Some(parent));
    assert_eq!(kernel.page_alloc(child, UTEXT, URW), Ok(()));
    assert_eq!(kernel.page_alloc(sibling, UTEXT, URW), Err(AbiError::BadEnv));

    kernel.env_set_status(child, EnvStatus::Runnable).unwrap();
    kernel.run(child).unwrap();
    let grandchild = kernel.exofork().unwrap();
    kernel.run(parent).unwrap();
    assert_eq!(kernel.env_destroy(grandchild), Err(AbiError::BadEnv));
    assert_eq!(kernel.env_destroy(child), Ok(()));
    assert_eq!(kernel.exit_reason(child), Some(nexus_abi::ExitReason::Killed));
    assert_eq!(kernel.page_alloc(child, UTEXT, URW), Err(AbiError::BadEnv), "stale id");
}

#[test]
fn status_must_be_runnable_or_not_runnable() {
    let (mut kernel, _) = booted(KernelConfig::default());
    let child = kernel.exofork().unwrap();
    assert_eq!(kernel.env_set_status(child, EnvStatus::Running), Err(AbiError::InvalidArgument));
    assert_eq!(kernel.env_set_status(child, EnvStatus::Runnable), Ok(()));
    assert_eq!(kernel.status(child), Some(EnvStatus::Runnable));
}

#[test]
fn exofork_reports_full_table() {
    let (mut kernel, _) = booted(KernelConfig::default().with_max_envs(2));
    kernel.exofork().unwrap();
    assert_eq!(kernel.exofork(), Err(AbiError::NoFreeEnv));
}

#[test]
fn frame_exhaustion_is_no_memory() {
    // reserved + directory + table + stack, then one spare frame
    let (mut kernel, _) = booted(KernelConfig::default().with_frames(5));
    kernel.page_alloc(EnvId::SELF, nexus_abi::USTACKTOP - 2 * PGSIZE, URW).unwrap();
    assert_eq!(
        kernel.page_alloc(EnvId::SELF, nexus_abi::USTACKTOP - 3 * PGSIZE, URW),
        Err(AbiError::NoMemory)
    );
}

#[test]
fn calls_without_a_current_env_fail() {
    let mut kernel = Kernel::new(KernelConfig::default());
    assert_eq!(kernel.getenvid(), EnvId::SELF);
    assert_eq!(kernel.exofork(), Err(AbiError::BadEnv));
    assert_eq!(kernel.page_alloc(EnvId::SELF, UTEXT, URW), Err(AbiError::BadEnv));
}

#[cfg(feature = "failpoints")]
#[test]
fn failpoints_fire_once_after_skip() {
    use crate::mm::failpoints::Failpoint;

    let (mut kernel, _) = booted(KernelConfig::default());
    kernel.failpoints_mut().arm(Failpoint::PageAlloc, 1);
    assert_eq!(kernel.page_alloc(EnvId::SELF, UTEXT, URW), Ok(()));
    assert_eq!(kernel.page_alloc(EnvId::SELF, UTEXT + PGSIZE, URW), Err(AbiError::NoMemory));
    assert_eq!(kernel.page_alloc(EnvId::SELF, UTEXT + PGSIZE, URW), Ok(()));

    kernel.failpoints_mut().arm(Failpoint::Exofork, 0);
    assert_eq!(kernel.exofork(), Err(AbiError::NoFreeEnv));
    kernel.failpoints_mut().arm(Failpoint::PageMap, 0);
    kernel.failpoints_mut().clear();
    assert_eq!(kernel.page_map(EnvId::SELF, UTEXT, EnvId::SELF, UTEXT + PGSIZE, UR), Ok(()));
}

proptest! {
    #[test]
    fn perm_validation_matches_syscall_mask(raw in 0u32..0x1000) {
        let (mut kernel, _) = booted(KernelConfig::default());
        let perm = PteFlags::from_bits_retain(raw);
        let valid = PteFlags::SYSCALL.contains(perm) && perm.contains(UR);
        let result = kernel.page_alloc(EnvId::SELF, UTEXT, perm);
        prop_assert_eq!(result.is_ok(), valid);
        if !valid {
            prop_assert_eq!(result, Err(AbiError::InvalidArgument));
        }
    }
}
