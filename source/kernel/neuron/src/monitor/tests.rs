// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for the kernel monitor
//! OWNERS: @kernel-team
//! NOTE: Tests only; parse ranges and bit letters, render bit strings, edit PTEs, refuse P

extern crate alloc;

use alloc::string::String;

use nexus_abi::{EnvId, PteFlags, Syscalls, PGSIZE, UTEXT, USTACKTOP};
use proptest::prelude::*;

use super::{run, BitString, Command, MonitorError, PageRange};
use crate::{Kernel, KernelConfig};

fn booted() -> (Kernel, EnvId) {
    let mut kernel = Kernel::new(KernelConfig::default());
    let env = kernel.env_create().unwrap();
    kernel.run(env).unwrap();
    kernel.page_alloc(EnvId::SELF, UTEXT, PteFlags::P | PteFlags::U | PteFlags::W).unwrap();
    (kernel, env)
}

#[test]
fn parses_the_three_range_forms() {
    assert_eq!(
        Command::parse("smps 0x3123"),
        Ok(Command::ShowMappings(PageRange { start: 0x3000, pages: 1 }))
    );
    assert_eq!(
        Command::parse("showmappings 0x3000 0x5001"),
        Ok(Command::ShowMappings(PageRange { start: 0x3000, pages: 3 }))
    );
    assert_eq!(
        Command::parse("smps 0x3000 100"),
        Ok(Command::ShowMappings(PageRange { start: 0x3000, pages: 100 }))
    );
    assert_eq!(
        Command::parse("stp 0x800000 2 ad"),
        Ok(Command::SetPerm(PageRange { start: UTEXT, pages: 2 }, PteFlags::A | PteFlags::D))
    );
}

#[test]
fn rejects_malformed_lines() {
    assert_eq!(Command::parse("   "), Err(MonitorError::Empty));
    assert_eq!(Command::parse("bt"), Err(MonitorError::UnknownCommand("bt".into())));
    assert_eq!(Command::parse("smps 3000"), Err(MonitorError::BadAddress("3000".into())));
    assert_eq!(Command::parse("smps 0x5000 0x3000"), Err(MonitorError::BadRange("0x3000".into())));
    assert_eq!(Command::parse("stp 0x3000 XW"), Err(MonitorError::BadPermission('X')));
    assert!(matches!(Command::parse("clr AD"), Err(MonitorError::Usage(_))));
}

#[test]
fn present_bit_is_refused() {
    assert_eq!(Command::parse("stp 0x800000 P"), Err(MonitorError::PresentBit));
    assert_eq!(Command::parse("clr 0x800000 wp"), Err(MonitorError::PresentBit));
}

#[test]
fn renders_custom_bits() {
    let flags = PteFlags::P | PteFlags::U | PteFlags::COW | PteFlags::A;
    assert_eq!(alloc::format!("{}", BitString(flags)), "O----A--U-P");
    let shared = PteFlags::P | PteFlags::U | PteFlags::W | PteFlags::SHARE;
    assert_eq!(alloc::format!("{}", BitString(shared)), "-S------UWP");
}

#[test]
fn showmappings_lists_mapped_and_unmapped_pages() {
    let (mut kernel, env) = booted();
    let mut out = String::new();
    run(&mut kernel, env, "smps 0x800000 2", &mut out).unwrap();
    let frame = kernel.pte(env, UTEXT).unwrap().phys_addr();
    let mapped = alloc::format!("0x00800000  {frame:#010x}  --------UWP");
    assert!(out.contains(&mapped), "{out}");
    assert!(out.contains("0x00801000  ----------  -----------"), "{out}");
}

#[test]
fn setperm_and_clearperm_edit_present_entries_only() {
    let (mut kernel, env) = booted();
    let mut out = String::new();
    run(&mut kernel, env, "stp 0x800000 0x802000 OD", &mut out).unwrap();
    let pte = kernel.pte(env, UTEXT).unwrap();
    assert!(pte.has(PteFlags::COW | PteFlags::D | PteFlags::P));
    assert!(!kernel.pte(env, UTEXT + PGSIZE).unwrap().is_present());
    assert!(out.starts_with("Permissions changed already!"));

    run(&mut kernel, env, "clr 0x800000 WO", &mut out).unwrap();
    let pte = kernel.pte(env, UTEXT).unwrap();
    assert!(pte.is_present());
    assert!(!pte.has(PteFlags::W));
    assert!(!pte.has(PteFlags::COW));
    assert!(kernel.pte(env, USTACKTOP - PGSIZE).unwrap().has(PteFlags::W));
}

#[test]
fn unknown_env_is_reported() {
    let (mut kernel, _) = booted();
    let ghost = EnvId::from_raw(0x7_ffff);
    let mut out = String::new();
    assert_eq!(run(&mut kernel, ghost, "smps 0x0", &mut out), Err(MonitorError::NoSuchEnv(ghost)));
}

#[test]
fn help_lists_every_command() {
    let (mut kernel, env) = booted();
    let mut out = String::new();
    run(&mut kernel, env, "help", &mut out).unwrap();
    for name in ["help", "kerninfo", "showmappings", "setperm", "clearperm"] {
        assert!(out.contains(name), "{name} missing from help");
    }
    out.clear();
    run(&mut kernel, env, "kerninfo", &mut out).unwrap();
    assert!(out.contains("1 live"), "{out}");
}

proptest! {
    #[test]
    fn bit_letters_round_trip_through_rendering(raw in 0u32..0x1000) {
        let flags = PteFlags::from_bits_truncate(raw) - PteFlags::P;
        let rendered = alloc::format!("{}", BitString(flags));
        let letters: String = rendered.chars().filter(|c| *c != '-').collect();
        prop_assume!(!letters.is_empty());
        let parsed = Command::parse(&alloc::format!("stp 0x1000 {letters}")).unwrap();
        prop_assert_eq!(parsed, Command::SetPerm(PageRange { start: 0x1000, pages: 1 }, flags));
    }
}
