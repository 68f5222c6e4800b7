// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel monitor for inspecting and editing PTE permission bits
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable (debug surface)
//! TEST_COVERAGE: Unit tests below
//! PUBLIC API: Command (parse), PageRange, MonitorError, run(kernel, env, line, out)
//! DEPENDS_ON: Kernel (privileged PTE access), nexus_abi::PteFlags
//! INVARIANTS: closed command set; P can be neither set nor cleared by hand;
//!             edits touch present entries only and are followed by a listing of the range
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::{self, Write};

use nexus_abi::{round_down, round_up, EnvId, PteFlags, PGSIZE};
use thiserror::Error;

use crate::kernel::Kernel;

/// Bit legend, most significant first, as rendered by `showmappings`.
const LEGEND: [(char, PteFlags); 11] = [
    ('O', PteFlags::COW),
    ('S', PteFlags::SHARE),
    ('G', PteFlags::G),
    ('I', PteFlags::PS),
    ('D', PteFlags::D),
    ('A', PteFlags::A),
    ('C', PteFlags::PCD),
    ('T', PteFlags::PWT),
    ('U', PteFlags::U),
    ('W', PteFlags::W),
    ('P', PteFlags::P),
];

const COMMANDS: [(&str, &str); 5] = [
    ("help", "Display this list of commands"),
    ("kerninfo", "Display information about the kernel"),
    ("showmappings", "Display virtual to physical mappings (alias: smps)"),
    ("setperm", "Set permission bits of virtual pages (alias: stp)"),
    ("clearperm", "Clear permission bits of virtual pages (alias: clr)"),
];

/// Errors reported by the monitor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("empty command line")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad address '{0}': expected 0x-prefixed hex")]
    BadAddress(String),
    #[error("bad page count or end address '{0}'")]
    BadRange(String),
    #[error("unknown permission bit '{0}'")]
    BadPermission(char),
    #[error("P is forbidden to set or clear by hand")]
    PresentBit,
    #[error("no such env {0}")]
    NoSuchEnv(EnvId),
    #[error("output error")]
    Output(#[from] fmt::Error),
}

/// Pages `[start, start + pages * PGSIZE)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub pages: u32,
}

impl PageRange {
    fn parse(args: &[&str]) -> Result<Self, MonitorError> {
        let (first, rest) = args.split_first().ok_or(MonitorError::Usage(RANGE_USAGE))?;
        let start = parse_hex(first).ok_or_else(|| MonitorError::BadAddress(first.to_string()))?;
        let start = round_down(start);
        let pages = match rest {
            [] => 1,
            [end] if end.starts_with("0x") => {
                let end_va =
                    parse_hex(end).ok_or_else(|| MonitorError::BadRange(end.to_string()))?;
                let end_va = round_up(end_va);
                if end_va < start {
                    return Err(MonitorError::BadRange(end.to_string()));
                }
                (end_va - start) / PGSIZE
            }
            [count] => {
                count.parse::<u32>().map_err(|_| MonitorError::BadRange(count.to_string()))?
            }
            _ => return Err(MonitorError::Usage(RANGE_USAGE)),
        };
        let last_page = (u32::MAX - start) / PGSIZE + 1;
        if pages > last_page {
            return Err(MonitorError::BadRange(pages.to_string()));
        }
        Ok(Self { start, pages })
    }

    fn iter(self) -> impl Iterator<Item = u32> {
        (0..self.pages).map(move |page| self.start + page * PGSIZE)
    }
}

const RANGE_USAGE: &str = "<cmd> 0xVA [0xEND | N] [BITS]";

fn parse_hex(text: &str) -> Option<u32> {
    u32::from_str_radix(text.strip_prefix("0x")?, 16).ok()
}

fn parse_bits(text: &str) -> Result<PteFlags, MonitorError> {
    let mut bits = PteFlags::empty();
    for ch in text.chars() {
        let upper = ch.to_ascii_uppercase();
        let (_, flag) = LEGEND
            .iter()
            .find(|(letter, _)| *letter == upper)
            .ok_or(MonitorError::BadPermission(ch))?;
        bits |= *flag;
    }
    if bits.contains(PteFlags::P) {
        return Err(MonitorError::PresentBit);
    }
    Ok(bits)
}

/// A parsed monitor command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    KernInfo,
    ShowMappings(PageRange),
    SetPerm(PageRange, PteFlags),
    ClearPerm(PageRange, PteFlags),
}

impl Command {
    /// Parses a whitespace-separated command line.
    pub fn parse(line: &str) -> Result<Self, MonitorError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (name, args) = words.split_first().ok_or(MonitorError::Empty)?;
        match *name {
            "help" => Ok(Command::Help),
            "kerninfo" => Ok(Command::KernInfo),
            "showmappings" | "smps" => Ok(Command::ShowMappings(PageRange::parse(args)?)),
            "setperm" | "stp" | "clearperm" | "clr" => {
                let (bits, range) = args.split_last().ok_or(MonitorError::Usage(RANGE_USAGE))?;
                if range.is_empty() {
                    return Err(MonitorError::Usage(RANGE_USAGE));
                }
                let range = PageRange::parse(range)?;
                let bits = parse_bits(bits)?;
                if matches!(*name, "setperm" | "stp") {
                    Ok(Command::SetPerm(range, bits))
                } else {
                    Ok(Command::ClearPerm(range, bits))
                }
            }
            other => Err(MonitorError::UnknownCommand(other.to_string())),
        }
    }
}

/// Parses and executes `line` against `env`'s page table, writing output to `out`.
pub fn run(
    kernel: &mut Kernel,
    env: EnvId,
    line: &str,
    out: &mut dyn Write,
) -> Result<(), MonitorError> {
    let command = Command::parse(line)?;
    execute(kernel, env, command, out)
}

/// Executes an already parsed command.
pub fn execute(
    kernel: &mut Kernel,
    env: EnvId,
    command: Command,
    out: &mut dyn Write,
) -> Result<(), MonitorError> {
    match command {
        Command::Help => {
            for (name, desc) in COMMANDS {
                writeln!(out, "{name} - {desc}")?;
            }
            Ok(())
        }
        Command::KernInfo => {
            let config = kernel.config();
            writeln!(out, "Kernel resources:")?;
            let (frames, max_envs) = (config.frames, config.max_envs);
            writeln!(out, "  frames  {} total, {} in use", frames, kernel.frames_in_use())?;
            writeln!(out, "  envs    {} slots, {} live", max_envs, kernel.live_envs().count())?;
            Ok(())
        }
        Command::ShowMappings(range) => show_mappings(kernel, env, range, out),
        Command::SetPerm(range, bits) => edit(kernel, env, range, out, |flags| flags | bits),
        Command::ClearPerm(range, bits) => edit(kernel, env, range, out, |flags| flags - bits),
    }
}

fn show_mappings(
    kernel: &Kernel,
    env: EnvId,
    range: PageRange,
    out: &mut dyn Write,
) -> Result<(), MonitorError> {
    if !kernel.is_alive(env) {
        return Err(MonitorError::NoSuchEnv(env));
    }
    writeln!(out, "O: copy-on-write  S: shared       G: global")?;
    writeln!(out, "I: attr index     D: dirty        A: accessed")?;
    writeln!(out, "C: cache disable  T: write through")?;
    writeln!(out, "U: user           W: writeable    P: present")?;
    writeln!(out, "-----------------------------------")?;
    writeln!(out, "virtual_ad  physica_ad  OSGIDACTUWP")?;
    for va in range.iter() {
        match kernel.pte(env, va).filter(|pte| pte.is_present()) {
            Some(pte) => {
                let bits = BitString(pte.flags());
                writeln!(out, "{va:#010x}  {:#010x}  {bits}", pte.phys_addr())?
            }
            None => writeln!(out, "{va:#010x}  ----------  -----------")?,
        }
    }
    Ok(())
}

fn edit(
    kernel: &mut Kernel,
    env: EnvId,
    range: PageRange,
    out: &mut dyn Write,
    change: impl Fn(PteFlags) -> PteFlags,
) -> Result<(), MonitorError> {
    if !kernel.is_alive(env) {
        return Err(MonitorError::NoSuchEnv(env));
    }
    let mut edited = 0u32;
    for va in range.iter() {
        if let Some(pte) = kernel.pte_mut(env, va) {
            *pte = pte.with_flags(change(pte.flags()) | PteFlags::P);
            edited += 1;
        }
    }
    log_info!(target: "monitor", "edited {} PTEs of {} from {:#010x}", edited, env, range.start);
    writeln!(out, "Permissions changed already!")?;
    show_mappings(kernel, env, range, out)
}

/// Renders flags as `OSGIDACTUWP`, `-` for clear bits.
pub struct BitString(pub PteFlags);

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, flag) in LEGEND {
            f.write_char(if self.0.contains(flag) { letter } else { '-' })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
