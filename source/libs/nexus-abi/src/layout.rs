// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User virtual memory layout shared by the kernel and the libos.
//!
//! ```text
//!  UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
//!                      |   user exception stack       |  PGSIZE
//!                      +------------------------------+ 0xeebff000
//!                      |   empty guard page           |  PGSIZE
//!        USTACKTOP  -> +------------------------------+ 0xeebfe000
//!                      |   normal user stack          |  PGSIZE
//!                      +------------------------------+ 0xeebfd000
//!                      ~                              ~
//!       ULIBOS      -> +------------------------------+ 0x00c00000
//!                      |   libos globals page         |
//!        UTEXT      -> +------------------------------+ 0x00800000
//!        PFTEMP     -> |   fault-handler scratch page | 0x007ff000
//!        UTEMP      -> +------------------------------+ 0x00400000
//!                      |   unmapped                   |
//!           0       -> +------------------------------+
//! ```

use static_assertions::const_assert;

/// Bytes mapped by a single page.
pub const PGSIZE: u32 = 4096;
/// log2(PGSIZE).
pub const PGSHIFT: u32 = 12;
/// Entries per page directory.
pub const NPDENTRIES: usize = 1024;
/// Entries per page table.
pub const NPTENTRIES: usize = 1024;
/// Bytes mapped by one page-directory entry.
pub const PTSIZE: u32 = PGSIZE * NPTENTRIES as u32;
/// log2(PTSIZE).
pub const PDXSHIFT: u32 = 22;

/// Top of user-controlled memory; nothing at or above is user-mappable.
pub const UTOP: u32 = 0xeec0_0000;
/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;
/// Top of the normal user stack (one guard page below the exception stack).
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;
/// Where user program images start.
pub const UTEXT: u32 = 2 * PTSIZE;
/// Scratch region for temporary user mappings.
pub const UTEMP: u32 = PTSIZE;
/// Scratch page used by the page-fault handler for the private copy.
pub const PFTEMP: u32 = UTEMP + PTSIZE - PGSIZE;
/// Page holding the libos globals (`thisenv`, installed fault handler).
pub const ULIBOS: u32 = UTEXT + PTSIZE;

const_assert!(UTOP % PTSIZE == 0);
const_assert!(USTACKTOP < UXSTACKTOP - PGSIZE);
const_assert!(PFTEMP + PGSIZE == UTEXT);
const_assert!(ULIBOS < USTACKTOP);
const_assert!(1 << PGSHIFT == PGSIZE);
const_assert!(1 << PDXSHIFT == PTSIZE);

/// Virtual page number containing `va`.
#[inline]
pub const fn pgnum(va: u32) -> u32 {
    va >> PGSHIFT
}

/// Page-directory index of `va`.
#[inline]
pub const fn pdx(va: u32) -> usize {
    ((va >> PDXSHIFT) & 0x3ff) as usize
}

/// Page-table index of `va`.
#[inline]
pub const fn ptx(va: u32) -> usize {
    ((va >> PGSHIFT) & 0x3ff) as usize
}

/// First virtual address of page `vpn`.
#[inline]
pub const fn pgaddr(vpn: u32) -> u32 {
    vpn << PGSHIFT
}

/// Rounds `va` down to its containing page.
#[inline]
pub const fn round_down(va: u32) -> u32 {
    va & !(PGSIZE - 1)
}

/// Rounds `va` up to the next page boundary, saturating at the last page.
#[inline]
pub const fn round_up(va: u32) -> u32 {
    match va.checked_add(PGSIZE - 1) {
        Some(v) => round_down(v),
        None => round_down(u32::MAX),
    }
}

/// Returns `true` when `va` is page aligned and below [`UTOP`].
#[inline]
pub const fn is_user_page(va: u32) -> bool {
    va % PGSIZE == 0 && va < UTOP
}
