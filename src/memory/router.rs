//! Memory router
//!
//! Maps a 32-bit CPU address to its backing region and recompilation page.
//! Pure arithmetic: this sits on the hot path of every load and store.

use super::{BIOS_BASE, BIOS_SIZE, RAM_MIRROR_END, RAM_SIZE, SCRATCHPAD_BASE, SCRATCHPAD_SIZE};

/// Log in base 2 of the page size
pub const PAGE_SIZE_SHIFT: u32 = 9;
/// Length of a recompilation page in bytes
pub const PAGE_SIZE: u32 = 1 << PAGE_SIZE_SHIFT;
/// Number of instructions per page
pub const PAGE_INSTRUCTIONS: usize = (PAGE_SIZE / 4) as usize;
/// Total number of pages in RAM
pub const RAM_PAGES: usize = (RAM_SIZE / PAGE_SIZE) as usize;
/// Total number of pages in BIOS ROM
pub const BIOS_PAGES: usize = (BIOS_SIZE / PAGE_SIZE) as usize;
/// Total number of pages for the system
pub const TOTAL_PAGES: usize = RAM_PAGES + BIOS_PAGES;

/// Region mask indexed by the top 3 address bits.
///
/// KUSEG is passed through, KSEG0 drops bit 31, KSEG1 drops bits 29-31,
/// KSEG2 is passed through (cache control lives there).
pub const REGION_MASK: [u32; 8] = [
    // KUSEG: 2048MB
    0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF,
    // KSEG0: 512MB
    0x7FFF_FFFF,
    // KSEG1: 512MB
    0x1FFF_FFFF,
    // KSEG2: 1024MB
    0xFFFF_FFFF, 0xFFFF_FFFF,
];

/// Index of a recompilation page: RAM pages first, then BIOS pages
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct PageIndex(u16);

impl PageIndex {
    #[inline(always)]
    pub fn new(index: usize) -> Option<Self> {
        if index < TOTAL_PAGES {
            Some(PageIndex(index as u16))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub fn is_bios(self) -> bool {
        self.index() >= RAM_PAGES
    }

    /// Canonical KSEG0 address of the first instruction in the page
    pub fn base_addr(self) -> u32 {
        if self.is_bios() {
            0x8000_0000 | (BIOS_BASE + ((self.index() - RAM_PAGES) as u32) * PAGE_SIZE)
        } else {
            0x8000_0000 | (self.index() as u32 * PAGE_SIZE)
        }
    }
}

/// Backing region of an address
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Region {
    Ram,
    Scratchpad,
    Bios,
}

/// A mapped address: region, byte offset inside it, and code page if any
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Resolved {
    pub region: Region,
    /// Byte offset inside the region
    pub offset: u32,
    /// Recompilation page; `None` for the scratchpad (not executable)
    pub page: Option<PageIndex>,
}

impl Resolved {
    /// Instruction slot of this address inside its page
    #[inline(always)]
    pub fn slot(&self) -> usize {
        ((self.offset & (PAGE_SIZE - 1)) >> 2) as usize
    }
}

/// Result of routing an address
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Route {
    Mapped(Resolved),
    /// Not RAM, scratchpad or BIOS. Carries the masked physical address.
    Unmapped(u32),
}

/// Strip the segment bits of `addr`
#[inline(always)]
pub fn mask_region(addr: u32) -> u32 {
    addr & REGION_MASK[(addr >> 29) as usize]
}

/// Route `addr` to RAM, scratchpad or BIOS (checked in that order)
#[inline(always)]
pub fn resolve(addr: u32) -> Route {
    let physical = mask_region(addr);

    if physical < RAM_MIRROR_END {
        let offset = physical & (RAM_SIZE - 1);
        return Route::Mapped(Resolved {
            region: Region::Ram,
            offset,
            page: Some(PageIndex((offset >> PAGE_SIZE_SHIFT) as u16)),
        });
    }

    // The scratchpad sits behind the data cache, so uncached KSEG1 misses it
    let scratch = physical.wrapping_sub(SCRATCHPAD_BASE);
    if scratch < SCRATCHPAD_SIZE && addr >> 29 != 5 {
        return Route::Mapped(Resolved {
            region: Region::Scratchpad,
            offset: scratch,
            page: None,
        });
    }

    let bios = physical.wrapping_sub(BIOS_BASE);
    if bios < BIOS_SIZE {
        return Route::Mapped(Resolved {
            region: Region::Bios,
            offset: bios,
            page: Some(PageIndex((RAM_PAGES as u32 + (bios >> PAGE_SIZE_SHIFT)) as u16)),
        });
    }

    Route::Unmapped(physical)
}
