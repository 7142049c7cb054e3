//! Page validity tracker
//!
//! One entry per recompilation page. An entry is valid while its translation
//! matches the bytes in memory; any store into the page clears the flag and
//! the next dispatch into it retranslates.

use super::ir::{BlockRef, TranslatedBlock};
use crate::memory::router::{PageIndex, PAGE_SIZE, TOTAL_PAGES};
use crate::memory::{resolve, Region, Route};

#[derive(Default)]
struct PageEntry {
    valid: bool,
    block: Option<TranslatedBlock>,
}

pub struct PageTable {
    entries: Vec<PageEntry>,
    /// Number of pages translated since creation
    pub translations: u64,
    /// Number of valid pages dropped by stores or flushes
    pub invalidations: u64,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(TOTAL_PAGES);
        entries.resize_with(TOTAL_PAGES, PageEntry::default);
        PageTable { entries, translations: 0, invalidations: 0 }
    }

    #[inline(always)]
    pub fn is_valid(&self, page: PageIndex) -> bool {
        self.entries[page.index()].valid
    }

    /// Drop the translation of a RAM page. BIOS pages cannot be written so
    /// they are never invalidated here.
    #[inline(always)]
    pub fn invalidate(&mut self, page: PageIndex) {
        if page.is_bios() {
            return;
        }
        let entry = &mut self.entries[page.index()];
        if entry.valid {
            entry.valid = false;
            self.invalidations += 1;
        }
    }

    /// Invalidate every RAM page in `[addr, addr + len)`
    pub fn invalidate_range(&mut self, addr: u32, len: u32) {
        if len == 0 {
            return;
        }
        let first = addr & !(PAGE_SIZE - 1);
        let last = addr.wrapping_add(len - 1) & !(PAGE_SIZE - 1);
        let mut cur = first;
        loop {
            if let Route::Mapped(r) = resolve(cur) {
                if let (Region::Ram, Some(page)) = (r.region, r.page) {
                    self.invalidate(page);
                }
            }
            if cur == last {
                break;
            }
            cur = cur.wrapping_add(PAGE_SIZE);
        }
    }

    /// Install a fresh translation
    pub fn mark_valid(&mut self, page: PageIndex, block: TranslatedBlock) {
        let entry = &mut self.entries[page.index()];
        entry.valid = true;
        entry.block = Some(block);
        self.translations += 1;
    }

    /// Translation of a valid page
    #[inline(always)]
    pub fn block(&self, page: PageIndex) -> Option<&TranslatedBlock> {
        let entry = &self.entries[page.index()];
        if entry.valid {
            entry.block.as_ref()
        } else {
            None
        }
    }

    /// Drop every translation, BIOS pages included
    pub fn invalidate_all(&mut self) {
        for entry in self.entries.iter_mut() {
            if entry.valid {
                self.invalidations += 1;
            }
            entry.valid = false;
            entry.block = None;
        }
    }

    /// Code ranges of all valid pages, lowest arena offset first
    pub(crate) fn live_blocks(&self) -> Vec<(PageIndex, BlockRef)> {
        let mut live: Vec<(PageIndex, BlockRef)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .filter_map(|(i, e)| Some((PageIndex::new(i)?, e.block.as_ref()?.code)))
            .collect();
        live.sort_by_key(|(_, code)| code.start);
        live
    }

    /// Point a page at its relocated code
    pub(crate) fn relocate(&mut self, page: PageIndex, start: u32) {
        if let Some(block) = self.entries[page.index()].block.as_mut() {
            block.code.start = start;
        }
    }

    /// Stale translations are kept around only until the next compaction
    pub(crate) fn drop_stale(&mut self) {
        for entry in self.entries.iter_mut().filter(|e| !e.valid) {
            entry.block = None;
        }
    }

    pub fn valid_pages(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    /// Mark a page valid with an empty translation
    #[cfg(test)]
    pub(crate) fn force_valid(&mut self, page: PageIndex) {
        self.mark_valid(
            page,
            TranslatedBlock {
                code: BlockRef { start: 0, len: 0 },
                base: page.base_addr(),
                entries: Box::new([0u16; crate::memory::router::PAGE_INSTRUCTIONS]),
            },
        );
    }
}
