//! Code cache
//!
//! Translated ops for every page live in one arena. Allocation is a bump of
//! the arena end; when the arena is full the live blocks are slid down over
//! the stale ones and the page table is updated with their new offsets.

use super::ir::{BlockRef, Op};
use super::page_table::PageTable;
use crate::memory::router::TOTAL_PAGES;
use crate::DynarecError;

/// Ops per page if every page were translated at once with branch-heavy code
pub const DEFAULT_OPS_PER_PAGE: usize = 256;
/// Default arena capacity in ops
pub const DEFAULT_CODE_CACHE_OPS: usize = DEFAULT_OPS_PER_PAGE * TOTAL_PAGES;

pub struct CodeCache {
    ops: Vec<Op>,
    capacity: usize,
    /// Number of compactions run
    pub compactions: u64,
}

impl CodeCache {
    pub fn new(capacity: usize) -> Self {
        CodeCache { ops: Vec::new(), capacity, compactions: 0 }
    }

    /// Ops of an installed block
    #[inline(always)]
    pub fn code(&self, block: BlockRef) -> &[Op] {
        &self.ops[block.range()]
    }

    pub fn used(&self) -> usize {
        self.ops.len()
    }

    /// Copy `ops` into the arena, compacting first if they do not fit
    pub fn alloc(&mut self, ops: &[Op], pages: &mut PageTable) -> Result<BlockRef, DynarecError> {
        if self.ops.len() + ops.len() > self.capacity {
            self.compact(pages);
            if self.ops.len() + ops.len() > self.capacity {
                return Err(DynarecError::CodeCacheExhausted {
                    requested: ops.len(),
                    live: self.ops.len(),
                    capacity: self.capacity,
                });
            }
        }

        let start = self.ops.len() as u32;
        self.ops.extend_from_slice(ops);
        Ok(BlockRef { start, len: ops.len() as u32 })
    }

    /// Slide live blocks to the front of the arena
    pub fn compact(&mut self, pages: &mut PageTable) {
        let mut write = 0usize;
        for (page, code) in pages.live_blocks() {
            let len = code.len as usize;
            if code.start as usize != write {
                // Live blocks are sorted by offset so the source is always above `write`
                self.ops.copy_within(code.range(), write);
                pages.relocate(page, write as u32);
            }
            write += len;
        }

        crate::dynarec_debug!("compacted code cache: {} -> {} ops", self.ops.len(), write);
        self.ops.truncate(write);
        pages.drop_stale();
        self.compactions += 1;
    }

    /// Forget every block. The page table must be flushed along with it.
    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynarec::ir::TranslatedBlock;
    use crate::memory::router::{PageIndex, PAGE_INSTRUCTIONS};

    fn install(cache: &mut CodeCache, pages: &mut PageTable, page: usize, ops: &[Op]) -> PageIndex {
        let page = PageIndex::new(page).unwrap();
        let code = cache.alloc(ops, pages).unwrap();
        pages.mark_valid(
            page,
            TranslatedBlock { code, base: page.base_addr(), entries: Box::new([0u16; PAGE_INSTRUCTIONS]) },
        );
        page
    }

    #[test]
    fn test_bump_allocation() {
        let mut cache = CodeCache::new(16);
        let mut pages = PageTable::new();
        let a = cache.alloc(&[Op::Nop; 4], &mut pages).unwrap();
        let b = cache.alloc(&[Op::Rfe; 2], &mut pages).unwrap();
        assert_eq!(a, BlockRef { start: 0, len: 4 });
        assert_eq!(b, BlockRef { start: 4, len: 2 });
        assert_eq!(cache.code(b), &[Op::Rfe, Op::Rfe]);
        assert_eq!(cache.used(), 6);
    }

    #[test]
    fn test_compaction_keeps_live_blocks() {
        let mut cache = CodeCache::new(10);
        let mut pages = PageTable::new();
        let stale = install(&mut cache, &mut pages, 0, &[Op::Nop; 4]);
        let live = install(&mut cache, &mut pages, 1, &[Op::Rfe, Op::EndBranch, Op::Rfe, Op::Nop]);
        pages.invalidate(stale);

        // 8 used, 4 more do not fit until page 0 is reclaimed
        let code = cache.alloc(&[Op::Nop; 4], &mut pages).unwrap();
        assert_eq!(cache.compactions, 1);
        assert_eq!(code.start, 4);

        let moved = pages.block(live).unwrap().code;
        assert_eq!(moved.start, 0);
        assert_eq!(cache.code(moved), &[Op::Rfe, Op::EndBranch, Op::Rfe, Op::Nop]);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut cache = CodeCache::new(6);
        let mut pages = PageTable::new();
        install(&mut cache, &mut pages, 0, &[Op::Nop; 4]);
        let err = cache.alloc(&[Op::Nop; 4], &mut pages).unwrap_err();
        assert!(matches!(err, DynarecError::CodeCacheExhausted { .. }));
    }
}
