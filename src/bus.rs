//! Device seam
//!
//! Stores that do not land in RAM or the scratchpad (hardware registers, DMA
//! triggers, GPU ports, writes aimed at the BIOS) are never handled inline:
//! they go to a `StoreHandler` supplied by the embedder. The handler runs
//! synchronously and returns the new cycle counter, so device latency shows
//! up in scheduling.

use crate::cpu::CpuState;
use crate::dynarec::page_table::PageTable;
use crate::memory::router::PAGE_SIZE;
use crate::memory::{resolve, Memory, Region, Resolved, Route, Width, OPEN_BUS};

/// External device model
pub trait StoreHandler {
    /// Store that missed RAM and scratchpad. `value` is already masked to
    /// `width`, `addr` is the address the CPU issued. Returns the counter.
    fn store(&mut self, bus: &mut GuestBus<'_>, value: u32, addr: u32, width: Width, counter: i32) -> i32;

    /// Load from an unmapped address. Returns `(value, counter)`.
    fn load(&mut self, _bus: &mut GuestBus<'_>, _addr: u32, width: Width, counter: i32) -> (u32, i32) {
        (width.mask(OPEN_BUS), counter)
    }
}

/// Closures taking `(bus, value, addr, counter)` are store handlers
impl<F> StoreHandler for F
where
    F: FnMut(&mut GuestBus<'_>, u32, u32, i32) -> i32,
{
    fn store(&mut self, bus: &mut GuestBus<'_>, value: u32, addr: u32, _width: Width, counter: i32) -> i32 {
        self(bus, value, addr, counter)
    }
}

/// Pin a closure to the store handler signature.
///
/// Signature inference only sees `Fn*` bounds, so closures passed through
/// this helper get the higher-ranked `GuestBus` lifetime they need.
pub fn handler_fn<F>(f: F) -> F
where
    F: FnMut(&mut GuestBus<'_>, u32, u32, i32) -> i32,
{
    f
}

/// Handler that drops every store and costs nothing
#[derive(Default, Debug, Clone, Copy)]
pub struct IgnoreStores;

impl StoreHandler for IgnoreStores {
    fn store(&mut self, _bus: &mut GuestBus<'_>, _value: u32, _addr: u32, _width: Width, counter: i32) -> i32 {
        counter
    }
}

/// Guest memory access for devices and loaders.
///
/// Every write invalidates the pages it touches before returning, so a DMA
/// transfer into code is seen by the very next translation.
pub struct GuestBus<'a> {
    pub(crate) memory: &'a mut Memory,
    pub(crate) pages: &'a mut PageTable,
}

impl<'a> GuestBus<'a> {
    pub(crate) fn new(memory: &'a mut Memory, pages: &'a mut PageTable) -> Self {
        GuestBus { memory, pages }
    }

    /// Read RAM, scratchpad or BIOS. Anything else reads as open bus.
    pub fn read(&self, addr: u32, width: Width) -> u32 {
        match resolve(addr) {
            Route::Mapped(r) => self.memory.read(r.region, r.offset, width),
            Route::Unmapped(_) => width.mask(OPEN_BUS),
        }
    }

    /// Write RAM or scratchpad. Returns false (and writes nothing) elsewhere.
    pub fn write(&mut self, addr: u32, value: u32, width: Width) -> bool {
        match resolve(addr) {
            Route::Mapped(r) if r.region != Region::Bios => {
                write_invalidate(self.memory, self.pages, &r, value, width);
                true
            }
            _ => false,
        }
    }

    /// Copy `data` into RAM/scratchpad starting at `addr`.
    ///
    /// Returns the number of bytes that landed in writable memory; copying
    /// stops at the first byte that does not.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> usize {
        let mut done = 0usize;
        while done < data.len() {
            let cur = addr.wrapping_add(done as u32);
            let r = match resolve(cur) {
                Route::Mapped(r) if r.region != Region::Bios => r,
                _ => break,
            };

            let region_len = match r.region {
                Region::Ram => self.memory.ram().len(),
                _ => self.memory.scratchpad().len(),
            } as u32;
            let to_page_end = PAGE_SIZE - (r.offset & (PAGE_SIZE - 1));
            let chunk = (data.len() - done)
                .min(to_page_end as usize)
                .min((region_len - r.offset) as usize);

            let dst = match r.region {
                Region::Ram => self.memory.ram_mut(),
                _ => self.memory.scratchpad_mut(),
            };
            let o = r.offset as usize;
            dst[o..o + chunk].copy_from_slice(&data[done..done + chunk]);
            if let Some(page) = r.page {
                self.pages.invalidate(page);
            }
            done += chunk;
        }
        done
    }

    /// Copy `len` bytes out of guest memory (open bus where unmapped)
    pub fn read_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.read(addr.wrapping_add(i as u32), Width::Byte) as u8)
            .collect()
    }

    /// Force retranslation of every RAM page overlapping `[addr, addr + len)`
    pub fn invalidate_range(&mut self, addr: u32, len: u32) {
        self.pages.invalidate_range(addr, len);
    }
}

fn write_invalidate(memory: &mut Memory, pages: &mut PageTable, r: &Resolved, value: u32, width: Width) {
    memory.write(r.region, r.offset, value, width);
    if let Some(page) = r.page {
        pages.invalidate(page);
    }
}

/// Everything a guest instruction can touch. Shared by the interpreter and
/// the block executor so both take the exact same memory paths.
pub(crate) struct Machine<'a> {
    pub state: &'a mut CpuState,
    pub memory: &'a mut Memory,
    pub pages: &'a mut PageTable,
    pub handler: &'a mut dyn StoreHandler,
}

impl<'a> Machine<'a> {
    /// Aligned load of `width` bytes
    #[inline(always)]
    pub fn load(&mut self, addr: u32, width: Width) -> u32 {
        match resolve(addr) {
            Route::Mapped(r) => self.memory.read(r.region, r.offset, width),
            Route::Unmapped(_) => {
                let mut bus = GuestBus::new(self.memory, self.pages);
                let (value, counter) = self.handler.load(&mut bus, addr, width, self.state.counter);
                self.state.counter = counter;
                width.mask(value)
            }
        }
    }

    /// Aligned store of `width` bytes
    #[inline(always)]
    pub fn store(&mut self, addr: u32, value: u32, width: Width) {
        let route = resolve(addr);

        if self.state.cop0.cache_isolated() {
            // Writes hit the isolated i-cache: memory is untouched but the
            // cached code for the line is gone.
            if let Route::Mapped(Resolved { page: Some(page), region: Region::Ram, .. }) = route {
                self.pages.invalidate(page);
            }
            return;
        }

        match route {
            Route::Mapped(r) if r.region != Region::Bios => {
                write_invalidate(self.memory, self.pages, &r, value, width);
            }
            _ => {
                let mut bus = GuestBus::new(self.memory, self.pages);
                let counter = self.state.counter;
                self.state.counter = self.handler.store(&mut bus, width.mask(value), addr, width, counter);
            }
        }
    }
}
