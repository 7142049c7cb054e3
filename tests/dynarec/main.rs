//! End-to-end tests through the public API

use std::cell::RefCell;
use std::rc::Rc;

use psx_dynarec::{handler_fn, Dynarec, DynarecConfig, GuestBus, IgnoreStores, Memory, StoreHandler, Width};

mod cycles;
mod delay_slots;
mod devices;
mod equivalence;
mod exceptions;
mod self_modifying;

pub const CODE_BASE: u32 = 0x8000_0000;

/// Always-portable config so results do not depend on the build features
pub fn portable() -> DynarecConfig {
    DynarecConfig { native: false, ..DynarecConfig::default() }
}

pub fn with_handler<H: StoreHandler + 'static>(bios: &[u8], handler: H, config: DynarecConfig) -> Dynarec {
    Dynarec::new(Memory::new(bios).unwrap(), handler, config).unwrap()
}

pub fn write_code(d: &mut Dynarec, addr: u32, code: &[u32]) {
    let mut bus = d.bus();
    for (i, w) in code.iter().enumerate() {
        assert!(bus.write(addr + 4 * i as u32, *w, Width::Word));
    }
}

/// Recompiler with `code` at 0x80000000 and the PC pointing at it
pub fn machine(code: &[u32], config: DynarecConfig) -> Dynarec {
    let mut d = with_handler(&[], IgnoreStores, config);
    write_code(&mut d, CODE_BASE, code);
    d.set_pc(CODE_BASE);
    d
}

pub fn bios_image(code: &[(u32, u32)]) -> Vec<u8> {
    let mut bios = vec![0u8; 0x1000];
    for &(offset, word) in code {
        let o = offset as usize;
        bios[o..o + 4].copy_from_slice(&word.to_le_bytes());
    }
    bios
}

/// Store handler that records `(value, addr, counter)` for every call
pub type StoreLog = Rc<RefCell<Vec<(u32, u32, i32)>>>;

pub fn recording(cost: i32) -> (StoreLog, impl StoreHandler + 'static) {
    let log: StoreLog = Rc::new(RefCell::new(Vec::new()));
    let seen = log.clone();
    let handler = handler_fn(move |_bus, value, addr, counter| {
        seen.borrow_mut().push((value, addr, counter));
        counter - cost
    });
    (log, handler)
}

/// Every bus access a device saw: `(addr, value)` for stores, `(addr, counter)` for loads
#[derive(Default)]
pub struct BusTrace {
    pub stores: Vec<(u32, u32)>,
    pub loads: Vec<(u32, i32)>,
}

/// Device that answers loads with `value` and charges `load_cost`
pub struct Device {
    pub trace: Rc<RefCell<BusTrace>>,
    pub value: u32,
    pub load_cost: i32,
}

impl Device {
    pub fn new(value: u32, load_cost: i32) -> (Rc<RefCell<BusTrace>>, Self) {
        let trace = Rc::new(RefCell::new(BusTrace::default()));
        (trace.clone(), Device { trace, value, load_cost })
    }
}

impl StoreHandler for Device {
    fn store(&mut self, _bus: &mut GuestBus<'_>, value: u32, addr: u32, _width: Width, counter: i32) -> i32 {
        self.trace.borrow_mut().stores.push((addr, value));
        counter
    }

    fn load(&mut self, _bus: &mut GuestBus<'_>, addr: u32, _width: Width, counter: i32) -> (u32, i32) {
        self.trace.borrow_mut().loads.push((addr, counter));
        (self.value, counter - self.load_cost)
    }
}
