use psx_dynarec::cpu::encode::*;
use psx_dynarec::{handler_fn, Width};

use crate::{machine, portable, recording, with_handler, write_code, Device, CODE_BASE};

fn program(parts: &[&[u32]]) -> Vec<u32> {
    parts.concat()
}

#[test]
fn test_unmapped_store_reaches_handler_once() {
    let (log, handler) = recording(100);
    let mut d = with_handler(&[], handler, portable());
    let code = program(&[
        &li(3, 0xBF80_1070),
        &li(2, 0xDEAD_BEEF),
        &[sh(2, 3, 0), j(0x8000_0014), nop()],
    ]);
    write_code(&mut d, CODE_BASE, &code);
    d.set_pc(CODE_BASE);

    // The handler charges 100 cycles on top of the block
    assert_eq!(d.run(10).unwrap(), 97);
    assert_eq!(*log.borrow(), vec![(0xBEEF, 0xBF80_1070, 5)]);
    assert!(d.memory().ram()[0x100..].iter().all(|&b| b == 0));
}

#[test]
fn test_bios_store_goes_to_handler() {
    let (log, handler) = recording(0);
    let bios = [0x11, 0x22, 0x33, 0x44];
    let mut d = with_handler(&bios, handler, portable());
    let code = program(&[&li(3, 0xBFC0_0000), &li(2, 0xDEAD_BEEF), &[sw(2, 3, 0), j(0x8000_0014), nop()]]);
    write_code(&mut d, CODE_BASE, &code);
    d.set_pc(CODE_BASE);

    d.run(8).unwrap();
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(log.borrow()[0].0, 0xDEAD_BEEF);
    assert_eq!(&d.memory().bios()[..4], &bios);
}

#[test]
fn test_scratchpad_not_reachable_through_kseg1() {
    let (log, handler) = recording(0);
    let mut d = with_handler(&[], handler, portable());
    let code = program(&[
        &li(3, 0x1F80_0010),
        &li(4, 0xBF80_0010),
        &[addiu(2, 0, 0x55), sw(2, 3, 0), sw(2, 4, 0), j(0x8000_001C), nop()],
    ]);
    write_code(&mut d, CODE_BASE, &code);
    d.set_pc(CODE_BASE);

    d.run(12).unwrap();
    assert_eq!(d.memory().scratchpad()[0x10], 0x55);
    assert_eq!(*log.borrow(), vec![(0x55, 0xBF80_0010, 5)]);
}

#[test]
fn test_dma_write_from_handler_invalidates() {
    let patch = addiu(1, 1, 7);
    let handler = handler_fn(move |bus, _value, addr, counter| {
        if addr == 0x1F80_10F0 {
            bus.write(0x8000_0010, patch, Width::Word);
        }
        counter
    });
    let mut d = with_handler(&[], handler, portable());
    let code = program(&[
        &li(4, 0x1F80_10F0),
        &[sw(0, 4, 0), nop(), addiu(1, 1, 1), j(0x8000_0014), nop()],
    ]);
    write_code(&mut d, CODE_BASE, &code);
    d.set_pc(CODE_BASE);

    d.run(20).unwrap();
    assert_eq!(d.reg(1), 7);
    assert_eq!(d.stats().translations, 2);
}

#[test]
fn test_isolated_cache_swallows_stores() {
    let (log, handler) = recording(0);
    let mut d = with_handler(&[], handler, portable());
    let code = program(&[
        &[lui(1, 0x0001), mtc0(1, 12)],
        &li(2, 0x1234_5678),
        &[sw(2, 0, 0x100), mtc0(0, 12), j(0x8000_0018), nop()],
    ]);
    write_code(&mut d, CODE_BASE, &code);
    d.set_pc(CODE_BASE);

    d.run(20).unwrap();
    assert_eq!(d.bus().read(0x100, Width::Word), 0);
    assert!(log.borrow().is_empty());
    assert_eq!(d.state().cop0.sr(), 0);
}

#[test]
fn test_mirrors_share_memory_but_not_translations() {
    let mut d = with_handler(&[], psx_dynarec::IgnoreStores, portable());
    // Written through the 2MB mirror, run through KSEG1
    write_code(&mut d, 0x0020_1000, &[addiu(1, 1, 1), j(0x0000_1000), nop()]);
    assert_eq!(d.bus().read(0x8000_1000, Width::Word), addiu(1, 1, 1));

    d.set_pc(0xA000_1000);
    d.run(30).unwrap();
    assert_eq!(d.reg(1), 10);

    // Patching another mirror drops the page for every alias
    write_code(&mut d, 0x0060_1000, &[addiu(1, 1, 2)]);
    d.set_pc(0x8000_1000);
    d.run(30).unwrap();
    assert_eq!(d.reg(1), 30);
    assert_eq!(d.stats().translations, 2);
    assert_eq!(d.stats().invalidations, 1);
}

#[test]
fn test_partial_word_stores_to_device_are_single_writes() {
    let (trace, device) = Device::new(0, 0);
    let mut d = with_handler(&[], device, portable());
    let code = program(&[
        &li(3, 0x1F80_1071),
        &li(2, 0x1122_3344),
        &[swl(2, 3, 0), swr(2, 3, 1), j(0x8000_0018), nop()],
    ]);
    write_code(&mut d, CODE_BASE, &code);
    d.set_pc(CODE_BASE);

    d.run(8).unwrap();
    let trace = trace.borrow();
    assert_eq!(trace.stores, vec![(0x1F80_1071, 0x1122), (0x1F80_1072, 0x3344_0000)]);
    assert!(trace.loads.is_empty());
}

#[test]
fn test_unmapped_load_reads_open_bus() {
    let code = program(&[
        &li(3, 0x1F80_1814),
        &[lw(1, 3, 0), lhu(2, 3, 0), nop(), j(0x8000_0014), nop()],
    ]);
    let mut d = machine(&code, portable());
    d.run(9).unwrap();
    assert_eq!(d.reg(1), 0xFFFF_FFFF);
    assert_eq!(d.reg(2), 0xFFFF);
}

#[test]
fn test_device_load_value_and_cost() {
    let (trace, device) = Device::new(0xCAFE, 50);
    let mut d = with_handler(&[], device, portable());
    let code = program(&[&li(3, 0x1F80_1814), &[lw(1, 3, 0), nop(), j(0x8000_0010), nop()]]);
    write_code(&mut d, CODE_BASE, &code);
    d.set_pc(CODE_BASE);

    // li 2, lw 2, then the handler's 50 on top of nop, j and its delay slot
    assert_eq!(d.run(10).unwrap(), 47);
    assert_eq!(d.reg(1), 0xCAFE);
    assert_eq!(trace.borrow().loads, vec![(0x1F80_1814, 6)]);
    assert!(trace.borrow().stores.is_empty());
}
