use psx_dynarec::cpu::encode::*;
use psx_dynarec::{exe, DynarecConfig, DynarecError, IgnoreStores, Width};

use crate::{bios_image, machine, portable, with_handler};

#[test]
fn test_store_into_running_page() {
    let code = [
        sw(3, 2, 0x10),
        nop(),
        nop(),
        nop(),
        addiu(1, 1, 1),
        j(0x8000_0014),
        nop(),
    ];
    let mut d = machine(&code, portable());
    d.set_reg(2, 0x8000_0000);
    d.set_reg(3, addiu(1, 1, 100));
    d.run(20).unwrap();

    assert_eq!(d.reg(1), 100);
    let stats = d.stats();
    assert_eq!(stats.translations, 2);
    assert_eq!(stats.invalidations, 1);
}

#[test]
fn test_patched_loop_body_is_retranslated() {
    let mut d = machine(&[addiu(1, 1, 1), j(0x8000_0000), nop()], portable());
    d.run(30).unwrap();
    assert_eq!(d.reg(1), 10);

    d.bus().write(0x8000_0000, addiu(1, 1, -1), Width::Word);
    d.run(30).unwrap();
    assert_eq!(d.reg(1), 0);
}

#[test]
fn test_store_to_other_page_keeps_block() {
    let code = [sw(0, 2, 0), j(0x8000_0004), nop()];
    let mut d = machine(&code, portable());
    d.set_reg(2, 0x8000_1000);
    d.run(20).unwrap();
    assert_eq!(d.stats().translations, 1);
}

#[test]
fn test_invalidate_all_forces_retranslation() {
    let mut d = machine(&[j(0x8000_0000), nop()], portable());
    d.run(10).unwrap();
    d.invalidate_all();
    d.run(10).unwrap();
    let stats = d.stats();
    assert_eq!(stats.translations, 2);
    assert_eq!(stats.flushes, 1);
}

#[test]
fn test_cache_too_small_for_live_pages() {
    // Three pages bouncing between each other, each still valid, through a
    // cache that holds two
    let config = DynarecConfig { code_cache_ops: 300, ..portable() };
    let mut d = machine(&[], config);
    for (from, to) in [(0x8000_0000u32, 0x8000_0200u32), (0x8000_0200, 0x8000_0400), (0x8000_0400, 0x8000_0000)] {
        let mut bus = d.bus();
        bus.write(from, addiu(1, 1, 1), Width::Word);
        bus.write(from + 4, j(to), Width::Word);
        bus.write(from + 8, nop(), Width::Word);
    }
    match d.run(300) {
        Err(DynarecError::CodeCacheExhausted { capacity, .. }) => assert_eq!(capacity, 300),
        other => panic!("expected CodeCacheExhausted, got {:?}", other),
    }
    assert_eq!(d.reg(1), 2);
}

#[test]
fn test_bios_boot_code_runs() {
    let bios = bios_image(&[
        (0x00, lui(1, 0x1234)),
        (0x04, ori(1, 1, 0x5678)),
        (0x08, lui(2, 0x8000)),
        (0x0C, sw(1, 2, 0x100)),
        (0x10, j(0xBFC0_0010)),
        (0x14, nop()),
    ]);
    let mut d = with_handler(&bios, IgnoreStores, portable());
    d.run(50).unwrap();
    assert_eq!(d.bus().read(0x8000_0100, Width::Word), 0x1234_5678);
    assert_eq!(d.state().pc, 0xBFC0_0010);
}

#[test]
fn test_exe_runs_from_entry() {
    let text: Vec<u8> = [addiu(1, 0, 3), addu(2, 1, 29), j(0x8001_0008), nop()]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    let image = exe::build(0x8001_0000, 0x8001_0000, 0x801F_FFF0, &text);

    let mut d = with_handler(&[], IgnoreStores, portable());
    exe::load(&mut d, &image).unwrap();
    d.run(20).unwrap();
    assert_eq!(d.reg(1), 3);
    assert_eq!(d.reg(2), 0x801F_FFF3);
}
