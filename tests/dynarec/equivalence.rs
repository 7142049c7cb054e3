use psx_dynarec::cpu::encode::*;
use psx_dynarec::{Dynarec, DynarecConfig, ExecMode};

use crate::{machine, portable};

/// Sum, multiply, store, reload and divide in a loop, then unaligned loads
fn workload() -> Vec<u32> {
    vec![
        addiu(1, 0, 0),
        addiu(2, 0, 10),
        lui(4, 0x8001),
        // loop:
        addu(1, 1, 2),
        mult(1, 2),
        mflo(5),
        sw(5, 4, 0),
        addiu(4, 4, 4),
        addiu(2, 2, -1),
        bne(2, 0, -7),
        sll(6, 1, 2),
        lw(7, 4, -4),
        div(7, 1),
        mfhi(8),
        mflo(9),
        lwl(10, 4, -5),
        lwr(10, 4, -8),
        j(0x8000_0044),
        nop(),
    ]
}

fn finish(config: DynarecConfig) -> Dynarec {
    let mut d = machine(&workload(), config);
    d.run(5000).unwrap();
    d
}

fn assert_same(a: &mut Dynarec, b: &mut Dynarec) {
    assert_eq!(a.state().registers(), b.state().registers());
    assert_eq!(a.state().hi, b.state().hi);
    assert_eq!(a.state().lo, b.state().lo);
    assert_eq!(a.bus().read_bytes(0x8001_0000, 40), b.bus().read_bytes(0x8001_0000, 40));
}

#[test]
fn test_recompiler_matches_interpreter() {
    let mut rec = finish(portable());
    let mut int = finish(DynarecConfig { exec_mode: ExecMode::Interpreter, ..portable() });
    assert_same(&mut rec, &mut int);

    // 10 + 9 + ... + 1
    assert_eq!(rec.reg(1), 55);
    assert_eq!(rec.reg(6), 220);
    assert_eq!(rec.reg(2), 0);
    assert!(rec.stats().blocks_executed > 0);
    assert!(int.stats().interpreter_steps > 0);
}

#[test]
fn test_default_config_matches_portable() {
    // Native code, when the backend is built in, must agree with the portable ops
    let mut default = finish(DynarecConfig::default());
    let mut portable = finish(portable());
    assert_same(&mut default, &mut portable);
}

#[test]
fn test_switching_modes_mid_run() {
    let mut d = machine(&workload(), portable());
    d.run(60).unwrap();
    d.set_exec_mode(ExecMode::Interpreter);
    d.run(60).unwrap();
    d.set_exec_mode(ExecMode::Recompiler);
    d.run(5000).unwrap();

    let mut reference = finish(portable());
    assert_same(&mut d, &mut reference);
}

/// Reads in the slot after a load see the old value in every execution path
fn load_delay_program(config: DynarecConfig) -> Dynarec {
    let mut d = machine(
        &[
            addiu(1, 0, 7),
            lw(1, 0, 0x800),
            addu(3, 1, 0),
            addu(4, 1, 0),
            lw(5, 0, 0x800),
            addiu(5, 0, 1),
            // A fusable ALU run right behind the load
            lw(7, 0, 0x800),
            addu(8, 7, 0),
            addu(9, 7, 0),
            j(0x8000_0400),
            lw(10, 0, 0x800),
        ],
        config,
    );
    crate::write_code(&mut d, 0x8000_0400, &[addu(11, 10, 0), addu(12, 10, 0), j(0x8000_0408), nop()]);
    assert!(d.bus().write(0x800, 0x55, psx_dynarec::Width::Word));
    d.run(200).unwrap();
    d
}

#[test]
fn test_load_delay_slot_in_every_mode() {
    let modes = [
        portable(),
        DynarecConfig { exec_mode: ExecMode::Interpreter, ..portable() },
        DynarecConfig::default(),
    ];
    for config in modes {
        let d = load_delay_program(config);
        let r = d.state().registers();
        assert_eq!((r[1], r[3], r[4]), (0x55, 7, 0x55));
        // Writing the loaded register in the delay slot beats the load
        assert_eq!(r[5], 1);
        assert_eq!((r[8], r[9]), (0, 0x55));
        // The delay crosses the block boundary after a branch
        assert_eq!((r[10], r[11], r[12]), (0x55, 0, 0x55));
    }
}
