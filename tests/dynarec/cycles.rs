use psx_dynarec::cpu::encode::*;
use psx_dynarec::{DynarecConfig, ExecMode};

use crate::{machine, portable};

#[test]
fn test_nop_page_overruns_by_one_block() {
    // Zeroed RAM is all NOPs: one block is a whole 128-instruction page
    let mut d = machine(&[], portable());
    assert_eq!(d.run(100).unwrap(), 28);
    assert_eq!(d.state().pc, 0x8000_0200);
    assert_eq!(d.stats().translations, 1);
}

#[test]
fn test_instruction_costs() {
    let code = [
        lw(1, 0, 0),
        mult(2, 3),
        div(2, 3),
        addiu(4, 0, 1),
        j(0x8000_0010),
        nop(),
    ];
    let mut d = machine(&code, portable());
    // 2 + 7 + 36 + 1 + 1 + 1 in a single block
    assert_eq!(d.run(1).unwrap(), 47);
    assert_eq!(d.state().pc, 0x8000_0010);
    // j + nop per block
    assert_eq!(d.run(4).unwrap(), 0);
}

#[test]
fn test_interpreter_stops_per_instruction() {
    let code = [lw(1, 0, 0), mult(2, 3), j(0x8000_0000), nop()];
    let mut d = machine(&code, DynarecConfig { exec_mode: ExecMode::Interpreter, ..portable() });
    assert_eq!(d.run(1).unwrap(), 1);
    assert_eq!(d.state().pc, 0x8000_0004);
}

#[test]
fn test_next_event_counts_down() {
    let mut d = machine(&[j(0x8000_0000), nop()], portable());
    d.set_next_event(50);
    assert_eq!(d.run(20).unwrap(), 0);
    assert_eq!(d.state().next_event, 30);
    assert_eq!(d.run(100).unwrap(), -70);
    assert_eq!(d.state().next_event, 0);
}
