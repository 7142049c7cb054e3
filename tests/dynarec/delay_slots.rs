use psx_dynarec::cpu::encode::*;
use psx_dynarec::{DynarecConfig, ExecMode};

use crate::{machine, portable, write_code};

fn both_modes() -> [DynarecConfig; 2] {
    [portable(), DynarecConfig { exec_mode: ExecMode::Interpreter, ..portable() }]
}

#[test]
fn test_delay_slot_runs_before_target() {
    for config in both_modes() {
        let code = [
            beq(0, 0, 3),
            addiu(1, 0, 5),
            addiu(1, 0, 99),
            nop(),
            j(0x8000_0010),
            nop(),
        ];
        let mut d = machine(&code, config);
        d.run(20).unwrap();
        assert_eq!(d.reg(1), 5);
    }
}

#[test]
fn test_condition_read_before_delay_slot() {
    for config in both_modes() {
        let code = [
            addiu(2, 0, 1),
            bne(2, 0, 2),
            addiu(2, 0, 0),
            addiu(3, 0, 1),
            j(0x8000_0010),
            nop(),
        ];
        let mut d = machine(&code, config);
        d.run(20).unwrap();
        assert_eq!(d.reg(2), 0);
        assert_eq!(d.reg(3), 0);
    }
}

#[test]
fn test_jal_links_past_delay_slot() {
    for config in both_modes() {
        let code = [
            jal(0x8000_0100),
            addiu(1, 0, 7),
        ];
        let mut d = machine(&code, config);
        write_code(&mut d, 0x8000_0100, &[j(0x8000_0100), nop()]);
        d.run(20).unwrap();
        assert_eq!(d.reg(31), 0x8000_0008);
        assert_eq!(d.reg(1), 7);
    }
}

#[test]
fn test_branch_in_last_slot_of_page() {
    for config in both_modes() {
        let mut d = machine(&[], config);
        write_code(&mut d, 0x8000_01FC, &[j(0x8000_0400), addiu(1, 0, 42)]);
        write_code(&mut d, 0x8000_0400, &[j(0x8000_0400), nop()]);
        d.run(300).unwrap();
        assert_eq!(d.reg(1), 42);
        assert!(d.state().pc == 0x8000_0400 || d.state().pc == 0x8000_0404);
        assert!(d.state().pending_branch.is_none() || d.state().pending_branch == Some(0x8000_0400));
    }
}
