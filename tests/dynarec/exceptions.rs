use psx_dynarec::cpu::cop0::{COP0_BAD_VADDR, COP0_CAUSE, COP0_EPC};
use psx_dynarec::cpu::encode::*;
use psx_dynarec::{Dynarec, IgnoreStores};

use crate::{bios_image, portable, with_handler, write_code, CODE_BASE};

/// BEV is set after reset, so exceptions vector into the BIOS at 0x180
fn with_handler_loop(code: &[u32]) -> Dynarec {
    let bios = bios_image(&[(0x180, j(0xBFC0_0180)), (0x184, nop())]);
    let mut d = with_handler(&bios, IgnoreStores, portable());
    write_code(&mut d, CODE_BASE, code);
    d.set_pc(CODE_BASE);
    d
}

fn cause_code(d: &Dynarec) -> u32 {
    (d.state().cop0.read(COP0_CAUSE) >> 2) & 0x1F
}

#[test]
fn test_syscall_vectors_to_bios_handler() {
    let mut d = with_handler_loop(&[syscall()]);
    d.run(10).unwrap();
    assert_eq!(cause_code(&d), 8);
    assert_eq!(d.state().cop0.read(COP0_EPC), CODE_BASE);
    assert_eq!(d.state().pc, 0xBFC0_0180);
}

#[test]
fn test_exception_in_delay_slot_points_epc_at_branch() {
    let mut d = with_handler_loop(&[j(0x8000_0100), brk()]);
    d.run(10).unwrap();
    assert_eq!(cause_code(&d), 9);
    assert_eq!(d.state().cop0.read(COP0_EPC), CODE_BASE);
    assert_ne!(d.state().cop0.read(COP0_CAUSE) & (1 << 31), 0);
}

#[test]
fn test_overflow_leaves_destination() {
    let mut d = with_handler_loop(&[addi(1, 2, 1)]);
    d.set_reg(1, 0x1111);
    d.set_reg(2, 0x7FFF_FFFF);
    d.run(10).unwrap();
    assert_eq!(cause_code(&d), 12);
    assert_eq!(d.reg(1), 0x1111);
}

#[test]
fn test_misaligned_load_sets_bad_vaddr() {
    let mut d = with_handler_loop(&[lw(1, 0, 0x101)]);
    d.run(10).unwrap();
    assert_eq!(cause_code(&d), 4);
    assert_eq!(d.state().cop0.read(COP0_BAD_VADDR), 0x101);
}

#[test]
fn test_ram_vector_after_bev_cleared() {
    let mut d = with_handler_loop(&[mtc0(0, 12), syscall()]);
    write_code(&mut d, 0x8000_0080, &[j(0x8000_0080), nop()]);
    d.run(10).unwrap();
    assert_eq!(cause_code(&d), 8);
    assert_eq!(d.state().cop0.read(COP0_EPC), 0x8000_0004);
    assert_eq!(d.state().pc, 0x8000_0080);
}

#[test]
fn test_rfe_pops_mode_stack() {
    // SR = 0b000001 -> exception pushes to 0b000100 -> rfe pops back
    let mut d = with_handler_loop(&[addiu(1, 0, 1), mtc0(1, 12), syscall()]);
    write_code(&mut d, 0x8000_0080, &[rfe(), j(0x8000_0084), nop()]);
    d.run(20).unwrap();
    assert_eq!(d.state().cop0.sr() & 0x3F, 1);
}
