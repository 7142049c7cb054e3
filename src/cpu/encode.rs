//! Instruction encoders
//!
//! Small assembler helpers for building guest code in tests, demos and
//! BIOS stubs. Branch offsets are in instructions, relative to the delay
//! slot, exactly as the hardware encodes them.

use super::decode::*;

fn r_type(funct: u32, rs: u8, rt: u8, rd: u8, shamt: u32) -> u32 {
    ((rs as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) | ((shamt & 0x1F) << 6) | funct
}

fn i_type(op: u32, rs: u8, rt: u8, imm: u16) -> u32 {
    (op << 26) | ((rs as u32) << 21) | ((rt as u32) << 16) | imm as u32
}

pub fn nop() -> u32 {
    0
}

pub fn sll(rd: u8, rt: u8, sa: u32) -> u32 { r_type(FUNCT_SLL, 0, rt, rd, sa) }
pub fn srl(rd: u8, rt: u8, sa: u32) -> u32 { r_type(FUNCT_SRL, 0, rt, rd, sa) }
pub fn sra(rd: u8, rt: u8, sa: u32) -> u32 { r_type(FUNCT_SRA, 0, rt, rd, sa) }
pub fn sllv(rd: u8, rt: u8, rs: u8) -> u32 { r_type(FUNCT_SLLV, rs, rt, rd, 0) }
pub fn srlv(rd: u8, rt: u8, rs: u8) -> u32 { r_type(FUNCT_SRLV, rs, rt, rd, 0) }
pub fn srav(rd: u8, rt: u8, rs: u8) -> u32 { r_type(FUNCT_SRAV, rs, rt, rd, 0) }

pub fn jr(rs: u8) -> u32 { r_type(FUNCT_JR, rs, 0, 0, 0) }
pub fn jalr(rd: u8, rs: u8) -> u32 { r_type(FUNCT_JALR, rs, 0, rd, 0) }
pub fn syscall() -> u32 { FUNCT_SYSCALL }
pub fn brk() -> u32 { FUNCT_BREAK }

pub fn mfhi(rd: u8) -> u32 { r_type(FUNCT_MFHI, 0, 0, rd, 0) }
pub fn mthi(rs: u8) -> u32 { r_type(FUNCT_MTHI, rs, 0, 0, 0) }
pub fn mflo(rd: u8) -> u32 { r_type(FUNCT_MFLO, 0, 0, rd, 0) }
pub fn mtlo(rs: u8) -> u32 { r_type(FUNCT_MTLO, rs, 0, 0, 0) }
pub fn mult(rs: u8, rt: u8) -> u32 { r_type(FUNCT_MULT, rs, rt, 0, 0) }
pub fn multu(rs: u8, rt: u8) -> u32 { r_type(FUNCT_MULTU, rs, rt, 0, 0) }
pub fn div(rs: u8, rt: u8) -> u32 { r_type(FUNCT_DIV, rs, rt, 0, 0) }
pub fn divu(rs: u8, rt: u8) -> u32 { r_type(FUNCT_DIVU, rs, rt, 0, 0) }

pub fn add(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_ADD, rs, rt, rd, 0) }
pub fn addu(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_ADDU, rs, rt, rd, 0) }
pub fn sub(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_SUB, rs, rt, rd, 0) }
pub fn subu(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_SUBU, rs, rt, rd, 0) }
pub fn and(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_AND, rs, rt, rd, 0) }
pub fn or(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_OR, rs, rt, rd, 0) }
pub fn xor(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_XOR, rs, rt, rd, 0) }
pub fn nor(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_NOR, rs, rt, rd, 0) }
pub fn slt(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_SLT, rs, rt, rd, 0) }
pub fn sltu(rd: u8, rs: u8, rt: u8) -> u32 { r_type(FUNCT_SLTU, rs, rt, rd, 0) }

pub fn bltz(rs: u8, offset: i16) -> u32 { i_type(OP_BCOND, rs, 0x00, offset as u16) }
pub fn bgez(rs: u8, offset: i16) -> u32 { i_type(OP_BCOND, rs, 0x01, offset as u16) }
pub fn bltzal(rs: u8, offset: i16) -> u32 { i_type(OP_BCOND, rs, 0x10, offset as u16) }
pub fn bgezal(rs: u8, offset: i16) -> u32 { i_type(OP_BCOND, rs, 0x11, offset as u16) }

/// J to an absolute address (only the low 28 bits are encoded)
pub fn j(target: u32) -> u32 { (OP_J << 26) | ((target >> 2) & 0x03FF_FFFF) }
pub fn jal(target: u32) -> u32 { (OP_JAL << 26) | ((target >> 2) & 0x03FF_FFFF) }

pub fn beq(rs: u8, rt: u8, offset: i16) -> u32 { i_type(OP_BEQ, rs, rt, offset as u16) }
pub fn bne(rs: u8, rt: u8, offset: i16) -> u32 { i_type(OP_BNE, rs, rt, offset as u16) }
pub fn blez(rs: u8, offset: i16) -> u32 { i_type(OP_BLEZ, rs, 0, offset as u16) }
pub fn bgtz(rs: u8, offset: i16) -> u32 { i_type(OP_BGTZ, rs, 0, offset as u16) }

pub fn addi(rt: u8, rs: u8, imm: i16) -> u32 { i_type(OP_ADDI, rs, rt, imm as u16) }
pub fn addiu(rt: u8, rs: u8, imm: i16) -> u32 { i_type(OP_ADDIU, rs, rt, imm as u16) }
pub fn slti(rt: u8, rs: u8, imm: i16) -> u32 { i_type(OP_SLTI, rs, rt, imm as u16) }
pub fn sltiu(rt: u8, rs: u8, imm: i16) -> u32 { i_type(OP_SLTIU, rs, rt, imm as u16) }
pub fn andi(rt: u8, rs: u8, imm: u16) -> u32 { i_type(OP_ANDI, rs, rt, imm) }
pub fn ori(rt: u8, rs: u8, imm: u16) -> u32 { i_type(OP_ORI, rs, rt, imm) }
pub fn xori(rt: u8, rs: u8, imm: u16) -> u32 { i_type(OP_XORI, rs, rt, imm) }
pub fn lui(rt: u8, imm: u16) -> u32 { i_type(OP_LUI, 0, rt, imm) }

pub fn mfc0(rt: u8, rd: u8) -> u32 { (OP_COP0 << 26) | ((COP_MFC as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) }
pub fn mtc0(rt: u8, rd: u8) -> u32 { (OP_COP0 << 26) | ((COP_MTC as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) }
pub fn rfe() -> u32 { (OP_COP0 << 26) | (1 << 25) | COP0_FUNCT_RFE }

pub fn lb(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_LB, base, rt, offset as u16) }
pub fn lh(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_LH, base, rt, offset as u16) }
pub fn lwl(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_LWL, base, rt, offset as u16) }
pub fn lw(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_LW, base, rt, offset as u16) }
pub fn lbu(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_LBU, base, rt, offset as u16) }
pub fn lhu(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_LHU, base, rt, offset as u16) }
pub fn lwr(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_LWR, base, rt, offset as u16) }
pub fn sb(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_SB, base, rt, offset as u16) }
pub fn sh(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_SH, base, rt, offset as u16) }
pub fn swl(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_SWL, base, rt, offset as u16) }
pub fn sw(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_SW, base, rt, offset as u16) }
pub fn swr(rt: u8, base: u8, offset: i16) -> u32 { i_type(OP_SWR, base, rt, offset as u16) }

/// Load a full 32-bit constant into `rt` (LUI + ORI)
pub fn li(rt: u8, value: u32) -> [u32; 2] {
    [lui(rt, (value >> 16) as u16), ori(rt, rt, value as u16)]
}
