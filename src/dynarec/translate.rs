//! Block translator
//!
//! Translates a whole page at once. Every instruction slot gets an entry in
//! the block's entry table so execution may start anywhere in the page.
//!
//! Control flow is emitted as a unit:
//!
//! ```text
//! [Branch / Jump / JumpReg] [delay slot op] [EndBranch]
//! ```
//!
//! The delay slot instruction is translated again on its own right after the
//! unit for code that jumps straight to it.

use super::ir::{BranchCond, LoadKind, Op, StoreKind};
use super::native::{ArenaFull, NativeBackend};
use crate::cpu::decode::*;
use crate::memory::router::{PageIndex, PAGE_INSTRUCTIONS, PAGE_SIZE, RAM_PAGES};
use crate::memory::{Memory, Region, Width};

/// Output of a page translation, not yet installed in the code cache
pub struct Translation {
    pub ops: Vec<Op>,
    pub entries: Box<[u16; PAGE_INSTRUCTIONS]>,
    /// Number of native segments compiled for this page
    pub native_segments: u32,
}

/// Translate `page` as seen from virtual address `base`
pub fn translate(
    memory: &Memory,
    page: PageIndex,
    base: u32,
    native: Option<&mut NativeBackend>,
) -> Result<Translation, ArenaFull> {
    let (region, start) = if page.is_bios() {
        (Region::Bios, (page.index() - RAM_PAGES) as u32 * PAGE_SIZE)
    } else {
        (Region::Ram, page.index() as u32 * PAGE_SIZE)
    };
    let word = |slot: usize| Instruction(memory.read(region, start + 4 * slot as u32, Width::Word));

    let mut ops = Vec::with_capacity(PAGE_INSTRUCTIONS + 16);
    let mut entries = Box::new([0u16; PAGE_INSTRUCTIONS]);

    for slot in 0..PAGE_INSTRUCTIONS {
        entries[slot] = ops.len() as u16;
        let pc = base.wrapping_add(4 * slot as u32);
        let instr = word(slot);

        if !instr.is_control_flow() {
            ops.push(translate_instruction(instr, pc));
            continue;
        }

        ops.push(translate_control(instr, pc));
        if slot + 1 == PAGE_INSTRUCTIONS {
            ops.push(Op::BranchOutOfPage { delay_pc: pc.wrapping_add(4) });
        } else {
            let delay = word(slot + 1);
            let delay_pc = pc.wrapping_add(4);
            ops.push(if delay.is_control_flow() {
                translate_delay_control(delay, delay_pc)
            } else {
                translate_instruction(delay, delay_pc)
            });
            ops.push(Op::EndBranch);
        }
    }

    if !word(PAGE_INSTRUCTIONS - 1).is_control_flow() {
        ops.push(Op::FallThrough { next_pc: base.wrapping_add(PAGE_SIZE) });
    }

    let mut translation = Translation { ops, entries, native_segments: 0 };
    if let Some(backend) = native {
        fuse_native_runs(&mut translation, backend)?;
    }
    Ok(translation)
}

/// Straight-line instruction to its op
fn translate_instruction(instr: Instruction, pc: u32) -> Op {
    let rs = instr.rs();
    let rt = instr.rt();
    let rd = instr.rd();
    let sa = instr.shamt() as u8;
    let imm_se = instr.imm_se();
    let imm = instr.imm();

    let op = match instr.opcode() {
        OP_SPECIAL => match instr.funct() {
            FUNCT_SLL => Op::Sll { rd, rt, sa },
            FUNCT_SRL => Op::Srl { rd, rt, sa },
            FUNCT_SRA => Op::Sra { rd, rt, sa },
            FUNCT_SLLV => Op::Sllv { rd, rt, rs },
            FUNCT_SRLV => Op::Srlv { rd, rt, rs },
            FUNCT_SRAV => Op::Srav { rd, rt, rs },
            FUNCT_SYSCALL => Op::Syscall { pc },
            FUNCT_BREAK => Op::Break { pc },
            FUNCT_MFHI => Op::Mfhi { rd },
            FUNCT_MTHI => Op::Mthi { rs },
            FUNCT_MFLO => Op::Mflo { rd },
            FUNCT_MTLO => Op::Mtlo { rs },
            FUNCT_MULT => Op::Mult { rs, rt },
            FUNCT_MULTU => Op::Multu { rs, rt },
            FUNCT_DIV => Op::Div { rs, rt },
            FUNCT_DIVU => Op::Divu { rs, rt },
            FUNCT_ADD => Op::Add { rd, rs, rt, pc },
            FUNCT_ADDU => Op::Addu { rd, rs, rt },
            FUNCT_SUB => Op::Sub { rd, rs, rt, pc },
            FUNCT_SUBU => Op::Subu { rd, rs, rt },
            FUNCT_AND => Op::And { rd, rs, rt },
            FUNCT_OR => Op::Or { rd, rs, rt },
            FUNCT_XOR => Op::Xor { rd, rs, rt },
            FUNCT_NOR => Op::Nor { rd, rs, rt },
            FUNCT_SLT => Op::Slt { rd, rs, rt },
            FUNCT_SLTU => Op::Sltu { rd, rs, rt },
            _ => Op::Interpret { raw: instr.0, pc },
        },

        OP_ADDI => Op::Addi { rt, rs, imm: imm_se, pc },
        OP_ADDIU => Op::Addiu { rt, rs, imm: imm_se },
        OP_SLTI => Op::Slti { rt, rs, imm: imm_se },
        OP_SLTIU => Op::Sltiu { rt, rs, imm: imm_se },
        OP_ANDI => Op::Andi { rt, rs, imm },
        OP_ORI => Op::Ori { rt, rs, imm },
        OP_XORI => Op::Xori { rt, rs, imm },
        OP_LUI => Op::Lui { rt, imm: imm << 16 },

        OP_COP0 => match instr.cop_op() {
            COP_MFC => Op::Mfc0 { rt, rd },
            COP_MTC => Op::Mtc0 { rt, rd },
            op if op & 0x10 != 0 && instr.funct() == COP0_FUNCT_RFE => Op::Rfe,
            _ => Op::Interpret { raw: instr.0, pc },
        },

        OP_LB => load(LoadKind::Byte, rt, rs, imm_se, pc),
        OP_LH => load(LoadKind::Half, rt, rs, imm_se, pc),
        OP_LWL => load(LoadKind::WordLeft, rt, rs, imm_se, pc),
        OP_LW => load(LoadKind::Word, rt, rs, imm_se, pc),
        OP_LBU => load(LoadKind::ByteUnsigned, rt, rs, imm_se, pc),
        OP_LHU => load(LoadKind::HalfUnsigned, rt, rs, imm_se, pc),
        OP_LWR => load(LoadKind::WordRight, rt, rs, imm_se, pc),

        OP_SB => Op::Store { kind: StoreKind::Byte, rt, base: rs, offset: imm_se, pc },
        OP_SH => Op::Store { kind: StoreKind::Half, rt, base: rs, offset: imm_se, pc },
        OP_SWL => Op::Store { kind: StoreKind::WordLeft, rt, base: rs, offset: imm_se, pc },
        OP_SW => Op::Store { kind: StoreKind::Word, rt, base: rs, offset: imm_se, pc },
        OP_SWR => Op::Store { kind: StoreKind::WordRight, rt, base: rs, offset: imm_se, pc },

        // COP1-3, LWCz/SWCz and reserved opcodes
        _ => Op::Interpret { raw: instr.0, pc },
    };

    elide_dead_write(op)
}

fn load(kind: LoadKind, rt: u8, base: u8, offset: u32, pc: u32) -> Op {
    Op::Load { kind, rt, base, offset, pc }
}

/// ALU ops writing r0 do nothing. Trapping ops and loads are kept since
/// their side effects still happen.
fn elide_dead_write(op: Op) -> Op {
    let dead = match op {
        Op::Sll { rd, .. }
        | Op::Srl { rd, .. }
        | Op::Sra { rd, .. }
        | Op::Sllv { rd, .. }
        | Op::Srlv { rd, .. }
        | Op::Srav { rd, .. }
        | Op::Addu { rd, .. }
        | Op::Subu { rd, .. }
        | Op::And { rd, .. }
        | Op::Or { rd, .. }
        | Op::Xor { rd, .. }
        | Op::Nor { rd, .. }
        | Op::Slt { rd, .. }
        | Op::Sltu { rd, .. }
        | Op::Mfhi { rd }
        | Op::Mflo { rd } => rd == 0,
        Op::Addiu { rt, .. }
        | Op::Slti { rt, .. }
        | Op::Sltiu { rt, .. }
        | Op::Andi { rt, .. }
        | Op::Ori { rt, .. }
        | Op::Xori { rt, .. }
        | Op::Lui { rt, .. } => rt == 0,
        _ => false,
    };
    if dead {
        Op::Nop
    } else {
        op
    }
}

/// Head op of a control-flow unit
fn translate_control(instr: Instruction, pc: u32) -> Op {
    let ret = pc.wrapping_add(8);
    let rs = instr.rs();
    let rt = instr.rt();
    let target = instr.branch_target(pc);

    match instr.opcode() {
        OP_SPECIAL => match instr.funct() {
            FUNCT_JALR => Op::JumpReg { rs, rd: instr.rd(), ret },
            _ => Op::JumpReg { rs, rd: 0, ret },
        },
        OP_BCOND => Op::Branch {
            cond: if rt & BCOND_GEZ != 0 { BranchCond::Gez } else { BranchCond::Ltz },
            rs,
            rt: 0,
            target,
            link: rt & 0x1E == BCOND_LINK,
            ret,
        },
        OP_J => Op::Jump { target: instr.jump_target(pc), link: false, ret },
        OP_JAL => Op::Jump { target: instr.jump_target(pc), link: true, ret },
        OP_BEQ => Op::Branch { cond: BranchCond::Eq, rs, rt, target, link: false, ret },
        OP_BNE => Op::Branch { cond: BranchCond::Ne, rs, rt, target, link: false, ret },
        OP_BLEZ => Op::Branch { cond: BranchCond::Lez, rs, rt: 0, target, link: false, ret },
        _ => Op::Branch { cond: BranchCond::Gtz, rs, rt: 0, target, link: false, ret },
    }
}

/// A branch sitting in another branch's delay slot only writes its link
/// register. LUI with a full-width immediate is a plain constant load.
fn translate_delay_control(instr: Instruction, pc: u32) -> Op {
    let ret = pc.wrapping_add(8);
    let link_reg = match instr.opcode() {
        OP_SPECIAL if instr.funct() == FUNCT_JALR => instr.rd(),
        OP_JAL => 31,
        OP_BCOND if instr.rt() & 0x1E == BCOND_LINK => 31,
        _ => 0,
    };
    if link_reg == 0 {
        Op::Nop
    } else {
        Op::Lui { rt: link_reg, imm: ret }
    }
}

/// Prefix every run of two or more native-capable ops with a `Native` op.
/// Entry offsets are remapped; an entry at the head of a run lands on the
/// `Native` op, entries inside a run keep using the portable ops.
fn fuse_native_runs(t: &mut Translation, backend: &mut NativeBackend) -> Result<(), ArenaFull> {
    let old = std::mem::take(&mut t.ops);
    let mut ops = Vec::with_capacity(old.len() + 8);
    let mut remap = vec![0u16; old.len()];

    let mut i = 0;
    while i < old.len() {
        let run = old[i..].iter().take_while(|op| op.is_native_candidate()).count();
        if run >= 2 {
            let head = ops.len();
            if let Some(seg) = backend.compile(&old[i..i + run])? {
                ops.push(Op::Native { seg, count: run as u16 });
                t.native_segments += 1;
            }
            for (j, op) in old[i..i + run].iter().enumerate() {
                remap[i + j] = ops.len() as u16;
                ops.push(*op);
            }
            remap[i] = head as u16;
            i += run;
        } else {
            remap[i] = ops.len() as u16;
            ops.push(old[i]);
            i += 1;
        }
    }

    for entry in t.entries.iter_mut() {
        *entry = remap[*entry as usize];
    }
    t.ops = ops;
    Ok(())
}
