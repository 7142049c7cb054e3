//! Translated code representation
//!
//! A page translates to a flat stream of micro-ops. Registers are baked in
//! as indices and immediates are pre-extended, so executing an op never
//! decodes anything.

use crate::memory::router::PAGE_INSTRUCTIONS;

pub type Reg = u8;

/// Load flavours
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadKind {
    /// LB
    Byte,
    /// LBU
    ByteUnsigned,
    /// LH
    Half,
    /// LHU
    HalfUnsigned,
    /// LW
    Word,
    /// LWL
    WordLeft,
    /// LWR
    WordRight,
}

/// Store flavours
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Byte,
    Half,
    Word,
    /// SWL
    WordLeft,
    /// SWR
    WordRight,
}

/// Conditional branch predicates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchCond {
    /// BEQ rs, rt
    Eq,
    /// BNE rs, rt
    Ne,
    /// BLEZ rs
    Lez,
    /// BGTZ rs
    Gtz,
    /// BLTZ / BLTZAL rs
    Ltz,
    /// BGEZ / BGEZAL rs
    Gez,
}

impl BranchCond {
    #[inline(always)]
    pub fn evaluate(self, rs: u32, rt: u32) -> bool {
        match self {
            BranchCond::Eq => rs == rt,
            BranchCond::Ne => rs != rt,
            BranchCond::Lez => (rs as i32) <= 0,
            BranchCond::Gtz => (rs as i32) > 0,
            BranchCond::Ltz => (rs as i32) < 0,
            BranchCond::Gez => (rs as i32) >= 0,
        }
    }
}

/// One micro-op
///
/// Ops that can fault carry the guest PC of their instruction so the
/// exception can be raised without any side table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Nop,

    Sll { rd: Reg, rt: Reg, sa: u8 },
    Srl { rd: Reg, rt: Reg, sa: u8 },
    Sra { rd: Reg, rt: Reg, sa: u8 },
    Sllv { rd: Reg, rt: Reg, rs: Reg },
    Srlv { rd: Reg, rt: Reg, rs: Reg },
    Srav { rd: Reg, rt: Reg, rs: Reg },

    Addu { rd: Reg, rs: Reg, rt: Reg },
    Subu { rd: Reg, rs: Reg, rt: Reg },
    And { rd: Reg, rs: Reg, rt: Reg },
    Or { rd: Reg, rs: Reg, rt: Reg },
    Xor { rd: Reg, rs: Reg, rt: Reg },
    Nor { rd: Reg, rs: Reg, rt: Reg },
    Slt { rd: Reg, rs: Reg, rt: Reg },
    Sltu { rd: Reg, rs: Reg, rt: Reg },
    /// Traps on signed overflow
    Add { rd: Reg, rs: Reg, rt: Reg, pc: u32 },
    Sub { rd: Reg, rs: Reg, rt: Reg, pc: u32 },

    /// Immediates are already sign- or zero-extended as the opcode wants
    Addiu { rt: Reg, rs: Reg, imm: u32 },
    Addi { rt: Reg, rs: Reg, imm: u32, pc: u32 },
    Slti { rt: Reg, rs: Reg, imm: u32 },
    Sltiu { rt: Reg, rs: Reg, imm: u32 },
    Andi { rt: Reg, rs: Reg, imm: u32 },
    Ori { rt: Reg, rs: Reg, imm: u32 },
    Xori { rt: Reg, rs: Reg, imm: u32 },
    /// `imm` is already shifted into the upper half
    Lui { rt: Reg, imm: u32 },

    Mfhi { rd: Reg },
    Mflo { rd: Reg },
    Mthi { rs: Reg },
    Mtlo { rs: Reg },
    Mult { rs: Reg, rt: Reg },
    Multu { rs: Reg, rt: Reg },
    Div { rs: Reg, rt: Reg },
    Divu { rs: Reg, rt: Reg },

    Load { kind: LoadKind, rt: Reg, base: Reg, offset: u32, pc: u32 },
    Store { kind: StoreKind, rt: Reg, base: Reg, offset: u32, pc: u32 },

    Mfc0 { rt: Reg, rd: Reg },
    Mtc0 { rt: Reg, rd: Reg },
    Rfe,
    Syscall { pc: u32 },
    Break { pc: u32 },

    /// Hand the instruction to the interpreter (COP2, reserved opcodes...)
    Interpret { raw: u32, pc: u32 },

    /// Evaluate a conditional branch. The delay slot follows, then `EndBranch`.
    /// With `link` set, r31 receives `ret` whether or not the branch is taken.
    Branch { cond: BranchCond, rs: Reg, rt: Reg, target: u32, link: bool, ret: u32 },
    /// J / JAL (`link` writes `ret` to r31)
    Jump { target: u32, link: bool, ret: u32 },
    /// JR / JALR (`rd` 0 means no link)
    JumpReg { rs: Reg, rd: Reg, ret: u32 },
    /// Leave the block at the target chosen by the preceding branch
    EndBranch,
    /// The branch was the last instruction of the page: its delay slot
    /// lives in the next page and is run by the dispatcher
    BranchOutOfPage { delay_pc: u32 },
    /// Straight-line code reached the end of the page
    FallThrough { next_pc: u32 },

    /// Native code for the `count` ops that follow, which it replaces
    Native { seg: u32, count: u16 },
}

impl Op {
    /// Cycles charged when the op executes
    #[inline(always)]
    pub fn cycles(&self) -> i32 {
        match self {
            Op::Load { .. } => 2,
            Op::Mult { .. } | Op::Multu { .. } => 7,
            Op::Div { .. } | Op::Divu { .. } => 36,
            Op::Interpret { raw, .. } => {
                crate::cpu::interpreter::instruction_cycles(crate::cpu::decode::Instruction(*raw))
            }
            Op::EndBranch | Op::BranchOutOfPage { .. } | Op::FallThrough { .. } | Op::Native { .. } => 0,
            _ => 1,
        }
    }

    /// True for ops the native backend can compile: pure register ALU
    /// work that can neither fault nor touch memory
    pub fn is_native_candidate(&self) -> bool {
        matches!(
            self,
            Op::Nop
                | Op::Sll { .. }
                | Op::Srl { .. }
                | Op::Sra { .. }
                | Op::Sllv { .. }
                | Op::Srlv { .. }
                | Op::Srav { .. }
                | Op::Addu { .. }
                | Op::Subu { .. }
                | Op::And { .. }
                | Op::Or { .. }
                | Op::Xor { .. }
                | Op::Nor { .. }
                | Op::Slt { .. }
                | Op::Sltu { .. }
                | Op::Addiu { .. }
                | Op::Slti { .. }
                | Op::Sltiu { .. }
                | Op::Andi { .. }
                | Op::Ori { .. }
                | Op::Xori { .. }
                | Op::Lui { .. }
        )
    }

    /// False for the bookkeeping ops that do not stand for a guest instruction
    #[inline(always)]
    pub fn is_instruction(&self) -> bool {
        !matches!(
            self,
            Op::EndBranch | Op::BranchOutOfPage { .. } | Op::FallThrough { .. } | Op::Native { .. }
        )
    }

    /// Register the op writes directly. Loads and MFC0 report `None`: their
    /// result goes through the load delay.
    #[inline(always)]
    pub fn dest(&self) -> Option<Reg> {
        match *self {
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
            | Op::Add { rd, .. }
            | Op::Sub { rd, .. }
            | Op::Mfhi { rd }
            | Op::Mflo { rd }
            | Op::JumpReg { rd, .. } => Some(rd),
            Op::Addiu { rt, .. }
            | Op::Addi { rt, .. }
            | Op::Slti { rt, .. }
            | Op::Sltiu { rt, .. }
            | Op::Andi { rt, .. }
            | Op::Ori { rt, .. }
            | Op::Xori { rt, .. }
            | Op::Lui { rt, .. } => Some(rt),
            Op::Branch { link: true, .. } | Op::Jump { link: true, .. } => Some(31),
            Op::Interpret { raw, .. } => crate::cpu::interpreter::instruction_dest(crate::cpu::decode::Instruction(raw)),
            _ => None,
        }
    }

    /// Guest PC carried by ops that can fault
    #[inline(always)]
    pub fn pc(&self) -> Option<u32> {
        match *self {
            Op::Add { pc, .. }
            | Op::Sub { pc, .. }
            | Op::Addi { pc, .. }
            | Op::Load { pc, .. }
            | Op::Store { pc, .. }
            | Op::Syscall { pc }
            | Op::Break { pc }
            | Op::Interpret { pc, .. } => Some(pc),
            _ => None,
        }
    }

    /// Ops after which the executor checks whether its own page was
    /// invalidated (stores, and anything that may reach a device)
    #[inline(always)]
    pub fn touches_memory(&self) -> bool {
        matches!(self, Op::Load { .. } | Op::Store { .. } | Op::Interpret { .. })
    }
}

/// Range of ops inside the code cache arena
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRef {
    pub start: u32,
    pub len: u32,
}

impl BlockRef {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.start + self.len) as usize
    }
}

/// The installed translation of one page
#[derive(Clone, Debug)]
pub struct TranslatedBlock {
    /// Ops in the code cache
    pub code: BlockRef,
    /// Virtual address of the first instruction when translated. PCs baked
    /// into the ops are only right for this alias of the page.
    pub base: u32,
    /// Op offset (relative to `code.start`) for each instruction slot
    pub entries: Box<[u16; PAGE_INSTRUCTIONS]>,
}
