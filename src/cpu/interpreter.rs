//! Reference interpreter
//!
//! Executes one instruction at a time. Translated blocks must leave the
//! machine in exactly the state this interpreter would, cycle counter
//! included. It is also the fallback for instructions the translator does not
//! inline and for delay slots that sit in the next page.

use super::decode::*;
use super::Exception;
use crate::bus::Machine;
use crate::dynarec::ir::{LoadKind, StoreKind};
use crate::memory::{resolve, Region, Route, Width};

/// Cycles charged for `instr`
#[inline(always)]
pub fn instruction_cycles(instr: Instruction) -> i32 {
    match instr.opcode() {
        OP_LB..=OP_LWR | OP_LWC0..=OP_LWC3 => 2,
        OP_SPECIAL => match instr.funct() {
            FUNCT_MULT | FUNCT_MULTU => 7,
            FUNCT_DIV | FUNCT_DIVU => 36,
            _ => 1,
        },
        _ => 1,
    }
}

/// Fetch the instruction word at `pc`
pub(crate) fn fetch(m: &Machine<'_>, pc: u32) -> Result<Instruction, Exception> {
    if pc & 3 != 0 {
        return Err(Exception::LoadAddressError(pc));
    }
    match resolve(pc) {
        Route::Mapped(r) if r.region != Region::Scratchpad => Ok(Instruction(m.memory.fetch(&r))),
        _ => Err(Exception::InstructionBusError),
    }
}

/// Register `instr` writes directly. Loads and MFC0 go through the load
/// delay instead and report `None`.
pub(crate) fn instruction_dest(instr: Instruction) -> Option<u8> {
    match instr.opcode() {
        OP_SPECIAL => match instr.funct() {
            FUNCT_SLL..=FUNCT_SRAV | FUNCT_JALR | FUNCT_MFHI | FUNCT_MFLO | FUNCT_ADD..=FUNCT_SLTU => {
                Some(instr.rd())
            }
            _ => None,
        },
        OP_BCOND if instr.rt() & 0x1E == BCOND_LINK => Some(31),
        OP_JAL => Some(31),
        OP_ADDI..=OP_LUI => Some(instr.rt()),
        _ => None,
    }
}

/// Execute the instruction at `pc` and advance
pub(crate) fn step(m: &mut Machine<'_>) {
    let pc = m.state.pc;
    let delay_target = m.state.pending_branch.take();
    let in_delay = delay_target.is_some();
    let pending = m.state.load_delay.take();

    let instr = match fetch(m, pc) {
        Ok(instr) => instr,
        Err(e) => {
            // Failed fetches cost one cycle
            m.state.counter = m.state.counter.saturating_sub(1);
            m.state.commit_load(pending, None);
            m.state.raise(e, pc, in_delay);
            return;
        }
    };

    m.state.counter = m.state.counter.saturating_sub(instruction_cycles(instr));
    match execute(m, instr, pc, in_delay, pending) {
        Ok(next) => {
            m.state.commit_load(pending, instruction_dest(instr));
            m.state.pending_branch = next;
            m.state.pc = delay_target.unwrap_or(pc.wrapping_add(4));
        }
        Err(e) => {
            m.state.commit_load(pending, None);
            m.state.raise(e, pc, in_delay);
        }
    }
}

/// Execute one decoded instruction.
///
/// Control-flow instructions return where execution continues after their
/// delay slot (taken target, or `pc + 8` when not taken). Inside a delay
/// slot they only perform their link write and return `None`.
///
/// `pending` is the load still in flight from the previous instruction.
/// Register reads do not see it, except the merge of LWL/LWR. Loads queue
/// their result in `state.load_delay`; the caller lands `pending`.
pub(crate) fn execute(
    m: &mut Machine<'_>,
    instr: Instruction,
    pc: u32,
    in_delay: bool,
    pending: Option<(u8, u32)>,
) -> Result<Option<u32>, Exception> {
    let rs = instr.rs();
    let rt = instr.rt();
    let rd = instr.rd();
    let s = m.state.reg(rs);
    let t = m.state.reg(rt);
    let ret = pc.wrapping_add(8);

    // Resolve a branch decision, honoring the delay-slot rule
    let branch = |taken: bool, target: u32| -> Option<u32> {
        if in_delay {
            None
        } else if taken {
            Some(target)
        } else {
            Some(ret)
        }
    };

    match instr.opcode() {
        OP_SPECIAL => match instr.funct() {
            FUNCT_SLL => m.state.set_reg(rd, t << instr.shamt()),
            FUNCT_SRL => m.state.set_reg(rd, t >> instr.shamt()),
            FUNCT_SRA => m.state.set_reg(rd, ((t as i32) >> instr.shamt()) as u32),
            FUNCT_SLLV => m.state.set_reg(rd, t << (s & 0x1F)),
            FUNCT_SRLV => m.state.set_reg(rd, t >> (s & 0x1F)),
            FUNCT_SRAV => m.state.set_reg(rd, ((t as i32) >> (s & 0x1F)) as u32),
            FUNCT_JR => return Ok(branch(true, s)),
            FUNCT_JALR => {
                m.state.set_reg(rd, ret);
                return Ok(branch(true, s));
            }
            FUNCT_SYSCALL => return Err(Exception::Syscall),
            FUNCT_BREAK => return Err(Exception::Break),
            FUNCT_MFHI => m.state.set_reg(rd, m.state.hi),
            FUNCT_MTHI => m.state.hi = s,
            FUNCT_MFLO => m.state.set_reg(rd, m.state.lo),
            FUNCT_MTLO => m.state.lo = s,
            FUNCT_MULT => mult(m.state, s, t),
            FUNCT_MULTU => multu(m.state, s, t),
            FUNCT_DIV => div(m.state, s, t),
            FUNCT_DIVU => divu(m.state, s, t),
            FUNCT_ADD => {
                let v = (s as i32).checked_add(t as i32).ok_or(Exception::Overflow)?;
                m.state.set_reg(rd, v as u32);
            }
            FUNCT_ADDU => m.state.set_reg(rd, s.wrapping_add(t)),
            FUNCT_SUB => {
                let v = (s as i32).checked_sub(t as i32).ok_or(Exception::Overflow)?;
                m.state.set_reg(rd, v as u32);
            }
            FUNCT_SUBU => m.state.set_reg(rd, s.wrapping_sub(t)),
            FUNCT_AND => m.state.set_reg(rd, s & t),
            FUNCT_OR => m.state.set_reg(rd, s | t),
            FUNCT_XOR => m.state.set_reg(rd, s ^ t),
            FUNCT_NOR => m.state.set_reg(rd, !(s | t)),
            FUNCT_SLT => m.state.set_reg(rd, ((s as i32) < (t as i32)) as u32),
            FUNCT_SLTU => m.state.set_reg(rd, (s < t) as u32),
            _ => return Err(Exception::ReservedInstruction),
        },

        OP_BCOND => {
            let taken = if rt & BCOND_GEZ != 0 { (s as i32) >= 0 } else { (s as i32) < 0 };
            if rt & 0x1E == BCOND_LINK {
                m.state.set_reg(31, ret);
            }
            return Ok(branch(taken, instr.branch_target(pc)));
        }
        OP_J => return Ok(branch(true, instr.jump_target(pc))),
        OP_JAL => {
            m.state.set_reg(31, ret);
            return Ok(branch(true, instr.jump_target(pc)));
        }
        OP_BEQ => return Ok(branch(s == t, instr.branch_target(pc))),
        OP_BNE => return Ok(branch(s != t, instr.branch_target(pc))),
        OP_BLEZ => return Ok(branch((s as i32) <= 0, instr.branch_target(pc))),
        OP_BGTZ => return Ok(branch((s as i32) > 0, instr.branch_target(pc))),

        OP_ADDI => {
            let v = (s as i32).checked_add(instr.imm_se() as i32).ok_or(Exception::Overflow)?;
            m.state.set_reg(rt, v as u32);
        }
        OP_ADDIU => m.state.set_reg(rt, s.wrapping_add(instr.imm_se())),
        OP_SLTI => m.state.set_reg(rt, ((s as i32) < (instr.imm_se() as i32)) as u32),
        OP_SLTIU => m.state.set_reg(rt, (s < instr.imm_se()) as u32),
        OP_ANDI => m.state.set_reg(rt, s & instr.imm()),
        OP_ORI => m.state.set_reg(rt, s | instr.imm()),
        OP_XORI => m.state.set_reg(rt, s ^ instr.imm()),
        OP_LUI => m.state.set_reg(rt, instr.imm() << 16),

        OP_COP0 => match instr.cop_op() {
            COP_MFC => m.state.delay_load(rt, m.state.cop0.read(rd)),
            COP_MTC => m.state.cop0.write(rd, t),
            op if op & 0x10 != 0 && instr.funct() == COP0_FUNCT_RFE => m.state.cop0.return_from_exception(),
            _ => return Err(Exception::ReservedInstruction),
        },
        // GTE commands and transfers are accepted but not emulated
        OP_COP2 | OP_LWC2 | OP_SWC2 => {
            if !m.state.cop0.cop2_enabled() {
                return Err(Exception::CoprocessorUnusable(2));
            }
        }
        OP_COP1 | OP_LWC1 | OP_SWC1 => return Err(Exception::CoprocessorUnusable(1)),
        OP_COP3 | OP_LWC3 | OP_SWC3 => return Err(Exception::CoprocessorUnusable(3)),

        OP_LB => load_into(m, LoadKind::Byte, rt, s, instr, pending)?,
        OP_LH => load_into(m, LoadKind::Half, rt, s, instr, pending)?,
        OP_LWL => load_into(m, LoadKind::WordLeft, rt, s, instr, pending)?,
        OP_LW => load_into(m, LoadKind::Word, rt, s, instr, pending)?,
        OP_LBU => load_into(m, LoadKind::ByteUnsigned, rt, s, instr, pending)?,
        OP_LHU => load_into(m, LoadKind::HalfUnsigned, rt, s, instr, pending)?,
        OP_LWR => load_into(m, LoadKind::WordRight, rt, s, instr, pending)?,

        OP_SB => store(m, StoreKind::Byte, s.wrapping_add(instr.imm_se()), t)?,
        OP_SH => store(m, StoreKind::Half, s.wrapping_add(instr.imm_se()), t)?,
        OP_SWL => store(m, StoreKind::WordLeft, s.wrapping_add(instr.imm_se()), t)?,
        OP_SW => store(m, StoreKind::Word, s.wrapping_add(instr.imm_se()), t)?,
        OP_SWR => store(m, StoreKind::WordRight, s.wrapping_add(instr.imm_se()), t)?,

        _ => return Err(Exception::ReservedInstruction),
    }

    Ok(None)
}

fn load_into(
    m: &mut Machine<'_>,
    kind: LoadKind,
    rt: u8,
    base: u32,
    instr: Instruction,
    pending: Option<(u8, u32)>,
) -> Result<(), Exception> {
    let current = merge_source(m.state, rt, pending);
    let value = load(m, kind, base.wrapping_add(instr.imm_se()), current)?;
    m.state.delay_load(rt, value);
    Ok(())
}

/// Value LWL/LWR merge into: the in-flight load to `rt` if there is one
#[inline(always)]
pub(crate) fn merge_source(state: &super::CpuState, rt: u8, pending: Option<(u8, u32)>) -> u32 {
    match pending {
        Some((reg, value)) if reg == rt => value,
        _ => state.reg(rt),
    }
}

/// Perform a load and return the new value of the target register.
/// `current` is its old value, merged into by LWL/LWR.
#[inline(always)]
pub(crate) fn load(m: &mut Machine<'_>, kind: LoadKind, addr: u32, current: u32) -> Result<u32, Exception> {
    let value = match kind {
        LoadKind::Byte => m.load(addr, Width::Byte) as u8 as i8 as i32 as u32,
        LoadKind::ByteUnsigned => m.load(addr, Width::Byte),
        LoadKind::Half | LoadKind::HalfUnsigned => {
            if !Width::Half.is_aligned(addr) {
                return Err(Exception::LoadAddressError(addr));
            }
            let half = m.load(addr, Width::Half);
            if kind == LoadKind::Half {
                half as u16 as i16 as i32 as u32
            } else {
                half
            }
        }
        LoadKind::Word => {
            if !Width::Word.is_aligned(addr) {
                return Err(Exception::LoadAddressError(addr));
            }
            m.load(addr, Width::Word)
        }
        LoadKind::WordLeft => {
            let word = m.load(addr & !3, Width::Word);
            match addr & 3 {
                0 => (current & 0x00FF_FFFF) | (word << 24),
                1 => (current & 0x0000_FFFF) | (word << 16),
                2 => (current & 0x0000_00FF) | (word << 8),
                _ => word,
            }
        }
        LoadKind::WordRight => {
            let word = m.load(addr & !3, Width::Word);
            match addr & 3 {
                0 => word,
                1 => (current & 0xFF00_0000) | (word >> 8),
                2 => (current & 0xFFFF_0000) | (word >> 16),
                _ => (current & 0xFFFF_FF00) | (word >> 24),
            }
        }
    };
    Ok(value)
}

/// RAM or scratchpad, where partial word stores merge in place
#[inline(always)]
fn is_memory(addr: u32) -> bool {
    matches!(resolve(addr), Route::Mapped(r) if r.region != Region::Bios)
}

/// Perform a store of register value `value`
#[inline(always)]
pub(crate) fn store(m: &mut Machine<'_>, kind: StoreKind, addr: u32, value: u32) -> Result<(), Exception> {
    match kind {
        StoreKind::Byte => m.store(addr, value, Width::Byte),
        StoreKind::Half => {
            if !Width::Half.is_aligned(addr) {
                return Err(Exception::StoreAddressError(addr));
            }
            m.store(addr, value, Width::Half);
        }
        StoreKind::Word => {
            if !Width::Word.is_aligned(addr) {
                return Err(Exception::StoreAddressError(addr));
            }
            m.store(addr, value, Width::Word);
        }
        StoreKind::WordLeft | StoreKind::WordRight if !is_memory(addr) => {
            // Devices see one bus write at the issued address, bytes in
            // the lanes SWL/SWR drive
            let shift = (addr & 3) * 8;
            let lanes = if kind == StoreKind::WordLeft { value >> (24 - shift) } else { value << shift };
            m.store(addr, lanes, Width::Word);
        }
        StoreKind::WordLeft => {
            let aligned = addr & !3;
            let mem = m.load(aligned, Width::Word);
            let merged = match addr & 3 {
                0 => (mem & 0xFFFF_FF00) | (value >> 24),
                1 => (mem & 0xFFFF_0000) | (value >> 16),
                2 => (mem & 0xFF00_0000) | (value >> 8),
                _ => value,
            };
            m.store(aligned, merged, Width::Word);
        }
        StoreKind::WordRight => {
            let aligned = addr & !3;
            let mem = m.load(aligned, Width::Word);
            let merged = match addr & 3 {
                0 => value,
                1 => (mem & 0x0000_00FF) | (value << 8),
                2 => (mem & 0x0000_FFFF) | (value << 16),
                _ => (mem & 0x00FF_FFFF) | (value << 24),
            };
            m.store(aligned, merged, Width::Word);
        }
    }
    Ok(())
}

#[inline(always)]
pub(crate) fn mult(state: &mut super::CpuState, a: u32, b: u32) {
    let product = (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64;
    state.hi = (product >> 32) as u32;
    state.lo = product as u32;
}

#[inline(always)]
pub(crate) fn multu(state: &mut super::CpuState, a: u32, b: u32) {
    let product = (a as u64) * (b as u64);
    state.hi = (product >> 32) as u32;
    state.lo = product as u32;
}

/// Signed divide. Division by zero and `i32::MIN / -1` do not trap; they
/// produce the values the hardware leaves behind.
#[inline(always)]
pub(crate) fn div(state: &mut super::CpuState, a: u32, b: u32) {
    let n = a as i32;
    let d = b as i32;
    if d == 0 {
        state.hi = a;
        state.lo = if n >= 0 { 0xFFFF_FFFF } else { 1 };
    } else if n == i32::MIN && d == -1 {
        state.hi = 0;
        state.lo = 0x8000_0000;
    } else {
        state.hi = (n % d) as u32;
        state.lo = (n / d) as u32;
    }
}

#[inline(always)]
pub(crate) fn divu(state: &mut super::CpuState, a: u32, b: u32) {
    if b == 0 {
        state.hi = a;
        state.lo = 0xFFFF_FFFF;
    } else {
        state.hi = a % b;
        state.lo = a / b;
    }
}
