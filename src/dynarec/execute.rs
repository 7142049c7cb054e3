//! Block executor
//!
//! Runs translated ops from an entry offset until the block leaves: a branch
//! unit completes, the page ends, an exception is raised, or a store
//! invalidates the page being executed.

use super::ir::Op;
use super::native::NativeBackend;
use crate::bus::Machine;
use crate::cpu::decode::Instruction;
use crate::cpu::interpreter;
use crate::cpu::Exception;
use crate::memory::router::PageIndex;

/// Why a block stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockExit {
    /// Branch taken/not taken, page end, or out-of-page delay slot
    Done,
    /// A guest exception was raised; PC is at the handler
    Exception,
    /// The page was written to; PC is at the next instruction
    Invalidated,
}

/// Execute `code` starting at op `entry`. `page` is the page the code was
/// translated from.
///
/// A load in flight in `state.load_delay` when the block is entered lands
/// after the first op, as it would in the interpreter.
pub(crate) fn run_block(
    m: &mut Machine<'_>,
    code: &[Op],
    entry: usize,
    page: PageIndex,
    mut native: Option<&mut NativeBackend>,
) -> BlockExit {
    let mut pos = entry;
    let mut in_delay = false;
    let mut next_pc = 0u32;

    macro_rules! alu {
        ($rd:expr, $value:expr) => {{
            let v = $value;
            m.state.set_reg($rd, v);
        }};
    }

    loop {
        let op = code[pos];
        pos += 1;
        m.state.counter = m.state.counter.saturating_sub(op.cycles());
        let pending = if op.is_instruction() { m.state.load_delay.take() } else { None };

        macro_rules! fault {
            ($exc:expr, $pc:expr) => {{
                m.state.commit_load(pending, None);
                m.state.raise($exc, $pc, in_delay);
                return BlockExit::Exception;
            }};
        }

        match op {
            Op::Nop => {}

            Op::Sll { rd, rt, sa } => alu!(rd, m.state.reg(rt) << sa),
            Op::Srl { rd, rt, sa } => alu!(rd, m.state.reg(rt) >> sa),
            Op::Sra { rd, rt, sa } => alu!(rd, ((m.state.reg(rt) as i32) >> sa) as u32),
            Op::Sllv { rd, rt, rs } => alu!(rd, m.state.reg(rt) << (m.state.reg(rs) & 0x1F)),
            Op::Srlv { rd, rt, rs } => alu!(rd, m.state.reg(rt) >> (m.state.reg(rs) & 0x1F)),
            Op::Srav { rd, rt, rs } => alu!(rd, ((m.state.reg(rt) as i32) >> (m.state.reg(rs) & 0x1F)) as u32),

            Op::Addu { rd, rs, rt } => alu!(rd, m.state.reg(rs).wrapping_add(m.state.reg(rt))),
            Op::Subu { rd, rs, rt } => alu!(rd, m.state.reg(rs).wrapping_sub(m.state.reg(rt))),
            Op::And { rd, rs, rt } => alu!(rd, m.state.reg(rs) & m.state.reg(rt)),
            Op::Or { rd, rs, rt } => alu!(rd, m.state.reg(rs) | m.state.reg(rt)),
            Op::Xor { rd, rs, rt } => alu!(rd, m.state.reg(rs) ^ m.state.reg(rt)),
            Op::Nor { rd, rs, rt } => alu!(rd, !(m.state.reg(rs) | m.state.reg(rt))),
            Op::Slt { rd, rs, rt } => alu!(rd, ((m.state.reg(rs) as i32) < (m.state.reg(rt) as i32)) as u32),
            Op::Sltu { rd, rs, rt } => alu!(rd, (m.state.reg(rs) < m.state.reg(rt)) as u32),
            Op::Add { rd, rs, rt, pc } => match (m.state.reg(rs) as i32).checked_add(m.state.reg(rt) as i32) {
                Some(v) => m.state.set_reg(rd, v as u32),
                None => fault!(Exception::Overflow, pc),
            },
            Op::Sub { rd, rs, rt, pc } => match (m.state.reg(rs) as i32).checked_sub(m.state.reg(rt) as i32) {
                Some(v) => m.state.set_reg(rd, v as u32),
                None => fault!(Exception::Overflow, pc),
            },

            Op::Addiu { rt, rs, imm } => alu!(rt, m.state.reg(rs).wrapping_add(imm)),
            Op::Addi { rt, rs, imm, pc } => match (m.state.reg(rs) as i32).checked_add(imm as i32) {
                Some(v) => m.state.set_reg(rt, v as u32),
                None => fault!(Exception::Overflow, pc),
            },
            Op::Slti { rt, rs, imm } => alu!(rt, ((m.state.reg(rs) as i32) < (imm as i32)) as u32),
            Op::Sltiu { rt, rs, imm } => alu!(rt, (m.state.reg(rs) < imm) as u32),
            Op::Andi { rt, rs, imm } => alu!(rt, m.state.reg(rs) & imm),
            Op::Ori { rt, rs, imm } => alu!(rt, m.state.reg(rs) | imm),
            Op::Xori { rt, rs, imm } => alu!(rt, m.state.reg(rs) ^ imm),
            Op::Lui { rt, imm } => m.state.set_reg(rt, imm),

            Op::Mfhi { rd } => alu!(rd, m.state.hi),
            Op::Mflo { rd } => alu!(rd, m.state.lo),
            Op::Mthi { rs } => m.state.hi = m.state.reg(rs),
            Op::Mtlo { rs } => m.state.lo = m.state.reg(rs),
            Op::Mult { rs, rt } => {
                let (a, b) = (m.state.reg(rs), m.state.reg(rt));
                interpreter::mult(m.state, a, b);
            }
            Op::Multu { rs, rt } => {
                let (a, b) = (m.state.reg(rs), m.state.reg(rt));
                interpreter::multu(m.state, a, b);
            }
            Op::Div { rs, rt } => {
                let (a, b) = (m.state.reg(rs), m.state.reg(rt));
                interpreter::div(m.state, a, b);
            }
            Op::Divu { rs, rt } => {
                let (a, b) = (m.state.reg(rs), m.state.reg(rt));
                interpreter::divu(m.state, a, b);
            }

            Op::Load { kind, rt, base, offset, pc } => {
                let addr = m.state.reg(base).wrapping_add(offset);
                let current = interpreter::merge_source(m.state, rt, pending);
                match interpreter::load(m, kind, addr, current) {
                    Ok(v) => m.state.delay_load(rt, v),
                    Err(e) => fault!(e, pc),
                }
            }
            Op::Store { kind, rt, base, offset, pc } => {
                let addr = m.state.reg(base).wrapping_add(offset);
                let value = m.state.reg(rt);
                if let Err(e) = interpreter::store(m, kind, addr, value) {
                    fault!(e, pc);
                }
            }

            Op::Mfc0 { rt, rd } => {
                let v = m.state.cop0.read(rd);
                m.state.delay_load(rt, v);
            }
            Op::Mtc0 { rt, rd } => {
                let v = m.state.reg(rt);
                m.state.cop0.write(rd, v);
            }
            Op::Rfe => m.state.cop0.return_from_exception(),
            Op::Syscall { pc } => fault!(Exception::Syscall, pc),
            Op::Break { pc } => fault!(Exception::Break, pc),

            Op::Interpret { raw, pc } => {
                if let Err(e) = interpreter::execute(m, Instruction(raw), pc, in_delay, pending) {
                    fault!(e, pc);
                }
            }

            Op::Branch { cond, rs, rt, target, link, ret } => {
                let taken = cond.evaluate(m.state.reg(rs), m.state.reg(rt));
                if link {
                    m.state.set_reg(31, ret);
                }
                next_pc = if taken { target } else { ret };
                in_delay = true;
            }
            Op::Jump { target, link, ret } => {
                if link {
                    m.state.set_reg(31, ret);
                }
                next_pc = target;
                in_delay = true;
            }
            Op::JumpReg { rs, rd, ret } => {
                next_pc = m.state.reg(rs);
                m.state.set_reg(rd, ret);
                in_delay = true;
            }
            Op::EndBranch => {
                m.state.pc = next_pc;
                return BlockExit::Done;
            }
            Op::BranchOutOfPage { delay_pc } => {
                m.state.pending_branch = Some(next_pc);
                m.state.pc = delay_pc;
                return BlockExit::Done;
            }
            Op::FallThrough { next_pc } => {
                m.state.pc = next_pc;
                return BlockExit::Done;
            }

            Op::Native { seg, count } => {
                // Without a backend, or with a load in flight, the portable
                // copy that follows runs instead
                if let (Some(backend), None) = (native.as_mut(), m.state.load_delay) {
                    m.state.counter = m.state.counter.saturating_sub(count as i32);
                    backend.call(seg, m.state.gpr_mut());
                    pos += count as usize;
                }
            }
        }

        m.state.commit_load(pending, op.dest());
        if op.touches_memory() && !in_delay && !m.pages.is_valid(page) {
            if let Some(pc) = op.pc() {
                m.state.pc = pc.wrapping_add(4);
                return BlockExit::Invalidated;
            }
        }
    }
}
