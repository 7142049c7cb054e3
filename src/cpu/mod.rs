//! R3000A CPU module
//!
//! Guest register file, COP0 and the reference interpreter. Translated
//! blocks mutate `CpuState` directly.

pub mod cop0;
pub mod decode;
pub mod encode;
pub mod interpreter;

pub use cop0::{Cop0, Exception};

use serde::{Serialize, Deserialize};

/// PC after reset: first BIOS instruction
pub const RESET_PC: u32 = 0xBFC0_0000;

/// CPU state
///
/// Register 0 is hard-wired to zero and has no storage: `regs[i]` holds
/// register `i + 1`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CpuState {
    /// Program counter
    pub pc: u32,
    /// General purpose registers r1-r31
    regs: [u32; 31],
    /// Multiply/divide result registers
    pub hi: u32,
    pub lo: u32,
    /// Cycles left before `run` yields
    pub counter: i32,
    /// Cycles until the next external event
    pub next_event: i32,
    /// System control coprocessor
    pub cop0: Cop0,
    /// Branch target waiting for its delay slot to execute
    pub pending_branch: Option<u32>,
    /// Load result (register, value) that lands after the next instruction
    pub load_delay: Option<(u8, u32)>,
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuState {
    pub fn new() -> Self {
        CpuState {
            pc: RESET_PC,
            regs: [0u32; 31],
            hi: 0,
            lo: 0,
            counter: 0,
            next_event: crate::dynarec::NO_EVENT,
            cop0: Cop0::new(),
            pending_branch: None,
            load_delay: None,
        }
    }

    /// Read register (r0 always returns 0)
    #[inline(always)]
    pub fn reg(&self, reg: u8) -> u32 {
        match reg & 0x1F {
            0 => 0,
            r => self.regs[r as usize - 1],
        }
    }

    /// Write register (r0 writes are ignored)
    #[inline(always)]
    pub fn set_reg(&mut self, reg: u8, value: u32) {
        match reg & 0x1F {
            0 => {}
            r => self.regs[r as usize - 1] = value,
        }
    }

    /// All 32 registers, r0 included as 0
    pub fn registers(&self) -> [u32; 32] {
        let mut out = [0u32; 32];
        out[1..].copy_from_slice(&self.regs);
        out
    }

    /// Backing storage for r1-r31, used by native code
    pub(crate) fn gpr_mut(&mut self) -> &mut [u32; 31] {
        &mut self.regs
    }

    /// Land a delayed load once the instruction after it has run. A write
    /// by that instruction to the same register wins.
    #[inline(always)]
    pub fn commit_load(&mut self, pending: Option<(u8, u32)>, written: Option<u8>) {
        if let Some((reg, value)) = pending {
            if written != Some(reg) {
                self.set_reg(reg, value);
            }
        }
    }

    /// Queue a load result for `reg`. Loads into r0 are dropped.
    #[inline(always)]
    pub fn delay_load(&mut self, reg: u8, value: u32) {
        if reg & 0x1F != 0 {
            self.load_delay = Some((reg & 0x1F, value));
        }
    }

    /// Enter an exception raised by the instruction at `pc`
    pub fn raise(&mut self, exception: Exception, pc: u32, in_delay_slot: bool) {
        self.pending_branch = None;
        self.pc = self.cop0.enter_exception(exception, pc, in_delay_slot);
    }

    /// Reset CPU state. The cycle counters are left alone.
    pub fn reset(&mut self) {
        self.pc = RESET_PC;
        self.regs = [0u32; 31];
        self.hi = 0;
        self.lo = 0;
        self.cop0 = Cop0::new();
        self.pending_branch = None;
        self.load_delay = None;
    }
}
