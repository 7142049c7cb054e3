//! System control coprocessor (COP0) and exceptions
//!
//! Only the registers the R3000A actually implements are modelled. Debug
//! registers (BPC, BDA, DCIC...) are stored raw and have no side effects.

use serde::{Serialize, Deserialize};

/// COP0 register numbers
pub const COP0_BAD_VADDR: u8 = 8;
pub const COP0_SR: u8 = 12;
pub const COP0_CAUSE: u8 = 13;
pub const COP0_EPC: u8 = 14;
pub const COP0_PRID: u8 = 15;

/// SR bits
pub const SR_ISOLATE_CACHE: u32 = 1 << 16;
pub const SR_BEV: u32 = 1 << 22;
pub const SR_CU2: u32 = 1 << 30;

/// Only the software interrupt bits of CAUSE are writable
const CAUSE_WRITABLE: u32 = 0x300;
/// Interrupt pending bits of CAUSE, masked by SR.IM
const CAUSE_IP: u32 = 0xFF00;
/// CAUSE.IP2, wired to the interrupt controller
pub const CAUSE_IP2: u32 = 1 << 10;
/// Current interrupt enable bit of SR
pub const SR_IEC: u32 = 1;
/// Branch delay bit of CAUSE
const CAUSE_BD: u32 = 1 << 31;

/// Processor revision reported by PRId
const PRID_R3000A: u32 = 0x0000_0002;

/// Guest-visible exceptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// External interrupt taken at an instruction boundary
    Interrupt,
    /// Misaligned load or instruction fetch (bad address)
    LoadAddressError(u32),
    /// Misaligned store (bad address)
    StoreAddressError(u32),
    /// Instruction fetch from a region that cannot hold code
    InstructionBusError,
    Syscall,
    Break,
    ReservedInstruction,
    /// Coprocessor N unusable
    CoprocessorUnusable(u8),
    /// Signed ADD/ADDI/SUB overflow
    Overflow,
}

impl Exception {
    /// ExcCode field of CAUSE
    pub fn code(&self) -> u32 {
        match self {
            Exception::Interrupt => 0,
            Exception::LoadAddressError(_) => 4,
            Exception::StoreAddressError(_) => 5,
            Exception::InstructionBusError => 6,
            Exception::Syscall => 8,
            Exception::Break => 9,
            Exception::ReservedInstruction => 10,
            Exception::CoprocessorUnusable(_) => 11,
            Exception::Overflow => 12,
        }
    }

    fn bad_vaddr(&self) -> Option<u32> {
        match self {
            Exception::LoadAddressError(addr) | Exception::StoreAddressError(addr) => Some(*addr),
            _ => None,
        }
    }
}

/// COP0 register file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cop0 {
    regs: [u32; 16],
}

impl Default for Cop0 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cop0 {
    pub fn new() -> Self {
        let mut regs = [0u32; 16];
        regs[COP0_SR as usize] = SR_BEV;
        regs[COP0_PRID as usize] = PRID_R3000A;
        Cop0 { regs }
    }

    #[inline(always)]
    pub fn sr(&self) -> u32 {
        self.regs[COP0_SR as usize]
    }

    #[inline(always)]
    pub fn cause(&self) -> u32 {
        self.regs[COP0_CAUSE as usize]
    }

    #[inline(always)]
    pub fn epc(&self) -> u32 {
        self.regs[COP0_EPC as usize]
    }

    pub fn bad_vaddr(&self) -> u32 {
        self.regs[COP0_BAD_VADDR as usize]
    }

    /// Stores target the isolated data cache instead of memory
    #[inline(always)]
    pub fn cache_isolated(&self) -> bool {
        self.sr() & SR_ISOLATE_CACHE != 0
    }

    #[inline(always)]
    pub fn cop2_enabled(&self) -> bool {
        self.sr() & SR_CU2 != 0
    }

    /// Drive the interrupt controller line into CAUSE.IP2
    pub fn set_irq_line(&mut self, active: bool) {
        let cause = &mut self.regs[COP0_CAUSE as usize];
        if active {
            *cause |= CAUSE_IP2;
        } else {
            *cause &= !CAUSE_IP2;
        }
    }

    /// An enabled interrupt is waiting to be taken
    #[inline(always)]
    pub fn interrupt_pending(&self) -> bool {
        let sr = self.sr();
        sr & SR_IEC != 0 && sr & self.cause() & CAUSE_IP != 0
    }

    /// MFC0. Registers 16-31 do not exist and read as zero.
    pub fn read(&self, reg: u8) -> u32 {
        match self.regs.get(reg as usize) {
            Some(value) => *value,
            None => 0,
        }
    }

    /// MTC0. Writes to registers 16-31 are dropped.
    pub fn write(&mut self, reg: u8, value: u32) {
        match reg {
            COP0_CAUSE => {
                let cause = &mut self.regs[COP0_CAUSE as usize];
                *cause = (*cause & !CAUSE_WRITABLE) | (value & CAUSE_WRITABLE);
            }
            COP0_BAD_VADDR | COP0_PRID => {}
            r if (r as usize) < self.regs.len() => self.regs[r as usize] = value,
            _ => {}
        }
    }

    /// Record an exception and return the handler address.
    ///
    /// `pc` is the faulting instruction; inside a delay slot EPC points at
    /// the branch instead and CAUSE.BD is set.
    pub fn enter_exception(&mut self, exception: Exception, pc: u32, in_delay_slot: bool) -> u32 {
        // Push the interrupt enable / user mode stack
        let sr = self.sr();
        let mode = sr & 0x3F;
        self.regs[COP0_SR as usize] = (sr & !0x3F) | ((mode << 2) & 0x3F);

        let mut cause = self.cause() & CAUSE_IP;
        cause |= exception.code() << 2;
        if let Exception::CoprocessorUnusable(n) = exception {
            cause |= ((n as u32) & 3) << 28;
        }

        let epc = if in_delay_slot {
            cause |= CAUSE_BD;
            pc.wrapping_sub(4)
        } else {
            pc
        };

        self.regs[COP0_CAUSE as usize] = cause;
        self.regs[COP0_EPC as usize] = epc;
        if let Some(addr) = exception.bad_vaddr() {
            self.regs[COP0_BAD_VADDR as usize] = addr;
        }

        if sr & SR_BEV != 0 {
            0xBFC0_0180
        } else {
            0x8000_0080
        }
    }

    /// RFE: pop the interrupt enable / user mode stack
    pub fn return_from_exception(&mut self) {
        let sr = self.sr();
        let mode = sr & 0x3F;
        self.regs[COP0_SR as usize] = (sr & !0xF) | (mode >> 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_values() {
        let cop0 = Cop0::new();
        assert_eq!(cop0.read(COP0_PRID), 2);
        assert_ne!(cop0.sr() & SR_BEV, 0);
    }

    #[test]
    fn test_cause_write_mask() {
        let mut cop0 = Cop0::new();
        cop0.write(COP0_CAUSE, 0xFFFF_FFFF);
        assert_eq!(cop0.cause(), 0x300);
        cop0.write(COP0_PRID, 0);
        assert_eq!(cop0.read(COP0_PRID), 2);
    }

    #[test]
    fn test_exception_vectors() {
        let mut cop0 = Cop0::new();
        assert_eq!(cop0.enter_exception(Exception::Syscall, 0x8000_1000, false), 0xBFC0_0180);
        assert_eq!(cop0.epc(), 0x8000_1000);
        assert_eq!((cop0.cause() >> 2) & 0x1F, 8);

        cop0.write(COP0_SR, 0);
        assert_eq!(cop0.enter_exception(Exception::Break, 0x8000_2000, false), 0x8000_0080);
    }

    #[test]
    fn test_delay_slot_exception() {
        let mut cop0 = Cop0::new();
        cop0.enter_exception(Exception::Overflow, 0x8000_0104, true);
        assert_eq!(cop0.epc(), 0x8000_0100);
        assert_ne!(cop0.cause() & CAUSE_BD, 0);
    }

    #[test]
    fn test_mode_stack_push_pop() {
        let mut cop0 = Cop0::new();
        cop0.write(COP0_SR, 0b01);
        cop0.enter_exception(Exception::Syscall, 0, false);
        assert_eq!(cop0.sr() & 0x3F, 0b0100);
        cop0.return_from_exception();
        assert_eq!(cop0.sr() & 0xF, 0b01);
    }

    #[test]
    fn test_address_error_records_bad_vaddr() {
        let mut cop0 = Cop0::new();
        cop0.enter_exception(Exception::StoreAddressError(0x8000_0003), 0x8000_0000, false);
        assert_eq!(cop0.bad_vaddr(), 0x8000_0003);
        assert_eq!((cop0.cause() >> 2) & 0x1F, 5);
    }

    #[test]
    fn test_registers_above_15_read_zero() {
        let mut cop0 = Cop0::new();
        cop0.write(COP0_SR + 16, 0);
        cop0.write(COP0_CAUSE + 16, 0xFFFF_FFFF);
        cop0.write(31, 0x1234);
        assert_ne!(cop0.sr() & SR_BEV, 0);
        assert_eq!(cop0.cause(), 0);
        assert_eq!(cop0.read(COP0_PRID + 16), 0);
        assert_eq!(cop0.read(31), 0);
    }

    #[test]
    fn test_interrupt_line_masked_by_sr() {
        let mut cop0 = Cop0::new();
        cop0.set_irq_line(true);
        assert_eq!(cop0.cause() & CAUSE_IP2, CAUSE_IP2);
        assert!(!cop0.interrupt_pending());

        cop0.write(COP0_SR, SR_IEC | CAUSE_IP2);
        assert!(cop0.interrupt_pending());
        // MTC0 CAUSE cannot clear the hardware line
        cop0.write(COP0_CAUSE, 0);
        assert!(cop0.interrupt_pending());

        assert_eq!(cop0.enter_exception(Exception::Interrupt, 0x8000_0100, false), 0x8000_0080);
        assert_eq!((cop0.cause() >> 2) & 0x1F, 0);
        assert_eq!(cop0.cause() & CAUSE_IP2, CAUSE_IP2);
        assert!(!cop0.interrupt_pending());

        cop0.return_from_exception();
        cop0.set_irq_line(false);
        assert!(!cop0.interrupt_pending());
    }
}
