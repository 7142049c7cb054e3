//! Instruction decoder
//!
//! Field accessors and opcode numbers for MIPS I (R3000A)

/// A raw instruction word
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Instruction(pub u32);

impl Instruction {
    /// Primary opcode, bits 31-26
    #[inline(always)]
    pub fn opcode(self) -> u32 {
        self.0 >> 26
    }

    /// SPECIAL function field, bits 5-0
    #[inline(always)]
    pub fn funct(self) -> u32 {
        self.0 & 0x3F
    }

    #[inline(always)]
    pub fn rs(self) -> u8 {
        ((self.0 >> 21) & 0x1F) as u8
    }

    #[inline(always)]
    pub fn rt(self) -> u8 {
        ((self.0 >> 16) & 0x1F) as u8
    }

    #[inline(always)]
    pub fn rd(self) -> u8 {
        ((self.0 >> 11) & 0x1F) as u8
    }

    /// Shift amount, bits 10-6
    #[inline(always)]
    pub fn shamt(self) -> u32 {
        (self.0 >> 6) & 0x1F
    }

    /// Zero-extended 16-bit immediate
    #[inline(always)]
    pub fn imm(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// Sign-extended 16-bit immediate
    #[inline(always)]
    pub fn imm_se(self) -> u32 {
        (self.0 as u16) as i16 as i32 as u32
    }

    /// 26-bit jump target field
    #[inline(always)]
    pub fn target(self) -> u32 {
        self.0 & 0x03FF_FFFF
    }

    /// Coprocessor sub-opcode (same bits as rs)
    #[inline(always)]
    pub fn cop_op(self) -> u8 {
        self.rs()
    }

    /// Absolute target of J/JAL located at `pc`
    #[inline(always)]
    pub fn jump_target(self, pc: u32) -> u32 {
        (pc.wrapping_add(4) & 0xF000_0000) | (self.target() << 2)
    }

    /// Target of a PC-relative branch located at `pc`
    #[inline(always)]
    pub fn branch_target(self, pc: u32) -> u32 {
        pc.wrapping_add(4).wrapping_add(self.imm_se() << 2)
    }

    /// Any instruction that changes the flow of control (and owns a delay slot)
    pub fn is_control_flow(self) -> bool {
        match self.opcode() {
            OP_SPECIAL => matches!(self.funct(), FUNCT_JR | FUNCT_JALR),
            OP_BCOND | OP_J | OP_JAL | OP_BEQ | OP_BNE | OP_BLEZ | OP_BGTZ => true,
            _ => false,
        }
    }
}

// Primary opcodes
pub const OP_SPECIAL: u32 = 0x00;
pub const OP_BCOND: u32 = 0x01;
pub const OP_J: u32 = 0x02;
pub const OP_JAL: u32 = 0x03;
pub const OP_BEQ: u32 = 0x04;
pub const OP_BNE: u32 = 0x05;
pub const OP_BLEZ: u32 = 0x06;
pub const OP_BGTZ: u32 = 0x07;
pub const OP_ADDI: u32 = 0x08;
pub const OP_ADDIU: u32 = 0x09;
pub const OP_SLTI: u32 = 0x0A;
pub const OP_SLTIU: u32 = 0x0B;
pub const OP_ANDI: u32 = 0x0C;
pub const OP_ORI: u32 = 0x0D;
pub const OP_XORI: u32 = 0x0E;
pub const OP_LUI: u32 = 0x0F;
pub const OP_COP0: u32 = 0x10;
pub const OP_COP1: u32 = 0x11;
pub const OP_COP2: u32 = 0x12;
pub const OP_COP3: u32 = 0x13;
pub const OP_LB: u32 = 0x20;
pub const OP_LH: u32 = 0x21;
pub const OP_LWL: u32 = 0x22;
pub const OP_LW: u32 = 0x23;
pub const OP_LBU: u32 = 0x24;
pub const OP_LHU: u32 = 0x25;
pub const OP_LWR: u32 = 0x26;
pub const OP_SB: u32 = 0x28;
pub const OP_SH: u32 = 0x29;
pub const OP_SWL: u32 = 0x2A;
pub const OP_SW: u32 = 0x2B;
pub const OP_SWR: u32 = 0x2E;
pub const OP_LWC0: u32 = 0x30;
pub const OP_LWC1: u32 = 0x31;
pub const OP_LWC2: u32 = 0x32;
pub const OP_LWC3: u32 = 0x33;
pub const OP_SWC0: u32 = 0x38;
pub const OP_SWC1: u32 = 0x39;
pub const OP_SWC2: u32 = 0x3A;
pub const OP_SWC3: u32 = 0x3B;

// SPECIAL functions
pub const FUNCT_SLL: u32 = 0x00;
pub const FUNCT_SRL: u32 = 0x02;
pub const FUNCT_SRA: u32 = 0x03;
pub const FUNCT_SLLV: u32 = 0x04;
pub const FUNCT_SRLV: u32 = 0x06;
pub const FUNCT_SRAV: u32 = 0x07;
pub const FUNCT_JR: u32 = 0x08;
pub const FUNCT_JALR: u32 = 0x09;
pub const FUNCT_SYSCALL: u32 = 0x0C;
pub const FUNCT_BREAK: u32 = 0x0D;
pub const FUNCT_MFHI: u32 = 0x10;
pub const FUNCT_MTHI: u32 = 0x11;
pub const FUNCT_MFLO: u32 = 0x12;
pub const FUNCT_MTLO: u32 = 0x13;
pub const FUNCT_MULT: u32 = 0x18;
pub const FUNCT_MULTU: u32 = 0x19;
pub const FUNCT_DIV: u32 = 0x1A;
pub const FUNCT_DIVU: u32 = 0x1B;
pub const FUNCT_ADD: u32 = 0x20;
pub const FUNCT_ADDU: u32 = 0x21;
pub const FUNCT_SUB: u32 = 0x22;
pub const FUNCT_SUBU: u32 = 0x23;
pub const FUNCT_AND: u32 = 0x24;
pub const FUNCT_OR: u32 = 0x25;
pub const FUNCT_XOR: u32 = 0x26;
pub const FUNCT_NOR: u32 = 0x27;
pub const FUNCT_SLT: u32 = 0x2A;
pub const FUNCT_SLTU: u32 = 0x2B;

// COP0 sub-opcodes
pub const COP_MFC: u8 = 0x00;
pub const COP_CFC: u8 = 0x02;
pub const COP_MTC: u8 = 0x04;
pub const COP_CTC: u8 = 0x06;
/// COP0 function field of RFE (with bit 25 set)
pub const COP0_FUNCT_RFE: u32 = 0x10;

// BCOND rt encodings: bit 0 = GEZ, bit 4 = link
pub const BCOND_LINK: u8 = 0x10;
pub const BCOND_GEZ: u8 = 0x01;
