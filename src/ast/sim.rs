//! Decoded machine instructions.
//!
//! [`SimInstr::decode`] turns any 16-bit word into an instruction
//! (opcode = top 4 bits), and [`SimInstr::encode`] turns it back.

use super::{CondCode, IOffset, ImmOrReg, Reg, TrapVect8};

/// Trap vectors with built-in services.
pub mod trap_vect {
    /// Read a byte from input into R0.
    pub const GETC: u16 = 0x20;
    /// Write the low byte of R0 to output.
    pub const OUT: u16 = 0x21;
    /// Write the zero-terminated string at `mem[R0]` (one character per word).
    pub const PUTS: u16 = 0x22;
    /// Print a prompt, then read a byte from input into R0 and echo it.
    pub const IN: u16 = 0x23;
    /// Write the zero-terminated packed string at `mem[R0]` (two characters per word).
    pub const PUTSP: u16 = 0x24;
    /// Stop the machine.
    pub const HALT: u16 = 0x25;
    /// Push R0 onto the outbound message bus, waiting while it is full.
    pub const SEND: u16 = 0x30;
    /// Pop a word from the inbound message bus into R0, waiting while it is empty.
    pub const RECV: u16 = 0x31;
}

/// A machine instruction, as executed by the simulator.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum SimInstr {
    /// `0000 nzp PCoffset9`
    BR(CondCode, IOffset<9>),
    /// `0001 DR SR1 0 00 SR2` or `0001 DR SR1 1 imm5`
    ADD(Reg, Reg, ImmOrReg<5>),
    /// `0010 DR PCoffset9`
    LD(Reg, IOffset<9>),
    /// `0011 SR PCoffset9`
    ST(Reg, IOffset<9>),
    /// `0100 1 PCoffset11` (JSR) or `0100 0 00 BaseR 000000` (JSRR)
    JSR(ImmOrReg<11>),
    /// `0101 DR SR1 0 00 SR2` or `0101 DR SR1 1 imm5`
    AND(Reg, Reg, ImmOrReg<5>),
    /// `0110 DR BaseR offset6`
    LDR(Reg, Reg, IOffset<6>),
    /// `0111 SR BaseR offset6`
    STR(Reg, Reg, IOffset<6>),
    /// `1000 000000000000`. Supervisor mode does not exist on this machine.
    RTI,
    /// `1001 DR SR 111111`
    NOT(Reg, Reg),
    /// `1010 DR PCoffset9`
    LDI(Reg, IOffset<9>),
    /// `1011 SR PCoffset9`
    STI(Reg, IOffset<9>),
    /// `1100 000 BaseR 000000`
    JMP(Reg),
    /// Opcode `1101`, which is unassigned. Holds the full instruction word.
    Reserved(u16),
    /// `1110 DR PCoffset9`
    LEA(Reg, IOffset<9>),
    /// `1111 0000 trapvect8`
    TRAP(TrapVect8),
}

impl SimInstr {
    /// The 4-bit opcode of this instruction.
    pub fn opcode(&self) -> u16 {
        match self {
            SimInstr::BR(_, _)     => 0b0000,
            SimInstr::ADD(_, _, _) => 0b0001,
            SimInstr::LD(_, _)     => 0b0010,
            SimInstr::ST(_, _)     => 0b0011,
            SimInstr::JSR(_)       => 0b0100,
            SimInstr::AND(_, _, _) => 0b0101,
            SimInstr::LDR(_, _, _) => 0b0110,
            SimInstr::STR(_, _, _) => 0b0111,
            SimInstr::RTI          => 0b1000,
            SimInstr::NOT(_, _)    => 0b1001,
            SimInstr::LDI(_, _)    => 0b1010,
            SimInstr::STI(_, _)    => 0b1011,
            SimInstr::JMP(_)       => 0b1100,
            SimInstr::Reserved(_)  => 0b1101,
            SimInstr::LEA(_, _)    => 0b1110,
            SimInstr::TRAP(_)      => 0b1111,
        }
    }

    /// Decodes a 16-bit word into an instruction.
    ///
    /// Every word decodes to something. Bits that a well-formed instruction
    /// would leave as zero (or all ones, for `NOT`) are ignored.
    ///
    /// ```
    /// use lc3_bus::ast::sim::SimInstr;
    /// use lc3_bus::ast::reg_consts::R0;
    ///
    /// assert_eq!(SimInstr::decode(0xF025).to_string(), "TRAP x25");
    /// assert_eq!(SimInstr::decode(0x1021).to_string(), "ADD R0, R0, #1");
    /// assert!(matches!(SimInstr::decode(0x903F), SimInstr::NOT(R0, R0)));
    /// ```
    pub fn decode(word: u16) -> Self {
        let dr = Reg::from_field(word, 9);
        let sr1 = Reg::from_field(word, 6);
        let imm_or_reg = || match (word >> 5) & 1 != 0 {
            true  => ImmOrReg::Imm(IOffset::from_word(word)),
            false => ImmOrReg::Reg(Reg::from_field(word, 0)),
        };

        match word >> 12 {
            0b0000 => SimInstr::BR(((word >> 9) & 0b111) as CondCode, IOffset::from_word(word)),
            0b0001 => SimInstr::ADD(dr, sr1, imm_or_reg()),
            0b0010 => SimInstr::LD(dr, IOffset::from_word(word)),
            0b0011 => SimInstr::ST(dr, IOffset::from_word(word)),
            0b0100 => SimInstr::JSR(match (word >> 11) & 1 != 0 {
                true  => ImmOrReg::Imm(IOffset::from_word(word)),
                false => ImmOrReg::Reg(sr1),
            }),
            0b0101 => SimInstr::AND(dr, sr1, imm_or_reg()),
            0b0110 => SimInstr::LDR(dr, sr1, IOffset::from_word(word)),
            0b0111 => SimInstr::STR(dr, sr1, IOffset::from_word(word)),
            0b1000 => SimInstr::RTI,
            0b1001 => SimInstr::NOT(dr, sr1),
            0b1010 => SimInstr::LDI(dr, IOffset::from_word(word)),
            0b1011 => SimInstr::STI(dr, IOffset::from_word(word)),
            0b1100 => SimInstr::JMP(sr1),
            0b1101 => SimInstr::Reserved(word),
            0b1110 => SimInstr::LEA(dr, IOffset::from_word(word)),
            _      => SimInstr::TRAP(TrapVect8::new_trunc(word)),
        }
    }

    /// Encodes this instruction into its canonical 16-bit word.
    ///
    /// ```
    /// use lc3_bus::ast::sim::SimInstr;
    /// use lc3_bus::ast::{IOffset, ImmOrReg};
    /// use lc3_bus::ast::reg_consts::{R1, R2};
    ///
    /// let instr = SimInstr::ADD(R1, R2, ImmOrReg::Imm(IOffset::new(-1).unwrap()));
    /// assert_eq!(instr.encode(), 0x12BF);
    /// ```
    pub fn encode(&self) -> u16 {
        fn r(reg: Reg, lsb: u32) -> u16 {
            u16::from(reg.0) << lsb
        }
        fn imm_or_reg(operand: ImmOrReg<5>) -> u16 {
            match operand {
                ImmOrReg::Imm(imm) => 1 << 5 | imm.field(),
                ImmOrReg::Reg(reg) => r(reg, 0),
            }
        }

        let op = self.opcode() << 12;
        let operands = match *self {
            SimInstr::BR(cc, off)          => u16::from(cc & 0b111) << 9 | off.field(),
            SimInstr::ADD(dr, sr1, sr2)    => r(dr, 9) | r(sr1, 6) | imm_or_reg(sr2),
            SimInstr::LD(dr, off)          => r(dr, 9) | off.field(),
            SimInstr::ST(sr, off)          => r(sr, 9) | off.field(),
            SimInstr::JSR(ImmOrReg::Imm(off)) => 1 << 11 | off.field(),
            SimInstr::JSR(ImmOrReg::Reg(br))  => r(br, 6),
            SimInstr::AND(dr, sr1, sr2)    => r(dr, 9) | r(sr1, 6) | imm_or_reg(sr2),
            SimInstr::LDR(dr, br, off)     => r(dr, 9) | r(br, 6) | off.field(),
            SimInstr::STR(sr, br, off)     => r(sr, 9) | r(br, 6) | off.field(),
            SimInstr::RTI                  => 0,
            SimInstr::NOT(dr, sr)          => r(dr, 9) | r(sr, 6) | 0b111111,
            SimInstr::LDI(dr, off)         => r(dr, 9) | off.field(),
            SimInstr::STI(sr, off)         => r(sr, 9) | off.field(),
            SimInstr::JMP(br)              => r(br, 6),
            SimInstr::Reserved(word)       => word & 0x0FFF,
            SimInstr::LEA(dr, off)         => r(dr, 9) | off.field(),
            SimInstr::TRAP(vect)           => vect.get() & 0xFF,
        };

        op | operands
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimInstr::BR(cc, off) => {
                f.write_str("BR")?;
                if cc & 0b100 != 0 { f.write_str("n")?; }
                if cc & 0b010 != 0 { f.write_str("z")?; }
                if cc & 0b001 != 0 { f.write_str("p")?; }
                write!(f, " {off}")
            },
            SimInstr::ADD(dr, sr1, sr2) => write!(f, "ADD {dr}, {sr1}, {sr2}"),
            SimInstr::LD(dr, off)       => write!(f, "LD {dr}, {off}"),
            SimInstr::ST(sr, off)       => write!(f, "ST {sr}, {off}"),
            SimInstr::JSR(ImmOrReg::Imm(off)) => write!(f, "JSR {off}"),
            SimInstr::JSR(ImmOrReg::Reg(br))  => write!(f, "JSRR {br}"),
            SimInstr::AND(dr, sr1, sr2) => write!(f, "AND {dr}, {sr1}, {sr2}"),
            SimInstr::LDR(dr, br, off)  => write!(f, "LDR {dr}, {br}, {off}"),
            SimInstr::STR(sr, br, off)  => write!(f, "STR {sr}, {br}, {off}"),
            SimInstr::RTI               => f.write_str("RTI"),
            SimInstr::NOT(dr, sr)       => write!(f, "NOT {dr}, {sr}"),
            SimInstr::LDI(dr, off)      => write!(f, "LDI {dr}, {off}"),
            SimInstr::STI(sr, off)      => write!(f, "STI {sr}, {off}"),
            SimInstr::JMP(br)           => write!(f, "JMP {br}"),
            SimInstr::Reserved(word)    => write!(f, ".FILL x{word:04X}"),
            SimInstr::LEA(dr, off)      => write!(f, "LEA {dr}, {off}"),
            SimInstr::TRAP(vect)        => write!(f, "TRAP x{:02X}", vect.get()),
        }
    }
}
