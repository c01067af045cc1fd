//! Assembly source statements.
//!
//! The parser produces a `Vec<`[`Stmt`]`>`, which the assembler
//! ([`crate::asm::assemble`]) lowers into an object file.

use std::fmt::Write as _;
use std::num::NonZeroU16;
use std::ops::Range;

use super::{CondCode, IOffset, ImmOrReg, Label, Offset, PCOffset, Reg, TrapVect8};

type PCOffset9 = PCOffset<i16, 9>;
type PCOffset11 = PCOffset<i16, 11>;

/// An assembly instruction, including aliases (`RET`, `HALT`, `SEND`, ...).
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
#[allow(missing_docs)]
pub enum AsmInstr {
    ADD(Reg, Reg, ImmOrReg<5>),
    AND(Reg, Reg, ImmOrReg<5>),
    NOT(Reg, Reg),
    BR(CondCode, PCOffset9),
    JMP(Reg),
    RET,
    JSR(PCOffset11),
    JSRR(Reg),
    LD(Reg, PCOffset9),
    LDI(Reg, PCOffset9),
    LDR(Reg, Reg, IOffset<6>),
    LEA(Reg, PCOffset9),
    ST(Reg, PCOffset9),
    STI(Reg, PCOffset9),
    STR(Reg, Reg, IOffset<6>),
    TRAP(TrapVect8),
    NOP,

    GETC,
    OUT,
    PUTC,
    PUTS,
    IN,
    PUTSP,
    HALT,
    SEND,
    RECV,
}
impl std::fmt::Display for AsmInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ADD(dr, sr1, sr2) => write!(f, "ADD {dr}, {sr1}, {sr2}"),
            Self::AND(dr, sr1, sr2) => write!(f, "AND {dr}, {sr1}, {sr2}"),
            Self::NOT(dr, sr) => write!(f, "NOT {dr}, {sr}"),
            Self::BR(cc, off) => {
                f.write_str("BR")?;
                for (bit, c) in [(0b100, 'n'), (0b010, 'z'), (0b001, 'p')] {
                    if cc & bit != 0 { f.write_char(c)?; }
                }
                write!(f, " {off}")
            },
            Self::JMP(br) => write!(f, "JMP {br}"),
            Self::RET => f.write_str("RET"),
            Self::JSR(off) => write!(f, "JSR {off}"),
            Self::JSRR(br) => write!(f, "JSRR {br}"),
            Self::LD(dr, off) => write!(f, "LD {dr}, {off}"),
            Self::LDI(dr, off) => write!(f, "LDI {dr}, {off}"),
            Self::LDR(dr, br, off) => write!(f, "LDR {dr}, {br}, {off}"),
            Self::LEA(dr, off) => write!(f, "LEA {dr}, {off}"),
            Self::ST(sr, off) => write!(f, "ST {sr}, {off}"),
            Self::STI(sr, off) => write!(f, "STI {sr}, {off}"),
            Self::STR(sr, br, off) => write!(f, "STR {sr}, {br}, {off}"),
            Self::TRAP(vect) => write!(f, "TRAP x{:02X}", vect.get()),
            Self::NOP => f.write_str("NOP"),
            Self::GETC => f.write_str("GETC"),
            Self::OUT => f.write_str("OUT"),
            Self::PUTC => f.write_str("PUTC"),
            Self::PUTS => f.write_str("PUTS"),
            Self::IN => f.write_str("IN"),
            Self::PUTSP => f.write_str("PUTSP"),
            Self::HALT => f.write_str("HALT"),
            Self::SEND => f.write_str("SEND"),
            Self::RECV => f.write_str("RECV"),
        }
    }
}

/// An assembler directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Directive {
    /// `.orig ADDR`: the load address of the program.
    Orig(Offset<u16, 16>),
    /// `.fill VALUE`: one literal word (a number or the address of a label).
    Fill(PCOffset<u16, 16>),
    /// `.blkw N`: N zero-filled words.
    Blkw(NonZeroU16),
    /// `.stringz "..."`: one word per character plus a zero terminator.
    Stringz(String),
    /// `.end`: the end of the program.
    End,
}
impl Directive {
    /// How many words this directive occupies in the image.
    pub fn word_len(&self) -> u16 {
        match self {
            Directive::Orig(_)    => 0,
            Directive::Fill(_)    => 1,
            Directive::Blkw(n)    => n.get(),
            // The lexer caps string literals below u16::MAX bytes.
            Directive::Stringz(s) => s.len() as u16 + 1,
            Directive::End        => 0,
        }
    }
}
impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orig(addr)  => write!(f, ".orig x{:04X}", addr.get()),
            Self::Fill(val)   => write!(f, ".fill {val}"),
            Self::Blkw(n)     => write!(f, ".blkw {n}"),
            Self::Stringz(s)  => write!(f, ".stringz {s:?}"),
            Self::End         => f.write_str(".end"),
        }
    }
}

/// Either an instruction or a directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
#[allow(missing_docs)]
pub enum StmtKind {
    Instr(AsmInstr),
    Directive(Directive),
}
impl std::fmt::Display for StmtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StmtKind::Instr(i)     => i.fmt(f),
            StmtKind::Directive(d) => d.fmt(f),
        }
    }
}

/// One line of assembly: optional labels and an instruction or directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Stmt {
    /// The labels attached to this statement.
    pub labels: Vec<Label>,
    /// The instruction or directive.
    pub nucleus: StmtKind,
    /// The span of the instruction or directive in source.
    pub span: Range<usize>
}
impl std::fmt::Display for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for label in &self.labels {
            write!(f, "{label}: ")?;
        }
        self.nucleus.fmt(f)
    }
}
