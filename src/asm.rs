//! Assembling parsed statements into program images.
//!
//! Assembly is two passes over the statements:
//! 1. [`SymbolTable::new`] walks the statements with a location counter
//!     and records the address of every label.
//! 2. [`ObjectFile`] construction lowers every instruction to a [`SimInstr`],
//!     resolving label operands into PC-relative offsets, and lays out directive data.
//!
//! A program image holds exactly one origin, so a program has exactly one `.orig`/`.end` block.
//!
//! ```
//! use lc3_bus::parse::parse_ast;
//! use lc3_bus::asm::assemble;
//!
//! let src = "
//!     .orig x3000
//!     AND R0, R0, #0
//!     ADD R0, R0, #7
//!     SEND
//!     HALT
//!     .end
//! ";
//! let obj = assemble(parse_ast(src).unwrap()).unwrap();
//! assert_eq!(obj.origin(), 0x3000);
//! assert_eq!(obj.words(), [0x5020, 0x1027, 0xF030, 0xF025]);
//! ```

pub mod encoding;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::Range;

use crate::ast::asm::{AsmInstr, Directive, Stmt, StmtKind};
use crate::ast::sim::{trap_vect, SimInstr};
use crate::ast::reg_consts::R7;
use crate::ast::{IOffset, ImmOrReg, Label, Offset, OffsetNewErr, PCOffset};
use crate::err::ErrSpan;

/// Assembles a list of statements into an object file.
pub fn assemble(ast: Vec<Stmt>) -> Result<ObjectFile, AsmErr> {
    let sym = SymbolTable::new(&ast)?;
    ObjectFile::from_ast(ast, sym)
}

/// Kinds of errors that can occur from assembling.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AsmErrKind {
    /// A label outside of an `.orig`/`.end` block (pass 1).
    UndetAddrLabel,
    /// A statement outside of an `.orig`/`.end` block (pass 1).
    UndetAddrStmt,
    /// An `.orig` with no matching `.end` (pass 1).
    UnclosedOrig,
    /// An `.end` with no matching `.orig` (pass 1).
    UnopenedOrig,
    /// An `.orig` inside of another block (pass 1).
    OverlappingOrig,
    /// A second `.orig`/`.end` block (pass 1).
    MultipleBlocks,
    /// No `.orig`/`.end` block at all (pass 1).
    EmptyProgram,
    /// A label defined more than once (pass 1).
    OverlappingLabels,
    /// The block runs past xFFFF (pass 1).
    WrappingBlock,
    /// A label resolved to an offset which does not fit its field (pass 2).
    OffsetNewErr(OffsetNewErr),
    /// A label operand that was never defined (pass 2).
    CouldNotFindLabel,
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndetAddrLabel    => f.write_str("cannot determine address of label"),
            Self::UndetAddrStmt     => f.write_str("cannot determine address of statement"),
            Self::UnclosedOrig      => f.write_str(".orig directive was never closed"),
            Self::UnopenedOrig      => f.write_str(".end does not have associated .orig"),
            Self::OverlappingOrig   => f.write_str("cannot have an .orig inside another region"),
            Self::MultipleBlocks    => f.write_str("program image can only hold one .orig block"),
            Self::EmptyProgram      => f.write_str("program has no .orig block"),
            Self::OverlappingLabels => f.write_str("label was defined multiple times"),
            Self::WrappingBlock     => f.write_str("block wraps around in memory"),
            Self::OffsetNewErr(e)   => e.fmt(f),
            Self::CouldNotFindLabel => f.write_str("label could not be found"),
        }
    }
}

/// Error from assembling statements, with the source span(s) responsible.
#[derive(Debug)]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The span in the source associated with this error.
    pub span: ErrSpan
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            AsmErrKind::OffsetNewErr(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::UndetAddrLabel    => Some("try moving this label inside of an .orig/.end block".into()),
            AsmErrKind::UndetAddrStmt     => Some("try moving this statement inside of an .orig/.end block".into()),
            AsmErrKind::UnclosedOrig      => Some("try adding an .end directive at the end of this block".into()),
            AsmErrKind::UnopenedOrig      => Some("try adding an .orig directive at the beginning of this block".into()),
            AsmErrKind::OverlappingOrig   => Some("try adding an .end directive at the end of the outer .orig block".into()),
            AsmErrKind::MultipleBlocks    => Some("split this program into separate files, one per image".into()),
            AsmErrKind::EmptyProgram      => Some("programs start with .orig (e.g., .orig x3000) and finish with .end".into()),
            AsmErrKind::OverlappingLabels => Some("labels must be unique within a file, try renaming one of the labels".into()),
            AsmErrKind::WrappingBlock     => Some("user code typically starts at x3000 and is short enough to not wrap memory".into()),
            AsmErrKind::OffsetNewErr(e)   => e.help(),
            AsmErrKind::CouldNotFindLabel => Some("try adding this label before an instruction or directive".into()),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct SymbolData {
    addr: u16,
    src_start: usize
}
impl SymbolData {
    fn span(&self, label: &str) -> Range<usize> {
        self.src_start .. (self.src_start + label.len())
    }
}

/// The addresses of every label in a program (the result of the first assembler pass).
///
/// Labels are case-insensitive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SymbolTable {
    label_map: HashMap<String, SymbolData>,
    /// The `.orig` address and the span of the `.orig` statement.
    orig: (u16, Range<usize>),
    /// Number of words in the block.
    len: usize
}

impl SymbolTable {
    /// Creates a symbol table by computing the address of every label.
    ///
    /// ```
    /// use lc3_bus::parse::parse_ast;
    /// use lc3_bus::asm::SymbolTable;
    ///
    /// let src = "
    ///     .orig x3000
    ///     AND R0, R0, #0
    ///     LOOP: ADD R0, R0, #1
    ///     SEND
    ///     BR LOOP
    ///     MSG .stringz \"ok\"
    ///     END HALT
    ///     .end
    /// ";
    /// let sym = SymbolTable::new(&parse_ast(src).unwrap()).unwrap();
    /// assert_eq!(sym.lookup_label("LOOP"), Some(0x3001));
    /// assert_eq!(sym.lookup_label("msg"), Some(0x3004));
    /// assert_eq!(sym.lookup_label("END"), Some(0x3007));
    /// assert_eq!(sym.lookup_label("START"), None);
    /// ```
    pub fn new(stmts: &[Stmt]) -> Result<Self, AsmErr> {
        /// Location counter inside of the block. `u32` so running off the end of memory is visible.
        struct Cursor {
            lc: u32,
            orig: (u16, Range<usize>),
        }

        let mut cursor: Option<Cursor> = None;
        let mut closed: Option<(u16, Range<usize>, usize)> = None;
        let mut label_map: HashMap<String, SymbolData> = HashMap::new();

        for stmt in stmts {
            if !stmt.labels.is_empty() {
                let Some(cur) = cursor.as_ref() else {
                    let spans = stmt.labels.iter()
                        .map(Label::span)
                        .collect::<Vec<_>>();
                    return Err(AsmErr::new(AsmErrKind::UndetAddrLabel, spans));
                };

                for label in &stmt.labels {
                    // A label on .end points one past the last word, which is still in range.
                    let addr = cur.lc as u16;
                    match label_map.entry(label.name.to_uppercase()) {
                        Entry::Occupied(e) => {
                            let first = e.get().span(e.key());
                            return Err(AsmErr::new(AsmErrKind::OverlappingLabels, [first, label.span()]));
                        },
                        Entry::Vacant(e) => {
                            e.insert(SymbolData { addr, src_start: label.span().start });
                        }
                    }
                }
            }

            match (&stmt.nucleus, cursor.as_mut()) {
                (StmtKind::Directive(Directive::Orig(_)), Some(cur)) => {
                    return Err(AsmErr::new(AsmErrKind::OverlappingOrig, [cur.orig.1.clone(), stmt.span.clone()]));
                },
                (StmtKind::Directive(Directive::Orig(addr)), None) => {
                    if let Some((_, span, _)) = &closed {
                        return Err(AsmErr::new(AsmErrKind::MultipleBlocks, [span.clone(), stmt.span.clone()]));
                    }
                    cursor = Some(Cursor { lc: u32::from(addr.get()), orig: (addr.get(), stmt.span.clone()) });
                },
                (StmtKind::Directive(Directive::End), Some(_)) => {
                    if let Some(Cursor { lc, orig: (start, span) }) = cursor.take() {
                        closed = Some((start, span, (lc - u32::from(start)) as usize));
                    }
                },
                (StmtKind::Directive(Directive::End), None) => {
                    return Err(AsmErr::new(AsmErrKind::UnopenedOrig, stmt.span.clone()));
                },
                (_, None) => {
                    return Err(AsmErr::new(AsmErrKind::UndetAddrStmt, stmt.span.clone()));
                },
                (nucleus, Some(cur)) => {
                    cur.lc += u32::from(match nucleus {
                        StmtKind::Instr(_) => 1,
                        StmtKind::Directive(d) => d.word_len(),
                    });
                    if cur.lc > 0x10000 {
                        return Err(AsmErr::new(AsmErrKind::WrappingBlock, stmt.span.clone()));
                    }
                }
            }
        }

        if let Some(cur) = cursor {
            return Err(AsmErr::new(AsmErrKind::UnclosedOrig, cur.orig.1));
        }
        let Some((start, span, len)) = closed else {
            return Err(AsmErr::new(AsmErrKind::EmptyProgram, 0..0));
        };

        Ok(SymbolTable { label_map, orig: (start, span), len })
    }

    /// Gets the address of a label (if it exists).
    pub fn lookup_label(&self, label: &str) -> Option<u16> {
        self.label_map.get(&label.to_uppercase()).map(|data| data.addr)
    }

    /// Gets a label at a given address (if one exists).
    ///
    /// If several labels share the address, the one defined first in source is returned.
    pub fn rev_lookup_label(&self, addr: u16) -> Option<&str> {
        self.label_map.iter()
            .filter(|(_, data)| data.addr == addr)
            .min_by_key(|(_, data)| data.src_start)
            .map(|(name, _)| name.as_str())
    }

    /// Gets the source span where a label was defined.
    pub fn get_label_source(&self, label: &str) -> Option<Range<usize>> {
        let key = label.to_uppercase();
        self.label_map.get(&key).map(|data| data.span(&key))
    }

    /// Iterates over every label (uppercased) and its address, in address order.
    pub fn label_iter(&self) -> impl Iterator<Item=(&str, u16)> + '_ {
        let mut labels: Vec<_> = self.label_map.iter()
            .map(|(name, data)| (name.as_str(), data.addr))
            .collect();
        labels.sort_by_key(|&(name, addr)| (addr, name));
        labels.into_iter()
    }

    fn resolve(&self, label: &Label) -> Result<u16, AsmErr> {
        self.lookup_label(&label.name)
            .ok_or_else(|| AsmErr::new(AsmErrKind::CouldNotFindLabel, label.span()))
    }

    /// Replaces a label operand with its offset from `pc`.
    fn pc_offset<const N: u32>(&self, off: PCOffset<i16, N>, pc: u16) -> Result<IOffset<N>, AsmErr> {
        match off {
            PCOffset::Offset(off) => Ok(off),
            PCOffset::Label(label) => {
                let addr = self.resolve(&label)?;
                IOffset::new(addr.wrapping_sub(pc) as i16)
                    .map_err(|e| AsmErr::new(AsmErrKind::OffsetNewErr(e), label.span()))
            },
        }
    }
}

impl AsmInstr {
    /// Lowers an assembly instruction into a machine instruction,
    /// resolving labels and erasing aliases.
    ///
    /// `pc` is the address of the instruction after this one.
    pub fn into_sim_instr(self, pc: u16, sym: &SymbolTable) -> Result<SimInstr, AsmErr> {
        let trap = |vect| Ok(SimInstr::TRAP(Offset::new_trunc(vect)));

        match self {
            AsmInstr::ADD(dr, sr1, sr2) => Ok(SimInstr::ADD(dr, sr1, sr2)),
            AsmInstr::AND(dr, sr1, sr2) => Ok(SimInstr::AND(dr, sr1, sr2)),
            AsmInstr::NOT(dr, sr)       => Ok(SimInstr::NOT(dr, sr)),
            AsmInstr::BR(cc, off)       => Ok(SimInstr::BR(cc, sym.pc_offset(off, pc)?)),
            AsmInstr::JMP(br)           => Ok(SimInstr::JMP(br)),
            AsmInstr::RET               => Ok(SimInstr::JMP(R7)),
            AsmInstr::JSR(off)          => Ok(SimInstr::JSR(ImmOrReg::Imm(sym.pc_offset(off, pc)?))),
            AsmInstr::JSRR(br)          => Ok(SimInstr::JSR(ImmOrReg::Reg(br))),
            AsmInstr::LD(dr, off)       => Ok(SimInstr::LD(dr, sym.pc_offset(off, pc)?)),
            AsmInstr::LDI(dr, off)      => Ok(SimInstr::LDI(dr, sym.pc_offset(off, pc)?)),
            AsmInstr::LDR(dr, br, off)  => Ok(SimInstr::LDR(dr, br, off)),
            AsmInstr::LEA(dr, off)      => Ok(SimInstr::LEA(dr, sym.pc_offset(off, pc)?)),
            AsmInstr::ST(sr, off)       => Ok(SimInstr::ST(sr, sym.pc_offset(off, pc)?)),
            AsmInstr::STI(sr, off)      => Ok(SimInstr::STI(sr, sym.pc_offset(off, pc)?)),
            AsmInstr::STR(sr, br, off)  => Ok(SimInstr::STR(sr, br, off)),
            AsmInstr::TRAP(vect)        => Ok(SimInstr::TRAP(vect)),
            AsmInstr::NOP               => Ok(SimInstr::BR(0b000, IOffset::new_trunc(0))),
            AsmInstr::GETC              => trap(trap_vect::GETC),
            AsmInstr::OUT | AsmInstr::PUTC => trap(trap_vect::OUT),
            AsmInstr::PUTS              => trap(trap_vect::PUTS),
            AsmInstr::IN                => trap(trap_vect::IN),
            AsmInstr::PUTSP             => trap(trap_vect::PUTSP),
            AsmInstr::HALT              => trap(trap_vect::HALT),
            AsmInstr::SEND              => trap(trap_vect::SEND),
            AsmInstr::RECV              => trap(trap_vect::RECV),
        }
    }
}

/// An assembled program: a load address and the words placed from there on.
///
/// This is what a program image (see [`encoding`]) holds.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectFile {
    origin: u16,
    /// Invariant: `origin + words.len() <= 0x10000`.
    words: Vec<u16>,
    sym: Option<SymbolTable>
}
impl ObjectFile {
    /// Creates an object file directly from its load address and words.
    ///
    /// This returns `None` if the words would run past the end of memory.
    pub fn new(origin: u16, words: Vec<u16>) -> Option<Self> {
        (usize::from(origin) + words.len() <= 0x10000)
            .then_some(ObjectFile { origin, words, sym: None })
    }

    /// The second assembler pass.
    fn from_ast(ast: Vec<Stmt>, sym: SymbolTable) -> Result<Self, AsmErr> {
        let origin = sym.orig.0;
        let mut words = Vec::with_capacity(sym.len);

        for stmt in ast {
            let lc = origin.wrapping_add(words.len() as u16);
            match stmt.nucleus {
                StmtKind::Instr(instr) => {
                    let instr = instr.into_sim_instr(lc.wrapping_add(1), &sym)?;
                    words.push(instr.encode());
                },
                StmtKind::Directive(Directive::Fill(PCOffset::Offset(value))) => words.push(value.get()),
                StmtKind::Directive(Directive::Fill(PCOffset::Label(label))) => words.push(sym.resolve(&label)?),
                StmtKind::Directive(Directive::Blkw(n)) => words.resize(words.len() + usize::from(n.get()), 0),
                StmtKind::Directive(Directive::Stringz(s)) => {
                    words.extend(s.bytes().map(u16::from));
                    words.push(0);
                },
                StmtKind::Directive(Directive::Orig(_) | Directive::End) => {},
            }
        }
        debug_assert_eq!(words.len(), sym.len);

        Ok(ObjectFile { origin, words, sym: Some(sym) })
    }

    /// The load address.
    pub fn origin(&self) -> u16 {
        self.origin
    }

    /// The words of the program, starting at [`ObjectFile::origin`].
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Iterates over every address in the program and the word placed there.
    pub fn addr_iter(&self) -> impl Iterator<Item=(u16, u16)> + '_ {
        self.words.iter()
            .enumerate()
            .map(|(i, &w)| (self.origin.wrapping_add(i as u16), w))
    }

    /// The symbol table, if this object file was assembled from source.
    pub fn symbol_table(&self) -> Option<&SymbolTable> {
        self.sym.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::OffsetNewErr;
    use crate::parse::parse_ast;

    use super::{assemble, AsmErr, AsmErrKind, ObjectFile};

    fn assemble_src(src: &str) -> Result<ObjectFile, AsmErr> {
        assemble(parse_ast(src).unwrap())
    }
    fn assert_asm_fail<T: std::fmt::Debug>(r: Result<T, AsmErr>, kind: AsmErrKind) {
        assert_eq!(r.unwrap_err().kind, kind);
    }

    #[test]
    fn test_producer_program() {
        let obj = assemble_src("
            .orig x3000
                AND R0, R0, #0
            LOOP
                ADD R0, R0, #1
                SEND
                ADD R1, R0, #-3
                BRn LOOP
                HALT
            .end
        ").unwrap();

        assert_eq!(obj.origin(), 0x3000);
        assert_eq!(obj.words(), [
            0x5020, // AND R0, R0, #0
            0x1021, // ADD R0, R0, #1
            0xF030, // SEND
            0x123D, // ADD R1, R0, #-3
            0x09FC, // BRn #-4
            0xF025, // HALT
        ]);
        assert_eq!(obj.symbol_table().and_then(|s| s.lookup_label("loop")), Some(0x3001));
    }

    #[test]
    fn test_pc_relative_forward() {
        let obj = assemble_src("
            .orig x3000
                LD R1, VALUE
                LEA R2, VALUE
                JSR SUB
                HALT
            SUB RET
            VALUE .fill x1234
            PTR .fill VALUE
            .end
        ").unwrap();

        assert_eq!(obj.words(), [
            0x2204, // LD R1, #4
            0xE403, // LEA R2, #3
            0x4801, // JSR #1
            0xF025,
            0xC1C0, // RET
            0x1234,
            0x3005,
        ]);
        let sym = obj.symbol_table().unwrap();
        assert_eq!(sym.rev_lookup_label(0x3005), Some("VALUE"));
        assert_eq!(sym.label_iter().collect::<Vec<_>>(), [("SUB", 0x3004), ("VALUE", 0x3005), ("PTR", 0x3006)]);
    }

    #[test]
    fn test_directive_layout() {
        let obj = assemble_src(r#"
            .orig x4000
            .blkw 2
            .stringz "ab"
            NOP
            .end
        "#).unwrap();
        assert_eq!(obj.words(), [0, 0, 0x61, 0x62, 0, 0x0000]);
        assert_eq!(obj.addr_iter().last(), Some((0x4005, 0)));
    }

    #[test]
    fn test_block_errors() {
        assert_asm_fail(assemble_src("HALT"), AsmErrKind::UndetAddrStmt);
        assert_asm_fail(assemble_src("A .end"), AsmErrKind::UndetAddrLabel);
        assert_asm_fail(assemble_src(".end"), AsmErrKind::UnopenedOrig);
        assert_asm_fail(assemble_src(".orig x3000\nHALT"), AsmErrKind::UnclosedOrig);
        assert_asm_fail(assemble_src(".orig x3000\n.orig x4000\n.end"), AsmErrKind::OverlappingOrig);
        assert_asm_fail(assemble_src(".orig x3000\nHALT\n.end\n.orig x4000\nHALT\n.end"), AsmErrKind::MultipleBlocks);
        assert_asm_fail(assemble_src(""), AsmErrKind::EmptyProgram);
        assert_asm_fail(assemble_src(".orig xFFFE\n.blkw 3\n.end"), AsmErrKind::WrappingBlock);
    }

    #[test]
    fn test_block_at_end_of_memory() {
        let obj = assemble_src(".orig xFFFE\nHALT\nHALT\n.end").unwrap();
        assert_eq!(obj.words().len(), 2);
    }

    #[test]
    fn test_label_errors() {
        assert_asm_fail(assemble_src(".orig x3000\nA HALT\na HALT\n.end"), AsmErrKind::OverlappingLabels);
        assert_asm_fail(assemble_src(".orig x3000\nBR NOWHERE\n.end"), AsmErrKind::CouldNotFindLabel);
        assert_asm_fail(
            assemble_src(".orig x3000\nBR FAR\n.blkw 300\nFAR HALT\n.end"),
            AsmErrKind::OffsetNewErr(OffsetNewErr::CannotFitSigned(9))
        );
    }

    #[test]
    fn test_object_file_new() {
        assert!(ObjectFile::new(0xFFFF, vec![1]).is_some());
        assert!(ObjectFile::new(0xFFFF, vec![1, 2]).is_none());
        assert_eq!(ObjectFile::new(0x3000, vec![]).map(|o| o.words().len()), Some(0));
    }
}
