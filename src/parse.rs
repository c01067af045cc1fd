//! Parsing assembly source into statements.
//!
//! [`parse_ast`] tokenizes the source with [`lex::Token`] and
//! parses each line into a [`Stmt`]. Labels may precede a statement on the same line
//! (with or without a trailing colon) or sit on lines of their own,
//! in which case they attach to the next statement.
//!
//! ```
//! use lc3_bus::parse::parse_ast;
//!
//! let src = "
//!     .orig x3000
//!     LOOP: RECV
//!           OUT
//!           BR LOOP
//!     .end
//! ";
//! let ast = parse_ast(src).unwrap();
//! assert_eq!(ast.len(), 5);
//! assert_eq!(ast[1].labels[0].name, "LOOP");
//! ```

pub mod lex;

use std::borrow::Cow;
use std::num::NonZeroU16;
use std::ops::Range;

use logos::Logos;

use crate::ast::asm::{AsmInstr, Directive, Stmt, StmtKind};
use crate::ast::{CondCode, IOffset, ImmOrReg, Label, Offset, OffsetNewErr, PCOffset, Reg};
use lex::{Ident, LexErr, Token};

/// Kinds of errors raised while parsing.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ParseErrKind {
    /// The source could not be tokenized.
    Lex(LexErr),
    /// An operand or separator was missing or of the wrong kind.
    Expected(&'static str),
    /// A line has tokens left over after its statement.
    ExtraTokens,
    /// A line starts with something that is neither a label, an instruction, nor a directive.
    ExpectedStatement,
    /// A directive name that does not exist.
    UnknownDirective(String),
    /// A numeric operand that does not fit its field.
    OffsetNewErr(OffsetNewErr),
    /// `.blkw 0`.
    EmptyBlock,
    /// Labels at the end of the file with no statement after them.
    DanglingLabel,
}

/// Error from parsing assembly source.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseErr {
    /// What went wrong.
    pub kind: ParseErrKind,
    /// Where it went wrong.
    pub span: Range<usize>
}
impl ParseErr {
    fn new(kind: ParseErrKind, span: Range<usize>) -> Self {
        Self { kind, span }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ParseErrKind::Lex(e)              => e.fmt(f),
            ParseErrKind::Expected(what)      => write!(f, "expected {what}"),
            ParseErrKind::ExtraTokens         => f.write_str("unexpected tokens after statement"),
            ParseErrKind::ExpectedStatement   => f.write_str("expected instruction or directive"),
            ParseErrKind::UnknownDirective(d) => write!(f, "unknown directive .{d}"),
            ParseErrKind::OffsetNewErr(e)     => e.fmt(f),
            ParseErrKind::EmptyBlock          => f.write_str(".blkw must reserve at least one word"),
            ParseErrKind::DanglingLabel       => f.write_str("label does not precede any statement"),
        }
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            ParseErrKind::OffsetNewErr(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<crate::err::ErrSpan> {
        Some(self.span.clone().into())
    }

    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            ParseErrKind::Lex(e) => e.help(),
            ParseErrKind::OffsetNewErr(e) => e.help(),
            ParseErrKind::ExtraTokens => Some("each line holds at most one statement".into()),
            ParseErrKind::UnknownDirective(_) => Some("valid directives are .orig, .fill, .blkw, .stringz, and .end".into()),
            ParseErrKind::DanglingLabel => Some("try moving this label before an instruction or directive".into()),
            _ => None,
        }
    }
}

/// Parses assembly source code into a list of statements.
pub fn parse_ast(src: &str) -> Result<Vec<Stmt>, ParseErr> {
    let mut tokens = vec![];
    for (m_token, span) in Token::lexer(src).spanned() {
        match m_token {
            Ok(Token::Comment) => {},
            Ok(token) => tokens.push((token, span)),
            Err(e) => return Err(ParseErr::new(ParseErrKind::Lex(e), span)),
        }
    }

    let mut stmts = vec![];
    let mut pending_labels = vec![];
    for line in tokens.split(|(t, _)| t.is_newline()) {
        let mut parser = LineParser { tokens: line, pos: 0, eol: src.len() };

        pending_labels.extend(parser.labels());
        if parser.at_end() { continue; }

        let (nucleus, span) = parser.statement()?;
        parser.finish()?;
        stmts.push(Stmt { labels: std::mem::take(&mut pending_labels), nucleus, span });
    }

    match pending_labels.first() {
        Some(label) => Err(ParseErr::new(ParseErrKind::DanglingLabel, label.span())),
        None => Ok(stmts),
    }
}

impl Token {
    fn is_newline(&self) -> bool {
        matches!(self, Token::NewLine)
    }
}

/// Cursor over the tokens of one line.
struct LineParser<'t> {
    tokens: &'t [(Token, Range<usize>)],
    pos: usize,
    /// Span used for errors at the end of the line.
    eol: usize,
}
impl LineParser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&(Token, Range<usize>)> {
        self.tokens.get(self.pos)
    }

    fn next_span(&self) -> Range<usize> {
        match (self.peek(), self.tokens.last()) {
            (Some((_, span)), _) => span.clone(),
            (None, Some((_, span))) => span.end .. span.end,
            (None, None) => self.eol .. self.eol,
        }
    }

    fn prev_end(&self) -> usize {
        self.tokens[..self.pos].last().map_or(self.eol, |(_, s)| s.end)
    }

    /// Consumes the next token if `f` accepts it.
    fn eat<T>(&mut self, what: &'static str, f: impl FnOnce(&Token, Range<usize>) -> Option<T>) -> Result<T, ParseErr> {
        let result = self.peek().and_then(|(t, span)| f(t, span.clone()));
        match result {
            Some(value) => {
                self.pos += 1;
                Ok(value)
            },
            None => Err(ParseErr::new(ParseErrKind::Expected(what), self.next_span())),
        }
    }

    /// Consumes leading labels (each optionally followed by a colon).
    fn labels(&mut self) -> Vec<Label> {
        let mut labels = vec![];
        while let Some((Token::Ident(Ident::Label(name)), span)) = self.peek() {
            labels.push(Label::new(name.clone(), span.clone()));
            self.pos += 1;
            if let Some((Token::Colon, _)) = self.peek() {
                self.pos += 1;
            }
        }
        labels
    }

    fn finish(&self) -> Result<(), ParseErr> {
        match self.at_end() {
            true  => Ok(()),
            false => Err(ParseErr::new(ParseErrKind::ExtraTokens, self.next_span().start .. self.prev_line_end())),
        }
    }

    fn prev_line_end(&self) -> usize {
        self.tokens.last().map_or(self.eol, |(_, s)| s.end)
    }

    fn comma(&mut self) -> Result<(), ParseErr> {
        self.eat("comma", |t, _| matches!(t, Token::Comma).then_some(()))
    }

    fn reg(&mut self) -> Result<Reg, ParseErr> {
        self.eat("register", |t, _| match t {
            &Token::Reg(r) => Some(Reg(r)),
            _ => None
        })
    }

    /// A signed field. Unsigned literals are accepted if they fit.
    fn imm<const N: u32>(&mut self) -> Result<IOffset<N>, ParseErr> {
        let (value, span) = self.eat("immediate value", |t, span| match *t {
            Token::Signed(n)   => Some((Ok(n), span)),
            Token::Unsigned(n) => Some((i16::try_from(n).map_err(|_| OffsetNewErr::CannotFitSigned(N)), span)),
            _ => None
        })?;

        value.and_then(IOffset::new)
            .map_err(|e| ParseErr::new(ParseErrKind::OffsetNewErr(e), span))
    }

    fn unsigned<const N: u32>(&mut self) -> Result<Offset<u16, N>, ParseErr> {
        let (value, span) = self.eat("unsigned value", |t, span| match *t {
            Token::Unsigned(n) => Some((n, span)),
            _ => None
        })?;

        Offset::new(value)
            .map_err(|e| ParseErr::new(ParseErrKind::OffsetNewErr(e), span))
    }

    fn label(&mut self) -> Option<Label> {
        match self.peek() {
            Some((Token::Ident(Ident::Label(name)), span)) => {
                let label = Label::new(name.clone(), span.clone());
                self.pos += 1;
                Some(label)
            },
            _ => None
        }
    }

    fn pc_offset<const N: u32>(&mut self) -> Result<PCOffset<i16, N>, ParseErr> {
        match self.label() {
            Some(label) => Ok(PCOffset::Label(label)),
            None => self.imm().map(PCOffset::Offset)
                .map_err(|e| match e.kind {
                    ParseErrKind::Expected(_) => ParseErr::new(ParseErrKind::Expected("label or offset"), e.span),
                    _ => e
                }),
        }
    }

    fn imm_or_reg(&mut self) -> Result<ImmOrReg<5>, ParseErr> {
        match self.peek() {
            Some((Token::Reg(_), _)) => self.reg().map(ImmOrReg::Reg),
            _ => self.imm().map(ImmOrReg::Imm)
                .map_err(|e| match e.kind {
                    ParseErrKind::Expected(_) => ParseErr::new(ParseErrKind::Expected("register or immediate value"), e.span),
                    _ => e
                }),
        }
    }

    fn statement(&mut self) -> Result<(StmtKind, Range<usize>), ParseErr> {
        let start = self.next_span().start;
        let nucleus = match self.peek().cloned() {
            Some((Token::Ident(ident), _)) => {
                self.pos += 1;
                StmtKind::Instr(self.instruction(ident)?)
            },
            Some((Token::Directive(name), span)) => {
                self.pos += 1;
                StmtKind::Directive(self.directive(&name, span)?)
            },
            _ => return Err(ParseErr::new(ParseErrKind::ExpectedStatement, self.next_span())),
        };

        Ok((nucleus, start .. self.prev_end()))
    }

    fn instruction(&mut self, ident: Ident) -> Result<AsmInstr, ParseErr> {
        let br = |p: &mut Self, cc: CondCode| p.pc_offset().map(|off| AsmInstr::BR(cc, off));

        let instr = match ident {
            Ident::ADD => {
                let dr = self.reg()?; self.comma()?;
                let sr1 = self.reg()?; self.comma()?;
                AsmInstr::ADD(dr, sr1, self.imm_or_reg()?)
            },
            Ident::AND => {
                let dr = self.reg()?; self.comma()?;
                let sr1 = self.reg()?; self.comma()?;
                AsmInstr::AND(dr, sr1, self.imm_or_reg()?)
            },
            Ident::NOT => {
                let dr = self.reg()?; self.comma()?;
                AsmInstr::NOT(dr, self.reg()?)
            },
            Ident::BR | Ident::BRNZP => br(self, 0b111)?,
            Ident::BRN  => br(self, 0b100)?,
            Ident::BRZ  => br(self, 0b010)?,
            Ident::BRP  => br(self, 0b001)?,
            Ident::BRNZ => br(self, 0b110)?,
            Ident::BRNP => br(self, 0b101)?,
            Ident::BRZP => br(self, 0b011)?,
            Ident::JMP  => AsmInstr::JMP(self.reg()?),
            Ident::RET  => AsmInstr::RET,
            Ident::JSR  => AsmInstr::JSR(self.pc_offset()?),
            Ident::JSRR => AsmInstr::JSRR(self.reg()?),
            Ident::LD   => { let dr = self.reg()?; self.comma()?; AsmInstr::LD(dr, self.pc_offset()?) },
            Ident::LDI  => { let dr = self.reg()?; self.comma()?; AsmInstr::LDI(dr, self.pc_offset()?) },
            Ident::LEA  => { let dr = self.reg()?; self.comma()?; AsmInstr::LEA(dr, self.pc_offset()?) },
            Ident::ST   => { let sr = self.reg()?; self.comma()?; AsmInstr::ST(sr, self.pc_offset()?) },
            Ident::STI  => { let sr = self.reg()?; self.comma()?; AsmInstr::STI(sr, self.pc_offset()?) },
            Ident::LDR  => {
                let dr = self.reg()?; self.comma()?;
                let br = self.reg()?; self.comma()?;
                AsmInstr::LDR(dr, br, self.imm()?)
            },
            Ident::STR  => {
                let sr = self.reg()?; self.comma()?;
                let br = self.reg()?; self.comma()?;
                AsmInstr::STR(sr, br, self.imm()?)
            },
            Ident::TRAP  => AsmInstr::TRAP(self.unsigned()?),
            Ident::NOP   => AsmInstr::NOP,
            Ident::GETC  => AsmInstr::GETC,
            Ident::OUT   => AsmInstr::OUT,
            Ident::PUTC  => AsmInstr::PUTC,
            Ident::PUTS  => AsmInstr::PUTS,
            Ident::IN    => AsmInstr::IN,
            Ident::PUTSP => AsmInstr::PUTSP,
            Ident::HALT  => AsmInstr::HALT,
            Ident::SEND  => AsmInstr::SEND,
            Ident::RECV  => AsmInstr::RECV,
            Ident::Label(_) => unreachable!("labels should have been consumed before the statement"),
        };

        Ok(instr)
    }

    fn directive(&mut self, name: &str, span: Range<usize>) -> Result<Directive, ParseErr> {
        let directive = match &*name.to_lowercase() {
            "orig" => Directive::Orig(self.unsigned()?),
            "fill" => match self.label() {
                Some(label) => Directive::Fill(PCOffset::Label(label)),
                None => {
                    let value = self.eat("numeric value or label", |t, _| match *t {
                        Token::Unsigned(n) => Some(n),
                        Token::Signed(n)   => Some(n as u16),
                        _ => None
                    })?;
                    Directive::Fill(PCOffset::Offset(Offset::new_trunc(value)))
                }
            },
            "blkw" => {
                let span = self.next_span();
                let n = self.unsigned::<16>()?.get();
                let n = NonZeroU16::new(n).ok_or_else(|| ParseErr::new(ParseErrKind::EmptyBlock, span))?;
                Directive::Blkw(n)
            },
            "stringz" => Directive::Stringz(self.eat("string literal", |t, _| match t {
                Token::String(s) => Some(s.clone()),
                _ => None
            })?),
            "end" => Directive::End,
            _ => return Err(ParseErr::new(ParseErrKind::UnknownDirective(name.to_string()), span)),
        };

        Ok(directive)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use crate::ast::asm::{AsmInstr, Directive, StmtKind};
    use crate::ast::reg_consts::{R0, R1, R2, R6, R7};
    use crate::ast::{IOffset, ImmOrReg, Offset, OffsetNewErr, PCOffset};
    use crate::parse::lex::LexErr;

    use super::{parse_ast, ParseErrKind};

    fn nuclei(src: &str) -> Vec<StmtKind> {
        parse_ast(src).unwrap().into_iter().map(|s| s.nucleus).collect()
    }
    fn err_kind(src: &str) -> ParseErrKind {
        parse_ast(src).unwrap_err().kind
    }

    #[test]
    fn test_instructions() {
        let src = "
            ADD R0, R1, R2
            AND R1, R1, #-16
            NOT R2, R0
            LDR R0, R6, #5
            STR R7, R6, #-1
            JSRR R2
            JMP R7
            RET
            TRAP x30
            SEND
            RECV
        ";
        assert_eq!(nuclei(src), vec![
            StmtKind::Instr(AsmInstr::ADD(R0, R1, ImmOrReg::Reg(R2))),
            StmtKind::Instr(AsmInstr::AND(R1, R1, ImmOrReg::Imm(IOffset::new(-16).unwrap()))),
            StmtKind::Instr(AsmInstr::NOT(R2, R0)),
            StmtKind::Instr(AsmInstr::LDR(R0, R6, IOffset::new(5).unwrap())),
            StmtKind::Instr(AsmInstr::STR(R7, R6, IOffset::new(-1).unwrap())),
            StmtKind::Instr(AsmInstr::JSRR(R2)),
            StmtKind::Instr(AsmInstr::JMP(R7)),
            StmtKind::Instr(AsmInstr::RET),
            StmtKind::Instr(AsmInstr::TRAP(Offset::new(0x30).unwrap())),
            StmtKind::Instr(AsmInstr::SEND),
            StmtKind::Instr(AsmInstr::RECV),
        ]);
    }

    #[test]
    fn test_branches_and_labels() {
        let ast = parse_ast("
            TOP
            LOOP: BRnp LOOP ; spin
            BR #-2
            DONE HALT
        ").unwrap();

        assert_eq!(ast.len(), 3);
        let names: Vec<_> = ast[0].labels.iter().map(|l| &*l.name).collect();
        assert_eq!(names, ["TOP", "LOOP"]);
        assert!(matches!(&ast[0].nucleus, StmtKind::Instr(AsmInstr::BR(0b101, PCOffset::Label(l))) if l.name == "LOOP"));
        assert_eq!(ast[1].nucleus, StmtKind::Instr(AsmInstr::BR(0b111, PCOffset::Offset(IOffset::new(-2).unwrap()))));
        assert_eq!(ast[2].labels[0].name, "DONE");
    }

    #[test]
    fn test_directives() {
        assert_eq!(nuclei(r#"
            .orig x3000
            .fill #-1
            .fill x8000
            .blkw 3
            .STRINGZ "hi"
            .end
        "#), vec![
            StmtKind::Directive(Directive::Orig(Offset::new(0x3000).unwrap())),
            StmtKind::Directive(Directive::Fill(PCOffset::Offset(Offset::new(0xFFFF).unwrap()))),
            StmtKind::Directive(Directive::Fill(PCOffset::Offset(Offset::new(0x8000).unwrap()))),
            StmtKind::Directive(Directive::Blkw(NonZeroU16::new(3).unwrap())),
            StmtKind::Directive(Directive::Stringz("hi".to_string())),
            StmtKind::Directive(Directive::End),
        ]);
    }

    #[test]
    fn test_statement_span() {
        let src = "  LOOP ADD R0, R0, #1  ";
        let ast = parse_ast(src).unwrap();
        assert_eq!(&src[ast[0].span.clone()], "ADD R0, R0, #1");
    }

    #[test]
    fn test_errors() {
        assert_eq!(err_kind("ADD R0, R0"), ParseErrKind::Expected("comma"));
        assert_eq!(err_kind("ADD R0, R0, #16"), ParseErrKind::OffsetNewErr(OffsetNewErr::CannotFitSigned(5)));
        assert_eq!(err_kind("ADD R0, R0, x8000"), ParseErrKind::OffsetNewErr(OffsetNewErr::CannotFitSigned(5)));
        assert_eq!(err_kind("LD R0"), ParseErrKind::Expected("comma"));
        assert_eq!(err_kind("LD R0, R1"), ParseErrKind::Expected("label or offset"));
        assert_eq!(err_kind("HALT HALT"), ParseErrKind::ExtraTokens);
        assert_eq!(err_kind(".blkw 0"), ParseErrKind::EmptyBlock);
        assert_eq!(err_kind(".origin x3000"), ParseErrKind::UnknownDirective("origin".to_string()));
        assert_eq!(err_kind("TRAP x100"), ParseErrKind::OffsetNewErr(OffsetNewErr::CannotFitUnsigned(8)));
        assert_eq!(err_kind("HALT\nEND:"), ParseErrKind::DanglingLabel);
        assert_eq!(err_kind(", HALT"), ParseErrKind::ExpectedStatement);
        assert_eq!(err_kind("ADD R9, R0, R0"), ParseErrKind::Lex(LexErr::InvalidReg));
    }

    #[test]
    fn test_error_span() {
        let src = "ADD R0, R0, #99";
        let err = parse_ast(src).unwrap_err();
        assert_eq!(&src[err.span], "#99");
    }
}
