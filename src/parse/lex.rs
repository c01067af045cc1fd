//! Tokenizing assembly source.
//!
//! The [`Token`] enum is generated with [`logos`]. Numeric, register,
//! and string tokens are validated while lexing, so a malformed literal
//! surfaces as a [`LexErr`] at the exact span where it occurs.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

/// A unit of assembly source.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t]+", error = LexErr)]
pub enum Token {
    // These patterns deliberately over-match (e.g. `3Q` matches as a number)
    // so that the callback can reject the whole unit with a precise error.

    /// An unsigned numeric literal: `9`, `#14`, `x7F`.
    #[regex(r"\d\w*", lex_unsigned_dec)]
    #[regex(r"#\d?\w*", lex_unsigned_dec)]
    #[regex(r"[Xx][\dA-Fa-f]\w*", lex_unsigned_hex)]
    Unsigned(u16),

    /// A negative numeric literal: `-9`, `#-14`, `x-7F`.
    #[regex(r"-\w*", lex_signed_dec)]
    #[regex(r"#-\w*", lex_signed_dec)]
    #[regex(r"[Xx]-\w*", lex_signed_hex)]
    Signed(i16),

    /// A register, `R0` through `R7`.
    #[regex(r"[Rr]\d+", lex_reg)]
    Reg(u8),

    /// An instruction mnemonic or a label. Mnemonics are case-insensitive.
    #[regex(r"[A-Za-z_]\w*", |lx| Ident::from_name(lx.slice()))]
    Ident(Ident),

    /// A directive name without its leading dot (`.orig` lexes as `orig`).
    #[regex(r"\.[A-Za-z_]\w*", |lx| lx.slice()[1..].to_string())]
    Directive(String),

    /// A string literal with escapes resolved.
    #[token("\"", lex_string)]
    String(String),

    /// `:` (optional after a label)
    #[token(":")]
    Colon,

    /// `,` (between operands)
    #[token(",")]
    Comma,

    /// A `;` comment, up to the end of the line.
    #[regex(r";[^\n]*")]
    Comment,

    /// A line break.
    #[regex(r"\r?\n")]
    NewLine
}

macro_rules! mnemonics {
    ($($name:ident),+ $(,)?) => {
        /// An identifier: either a mnemonic or a label.
        #[derive(Debug, PartialEq, Eq, Hash, Clone)]
        pub enum Ident {
            $(
                #[allow(missing_docs)]
                $name
            ),+,
            /// Anything which is not a mnemonic.
            Label(String)
        }

        impl Ident {
            fn from_name(name: &str) -> Self {
                match &*name.to_uppercase() {
                    $(stringify!($name) => Self::$name),+,
                    _ => Self::Label(name.to_string())
                }
            }
        }

        impl std::fmt::Display for Ident {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$name => f.write_str(stringify!($name))),+,
                    Self::Label(name) => f.write_str(name)
                }
            }
        }
    };
}
mnemonics! {
    ADD, AND, NOT, BR, BRN, BRZ, BRP, BRNZ, BRNP, BRZP, BRNZP,
    JMP, RET, JSR, JSRR, LD, LDI, LDR, LEA, ST, STI, STR, TRAP, NOP,
    GETC, OUT, PUTC, PUTS, IN, PUTSP, HALT, SEND, RECV
}

/// Errors raised while tokenizing.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum LexErr {
    /// Unsigned literal exceeds 16 bits.
    DoesNotFitU16,
    /// Negative literal is below `i16::MIN`.
    DoesNotFitI16,
    /// Hex literal has a non-hex digit.
    InvalidHex,
    /// Decimal literal has a non-decimal digit.
    InvalidDec,
    /// `x` or `x-` with no digits.
    EmptyHex,
    /// `#`, `-`, or `#-` with no digits.
    EmptyDec,
    /// String literal is missing its closing quote.
    UnclosedStrLit,
    /// String literal does not fit in memory.
    StrLitTooBig,
    /// `R` followed by a number other than 0-7.
    InvalidReg,
    /// A character that starts no token.
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFitU16  => f.write_str("numeric literal does not fit 16-bit unsigned integer"),
            LexErr::DoesNotFitI16  => f.write_str("numeric literal does not fit 16-bit signed integer"),
            LexErr::InvalidHex | LexErr::EmptyHex => f.write_str("invalid hex literal"),
            LexErr::InvalidDec | LexErr::EmptyDec => f.write_str("invalid decimal literal"),
            LexErr::UnclosedStrLit => f.write_str("unclosed string literal"),
            LexErr::StrLitTooBig   => f.write_str("string literal is too large"),
            LexErr::InvalidReg     => f.write_str("invalid register"),
            LexErr::InvalidSymbol  => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFitU16  => Some(format!("the range for a 16-bit unsigned integer is [0, {}]", u16::MAX).into()),
            LexErr::DoesNotFitI16  => Some(format!("the range for a 16-bit signed integer is [{}, {}]", i16::MIN, i16::MAX).into()),
            LexErr::InvalidHex     => Some("a hex literal starts with 'x' and consists of 0-9, A-F".into()),
            LexErr::InvalidDec     => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::EmptyHex       => Some("there should be hex digits (0-9, A-F) here".into()),
            LexErr::EmptyDec       => Some("there should be digits (0-9) here".into()),
            LexErr::UnclosedStrLit => Some("add a quote to the end of the string literal".into()),
            LexErr::StrLitTooBig   => Some(format!("string literals are limited to at most {} characters", u16::MAX - 1).into()),
            LexErr::InvalidReg     => Some("this must be R0-R7".into()),
            LexErr::InvalidSymbol  => None,
        }
    }
}

/// Parses the digits of a literal, mapping integer parse failures onto [`LexErr`].
fn parse_digits<T>(digits: &str, radix: u32, parse: fn(&str, u32) -> Result<T, std::num::ParseIntError>, overflow: LexErr) -> Result<T, LexErr> {
    let (invalid, empty) = match radix {
        16 => (LexErr::InvalidHex, LexErr::EmptyHex),
        _  => (LexErr::InvalidDec, LexErr::EmptyDec),
    };
    if digits.is_empty() || digits == "-" {
        return Err(empty);
    }

    parse(digits, radix).map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => overflow,
        IntErrorKind::Empty => empty,
        _ => invalid,
    })
}

/// Lexes a decimal literal (with an optional `#` prefix).
fn lex_dec<T: DecTarget>(lx: &Lexer<'_, Token>) -> Result<T, LexErr> {
    let digits = lx.slice().strip_prefix('#').unwrap_or(lx.slice());
    parse_digits(digits, 10, T::from_str_radix, T::OVERFLOW)
}
fn lex_hex<T: DecTarget>(lx: &Lexer<'_, Token>) -> Result<T, LexErr> {
    let digits = &lx.slice()[1..];
    parse_digits(digits, 16, T::from_str_radix, T::OVERFLOW)
}
fn lex_unsigned_dec(lx: &Lexer<'_, Token>) -> Result<u16, LexErr> {
    lex_dec(lx)
}
fn lex_signed_dec(lx: &Lexer<'_, Token>) -> Result<i16, LexErr> {
    lex_dec(lx)
}
fn lex_unsigned_hex(lx: &Lexer<'_, Token>) -> Result<u16, LexErr> {
    lex_hex(lx)
}
fn lex_signed_hex(lx: &Lexer<'_, Token>) -> Result<i16, LexErr> {
    lex_hex(lx)
}

/// Integer types a literal can lex into.
trait DecTarget: Sized {
    const OVERFLOW: LexErr;
    fn from_str_radix(s: &str, radix: u32) -> Result<Self, std::num::ParseIntError>;
}
impl DecTarget for u16 {
    const OVERFLOW: LexErr = LexErr::DoesNotFitU16;
    fn from_str_radix(s: &str, radix: u32) -> Result<Self, std::num::ParseIntError> {
        u16::from_str_radix(s, radix)
    }
}
impl DecTarget for i16 {
    const OVERFLOW: LexErr = LexErr::DoesNotFitI16;
    fn from_str_radix(s: &str, radix: u32) -> Result<Self, std::num::ParseIntError> {
        i16::from_str_radix(s, radix)
    }
}

fn lex_reg(lx: &Lexer<'_, Token>) -> Result<u8, LexErr> {
    lx.slice()[1..].parse::<u8>().ok()
        .filter(|&r| r < 8)
        .ok_or(LexErr::InvalidReg)
}

fn lex_string(lx: &mut Lexer<'_, Token>) -> Result<String, LexErr> {
    let line = lx.remainder()
        .split(['\n', '\r'])
        .next()
        .unwrap_or("");

    let mut buf = String::new();
    let mut chars = line.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                lx.bump(i + 1);
                return match buf.len() < usize::from(u16::MAX) {
                    true  => Ok(buf),
                    false => Err(LexErr::StrLitTooBig),
                };
            },
            '\\' => match chars.next() {
                Some((_, 'n'))  => buf.push('\n'),
                Some((_, 'r'))  => buf.push('\r'),
                Some((_, 't'))  => buf.push('\t'),
                Some((_, '0'))  => buf.push('\0'),
                Some((_, '\\')) => buf.push('\\'),
                Some((_, '"'))  => buf.push('"'),
                Some((_, other)) => {
                    buf.push('\\');
                    buf.push(other);
                },
                None => break,
            },
            c => buf.push(c),
        }
    }

    lx.bump(line.len());
    Err(LexErr::UnclosedStrLit)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{Ident, LexErr, Token};

    fn lex(src: &str) -> Vec<Result<Token, LexErr>> {
        Token::lexer(src).collect()
    }
    fn label(s: &str) -> Token {
        Token::Ident(Ident::Label(s.to_string()))
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("0 12 #34 x2A XfF -5 #-6 x-10"), vec![
            Ok(Token::Unsigned(0)),
            Ok(Token::Unsigned(12)),
            Ok(Token::Unsigned(34)),
            Ok(Token::Unsigned(0x2A)),
            Ok(Token::Unsigned(0xFF)),
            Ok(Token::Signed(-5)),
            Ok(Token::Signed(-6)),
            Ok(Token::Signed(-0x10)),
        ]);
    }

    #[test]
    fn test_number_limits() {
        assert_eq!(lex("65535 xFFFF -32768 x-8000"), vec![
            Ok(Token::Unsigned(u16::MAX)),
            Ok(Token::Unsigned(u16::MAX)),
            Ok(Token::Signed(i16::MIN)),
            Ok(Token::Signed(i16::MIN)),
        ]);
        assert_eq!(lex("65536"), vec![Err(LexErr::DoesNotFitU16)]);
        assert_eq!(lex("x10000"), vec![Err(LexErr::DoesNotFitU16)]);
        assert_eq!(lex("-32769"), vec![Err(LexErr::DoesNotFitI16)]);
    }

    #[test]
    fn test_number_invalid() {
        assert_eq!(lex("3Q"), vec![Err(LexErr::InvalidDec)]);
        assert_eq!(lex("#"), vec![Err(LexErr::EmptyDec)]);
        assert_eq!(lex("#-"), vec![Err(LexErr::EmptyDec)]);
        assert_eq!(lex("x-"), vec![Err(LexErr::EmptyHex)]);
        assert_eq!(lex("x0G"), vec![Err(LexErr::InvalidHex)]);
    }

    #[test]
    fn test_regs() {
        assert_eq!(lex("R0 r7"), vec![Ok(Token::Reg(0)), Ok(Token::Reg(7))]);
        assert_eq!(lex("R8"), vec![Err(LexErr::InvalidReg)]);
    }

    #[test]
    fn test_idents() {
        assert_eq!(lex("send Recv HALT brnzp Loop"), vec![
            Ok(Token::Ident(Ident::SEND)),
            Ok(Token::Ident(Ident::RECV)),
            Ok(Token::Ident(Ident::HALT)),
            Ok(Token::Ident(Ident::BRNZP)),
            Ok(label("Loop")),
        ]);
        // label names keep their case
        assert_eq!(Ident::from_name("loop").to_string(), "loop");
        assert_eq!(Ident::from_name("jsrr").to_string(), "JSRR");
    }

    #[test]
    fn test_strings() {
        assert_eq!(lex(r#""hi" "" "a\nb\"c""#), vec![
            Ok(Token::String("hi".to_string())),
            Ok(Token::String(String::new())),
            Ok(Token::String("a\nb\"c".to_string())),
        ]);
        assert_eq!(lex("\"abc\nHALT"), vec![
            Err(LexErr::UnclosedStrLit),
            Ok(Token::NewLine),
            Ok(Token::Ident(Ident::HALT)),
        ]);
    }

    #[test]
    fn test_line_structure() {
        assert_eq!(lex("LOOP: ADD R0, R0, #1 ; count\r\n.fill x0"), vec![
            Ok(label("LOOP")),
            Ok(Token::Colon),
            Ok(Token::Ident(Ident::ADD)),
            Ok(Token::Reg(0)),
            Ok(Token::Comma),
            Ok(Token::Reg(0)),
            Ok(Token::Comma),
            Ok(Token::Unsigned(1)),
            Ok(Token::Comment),
            Ok(Token::NewLine),
            Ok(Token::Directive("fill".to_string())),
            Ok(Token::Unsigned(0)),
        ]);
    }

    #[test]
    fn test_invalid_symbol() {
        for c in ['@', '$', '%', '&', '*', '(', '[', '{', '!', '?'] {
            assert_eq!(lex(&c.to_string()), vec![Err(LexErr::InvalidSymbol)], "{c:?} should be invalid");
        }
    }
}
