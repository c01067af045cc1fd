//! Error interface for this crate.
//!
//! Every error type implements [`Error`], which adds an optional source span
//! and an optional help message on top of [`std::error::Error`].
//! [`report`] renders either of those against the original source.

use std::borrow::Cow;
use std::ops::Range;

pub use crate::asm::{AsmErr, AsmErrKind};
pub use crate::asm::encoding::ImageErr;
pub use crate::ast::OffsetNewErr;
pub use crate::harness::{LoadErr, RunErr};
pub use crate::parse::lex::LexErr;
pub use crate::parse::ParseErr;
pub use crate::sim::SimErr;

/// Common interface for errors raised by this crate.
pub trait Error: std::error::Error {
    /// The range(s) in the source code where this error occurred, if known.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A suggestion for fixing this error, if there is one.
    fn help(&self) -> Option<Cow<str>>;
}

/// Where an error occurred in assembly source.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ErrSpan {
    /// One location.
    One(Range<usize>),
    /// Two locations (e.g., both definitions of a duplicated label).
    Two([Range<usize>; 2]),
    /// Any number of locations.
    Many(Vec<Range<usize>>)
}
impl ErrSpan {
    /// The first location in this span.
    pub fn first(&self) -> Option<Range<usize>> {
        match self {
            ErrSpan::One(r)      => Some(r.clone()),
            ErrSpan::Two([r, _]) => Some(r.clone()),
            ErrSpan::Many(rs)    => rs.first().cloned(),
        }
    }

    /// All of the locations in this span.
    pub fn iter(&self) -> impl Iterator<Item=&Range<usize>> + '_ {
        match self {
            ErrSpan::One(r)   => std::slice::from_ref(r).iter(),
            ErrSpan::Two(rs)  => rs.iter(),
            ErrSpan::Many(rs) => rs.iter(),
        }
    }
}
impl From<Range<usize>> for ErrSpan {
    fn from(value: Range<usize>) -> Self {
        ErrSpan::One(value)
    }
}
impl From<[Range<usize>; 2]> for ErrSpan {
    fn from(value: [Range<usize>; 2]) -> Self {
        ErrSpan::Two(value)
    }
}
impl From<Vec<Range<usize>>> for ErrSpan {
    fn from(value: Vec<Range<usize>>) -> Self {
        match <[_; 1]>::try_from(value) {
            Ok([r]) => ErrSpan::One(r),
            Err(rs) => ErrSpan::Many(rs),
        }
    }
}

/// Finds the 1-indexed line and column of a byte index in `src`.
pub fn line_col(src: &str, index: usize) -> (usize, usize) {
    let index = index.min(src.len());
    let before = &src[..index];
    let line = before.matches('\n').count() + 1;
    let col = match before.rfind('\n') {
        Some(nl) => index - nl,
        None     => index + 1,
    };
    (line, col)
}

/// Renders an error as a multi-line message, pointing at each of its spans in `src`.
///
/// ```
/// use lc3_bus::err::report;
/// use lc3_bus::parse::parse_ast;
///
/// let src = ".orig x3000\nADD R0, R0, #99\n.end";
/// let err = parse_ast(src).unwrap_err();
/// let msg = report(&err, src);
/// assert!(msg.starts_with("error: "));
/// assert!(msg.contains("line 2"));
/// ```
pub fn report<E: Error + ?Sized>(err: &E, src: &str) -> String {
    let mut out = format!("error: {err}");
    if let Some(span) = err.span() {
        for range in span.iter() {
            let (line, col) = line_col(src, range.start);
            let text = src.lines().nth(line - 1).unwrap_or("");
            let width = range.len().clamp(1, text.len().saturating_sub(col - 1).max(1));

            out.push_str(&format!("\n  --> line {line}, column {col}\n   | {text}\n   | {}{}", " ".repeat(col - 1), "^".repeat(width)));
        }
    }
    if let Some(help) = err.help() {
        out.push_str(&format!("\n  help: {help}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{line_col, ErrSpan};

    #[test]
    fn test_line_col() {
        let src = "abc\ndef\n\nghi";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 2), (1, 3));
        assert_eq!(line_col(src, 4), (2, 1));
        assert_eq!(line_col(src, 9), (4, 1));
        assert_eq!(line_col(src, 100), (4, 4));
    }

    #[test]
    fn test_span_from_vec() {
        assert_eq!(ErrSpan::from(vec![1..2]), ErrSpan::One(1..2));
        assert_eq!(ErrSpan::from(vec![1..2, 3..4]), ErrSpan::Many(vec![1..2, 3..4]));
        assert_eq!(ErrSpan::from(vec![1..2, 3..4]).first(), Some(1..2));
        assert_eq!(ErrSpan::from([5..6, 7..9]).iter().count(), 2);
    }
}
