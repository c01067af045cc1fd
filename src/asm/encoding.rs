//! Formatters which can read and write program images.
//!
//! The [`ObjFileFormat`] trait describes an implementation of reading/writing program images.
//! This module provides two implementations of the trait:
//! - [`ImageFormat`]: the binary `.obj` image the loader reads
//! - [`TextFormat`]: a hex-per-line text rendition of the same data

use std::fmt::Write;

use super::ObjectFile;

/// A trait defining program image formats.
pub trait ObjFileFormat {
    /// Representation of the serialized format.
    ///
    /// For binary formats, `[u8]` should be used.
    /// For text-based formats,`str` should be used.
    type Stream: ToOwned + ?Sized;
    /// Serializes into the stream format.
    fn serialize(o: &ObjectFile) -> <Self::Stream as ToOwned>::Owned;
    /// Deserializes from the stream format.
    fn deserialize(i: &Self::Stream) -> Result<ObjectFile, ImageErr>;
}

/// Errors raised while decoding a program image.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ImageErr {
    /// The image has no origin word.
    Empty,
    /// The binary image has an odd number of bytes.
    OddLength(usize),
    /// The image would run past the end of memory.
    TooLarge {
        /// The load address.
        origin: u16,
        /// The number of words after the origin.
        len: usize
    },
    /// A line of a text image is not a hex word.
    InvalidHexWord {
        /// The 1-indexed line number.
        line: usize
    },
}
impl std::fmt::Display for ImageErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageErr::Empty => f.write_str("image has no origin word"),
            ImageErr::OddLength(n) => write!(f, "image has an odd number of bytes ({n})"),
            ImageErr::TooLarge { origin, len } => write!(f, "image of {len} words at x{origin:04X} does not fit in memory"),
            ImageErr::InvalidHexWord { line } => write!(f, "line {line} is not a hex word"),
        }
    }
}
impl std::error::Error for ImageErr {}
impl crate::err::Error for ImageErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            ImageErr::Empty | ImageErr::OddLength(_) => Some("an image is a big-endian origin word followed by big-endian words".into()),
            ImageErr::TooLarge { .. } => Some("the origin plus the word count must not exceed x10000".into()),
            ImageErr::InvalidHexWord { .. } => Some("each line should hold one prefixed hex word, like x3000 or 0x5020".into()),
        }
    }
}

fn build(origin: u16, words: Vec<u16>) -> Result<ObjectFile, ImageErr> {
    let len = words.len();
    ObjectFile::new(origin, words).ok_or(ImageErr::TooLarge { origin, len })
}

// BINARY!
/// The binary program image.
///
/// The first big-endian word is the origin. Every following big-endian word
/// is placed at consecutive addresses starting at the origin.
///
/// ```
/// use lc3_bus::asm::encoding::{ImageFormat, ObjFileFormat};
///
/// let obj = ImageFormat::deserialize(&[0x30, 0x00, 0xF0, 0x25]).unwrap();
/// assert_eq!(obj.origin(), 0x3000);
/// assert_eq!(obj.words(), [0xF025]);
/// ```
pub struct ImageFormat;

impl ObjFileFormat for ImageFormat {
    type Stream = [u8];

    fn serialize(o: &ObjectFile) -> <Self::Stream as ToOwned>::Owned {
        std::iter::once(o.origin())
            .chain(o.words().iter().copied())
            .flat_map(u16::to_be_bytes)
            .collect()
    }

    fn deserialize(bytes: &Self::Stream) -> Result<ObjectFile, ImageErr> {
        if bytes.len() % 2 != 0 {
            return Err(ImageErr::OddLength(bytes.len()));
        }

        let mut words = bytes.chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]));

        let origin = words.next().ok_or(ImageErr::Empty)?;
        build(origin, words.collect())
    }
}

// TEXT!
/// A text-based program image.
///
/// Each non-blank line holds one hex word, prefixed with `x` or `0x`.
/// The first word is the origin. Anything after a `;` is ignored.
pub struct TextFormat;

impl ObjFileFormat for TextFormat {
    type Stream = str;

    fn serialize(o: &ObjectFile) -> <Self::Stream as ToOwned>::Owned {
        let mut buf = String::with_capacity(6 * (o.words().len() + 1));
        // Writing into a String cannot fail.
        let _ = writeln!(buf, "x{:04X}", o.origin());
        for &word in o.words() {
            let _ = writeln!(buf, "x{word:04X}");
        }
        buf
    }

    fn deserialize(src: &Self::Stream) -> Result<ObjectFile, ImageErr> {
        let mut words = src.lines()
            .enumerate()
            .filter_map(|(i, line)| {
                let line = line.split(';').next().unwrap_or("").trim();
                (!line.is_empty()).then_some((i + 1, line))
            })
            .map(|(line, text)| parse_hex_word(text).ok_or(ImageErr::InvalidHexWord { line }));

        let origin = words.next().ok_or(ImageErr::Empty)??;
        build(origin, words.collect::<Result<_, _>>()?)
    }
}

fn parse_hex_word(text: &str) -> Option<u16> {
    let digits = text.strip_prefix("0x")
        .or_else(|| text.strip_prefix(['x', 'X']))?;

    match digits.len() {
        1..=4 => u16::from_str_radix(digits, 16).ok(),
        _ => None
    }
}

#[cfg(test)]
mod tests {
    use crate::asm::ObjectFile;

    use super::{ImageErr, ImageFormat, ObjFileFormat, TextFormat};

    #[test]
    fn test_image_layout() {
        let obj = ObjectFile::new(0x3000, vec![0x5020, 0xF030, 0xF025]).unwrap();
        let bytes = ImageFormat::serialize(&obj);
        assert_eq!(bytes, [0x30, 0x00, 0x50, 0x20, 0xF0, 0x30, 0xF0, 0x25]);

        let back = ImageFormat::deserialize(&bytes).unwrap();
        assert_eq!(back.origin(), 0x3000);
        assert_eq!(back.words(), obj.words());
    }

    #[test]
    fn test_image_errors() {
        assert_eq!(ImageFormat::deserialize(&[]).unwrap_err(), ImageErr::Empty);
        assert_eq!(ImageFormat::deserialize(&[0x30]).unwrap_err(), ImageErr::OddLength(1));
        assert_eq!(ImageFormat::deserialize(&[0x30, 0x00, 0x12]).unwrap_err(), ImageErr::OddLength(3));

        // Only the origin: an empty program is still a valid image.
        let obj = ImageFormat::deserialize(&[0x40, 0x00]).unwrap();
        assert_eq!(obj.origin(), 0x4000);
        assert!(obj.words().is_empty());

        // Two words starting at xFFFF run past the end of memory.
        assert_eq!(
            ImageFormat::deserialize(&[0xFF, 0xFF, 0x00, 0x01, 0x00, 0x02]).unwrap_err(),
            ImageErr::TooLarge { origin: 0xFFFF, len: 2 }
        );
        // One word at xFFFF fits exactly.
        assert!(ImageFormat::deserialize(&[0xFF, 0xFF, 0x00, 0x01]).is_ok());
    }

    #[test]
    fn test_text_format() {
        let obj = ObjectFile::new(0x3000, vec![0x1021, 0xF025]).unwrap();
        let text = TextFormat::serialize(&obj);
        assert_eq!(text, "x3000\nx1021\nxF025\n");

        let back = TextFormat::deserialize("; producer\n0x3000\n\nX1021 ; ADD\nxf025\n").unwrap();
        assert_eq!(back.origin(), 0x3000);
        assert_eq!(back.words(), [0x1021, 0xF025]);
    }

    #[test]
    fn test_text_errors() {
        assert_eq!(TextFormat::deserialize("; nothing\n\n").unwrap_err(), ImageErr::Empty);
        assert_eq!(TextFormat::deserialize("x3000\nADD\n").unwrap_err(), ImageErr::InvalidHexWord { line: 2 });
        assert_eq!(TextFormat::deserialize("x3000\nx12345\n").unwrap_err(), ImageErr::InvalidHexWord { line: 2 });
        assert_eq!(TextFormat::deserialize("x3000\nx12G4\n").unwrap_err(), ImageErr::InvalidHexWord { line: 2 });
        // Words without a prefix are rejected, even ones that look like hex.
        assert_eq!(TextFormat::deserialize("3000\n").unwrap_err(), ImageErr::InvalidHexWord { line: 1 });
        assert_eq!(TextFormat::deserialize("x3000\n\nx").unwrap_err(), ImageErr::InvalidHexWord { line: 3 });
    }
}
