//! Operand and instruction representations shared by the assembler and the simulator.
//!
//! - [`sim::SimInstr`] is a decoded 16-bit instruction word, as executed by the simulator.
//! - [`asm::AsmInstr`] and [`asm::Directive`] are assembly source statements,
//!     which may still refer to labels.
//!
//! This module also holds the operand building blocks ([`Reg`], [`Offset`], [`ImmOrReg`], ...)
//! and [`sign_extend`], the field-widening primitive every PC-relative instruction uses.

pub mod asm;
pub mod sim;

use std::num::TryFromIntError;
use offset_base::OffsetBacking;

/// Sign-extends the low `bits` bits of `value` to a full 16-bit word.
///
/// The most significant bit of the field is replicated into every higher bit.
/// Bits of `value` above the field are discarded.
///
/// # Example
/// ```
/// use lc3_bus::ast::sign_extend;
///
/// assert_eq!(sign_extend(0b01111, 5), 0x000F);
/// assert_eq!(sign_extend(0b10000, 5), 0xFFF0);
/// assert_eq!(sign_extend(0x1FF, 9) as i16, -1);
/// assert_eq!(sign_extend(0x3FF, 11) as i16, 1023);
/// ```
///
/// # Panics
///
/// This will panic if `bits` is 0 or greater than 16.
pub fn sign_extend(value: u16, bits: u32) -> u16 {
    assert!((1..=16).contains(&bits), "cannot sign-extend a {bits}-bit field");
    let shift = 16 - bits;
    (((value << shift) as i16) >> shift) as u16
}

/// A register, R0 through R7.
///
/// Construct one from [`reg_consts`] or with [`Reg::try_from`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

/// Register constants.
pub mod reg_consts {
    use super::Reg;

    /// Register 0. `OUT`, `SEND`, and `RECV` operate on this register.
    pub const R0: Reg = Reg(0);
    /// Register 1.
    pub const R1: Reg = Reg(1);
    /// Register 2.
    pub const R2: Reg = Reg(2);
    /// Register 3.
    pub const R3: Reg = Reg(3);
    /// Register 4.
    pub const R4: Reg = Reg(4);
    /// Register 5.
    pub const R5: Reg = Reg(5);
    /// Register 6.
    pub const R6: Reg = Reg(6);
    /// Register 7. `JSR` and `JSRR` store the return address here.
    pub const R7: Reg = Reg(7);
}
impl Reg {
    /// The register number, 0 through 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Reads the 3-bit register field of `word` starting at bit `lsb`.
    pub(crate) fn from_field(word: u16, lsb: u32) -> Self {
        Reg(((word >> lsb) & 0b111) as u8)
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}
impl From<Reg> for usize {
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Reg(value)),
            // TryFromIntError has no public constructor
            _     => u8::try_from(256u16).map(|_| unreachable!("256 should not fit in u8")),
        }
    }
}

/// The 3-bit `nzp` mask of a `BR` instruction.
///
/// | mask  | branches when          |
/// |-------|------------------------|
/// | `100` | negative               |
/// | `010` | zero                   |
/// | `001` | positive               |
/// | `111` | always                 |
/// | `000` | always (see below)     |
///
/// A mask of `000` also branches unconditionally on this machine.
/// Assembly `NOP` therefore encodes to `BR 000` with an offset of 0,
/// which jumps to the next instruction either way.
pub type CondCode = u8;

/// A signed offset or immediate field that fits in `N` bits.
///
/// `IOffset<5>` is the `imm5` operand of `ADD`/`AND`,
/// `IOffset<6>` is the `offset6` of `LDR`/`STR`,
/// `IOffset<9>` and `IOffset<11>` are PC offsets.
pub type IOffset<const N: u32> = Offset<i16, N>;

/// An 8-bit trap vector (the operand of `TRAP`).
pub type TrapVect8 = Offset<u16, 8>;

/// Either an immediate value or a register.
///
/// Used by `ADD`/`AND` (register or `imm5` mode) and by `JSR`/`JSRR`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ImmOrReg<const N: u32> {
    #[allow(missing_docs)]
    Imm(IOffset<N>),
    #[allow(missing_docs)]
    Reg(Reg)
}
impl<const N: u32> std::fmt::Display for ImmOrReg<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImmOrReg::Imm(imm) => imm.fmt(f),
            ImmOrReg::Reg(reg) => reg.fmt(f),
        }
    }
}

/// A value that fits within `N` bits of its backing integer `OFF`.
///
/// If `OFF` is signed (`i16`), the value is interpreted as two's complement `N`-bit integer.
/// If `OFF` is unsigned (`u16`), the value is zero-extended.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Offset<OFF, const N: u32>(OFF);

impl<OFF: std::fmt::Display, const N: u32> std::fmt::Display for Offset<OFF, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The errors that can result from calling [`Offset::new`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OffsetNewErr {
    /// The value does not fit an unsigned integer of the given bit size.
    CannotFitUnsigned(u32),
    /// The value does not fit a signed integer of the given bit size.
    CannotFitSigned(u32)
}

impl std::fmt::Display for OffsetNewErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffsetNewErr::CannotFitUnsigned(n) => write!(f, "value is too big for unsigned {n}-bit integer"),
            OffsetNewErr::CannotFitSigned(n) => write!(f, "value is too big for signed {n}-bit integer"),
        }
    }
}
impl std::error::Error for OffsetNewErr {}
impl crate::err::Error for OffsetNewErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        let help = match *self {
            OffsetNewErr::CannotFitUnsigned(n) => format!("the range for an unsigned {n}-bit integer is [0, {}]", (1u32 << n) - 1),
            OffsetNewErr::CannotFitSigned(n) => format!("the range for a signed {n}-bit integer is [{}, {}]", -(1i32 << (n - 1)), (1i32 << (n - 1)) - 1),
        };

        Some(help.into())
    }
}

mod offset_base {
    use super::OffsetNewErr;

    /// Integers which can back an [`Offset`](super::Offset).
    pub trait OffsetBacking: Copy + Eq {
        /// Width of the integer.
        const BITS: u32;

        /// Keeps the low `bit_size` bits, extending them back to the full width
        /// (sign-extending for signed integers, zero-extending for unsigned).
        fn truncate(self, bit_size: u32) -> Self;

        /// The error raised when a value changes under [`OffsetBacking::truncate`].
        fn does_not_fit_error(bit_size: u32) -> OffsetNewErr;
    }

    macro_rules! impl_offset_backing {
        ($($Int:ty => $Err:ident),*) => {
            $(
                impl OffsetBacking for $Int {
                    const BITS: u32 = <$Int>::BITS;

                    fn truncate(self, bit_size: u32) -> Self {
                        let shift = Self::BITS - bit_size;
                        (self << shift) >> shift
                    }

                    fn does_not_fit_error(bit_size: u32) -> OffsetNewErr {
                        OffsetNewErr::$Err(bit_size)
                    }
                }
            )*
        }
    }
    impl_offset_backing! {
        u16 => CannotFitUnsigned,
        i16 => CannotFitSigned
    }
}

impl<OFF: OffsetBacking, const N: u32> Offset<OFF, N> {
    /// Creates an offset, failing if the value does not fit in `N` bits.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lc3_bus::ast::Offset;
    /// assert!(Offset::<i16, 5>::new(-16).is_ok());
    /// assert!(Offset::<i16, 5>::new(15).is_ok());
    /// assert!(Offset::<i16, 5>::new(16).is_err());
    ///
    /// assert!(Offset::<u16, 8>::new(0x25).is_ok());
    /// assert!(Offset::<u16, 8>::new(0x100).is_err());
    /// ```
    ///
    /// # Panics
    ///
    /// This will panic if `N` exceeds the width of the backing integer.
    pub fn new(n: OFF) -> Result<Self, OffsetNewErr> {
        assert!(N <= OFF::BITS, "bit size {N} exceeds size of backing ({})", OFF::BITS);
        match n == n.truncate(N) {
            true  => Ok(Offset(n)),
            false => Err(OFF::does_not_fit_error(N)),
        }
    }

    /// Creates an offset from the low `N` bits of `n`, discarding the rest.
    ///
    /// For signed backings, this is sign extension of an `N`-bit field.
    ///
    /// ```
    /// # use lc3_bus::ast::Offset;
    /// assert_eq!(Offset::<i16, 9>::new_trunc(0x1FF).get(), -1);
    /// assert_eq!(Offset::<i16, 9>::new_trunc(0x0FF).get(), 255);
    /// assert_eq!(Offset::<u16, 8>::new_trunc(0xF025).get(), 0x25);
    /// ```
    ///
    /// # Panics
    ///
    /// This will panic if `N` exceeds the width of the backing integer.
    pub fn new_trunc(n: OFF) -> Self {
        assert!(N <= OFF::BITS, "bit size {N} exceeds size of backing ({})", OFF::BITS);
        Self(n.truncate(N))
    }

    /// Gets the value of the offset.
    pub fn get(&self) -> OFF {
        self.0
    }
}
impl<const N: u32> Offset<i16, N> {
    /// Reads the `N`-bit field at the bottom of `word` as a signed offset.
    pub(crate) fn from_word(word: u16) -> Self {
        Self::new_trunc(word as i16)
    }

    /// The `N`-bit field this offset encodes to.
    pub(crate) fn field(&self) -> u16 {
        (self.0 as u16) & (u16::MAX >> (16 - N))
    }
}

/// An offset or a label, as written in assembly source.
///
/// Labels are resolved into offsets during assembly.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum PCOffset<OFF, const N: u32> {
    #[allow(missing_docs)]
    Offset(Offset<OFF, N>),
    #[allow(missing_docs)]
    Label(Label)
}
impl<OFF, const N: u32> std::fmt::Display for PCOffset<OFF, N>
    where Offset<OFF, N>: std::fmt::Display
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PCOffset::Offset(off)  => off.fmt(f),
            PCOffset::Label(label) => label.fmt(f),
        }
    }
}

/// A label and where it appears in the source.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Label {
    /// The label's identifier, as written.
    pub name: String,
    start: usize
}
impl Label {
    /// Creates a new label.
    pub fn new(name: String, span: std::ops::Range<usize>) -> Self {
        debug_assert_eq!(span.start + name.len(), span.end, "span should have the same length as name");
        Label { name, start: span.start }
    }
    /// The span of the label in assembly source code.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start .. (self.start + self.name.len())
    }
}
impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{sign_extend, IOffset, Offset, OffsetNewErr, Reg};

    #[test]
    fn test_sign_extend_boundaries() {
        assert_eq!(sign_extend(0x0000, 5), 0x0000);
        assert_eq!(sign_extend(0x000F, 5), 0x000F);
        assert_eq!(sign_extend(0x0010, 5), 0xFFF0);
        assert_eq!(sign_extend(0x001F, 5), 0xFFFF);

        assert_eq!(sign_extend(0x00FF, 9), 0x00FF);
        assert_eq!(sign_extend(0x0100, 9), 0xFF00);

        assert_eq!(sign_extend(0x03FF, 11), 0x03FF);
        assert_eq!(sign_extend(0x0400, 11), 0xFC00);

        // bits above the field are ignored
        assert_eq!(sign_extend(0xF00F, 5), 0x000F);
        assert_eq!(sign_extend(0xFFFF, 16), 0xFFFF);
    }

    #[test]
    fn test_offset_new() {
        assert_eq!(IOffset::<6>::new(31).map(|o| o.get()), Ok(31));
        assert_eq!(IOffset::<6>::new(-32).map(|o| o.get()), Ok(-32));
        assert_eq!(IOffset::<6>::new(32), Err(OffsetNewErr::CannotFitSigned(6)));
        assert_eq!(Offset::<u16, 8>::new(256), Err(OffsetNewErr::CannotFitUnsigned(8)));

        assert_eq!(IOffset::<9>::from_word(0xF1FF).get(), -1);
        assert_eq!(IOffset::<9>::new_trunc(-1).field(), 0x1FF);
        assert_eq!(IOffset::<5>::new_trunc(-16).field(), 0b10000);
    }

    #[test]
    fn test_reg() {
        assert_eq!(Reg::try_from(7), Ok(Reg(7)));
        assert!(Reg::try_from(8).is_err());
        assert_eq!(Reg::from_field(0b0001_011_010_0_00_001, 9), Reg(3));
        assert_eq!(Reg::from_field(0b0001_011_010_0_00_001, 6), Reg(2));
        assert_eq!(Reg(5).to_string(), "R5");
    }

    fn mathematical_sext(value: u16, bits: u32) -> i32 {
        let field = i32::from(value) & ((1 << bits) - 1);
        match field >= 1 << (bits - 1) {
            true  => field - (1 << bits),
            false => field,
        }
    }

    proptest! {
        #[test]
        fn test_sign_extend_matches_math(value in any::<u16>(), bits in prop::sample::select(vec![5u32, 6, 9, 11])) {
            let ext = sign_extend(value, bits) as i16;
            prop_assert_eq!(i32::from(ext), mathematical_sext(value, bits));
        }

        #[test]
        fn test_offset_trunc_agrees(value in any::<u16>()) {
            prop_assert_eq!(IOffset::<5>::from_word(value).get() as u16, sign_extend(value, 5));
            prop_assert_eq!(IOffset::<9>::from_word(value).get() as u16, sign_extend(value, 9));
            prop_assert_eq!(IOffset::<11>::from_word(value).get() as u16, sign_extend(value, 11));
        }
    }
}
