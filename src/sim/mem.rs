//! Memory handling for the LC-3 simulator.
//!
//! This module consists of:
//! - [`Mem`]: The 64K-word memory.
//! - [`RegFile`]: The register file.
//! - [`MachineInitStrategy`]: How memory and registers are filled before a program loads.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::asm::ObjectFile;
use crate::ast::Reg;

/// A source of words used to fill memory and registers at creation.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u16;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u16 {
        rand::random()
    }
}
impl WordFiller for u16 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u16 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u16 {
        self.gen()
    }
}

/// Strategy used to initialize the `reg_file` and `mem` of the [`Simulator`].
///
/// The default zero-fills the machine, which is what a loaded program
/// can rely on for any word its image does not cover.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MachineInitStrategy {
    /// Initializes each word randomly and non-deterministically.
    Unseeded,

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u16
    }
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}

impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => InitGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => InitGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => InitGenerator::Known(*value),
        }
    }
}

enum InitGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u16)
}
impl WordFiller for InitGenerator {
    fn generate(&mut self) -> u16 {
        match self {
            InitGenerator::Unseeded  => ().generate(),
            InitGenerator::Seeded(r) => r.generate(),
            InitGenerator::Known(k)  => k.generate(),
        }
    }
}

const N: usize = 1 << 16;

/// Memory.
///
/// This can be addressed with any `u16` (16-bit address),
/// so every access is in bounds and address arithmetic wraps at `xFFFF`.
///
/// ```
/// use lc3_bus::sim::mem::Mem;
///
/// let mut mem = Mem::new(&mut 0u16);
/// mem.write(0x3000, 11);
/// assert_eq!(mem.read(0x3000), 11);
/// assert_eq!(mem.read(0x3001), 0);
/// ```
pub struct Mem {
    data: Box<[u16; N]>,
}
impl Mem {
    /// Creates a new memory with a provided word creation strategy.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self {
            data: std::iter::repeat_with(|| filler.generate())
                .take(N)
                .collect::<Box<_>>()
                .try_into()
                .unwrap_or_else(|_| unreachable!("iterator should have had {N} elements")),
        }
    }

    /// Copies an object file into this memory, starting at its origin.
    pub fn copy_obj_file(&mut self, obj: &ObjectFile) {
        let start = usize::from(obj.origin());
        let words = obj.words();
        // ObjectFile guarantees the block does not run past xFFFF.
        self.data[start..start + words.len()].copy_from_slice(words);
    }

    /// Reads the word at the given address.
    pub fn read(&self, addr: u16) -> u16 {
        self.data[usize::from(addr)]
    }

    /// Writes the word at the given address.
    pub fn write(&mut self, addr: u16, data: u16) {
        self.data[usize::from(addr)] = data;
    }

    /// Reads a block of memory, wrapping around the end of the address space.
    pub fn read_block(&self, start: u16, len: u16) -> Vec<u16> {
        (0..len).map(|i| self.read(start.wrapping_add(i))).collect()
    }
}
impl std::fmt::Debug for Mem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nonzero = self.data.iter().filter(|&&w| w != 0).count();
        f.debug_struct("Mem")
            .field("nonzero_words", &nonzero)
            .finish_non_exhaustive()
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::try_from`]).
///
/// # Example
///
/// ```
/// use lc3_bus::sim::mem::RegFile;
/// use lc3_bus::ast::reg_consts::R0;
///
/// let mut reg = RegFile::new(&mut 0u16);
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegFile([u16; 8]);
impl RegFile {
    /// Creates a register file filled by the given strategy.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self(std::array::from_fn(|_| filler.generate()))
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index.reg_no())]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index.reg_no())]
    }
}
