//! Simulating and execution for LC-3 assembly.
//!
//! This module is focused on executing fully assembled code (i.e., [`ObjectFile`]s or program images).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling memory and the register file.
//! - [`device`]: The module handling console input and output.
//! - [`bus`]: The message ports used by the `SEND` and `RECV` traps.
//! - [`stats`]: Execution counters and end-of-run reports.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and load an object file to it:
//!
//! ```
//! use lc3_bus::parse::parse_ast;
//! use lc3_bus::asm::assemble;
//! use lc3_bus::sim::{Simulator, StopReason};
//! use lc3_bus::ast::reg_consts::R0;
//!
//! let src = "
//!     .orig x3000
//!     AND R0, R0, #0
//!     ADD R0, R0, #1
//!     ADD R0, R0, #1
//!     ADD R0, R0, #1
//!     HALT
//!     .end
//! ";
//! let obj_file = assemble(parse_ast(src).unwrap()).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_obj_file(&obj_file);
//!
//! // Running step by step:
//! sim.step_in().unwrap();
//! assert_eq!(sim.reg_file[R0], 0);
//! sim.step_in().unwrap();
//! assert_eq!(sim.reg_file[R0], 1);
//!
//! // Running to completion:
//! assert_eq!(sim.run().unwrap(), StopReason::Halt);
//! assert_eq!(sim.reg_file[R0], 3);
//! assert_eq!(sim.stats.instructions, 5);
//! ```
//!
//! ## Flags
//!
//! The simulator can be configured through [`SimFlags`]. For example,
//! to skip over illegal instructions instead of failing on them:
//!
//! ```no_run
//! # use lc3_bus::sim::{Simulator, SimFlags};
//! let mut simulator = Simulator::new(SimFlags { lenient_decode: true, ..Default::default() });
//! ```
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::run`] (which runs until halting),
//! there are also:
//! - [`Simulator::step_in`]: manual step-by-step simulation
//! - [`Simulator::run_with_limit`]: execution bounded by an instruction budget
//!
//! Both run functions report why they stopped with a [`StopReason`].
//!
//! ## Messaging
//!
//! `TRAP x30` (`SEND`) writes R0 to the simulator's [`Outbox`],
//! and `TRAP x31` (`RECV`) reads a word from its [`Inbox`] into R0.
//! When the port is full (or empty), the trap retries according to
//! the wait policy in [`SimFlags::wait`].
//!
//! ```
//! use std::collections::VecDeque;
//! use lc3_bus::parse::parse_ast;
//! use lc3_bus::asm::assemble;
//! use lc3_bus::sim::Simulator;
//! use lc3_bus::ast::reg_consts::R0;
//!
//! let src = "
//!     .orig x3000
//!     RECV
//!     ADD R0, R0, R0
//!     SEND
//!     HALT
//!     .end
//! ";
//! let obj_file = assemble(parse_ast(src).unwrap()).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_obj_file(&obj_file);
//! sim.set_inbox(VecDeque::from([21u16]));
//! sim.set_outbox(VecDeque::<u16>::new());
//! sim.run().unwrap();
//!
//! assert_eq!(sim.reg_file[R0], 42);
//! assert_eq!((sim.stats.sent, sim.stats.received), (1, 1));
//! ```
//!
//! ## Stopping from another thread
//!
//! Every simulator holds a machine control register ([`MCR`]).
//! Clearing it stops the simulator before its next instruction (or during a `SEND`/`RECV` wait),
//! and the run returns [`StopReason::Cancelled`].
pub mod mem;
pub mod device;
pub mod bus;
pub mod stats;

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::asm::encoding::{ImageErr, ImageFormat, ObjFileFormat};
use crate::asm::ObjectFile;
use crate::ast::reg_consts::{R0, R7};
use crate::ast::sim::{trap_vect, SimInstr};
use crate::ast::{CondCode, ImmOrReg};
use crate::ring::WaitPolicy;

use self::bus::{Inbox, Outbox};
use self::device::{DisplayDevice, InputDevice, NullDisplay, NullInput};
use self::mem::{MachineInitStrategy, Mem, RegFile};
pub use self::stats::{Stats, StopReason, VmReport};

/// Errors that can occur during simulation.
///
/// When one of these is raised, the PC is left pointing at the offending instruction.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SimErr {
    /// Word was decoded, but the opcode is not executable (`RTI` or the reserved opcode `1101`).
    IllegalOpcode(u16),
    /// A `TRAP` was executed with a vector this machine does not implement.
    UnknownTrap(u16),
    /// `SEND` was executed with no outbox attached, or `RECV` with no inbox attached.
    PortDetached(&'static str),
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::IllegalOpcode(word) => write!(f, "simulator executed illegal instruction x{word:04X}"),
            SimErr::UnknownTrap(vect)   => write!(f, "unknown trap vector x{vect:02X}"),
            SimErr::PortDetached(trap)  => write!(f, "{trap} executed with no message port attached"),
        }
    }
}
impl std::error::Error for SimErr {}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            SimErr::IllegalOpcode(_) | SimErr::UnknownTrap(_) => Some("enable lenient decoding to skip over these as no-ops".into()),
            SimErr::PortDetached("SEND") => Some("this program sends messages, so it should be run as the producer".into()),
            SimErr::PortDetached(_) => Some("this program receives messages, so it should be run as the consumer".into()),
        }
    }
}

/// Anything that can cause a step to abruptly fail to finish.
///
/// When a step breaks, the instruction is not counted and the PC is rewound to it,
/// so it is executed again on the next run.
enum StepBreak {
    /// The MCR was cleared during a `SEND`/`RECV` wait.
    Cancelled,
    /// The wait policy gave up during a `SEND`/`RECV` wait.
    Stalled,
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`]
/// and their effects should still apply.
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct SimFlags {
    /// Whether illegal opcodes and unknown trap vectors are skipped.
    ///
    /// - **strict** (`false`): executing one raises a [`SimErr`].
    /// - **lenient** (`true`): executing one is a no-op, which is logged
    ///     and counted in [`Stats::illegal`].
    ///
    /// By default, this flag is `false`.
    pub lenient_decode: bool,

    /// How `SEND` and `RECV` retry on a full outbox or empty inbox.
    ///
    /// By default, this is [`WaitPolicy::Spin`].
    pub wait: WaitPolicy,

    /// The creation strategy for memory and registers.
    ///
    /// This flag only goes into effect after a `Simulator::new` or `Simulator::reset` call.
    ///
    /// By default, this flag is [`MachineInitStrategy::default`] (zero-filled).
    pub machine_init: MachineInitStrategy,
}

/// The start of user space, where the PC starts before a program is loaded.
const USER_START: u16 = 0x3000;

/// A type alias for MCR.
///
/// While this is `true`, the simulator may run.
pub type MCR = Arc<AtomicBool>;

/// Executes assembled code.
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The simulator's memory.
    ///
    /// Note that this is held in the heap, as it is too large for the stack.
    pub mem: Mem,

    /// The simulator's register file.
    pub reg_file: RegFile,

    /// The program counter.
    pub pc: u16,

    /// The condition register. See [`CondReg`] for more details.
    cond: CondReg,

    /// Whether `HALT` has been executed.
    halted: bool,

    /// Counters for this simulator's execution.
    ///
    /// These can be reset with `sim.stats = Default::default()`.
    pub stats: Stats,

    // ------------------ CONFIG/DEVICE STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Machine control.
    /// If unset, the program stops.
    ///
    /// This is publicly accessible via a reference through [`Simulator::mcr`].
    mcr: MCR,

    /// Configuration settings for the simulator.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    display: Box<dyn DisplayDevice>,
    input: Box<dyn InputDevice>,
    outbox: Option<Box<dyn Outbox>>,
    inbox: Option<Box<dyn Inbox>>,
}
impl Simulator where Simulator: Send {}

impl Simulator {
    /// Creates a new simulator with the provided flags, but without a loaded object file.
    pub fn new(flags: SimFlags) -> Self {
        Self::new_with_mcr(flags, Arc::new(AtomicBool::new(true)))
    }

    /// Creates a new simulator which is controlled by the provided MCR.
    ///
    /// Several simulators can share one MCR, so they can all be stopped together.
    pub fn new_with_mcr(flags: SimFlags, mcr: MCR) -> Self {
        let mut filler = flags.machine_init.generator();

        Self {
            mem: Mem::new(&mut filler),
            reg_file: RegFile::new(&mut filler),
            pc: USER_START,
            cond: CondReg::new(),
            halted: false,
            stats: Stats::default(),

            mcr,
            flags,
            display: Box::new(NullDisplay),
            input: Box::new(NullInput),
            outbox: None,
            inbox: None,
        }
    }

    /// Resets the simulator.
    ///
    /// This resets memory, registers, PC, condition codes, and statistics,
    /// while preserving configuration, devices, and message ports.
    pub fn reset(&mut self) {
        let mut filler = self.flags.machine_init.generator();

        self.mem = Mem::new(&mut filler);
        self.reg_file = RegFile::new(&mut filler);
        self.pc = USER_START;
        self.cond = CondReg::new();
        self.halted = false;
        self.stats = Stats::default();
    }

    /// Loads an object file into this simulator and points the PC at its origin.
    pub fn load_obj_file(&mut self, obj: &ObjectFile) {
        self.mem.copy_obj_file(obj);
        self.pc = obj.origin();
        self.halted = false;
        log::debug!("loaded {} words at x{:04X}", obj.words().len(), obj.origin());
    }

    /// Decodes a binary program image (see [`ImageFormat`]) and loads it.
    ///
    /// If the image cannot be decoded, the simulator is left untouched.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), ImageErr> {
        let obj = ImageFormat::deserialize(image)?;
        self.load_obj_file(&obj);
        Ok(())
    }

    /// Sets the device console output is written to.
    pub fn set_display(&mut self, display: impl DisplayDevice) {
        self.display = Box::new(display);
    }
    /// Sets the device console input is read from.
    pub fn set_input(&mut self, input: impl InputDevice) {
        self.input = Box::new(input);
    }
    /// Attaches the port `SEND` writes to.
    pub fn set_outbox(&mut self, outbox: impl Outbox + 'static) {
        self.outbox = Some(Box::new(outbox));
    }
    /// Attaches the port `RECV` reads from.
    pub fn set_inbox(&mut self, inbox: impl Inbox + 'static) {
        self.inbox = Some(Box::new(inbox));
    }

    /// Sets the condition codes using the provided result.
    fn set_cc(&mut self, result: u16) {
        match (result as i16).cmp(&0) {
            std::cmp::Ordering::Less    => self.cond.set_cc(0b100),
            std::cmp::Ordering::Equal   => self.cond.set_cc(0b010),
            std::cmp::Ordering::Greater => self.cond.set_cc(0b001),
        }
    }
    /// Writes a register and updates the condition codes from the written value.
    fn set_reg_cc(&mut self, dr: crate::ast::Reg, result: u16) {
        self.reg_file[dr] = result;
        self.set_cc(result);
    }

    /// Gets the condition register.
    pub fn cond(&self) -> CondReg {
        self.cond
    }

    /// Gets a reference to the MCR.
    pub fn mcr(&self) -> &MCR {
        // The mcr field is not exposed because that allows someone to swap the MCR
        // with another AtomicBool, which would cause the simulator's MCR
        // to be inconsistent with any other component's
        &self.mcr
    }

    /// Whether the program has executed `HALT`.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Creates a report of this simulator's statistics.
    pub fn report(&self, name: impl Into<String>, stop: StopReason) -> VmReport {
        VmReport { name: name.into(), stop, stats: self.stats }
    }

    /// Execute the program.
    ///
    /// This blocks until the program halts, the MCR is cleared, or a message wait stalls.
    /// If you would like to limit the maximum number of steps to execute, consider [`Simulator::run_with_limit`].
    pub fn run(&mut self) -> Result<StopReason, SimErr> {
        self.run_inner(None)
    }

    /// Execute the program with a limit on how many instructions to execute.
    ///
    /// This blocks until the program ends or until `budget` instructions have been executed by this call,
    /// in which case this returns [`StopReason::InstructionLimit`].
    pub fn run_with_limit(&mut self, budget: u64) -> Result<StopReason, SimErr> {
        self.run_inner(Some(budget))
    }

    fn run_inner(&mut self, budget: Option<u64>) -> Result<StopReason, SimErr> {
        let start_count = self.stats.instructions;
        let start = Instant::now();

        // event loop
        // run until:
        // 1. HALT is executed
        // 2. the budget is used up
        // 3. the MCR is set to false
        // 4. a message wait gives up
        let result = loop {
            if self.halted {
                break Ok(StopReason::Halt);
            }
            if budget.is_some_and(|b| self.stats.instructions - start_count >= b) {
                break Ok(StopReason::InstructionLimit);
            }
            if !self.mcr.load(Ordering::Relaxed) {
                break Ok(StopReason::Cancelled);
            }

            match self.step() {
                Ok(()) => {},
                Err(StepBreak::Cancelled) => break Ok(StopReason::Cancelled),
                Err(StepBreak::Stalled) => break Ok(StopReason::Stalled),
                Err(StepBreak::Err(e)) => break Err(e),
            }
        };

        self.stats.elapsed += start.elapsed();
        result
    }

    /// Simulate one step, executing one instruction.
    ///
    /// If a `SEND`/`RECV` wait is cancelled or stalls, this returns `Ok`
    /// without executing anything (and the PC still points at the trap).
    pub fn step_in(&mut self) -> Result<(), SimErr> {
        match self.step() {
            Ok(()) | Err(StepBreak::Cancelled | StepBreak::Stalled) => Ok(()),
            Err(StepBreak::Err(e)) => Err(e)
        }
    }

    /// Simulate one step, rewinding the PC if the step breaks.
    fn step(&mut self) -> Result<(), StepBreak> {
        let pc = self.pc;
        let word = self.mem.read(pc);
        self.pc = pc.wrapping_add(1);

        match self.execute(word) {
            Ok(()) => {
                self.stats.instructions += 1;
                Ok(())
            },
            Err(e) => {
                self.pc = pc;
                Err(e)
            }
        }
    }

    /// Decodes and executes an instruction word. The PC has already been incremented.
    fn execute(&mut self, word: u16) -> Result<(), StepBreak> {
        match SimInstr::decode(word) {
            SimInstr::BR(cc, off) => {
                if branches(cc, self.cond.cc()) {
                    self.pc = self.pc.wrapping_add_signed(off.get());
                }
            },
            SimInstr::ADD(dr, sr1, sr2) => {
                let val1 = self.reg_file[sr1];
                let val2 = match sr2 {
                    ImmOrReg::Imm(i2) => i2.get() as u16,
                    ImmOrReg::Reg(r2) => self.reg_file[r2],
                };
                self.set_reg_cc(dr, val1.wrapping_add(val2));
            },
            SimInstr::LD(dr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                self.set_reg_cc(dr, self.mem.read(ea));
            },
            SimInstr::ST(sr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                self.mem.write(ea, self.reg_file[sr]);
            },
            SimInstr::JSR(op) => {
                // JSRR R7 jumps to the old value of R7.
                let addr = match op {
                    ImmOrReg::Imm(off) => self.pc.wrapping_add_signed(off.get()),
                    ImmOrReg::Reg(br)  => self.reg_file[br],
                };
                self.reg_file[R7] = self.pc;
                self.pc = addr;
            },
            SimInstr::AND(dr, sr1, sr2) => {
                let val1 = self.reg_file[sr1];
                let val2 = match sr2 {
                    ImmOrReg::Imm(i2) => i2.get() as u16,
                    ImmOrReg::Reg(r2) => self.reg_file[r2],
                };
                self.set_reg_cc(dr, val1 & val2);
            },
            SimInstr::LDR(dr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                self.set_reg_cc(dr, self.mem.read(ea));
            },
            SimInstr::STR(sr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                self.mem.write(ea, self.reg_file[sr]);
            },
            SimInstr::NOT(dr, sr) => {
                self.set_reg_cc(dr, !self.reg_file[sr]);
            },
            SimInstr::LDI(dr, off) => {
                let ea = self.mem.read(self.pc.wrapping_add_signed(off.get()));
                self.set_reg_cc(dr, self.mem.read(ea));
            },
            SimInstr::STI(sr, off) => {
                let ea = self.mem.read(self.pc.wrapping_add_signed(off.get()));
                self.mem.write(ea, self.reg_file[sr]);
            },
            SimInstr::JMP(br) => {
                self.pc = self.reg_file[br];
            },
            SimInstr::LEA(dr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                self.set_reg_cc(dr, ea);
            },
            SimInstr::RTI | SimInstr::Reserved(_) => {
                self.illegal(SimErr::IllegalOpcode(word))?;
            },
            SimInstr::TRAP(vect) => self.trap(vect.get())?,
        }

        Ok(())
    }

    /// Handles an illegal instruction, either by skipping it or by raising the error.
    fn illegal(&mut self, err: SimErr) -> Result<(), SimErr> {
        match self.flags.lenient_decode {
            true => {
                log::debug!("skipping at x{:04X}: {err}", self.pc.wrapping_sub(1));
                self.stats.illegal += 1;
                Ok(())
            },
            false => Err(err)
        }
    }

    /// Dispatches a trap vector.
    fn trap(&mut self, vect: u16) -> Result<(), StepBreak> {
        match vect {
            trap_vect::GETC => {
                let byte = self.input.read_input().unwrap_or(0);
                self.set_reg_cc(R0, u16::from(byte));
            },
            trap_vect::OUT => {
                self.display.send_output(self.reg_file[R0] as u8);
            },
            trap_vect::PUTS => {
                let bytes: Vec<_> = self.string_at(self.reg_file[R0])
                    .map(|w| w as u8)
                    .collect();
                self.display.send_all(&bytes);
            },
            trap_vect::IN => {
                self.display.send_all(b"Enter a character: ");
                let byte = self.input.read_input().unwrap_or(0);
                self.display.send_output(byte);
                self.set_reg_cc(R0, u16::from(byte));
            },
            trap_vect::PUTSP => {
                let bytes: Vec<_> = self.string_at(self.reg_file[R0])
                    .flat_map(|w| {
                        let [lo, hi] = w.to_le_bytes();
                        std::iter::once(lo).chain((hi != 0).then_some(hi))
                    })
                    .collect();
                self.display.send_all(&bytes);
            },
            trap_vect::HALT => {
                self.halted = true;
            },
            trap_vect::SEND => self.send()?,
            trap_vect::RECV => self.recv()?,
            _ => self.illegal(SimErr::UnknownTrap(vect))?,
        }

        Ok(())
    }

    /// Iterates over the words of the zero-terminated string starting at `addr`.
    fn string_at(&self, addr: u16) -> impl Iterator<Item=u16> + '_ {
        (0..=u16::MAX)
            .map(move |i| self.mem.read(addr.wrapping_add(i)))
            .take_while(|&w| w != 0)
    }

    /// `TRAP x30`: pushes R0 onto the outbox, retrying while the outbox is full.
    fn send(&mut self) -> Result<(), StepBreak> {
        let outbox = self.outbox.as_mut().ok_or(SimErr::PortDetached("SEND"))?;
        let mut waiter = self.flags.wait.waiter();
        let mut word = self.reg_file[R0];

        let result = loop {
            match outbox.try_send(word) {
                Ok(()) => break Ok(()),
                Err(w) => word = w,
            }
            if !waiter.wait() {
                break Err(StepBreak::Stalled);
            }
            if !self.mcr.load(Ordering::Relaxed) {
                break Err(StepBreak::Cancelled);
            }
        };
        self.stats.send_spins += waiter.attempts();

        result?;
        self.stats.sent += 1;
        log::trace!("SEND R0={word} PC=x{:04X}", self.pc.wrapping_sub(1));
        Ok(())
    }

    /// `TRAP x31`: pops a word from the inbox into R0, retrying while the inbox is empty.
    fn recv(&mut self) -> Result<(), StepBreak> {
        let inbox = self.inbox.as_mut().ok_or(SimErr::PortDetached("RECV"))?;
        let mut waiter = self.flags.wait.waiter();

        let result = loop {
            if let Some(word) = inbox.try_recv() {
                break Ok(word);
            }
            if !waiter.wait() {
                break Err(StepBreak::Stalled);
            }
            if !self.mcr.load(Ordering::Relaxed) {
                break Err(StepBreak::Cancelled);
            }
        };
        self.stats.recv_spins += waiter.attempts();

        let word = result?;
        self.set_reg_cc(R0, word);
        self.stats.received += 1;
        log::trace!("RECV R0={word} PC=x{:04X}", self.pc.wrapping_sub(1));
        Ok(())
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}
impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("pc", &format_args!("x{:04X}", self.pc))
            .field("reg_file", &self.reg_file)
            .field("cond", &self.cond)
            .field("halted", &self.halted)
            .field("stats", &self.stats)
            .field("flags", &self.flags)
            .field("outbox", &self.outbox.is_some())
            .field("inbox", &self.inbox.is_some())
            .finish_non_exhaustive()
    }
}

/// Whether a `BR` with mask `mask` is taken when the condition register holds `cc`.
///
/// A mask of `000` is taken unconditionally, like `111`.
fn branches(mask: CondCode, cc: CondCode) -> bool {
    mask & 0b111 == 0 || mask & cc != 0
}

/// The condition register: exactly one of `n`, `z`, `p` is set.
///
/// A fresh simulator starts at `z`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondReg(u8);

impl CondReg {
    /// Creates a condition register holding `z`.
    pub fn new() -> Self {
        CondReg(0b010)
    }

    /// The condition code as an `nzp` bitmask.
    pub fn cc(&self) -> CondCode {
        self.0
    }
    /// Checks the condition code is `n`.
    pub fn is_n(&self) -> bool {
        self.0 & 0b100 != 0
    }
    /// Checks the condition code is `z`.
    pub fn is_z(&self) -> bool {
        self.0 & 0b010 != 0
    }
    /// Checks the condition code is `p`.
    pub fn is_p(&self) -> bool {
        self.0 & 0b001 != 0
    }

    /// Sets the condition code.
    ///
    /// Anything other than exactly one of `n`, `z`, `p` sets `z`.
    pub fn set_cc(&mut self, mut cc: CondCode) {
        cc &= 0b111;
        if cc.count_ones() != 1 { cc = 0b010 };
        self.0 = cc;
    }
}
impl Default for CondReg {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for CondReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;

        if self.is_n() { f.write_char('N')?; };
        if self.is_z() { f.write_char('Z')?; };
        if self.is_p() { f.write_char('P')?; };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;

    use crate::asm::assemble;
    use crate::asm::encoding::{ImageFormat, ObjFileFormat};
    use crate::ast::reg_consts::{R0, R1, R2, R7};
    use crate::parse::parse_ast;
    use crate::ring::{channel, WaitPolicy};

    use super::device::{BufferedDisplay, BufferedInput};
    use super::{SimErr, SimFlags, Simulator, StopReason};

    fn load(src: &str, flags: SimFlags) -> Simulator {
        let obj = assemble(parse_ast(src).unwrap()).unwrap();
        let mut sim = Simulator::new(flags);
        sim.load_obj_file(&obj);
        sim
    }
    fn sim(src: &str) -> Simulator {
        load(src, Default::default())
    }

    #[test]
    fn test_flags_at_boundaries() {
        // ADD R0, R1, #0 copies R1 into R0 and sets flags from it.
        for (value, n, z, p) in [
            (0x0000, false, true, false),
            (0x7FFF, false, false, true),
            (0x8000, true, false, false),
            (0xFFFF, true, false, false),
        ] {
            for src in [
                ".orig x3000\nADD R0, R1, #0\nHALT\n.end",
                ".orig x3000\nAND R0, R1, R1\nHALT\n.end",
            ] {
                let mut sim = sim(src);
                sim.reg_file[R1] = value;
                sim.step_in().unwrap();
                assert_eq!(sim.reg_file[R0], value);
                let cc = sim.cond();
                assert_eq!((cc.is_n(), cc.is_z(), cc.is_p()), (n, z, p), "{src} with x{value:04X}");
            }

            // NOT of the complement yields the value again.
            let mut sim = sim(".orig x3000\nNOT R0, R1\nHALT\n.end");
            sim.reg_file[R1] = !value;
            sim.step_in().unwrap();
            assert_eq!(sim.reg_file[R0], value);
            assert_eq!((sim.cond().is_n(), sim.cond().is_z(), sim.cond().is_p()), (n, z, p));
        }
    }

    #[test]
    fn test_initial_cond_is_z() {
        let sim = Simulator::default();
        assert!(sim.cond().is_z());
        assert_eq!(sim.pc, 0x3000);
    }

    #[test]
    fn test_br_masks() {
        // BRn over a HALT: only taken if the last result was negative.
        let src = "
            .orig x3000
            ADD R0, R0, #-1
            BRn SKIP
            HALT
            SKIP ADD R2, R2, #1
            HALT
            .end
        ";
        let mut s = sim(src);
        s.run().unwrap();
        assert_eq!(s.reg_file[R2], 1);

        // BRz is not taken on a negative result.
        let mut s = sim(&src.replace("BRn", "BRz"));
        s.run().unwrap();
        assert_eq!(s.reg_file[R2], 0);
    }

    #[test]
    fn test_br_000_always_branches() {
        // Mask 000 is taken unconditionally (the same as 111),
        // so the HALT at x3001 is jumped over.
        let mut sim = Simulator::default();
        for cc in [0b100, 0b010, 0b001] {
            sim.reset();
            sim.mem.write(0x3000, 0x0001); // BR 000 #1
            sim.mem.write(0x3001, 0xF025); // HALT
            sim.mem.write(0x3002, 0x1261); // ADD R1, R1, #1
            sim.mem.write(0x3003, 0xF025); // HALT

            sim.cond.set_cc(cc);
            assert_eq!(sim.run().unwrap(), StopReason::Halt);
            assert_eq!(sim.reg_file[R1], 1, "BR 000 not taken with cc {cc:03b}");
        }
    }

    #[test]
    fn test_nop_falls_through() {
        let mut sim = sim(".orig x3000\nNOP\nADD R0, R0, #5\nHALT\n.end");
        assert_eq!(sim.run().unwrap(), StopReason::Halt);
        assert_eq!(sim.reg_file[R0], 5);
        assert_eq!(sim.stats.instructions, 3);
    }

    #[test]
    fn test_loads_and_stores() {
        let mut sim = sim("
            .orig x3000
                LD R0, NEG
                LEA R1, DATA
                LDR R2, R1, #1
                STR R0, R1, #0
                LDI R3, PTR
                ST R2, RES
                STI R0, PTR
                HALT
            NEG  .fill xFFFE
            DATA .fill #5
                 .fill #9
            PTR  .fill x4000
            RES  .blkw 1
            .end
        ");
        sim.mem.write(0x4000, 0x1234);
        assert_eq!(sim.run().unwrap(), StopReason::Halt);

        assert_eq!(sim.reg_file[R0], 0xFFFE);
        assert_eq!(sim.reg_file[R1], 0x3009);
        assert_eq!(sim.reg_file[R2], 9);
        assert_eq!(sim.mem.read(0x3009), 0xFFFE);
        assert_eq!(sim.reg_file[crate::ast::reg_consts::R3], 0x1234);
        assert_eq!(sim.mem.read(0x300C), 9);
        assert_eq!(sim.mem.read(0x4000), 0xFFFE);
    }

    #[test]
    fn test_ld_updates_flags() {
        let mut sim = sim("
            .orig x3000
                LD R0, ZERO
                BRz OK
                HALT
            OK  ADD R1, R1, #1
                HALT
            ZERO .fill #0
            .end
        ");
        sim.reg_file[R0] = 7;
        sim.run().unwrap();
        assert_eq!(sim.reg_file[R1], 1);
    }

    #[test]
    fn test_subroutines() {
        let mut sim = sim("
            .orig x3000
                JSR DOUBLE
                LEA R2, DOUBLE
                JSRR R2
                HALT
            DOUBLE ADD R0, R0, R0
                RET
            .end
        ");
        sim.reg_file[R0] = 3;
        assert_eq!(sim.run().unwrap(), StopReason::Halt);
        assert_eq!(sim.reg_file[R0], 12);
        assert_eq!(sim.reg_file[R7], 0x3003);
    }

    #[test]
    fn test_addresses_wrap() {
        let mut sim = Simulator::default();
        sim.mem.write(0xFFFF, 0x1021); // ADD R0, R0, #1
        sim.mem.write(0x0000, 0xF025); // HALT
        sim.pc = 0xFFFF;
        assert_eq!(sim.run().unwrap(), StopReason::Halt);
        assert_eq!(sim.reg_file[R0], 1);
        assert_eq!(sim.pc, 0x0001);
    }

    #[test]
    fn test_instruction_limit() {
        // Never halts.
        let mut sim = sim("
            .orig x3000
            LOOP ADD R0, R0, #1
                 BR LOOP
            .end
        ");
        assert_eq!(sim.run_with_limit(50).unwrap(), StopReason::InstructionLimit);
        assert_eq!(sim.stats.instructions, 50);
        assert!(!sim.is_halted());
        assert_eq!(sim.reg_file[R0], 25);

        // The budget applies per call.
        assert_eq!(sim.run_with_limit(10).unwrap(), StopReason::InstructionLimit);
        assert_eq!(sim.stats.instructions, 60);
    }

    #[test]
    fn test_halt_is_distinct_from_limit() {
        let mut sim = sim(".orig x3000\nADD R0, R0, #1\nHALT\n.end");
        assert_eq!(sim.run_with_limit(50).unwrap(), StopReason::Halt);
        assert_eq!(sim.stats.instructions, 2);

        // Once halted, stays halted.
        assert_eq!(sim.run_with_limit(50).unwrap(), StopReason::Halt);
        assert_eq!(sim.stats.instructions, 2);
    }

    #[test]
    fn test_illegal_opcodes() {
        // The error carries the word as fetched, operand bits included.
        for word in [0x8000, 0x8123, 0xD123] {
            let mut sim = Simulator::default();
            sim.mem.write(0x3000, word);
            assert_eq!(sim.run(), Err(SimErr::IllegalOpcode(word)));
            assert_eq!(sim.pc, 0x3000);
            assert_eq!(sim.stats.instructions, 0);
        }

        let mut sim = sim(".orig x3000\nTRAP x26\nHALT\n.end");
        assert_eq!(sim.run(), Err(SimErr::UnknownTrap(0x26)));
        assert_eq!(sim.pc, 0x3000);
    }

    #[test]
    fn test_lenient_decode() {
        let flags = SimFlags { lenient_decode: true, ..Default::default() };
        let mut sim = load(".orig x3000\nTRAP x26\n.fill xD000\n.fill x8000\nADD R0, R0, #1\nHALT\n.end", flags);
        assert_eq!(sim.run().unwrap(), StopReason::Halt);
        assert_eq!(sim.reg_file[R0], 1);
        assert_eq!(sim.stats.illegal, 3);
        assert_eq!(sim.stats.instructions, 5);
    }

    #[test]
    fn test_console_traps() {
        let mut sim = sim(r#"
            .orig x3000
                LEA R0, MSG
                PUTS
                LEA R0, PACKED
                PUTSP
                GETC
                OUT
                IN
                HALT
            MSG    .stringz "hi "
            PACKED .fill x6261
                   .fill x0063
                   .fill #0
            .end
        "#);
        let display = BufferedDisplay::default();
        sim.set_display(display.clone());
        sim.set_input(BufferedInput::from(&b"xy"[..]));

        assert_eq!(sim.run().unwrap(), StopReason::Halt);
        assert_eq!(display.contents(), b"hi abcxEnter a character: y");
        assert_eq!(sim.reg_file[R0], u16::from(b'y'));
        assert!(sim.cond().is_p());
    }

    #[test]
    fn test_getc_without_input() {
        let mut sim = sim(".orig x3000\nADD R0, R0, #3\nGETC\nHALT\n.end");
        sim.run().unwrap();
        assert_eq!(sim.reg_file[R0], 0);
        assert!(sim.cond().is_z());
    }

    #[test]
    fn test_port_detached() {
        let mut sim = sim(".orig x3000\nSEND\n.end");
        assert_eq!(sim.run(), Err(SimErr::PortDetached("SEND")));
        let mut sim = self::sim(".orig x3000\nRECV\n.end");
        assert_eq!(sim.run(), Err(SimErr::PortDetached("RECV")));
    }

    const PRODUCER: &str = "
        .orig x3000
            AND R0, R0, #0
        LOOP
            ADD R0, R0, #1
            SEND
            ADD R1, R0, #-3
            BRn LOOP
            HALT
        .end
    ";
    const CONSUMER: &str = "
        .orig x3000
            RECV
            ST R0, FIRST
            RECV
            ST R0, SECOND
            RECV
            ST R0, THIRD
            HALT
        FIRST  .blkw 1
        SECOND .blkw 1
        THIRD  .blkw 1
        .end
    ";

    #[test]
    fn test_send_recv_in_order() {
        let (tx, rx) = channel::<u16, 16>();
        let mut producer = sim(PRODUCER);
        let mut consumer = sim(CONSUMER);
        producer.set_outbox(tx);
        consumer.set_inbox(rx);

        let handle = std::thread::spawn(move || {
            let stop = consumer.run_with_limit(50_000).unwrap();
            (stop, consumer)
        });
        assert_eq!(producer.run_with_limit(50_000).unwrap(), StopReason::Halt);
        let (stop, consumer) = handle.join().unwrap();

        assert_eq!(stop, StopReason::Halt);
        assert_eq!(consumer.mem.read_block(0x3007, 3), vec![1, 2, 3]);
        assert_eq!(consumer.reg_file[R0], 3);
        assert_eq!(producer.stats.sent, 3);
        assert_eq!(consumer.stats.received, 3);
    }

    #[test]
    fn test_recv_spins_before_first_send() {
        let (tx, rx) = channel::<u16, 16>();
        let mut producer = sim(PRODUCER);
        producer.set_outbox(tx);

        let flags = SimFlags { wait: WaitPolicy::Bounded { limit: 100 }, ..Default::default() };
        let mut consumer = load(CONSUMER, flags);
        consumer.set_inbox(rx);

        // Nothing has been sent yet: RECV spins and gives up, leaving the PC on the trap.
        assert_eq!(consumer.run().unwrap(), StopReason::Stalled);
        assert_eq!(consumer.pc, 0x3000);
        assert_eq!(consumer.stats.instructions, 0);
        assert!(consumer.stats.recv_spins > 0);

        assert_eq!(producer.run().unwrap(), StopReason::Halt);
        assert_eq!(consumer.run().unwrap(), StopReason::Halt);
        assert_eq!(consumer.mem.read_block(0x3007, 3), vec![1, 2, 3]);
        assert_eq!(consumer.stats.received, 3);
    }

    #[test]
    fn test_recv_spins_until_concurrent_send() {
        let (tx, rx) = channel::<u16, 16>();
        let mut producer = sim(PRODUCER);
        let mut consumer = sim(CONSUMER);
        producer.set_outbox(tx);
        consumer.set_inbox(rx);

        let started = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let consumer_started = std::sync::Arc::clone(&started);
        let handle = std::thread::spawn(move || {
            consumer_started.store(true, Ordering::Release);
            let stop = consumer.run().unwrap();
            (stop, consumer)
        });

        // Give the consumer time to block on its first RECV.
        while !started.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(producer.run().unwrap(), StopReason::Halt);

        let (stop, consumer) = handle.join().unwrap();
        assert_eq!(stop, StopReason::Halt);
        assert!(consumer.stats.recv_spins > 0);
        assert_eq!(consumer.mem.read_block(0x3007, 3), vec![1, 2, 3]);
        assert_eq!(producer.stats.sent, 3);
        assert_eq!(consumer.stats.received, 3);
    }

    #[test]
    fn test_send_full_stalls_and_resumes() {
        // Capacity 1: the second SEND cannot go through until RECV drains the ring.
        let (tx, mut rx) = channel::<u16, 2>();
        let flags = SimFlags { wait: WaitPolicy::Bounded { limit: 10 }, ..Default::default() };
        let mut producer = load(PRODUCER, flags);
        producer.set_outbox(tx);

        assert_eq!(producer.run().unwrap(), StopReason::Stalled);
        assert_eq!(producer.stats.sent, 1);
        assert_eq!(producer.stats.send_spins, 11);
        assert_eq!(producer.mem.read(producer.pc), 0xF030);

        assert_eq!(rx.try_pop(), Some(1));
        assert_eq!(producer.run().unwrap(), StopReason::Stalled);
        assert_eq!(rx.try_pop(), Some(2));
        assert_eq!(producer.run().unwrap(), StopReason::Halt);
        assert_eq!(rx.try_pop(), Some(3));
        assert_eq!(producer.stats.sent, 3);
    }

    #[test]
    fn test_cancel() {
        let mut sim = sim(".orig x3000\nRECV\nHALT\n.end");
        sim.set_inbox(VecDeque::<u16>::new());

        let mcr = std::sync::Arc::clone(sim.mcr());
        let handle = std::thread::spawn(move || {
            let stop = sim.run().unwrap();
            (stop, sim)
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        mcr.store(false, Ordering::Relaxed);

        let (stop, sim) = handle.join().unwrap();
        assert_eq!(stop, StopReason::Cancelled);
        assert_eq!(sim.pc, 0x3000);
        assert_eq!(sim.stats.instructions, 0);
        assert_eq!(sim.stats.received, 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut sim = sim(".orig x3000\nHALT\n.end");
        sim.mcr().store(false, Ordering::Relaxed);
        assert_eq!(sim.run().unwrap(), StopReason::Cancelled);
        assert_eq!(sim.stats.instructions, 0);
    }

    #[test]
    fn test_load_image() {
        let obj = assemble(parse_ast(".orig x4000\nADD R0, R0, #2\nHALT\n.end").unwrap()).unwrap();
        let mut sim = Simulator::default();
        sim.load_image(&ImageFormat::serialize(&obj)).unwrap();
        assert_eq!(sim.pc, 0x4000);
        assert_eq!(sim.run().unwrap(), StopReason::Halt);
        assert_eq!(sim.reg_file[R0], 2);

        assert!(sim.load_image(&[0x40]).is_err());
    }

    #[test]
    fn test_report() {
        let mut sim = sim(".orig x3000\nADD R0, R0, #1\nHALT\n.end");
        let stop = sim.run().unwrap();
        let report = sim.report("test.obj", stop);
        assert_eq!(report.stats.instructions, 2);
        assert!(report.to_string().contains("VM (test.obj)"));
    }
}
