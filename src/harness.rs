//! Running a producer VM and a consumer VM against one shared ring buffer.
//!
//! The harness owns everything the two VMs share:
//! - the ring buffer (split into a [`Producer`] half for the producer VM's `SEND`
//!     and a [`Consumer`] half for the consumer VM's `RECV`),
//! - the [`MCR`], which stops both VMs when cleared,
//! - optionally, one console display both VMs write to.
//!
//! Both program images are read and decoded in [`Harness::load`],
//! so a bad image is reported before either VM thread starts.
//!
//! # Example
//! ```
//! use lc3_bus::asm::assemble;
//! use lc3_bus::config::Config;
//! use lc3_bus::harness::LoadedPair;
//! use lc3_bus::parse::parse_ast;
//! use lc3_bus::sim::StopReason;
//!
//! let producer = assemble(parse_ast("
//!     .orig x3000
//!     AND R0, R0, #0
//!     ADD R0, R0, #7
//!     SEND
//!     HALT
//!     .end
//! ").unwrap()).unwrap();
//! let consumer = assemble(parse_ast("
//!     .orig x3000
//!     RECV
//!     HALT
//!     .end
//! ").unwrap()).unwrap();
//!
//! let pair = LoadedPair::new(&Config::default(), &producer, &consumer);
//! let report = pair.run().unwrap();
//! assert_eq!(report.producer.stop, StopReason::Halt);
//! assert_eq!(report.consumer.stats.received, 1);
//! ```
//!
//! [`Producer`]: crate::ring::Producer
//! [`Consumer`]: crate::ring::Consumer

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::asm::encoding::{ImageErr, ImageFormat, ObjFileFormat};
use crate::asm::ObjectFile;
use crate::config::Config;
use crate::ring::channel;
use crate::sim::device::DisplayDevice;
use crate::sim::{SimErr, Simulator, VmReport, MCR};

/// The number of slots in the ring buffer shared by the two VMs.
///
/// At most `RING_CAPACITY - 1` words can be in flight.
pub const RING_CAPACITY: usize = 1024;

/// Loads and runs a producer/consumer pair of VMs.
#[derive(Debug, Clone, Default)]
pub struct Harness {
    config: Config
}
impl Harness {
    /// Creates a harness for the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The configuration of this harness.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads both program images and loads them into two connected VMs.
    ///
    /// The producer's image is read first;
    /// the first image which cannot be read or decoded is returned as an error.
    pub fn load(&self) -> Result<LoadedPair, LoadErr> {
        let producer_path = self.config.producer_path();
        let consumer_path = self.config.consumer_path();

        let producer = read_image(&producer_path)?;
        let consumer = read_image(&consumer_path)?;

        let mut pair = LoadedPair::new(&self.config, &producer, &consumer);
        pair.producer.name = producer_path.display().to_string();
        pair.consumer.name = consumer_path.display().to_string();
        Ok(pair)
    }
}

fn read_image(path: &Path) -> Result<ObjectFile, LoadErr> {
    let bytes = std::fs::read(path)
        .map_err(|e| LoadErr { path: path.to_path_buf(), kind: LoadErrKind::Io(e) })?;
    let obj = ImageFormat::deserialize(&bytes)
        .map_err(|e| LoadErr { path: path.to_path_buf(), kind: LoadErrKind::Image(e) })?;

    log::debug!("read {} ({} words at x{:04X})", path.display(), obj.words().len(), obj.origin());
    Ok(obj)
}

/// A program image could not be loaded.
#[derive(Debug)]
pub struct LoadErr {
    /// The path of the image.
    pub path: PathBuf,
    /// What went wrong.
    pub kind: LoadErrKind
}
/// The kinds of failure for [`LoadErr`].
#[derive(Debug)]
pub enum LoadErrKind {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not a valid program image.
    Image(ImageErr),
}
impl std::fmt::Display for LoadErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to load image: {}", self.path.display())
    }
}
impl std::error::Error for LoadErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            LoadErrKind::Io(e)    => Some(e),
            LoadErrKind::Image(e) => Some(e),
        }
    }
}
impl crate::err::Error for LoadErr {
    fn help(&self) -> Option<Cow<str>> {
        use crate::err::Error;

        match &self.kind {
            LoadErrKind::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Some("assemble the program first with `lc3-bus asm`".into())
            },
            LoadErrKind::Io(_) => None,
            LoadErrKind::Image(e) => e.help(),
        }
    }
}

/// One VM of a pair.
struct Vm {
    name: String,
    role: &'static str,
    sim: Simulator
}

/// Two VMs, loaded and connected by a ring buffer, ready to run.
pub struct LoadedPair {
    producer: Vm,
    consumer: Vm,
    mcr: MCR,
    budget: u64
}
impl LoadedPair {
    /// Creates a producer VM and a consumer VM from two object files,
    /// connecting the producer's outbox to the consumer's inbox.
    ///
    /// Both VMs are configured from `config` and share one [`MCR`].
    pub fn new(config: &Config, producer: &ObjectFile, consumer: &ObjectFile) -> Self {
        let flags = config.sim_flags();
        let mcr: MCR = Arc::new(AtomicBool::new(true));
        let (tx, rx) = channel::<u16, RING_CAPACITY>();

        let mut producer_sim = Simulator::new_with_mcr(flags, Arc::clone(&mcr));
        producer_sim.load_obj_file(producer);
        producer_sim.set_outbox(tx);

        let mut consumer_sim = Simulator::new_with_mcr(flags, Arc::clone(&mcr));
        consumer_sim.load_obj_file(consumer);
        consumer_sim.set_inbox(rx);

        Self {
            producer: Vm { name: "producer".into(), role: "producer", sim: producer_sim },
            consumer: Vm { name: "consumer".into(), role: "consumer", sim: consumer_sim },
            mcr,
            budget: config.budget()
        }
    }

    /// The MCR shared by both VMs.
    ///
    /// Clearing it stops both VMs before their next instruction.
    pub fn mcr(&self) -> &MCR {
        &self.mcr
    }

    /// Sets the console display of both VMs.
    pub fn set_display(&mut self, display: impl DisplayDevice + Clone) {
        self.producer.sim.set_display(display.clone());
        self.consumer.sim.set_display(display);
    }

    /// The producer VM.
    pub fn producer_mut(&mut self) -> &mut Simulator {
        &mut self.producer.sim
    }

    /// The consumer VM.
    pub fn consumer_mut(&mut self) -> &mut Simulator {
        &mut self.consumer.sim
    }

    /// Runs both VMs to completion, each on its own thread.
    ///
    /// This blocks until both threads have been joined.
    /// If either VM fails (or its thread panics), the MCR is cleared
    /// so the other VM does not wait forever on the ring.
    pub fn run(self) -> Result<PairReport, RunErr> {
        let LoadedPair { producer, consumer, mcr, budget } = self;

        let producer = spawn_vm(producer, Arc::clone(&mcr), budget)?;
        let consumer = match spawn_vm(consumer, Arc::clone(&mcr), budget) {
            Ok(handle) => handle,
            Err(e) => {
                mcr.store(false, Ordering::Relaxed);
                let _ = producer.join();
                return Err(e);
            }
        };

        let producer = join_vm(producer, "producer");
        let consumer = join_vm(consumer, "consumer");

        Ok(PairReport { producer: producer?, consumer: consumer? })
    }
}

/// Clears the MCR if the thread holding this unwinds.
struct CancelOnPanic(MCR);
impl Drop for CancelOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(false, Ordering::Relaxed);
        }
    }
}

fn spawn_vm(vm: Vm, mcr: MCR, budget: u64) -> Result<JoinHandle<Result<VmReport, RunErr>>, RunErr> {
    let Vm { name, role, mut sim } = vm;

    thread::Builder::new()
        .name(format!("vm-{role}"))
        .spawn(move || {
            let _guard = CancelOnPanic(Arc::clone(&mcr));
            log::debug!("{role} ({name}) starting with a budget of {budget} instructions");

            match sim.run_with_limit(budget) {
                Ok(stop) => {
                    log::debug!("{role} ({name}) stopped: {stop}");
                    Ok(sim.report(name, stop))
                },
                Err(err) => {
                    log::error!("{role} ({name}) failed at x{:04X}: {err}", sim.pc);
                    mcr.store(false, Ordering::Relaxed);
                    Err(RunErr::Sim { vm: name, err })
                }
            }
        })
        .map_err(RunErr::Spawn)
}

fn join_vm(handle: JoinHandle<Result<VmReport, RunErr>>, role: &'static str) -> Result<VmReport, RunErr> {
    handle.join().unwrap_or_else(|payload| {
        let msg = payload.downcast_ref::<&str>().map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        Err(RunErr::Panicked { role, msg })
    })
}

/// An error that stopped a pair run.
#[derive(Debug)]
pub enum RunErr {
    /// A VM thread could not be spawned.
    Spawn(std::io::Error),
    /// A VM raised a simulation error.
    Sim {
        /// The name of the failing VM.
        vm: String,
        /// The error.
        err: SimErr
    },
    /// A VM thread panicked.
    Panicked {
        /// The role of the VM ("producer" or "consumer").
        role: &'static str,
        /// The panic message, if it was a string.
        msg: String
    },
}
impl std::fmt::Display for RunErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunErr::Spawn(e) => write!(f, "failed to spawn VM thread: {e}"),
            RunErr::Sim { vm, err } => write!(f, "VM ({vm}) failed: {err}"),
            RunErr::Panicked { role, msg } if msg.is_empty() => write!(f, "{role} thread panicked"),
            RunErr::Panicked { role, msg } => write!(f, "{role} thread panicked: {msg}"),
        }
    }
}
impl std::error::Error for RunErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunErr::Spawn(e) => Some(e),
            RunErr::Sim { err, .. } => Some(err),
            RunErr::Panicked { .. } => None,
        }
    }
}
impl crate::err::Error for RunErr {
    fn help(&self) -> Option<Cow<str>> {
        use crate::err::Error;

        match self {
            RunErr::Sim { err, .. } => err.help(),
            _ => None
        }
    }
}

/// The reports of both VMs of a finished pair run.
#[derive(Debug, Clone, PartialEq)]
pub struct PairReport {
    /// The producer's report.
    pub producer: VmReport,
    /// The consumer's report.
    pub consumer: VmReport,
}
impl std::fmt::Display for PairReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.producer)?;
        write!(f, "{}", self.consumer)
    }
}

/// Result of [`ring_benchmark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchReport {
    /// Number of values pushed through the ring.
    pub count: u32,
    /// Sum of the values the consumer popped.
    pub sum: u64,
    /// Failed pushes on a full ring.
    pub push_spins: u64,
    /// Failed pops on an empty ring.
    pub pop_spins: u64,
    /// Time from the start of the first push to the last pop.
    pub elapsed: Duration,
}
impl BenchReport {
    /// Whether every value arrived exactly once (the sum of `1..=count`).
    pub fn is_valid(&self) -> bool {
        let n = u64::from(self.count);
        self.sum == n * (n + 1) / 2
    }

    /// Messages per second.
    pub fn msgs_per_sec(&self) -> f64 {
        match self.elapsed.as_secs_f64() {
            s if s > 0.0 => f64::from(self.count) / s,
            _ => 0.0
        }
    }
}
impl std::fmt::Display for BenchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "==== Ring Benchmark ====")?;
        writeln!(f, "Messages           : {}", self.count)?;
        writeln!(f, "Sum                : {} ({})", self.sum, if self.is_valid() { "ok" } else { "MISMATCH" })?;
        writeln!(f, "Push spin iters    : {}", self.push_spins)?;
        writeln!(f, "Pop spin iters     : {}", self.pop_spins)?;
        writeln!(f, "Msgs/sec           : {:.2}", self.msgs_per_sec())?;
        writeln!(f, "Elapsed time       : {:.2} ms", self.elapsed.as_secs_f64() * 1e3)?;
        write!(f, "========================")
    }
}

/// Pushes `1..=count` through a ring buffer from one thread
/// while another thread pops and sums them.
///
/// Both sides spin on a full (or empty) ring.
///
/// ```
/// let report = lc3_bus::harness::ring_benchmark(1_000);
/// assert_eq!(report.sum, 500_500);
/// assert!(report.is_valid());
/// ```
pub fn ring_benchmark(count: u32) -> BenchReport {
    let (mut tx, mut rx) = channel::<u32, RING_CAPACITY>();
    let start = Instant::now();

    let (push_spins, (sum, pop_spins)) = thread::scope(|s| {
        let producer = s.spawn(move || {
            let mut spins = 0u64;
            for mut value in 1..=count {
                while let Err(v) = tx.try_push(value) {
                    value = v;
                    spins += 1;
                    std::hint::spin_loop();
                }
            }
            spins
        });

        let mut sum = 0u64;
        let mut spins = 0u64;
        let mut received = 0;
        while received < count {
            match rx.try_pop() {
                Some(value) => {
                    sum += u64::from(value);
                    received += 1;
                },
                None => {
                    spins += 1;
                    std::hint::spin_loop();
                }
            }
        }

        // The producer has pushed everything the consumer popped, so this join does not wait long.
        let push_spins = producer.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
        (push_spins, (sum, spins))
    });

    BenchReport { count, sum, push_spins, pop_spins, elapsed: start.elapsed() }
}
