//! Execution counters and end-of-run reports.

use std::time::Duration;

/// Why a call to [`Simulator::run_with_limit`] returned without an error.
///
/// [`Simulator::run_with_limit`]: super::Simulator::run_with_limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The program executed `HALT`.
    Halt,
    /// The instruction budget was used up before the program halted.
    InstructionLimit,
    /// The machine control register was cleared.
    Cancelled,
    /// A `SEND` or `RECV` gave up waiting, per the simulator's wait policy.
    Stalled,
}
impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Halt => f.write_str("halted"),
            StopReason::InstructionLimit => f.write_str("instruction limit reached"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::Stalled => f.write_str("stalled on message port"),
        }
    }
}

/// Counters kept by a simulator. These only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Instructions executed.
    pub instructions: u64,
    /// Words sent by `SEND`.
    pub sent: u64,
    /// Words received by `RECV`.
    pub received: u64,
    /// Failed attempts made by `RECV` on an empty inbox.
    pub recv_spins: u64,
    /// Failed attempts made by `SEND` on a full outbox.
    pub send_spins: u64,
    /// Illegal opcodes and unknown traps skipped under lenient decoding.
    pub illegal: u64,
    /// Wall-clock time spent running.
    pub elapsed: Duration,
}

/// The metrics of one finished run of a simulator.
///
/// The `Display` impl renders the metrics block printed at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct VmReport {
    /// The name of the VM (usually its image path).
    pub name: String,
    /// Why the run ended.
    pub stop: StopReason,
    /// The counters at the end of the run.
    pub stats: Stats,
}
impl VmReport {
    fn elapsed_ns(&self) -> f64 {
        self.stats.elapsed.as_nanos() as f64
    }

    /// Average nanoseconds per instruction.
    pub fn ns_per_op(&self) -> f64 {
        match self.stats.instructions {
            0 => 0.0,
            n => self.elapsed_ns() / n as f64
        }
    }

    /// Millions of instructions per second.
    pub fn mips(&self) -> f64 {
        match self.ns_per_op() {
            ns if ns > 0.0 => 1e3 / ns,
            _ => 0.0
        }
    }

    /// Received messages per second.
    pub fn msgs_per_sec(&self) -> f64 {
        match self.elapsed_ns() {
            ns if ns > 0.0 => self.stats.received as f64 * 1e9 / ns,
            _ => 0.0
        }
    }

    /// Average `RECV` spin iterations per received message.
    pub fn avg_spins_per_msg(&self) -> f64 {
        match self.stats.received {
            0 => 0.0,
            n => self.stats.recv_spins as f64 / n as f64
        }
    }

    /// Average microseconds per received message.
    pub fn us_per_msg(&self) -> f64 {
        match self.stats.received {
            0 => 0.0,
            n => self.elapsed_ns() / 1e3 / n as f64
        }
    }
}
impl std::fmt::Display for VmReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = &self.stats;
        writeln!(f, "==== VM ({}) Metrics ====", self.name)?;
        writeln!(f, "Stopped            : {}", self.stop)?;
        writeln!(f, "Instructions       : {}", s.instructions)?;
        writeln!(f, "ns/op              : {:.2} ns", self.ns_per_op())?;
        writeln!(f, "Throughput         : {:.2} MIPS", self.mips())?;
        writeln!(f, "Messages sent      : {}, recv: {}", s.sent, s.received)?;
        writeln!(f, "Recv spin iters    : {}", s.recv_spins)?;
        writeln!(f, "Send spin iters    : {}", s.send_spins)?;
        if s.illegal != 0 {
            writeln!(f, "Illegal skipped    : {}", s.illegal)?;
        }
        writeln!(f, "Msgs/sec           : {:.2}", self.msgs_per_sec())?;
        writeln!(f, "Avg spins/msg      : {:.2}", self.avg_spins_per_msg())?;
        writeln!(f, "Avg us/msg         : {:.2}", self.us_per_msg())?;
        writeln!(f, "Elapsed time       : {:.2} ms", self.elapsed_ns() / 1e6)?;
        write!(f, "=========================")
    }
}
