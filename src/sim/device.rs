//! Console devices connected to the Simulator.
//!
//! The console traps (`OUT`, `PUTS`, `PUTSP`, `GETC`, `IN`) do not touch the host
//! terminal directly. They go through two device traits:
//! - [`DisplayDevice`]: where output bytes are sent.
//! - [`InputDevice`]: where input bytes come from.
//!
//! This module also provides some devices:
//! - [`NullDisplay`] and [`NullInput`]: Do nothing.
//! - [`BufferedDisplay`] and [`BufferedInput`]: Shared in-memory buffers.
//! - [`StdoutDisplay`]: Writes straight to the process's standard output.
//! - [`ChannelDisplay`]: Forwards bytes to a single writer thread,
//!   so that several simulators can share one console.

mod display;
mod input;

pub use display::{BufferedDisplay, ChannelDisplay, NullDisplay, StdoutDisplay, Stop};
pub use input::{BufferedInput, NullInput};

/// A device which receives the simulator's console output.
pub trait DisplayDevice: Send + 'static {
    /// Sends one byte of output.
    fn send_output(&mut self, byte: u8);

    /// Sends a run of bytes of output.
    fn send_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.send_output(b);
        }
    }
}
impl dyn DisplayDevice {} // assert DisplayDevice is dyn safe

/// A device which supplies the simulator's console input.
pub trait InputDevice: Send + 'static {
    /// Takes the next byte of input, if any is available.
    fn read_input(&mut self) -> Option<u8>;
}
impl dyn InputDevice {} // assert InputDevice is dyn safe
