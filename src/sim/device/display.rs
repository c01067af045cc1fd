use std::io::Write;
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

use super::DisplayDevice;

/// A display that discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;
impl DisplayDevice for NullDisplay {
    fn send_output(&mut self, _byte: u8) {}
}

/// A display that delegates its output to a buffer.
///
/// Bytes written while the buffer is locked elsewhere are dropped.
#[derive(Debug, Default, Clone)]
pub struct BufferedDisplay {
    buffer: Arc<RwLock<Vec<u8>>>
}
impl BufferedDisplay {
    /// Creates a new display, wrapping it around a given buffer.
    pub fn new(buffer: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { buffer }
    }

    /// Gets a reference to the internal buffer of this display.
    pub fn get_buffer(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.buffer
    }

    /// Copies the current output out of the buffer.
    pub fn contents(&self) -> Vec<u8> {
        match self.buffer.read() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn try_output(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.buffer.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
impl DisplayDevice for BufferedDisplay {
    fn send_output(&mut self, byte: u8) {
        if let Some(mut out) = self.try_output() {
            out.push(byte);
        }
    }

    fn send_all(&mut self, bytes: &[u8]) {
        if let Some(mut out) = self.try_output() {
            out.extend_from_slice(bytes);
        }
    }
}

/// A display that writes directly to standard output, flushing after every write.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutDisplay;
impl DisplayDevice for StdoutDisplay {
    fn send_output(&mut self, byte: u8) {
        self.send_all(&[byte]);
    }

    fn send_all(&mut self, bytes: &[u8]) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
            log::warn!("failed to write to stdout: {e}");
        }
    }
}

/// Returned by a [`ChannelDisplay`] writer to indicate no more output should be written.
#[derive(Clone, Copy, Default, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stop;

/// A display that forwards output to a dedicated writer thread.
///
/// Clones of a `ChannelDisplay` all feed the same writer,
/// so output from several simulators is written in the order it was produced,
/// one write call at a time.
///
/// The writer thread ends once every clone has been dropped
/// (or once the writer returns [`Stop`]).
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use lc3_bus::sim::device::{ChannelDisplay, DisplayDevice};
///
/// let out = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&out);
/// let (mut display, writer) = ChannelDisplay::new(move |bytes| {
///     sink.lock().unwrap().extend_from_slice(bytes);
///     Ok(())
/// });
///
/// display.send_all(b"hi");
/// drop(display);
/// writer.join().unwrap();
/// assert_eq!(*out.lock().unwrap(), b"hi");
/// ```
#[derive(Debug, Clone)]
pub struct ChannelDisplay {
    write_data: cbc::Sender<Vec<u8>>
}
impl ChannelDisplay {
    /// Creates a new display and spawns its writer thread.
    ///
    /// The writer is called once per write made to the display.
    pub fn new(mut writer: impl FnMut(&[u8]) -> Result<(), Stop> + Send + 'static) -> (Self, JoinHandle<()>) {
        let (write_tx, write_rx) = cbc::unbounded::<Vec<u8>>();

        let write_handler = std::thread::spawn(move || {
            for bytes in write_rx {
                let Ok(()) = writer(&bytes) else { return };
            }
        });

        (Self { write_data: write_tx }, write_handler)
    }

    /// Creates a display whose writer thread writes to standard output.
    pub fn stdout() -> (Self, JoinHandle<()>) {
        Self::new(|bytes| {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes)
                .and_then(|_| out.flush())
                .map_err(|e| log::warn!("console writer stopped: {e}"))
                .map_err(|_| Stop)
        })
    }
}
impl DisplayDevice for ChannelDisplay {
    fn send_output(&mut self, byte: u8) {
        self.send_all(&[byte]);
    }

    fn send_all(&mut self, bytes: &[u8]) {
        // The writer only hangs up after it stopped, so dropped output is fine.
        let _ = self.write_data.send(bytes.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{BufferedDisplay, ChannelDisplay, Stop};
    use crate::sim::device::DisplayDevice;

    #[test]
    fn test_buffered_display() {
        let mut display = BufferedDisplay::default();
        display.send_output(b'A');
        display.send_all(b"BC");
        assert_eq!(display.contents(), b"ABC");
        assert_eq!(&*display.get_buffer().read().unwrap(), b"ABC");
    }

    #[test]
    fn test_channel_display_keeps_order_across_clones() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&out);
        let (mut a, writer) = ChannelDisplay::new(move |bytes| {
            sink.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        });
        let mut b = a.clone();

        a.send_all(b"one ");
        b.send_all(b"two ");
        a.send_output(b'!');
        drop((a, b));
        writer.join().unwrap();

        assert_eq!(*out.lock().unwrap(), b"one two !");
    }

    #[test]
    fn test_channel_display_stop() {
        let count = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&count);
        let (mut display, writer) = ChannelDisplay::new(move |_| {
            *seen.lock().unwrap() += 1;
            Err(Stop)
        });

        display.send_output(b'a');
        writer.join().unwrap();
        // The writer has hung up; further output is discarded.
        display.send_output(b'b');
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
