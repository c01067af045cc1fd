use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};

use super::InputDevice;

/// An input device with nothing to read.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInput;
impl InputDevice for NullInput {
    fn read_input(&mut self) -> Option<u8> {
        None
    }
}

/// An input device that reads off of an input buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferedInput {
    buffer: Arc<RwLock<VecDeque<u8>>>
}
impl BufferedInput {
    /// Creates a new input device, wrapping it around a given buffer.
    pub fn new(buffer: Arc<RwLock<VecDeque<u8>>>) -> Self {
        Self { buffer }
    }

    /// Gets a reference to the internal buffer of this device.
    pub fn get_buffer(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.buffer
    }

    fn try_input(&self) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match self.buffer.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
impl From<&[u8]> for BufferedInput {
    fn from(value: &[u8]) -> Self {
        Self::new(Arc::new(RwLock::new(value.iter().copied().collect())))
    }
}
impl InputDevice for BufferedInput {
    fn read_input(&mut self) -> Option<u8> {
        self.try_input()?.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::BufferedInput;
    use crate::sim::device::InputDevice;

    #[test]
    fn test_buffered_input() {
        let mut input = BufferedInput::from(&b"ok"[..]);
        assert_eq!(input.read_input(), Some(b'o'));

        input.get_buffer().write().unwrap().push_back(b'!');
        assert_eq!(input.read_input(), Some(b'k'));
        assert_eq!(input.read_input(), Some(b'!'));
        assert_eq!(input.read_input(), None);
    }
}
