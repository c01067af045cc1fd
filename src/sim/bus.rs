//! Message ports used by the `SEND` and `RECV` traps.
//!
//! A simulator holds at most one [`Outbox`] (written by `SEND`)
//! and at most one [`Inbox`] (read by `RECV`).
//! Both operations are non-blocking; retrying is up to the simulator's wait policy.
//!
//! The ring buffer handles from [`crate::ring::channel`] implement these traits,
//! which is how two simulators on two threads are connected.

use std::collections::VecDeque;

use crate::ring::{Consumer, Producer};

/// The outbound port of a simulator.
pub trait Outbox: Send {
    /// Attempts to send a word, handing it back if the port is full.
    fn try_send(&mut self, word: u16) -> Result<(), u16>;
}
impl dyn Outbox {} // assert Outbox is dyn safe

/// The inbound port of a simulator.
pub trait Inbox: Send {
    /// Attempts to receive a word, returning `None` if nothing is available.
    fn try_recv(&mut self) -> Option<u16>;
}
impl dyn Inbox {} // assert Inbox is dyn safe

impl<const N: usize> Outbox for Producer<u16, N> {
    fn try_send(&mut self, word: u16) -> Result<(), u16> {
        self.try_push(word)
    }
}
impl<const N: usize> Inbox for Consumer<u16, N> {
    fn try_recv(&mut self) -> Option<u16> {
        self.try_pop()
    }
}

/// An unbounded outbox, useful for collecting a program's output in tests.
impl Outbox for VecDeque<u16> {
    fn try_send(&mut self, word: u16) -> Result<(), u16> {
        self.push_back(word);
        Ok(())
    }
}
/// A preloaded inbox.
impl Inbox for VecDeque<u16> {
    fn try_recv(&mut self) -> Option<u16> {
        self.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::{Inbox, Outbox};
    use crate::ring::channel;

    #[test]
    fn test_ring_ports() {
        let (mut tx, mut rx) = channel::<u16, 4>();
        let (out, inb): (&mut dyn Outbox, &mut dyn Inbox) = (&mut tx, &mut rx);

        assert_eq!(inb.try_recv(), None);
        for w in [10, 20, 30] {
            assert_eq!(out.try_send(w), Ok(()));
        }
        // Capacity is N - 1.
        assert_eq!(out.try_send(40), Err(40));

        assert_eq!(inb.try_recv(), Some(10));
        assert_eq!(out.try_send(40), Ok(()));
        assert_eq!([inb.try_recv(), inb.try_recv(), inb.try_recv()], [Some(20), Some(30), Some(40)]);
    }

    #[test]
    fn test_deque_ports() {
        let mut q = VecDeque::new();
        Outbox::try_send(&mut q, 7).unwrap();
        assert_eq!(Inbox::try_recv(&mut q), Some(7));
        assert_eq!(Inbox::try_recv(&mut q), None);
    }
}
