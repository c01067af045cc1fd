//! A bounded, lock-free single-producer/single-consumer ring buffer.
//!
//! This is the message bus that two simulators use to exchange words through
//! the `SEND` and `RECV` traps.
//!
//! The module consists of:
//! - [`RingBuffer`]: the raw buffer, whose `push` and `pop` are `unsafe`
//!     because the single-producer/single-consumer discipline is a caller obligation.
//! - [`channel`]: the safe interface, which splits one shared buffer into
//!     a [`Producer`] and a [`Consumer`] handle.
//! - [`WaitPolicy`] and [`Waiter`]: caller-side retry policies
//!     used when the buffer is full or empty.
//!
//! # Example
//! ```
//! use lc3_bus::ring::channel;
//!
//! let (mut tx, mut rx) = channel::<u16, 4>();
//! assert!(tx.try_push(1).is_ok());
//! assert!(tx.try_push(2).is_ok());
//! assert!(tx.try_push(3).is_ok());
//! // One slot is always kept empty:
//! assert_eq!(tx.try_push(4), Err(4));
//!
//! assert_eq!(rx.try_pop(), Some(1));
//! assert_eq!(rx.try_pop(), Some(2));
//! assert_eq!(rx.try_pop(), Some(3));
//! assert_eq!(rx.try_pop(), None);
//! ```

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::{Backoff, CachePadded};
use serde::{Deserialize, Serialize};

/// A fixed-capacity circular buffer shared by exactly one producer and one consumer.
///
/// `N` is the number of slots and must be a power of two (at least 2).
/// One slot is always left empty so that "full" and "empty" can be told apart
/// from the two indices alone, so at most `N - 1` values can be outstanding.
///
/// `head` and `tail` each sit on their own cache line,
/// so a producer write to `head` never invalidates the consumer's `tail` line (or vice versa).
pub struct RingBuffer<T, const N: usize> {
    /// Next slot the producer writes. Only written by the producer.
    head: CachePadded<AtomicUsize>,
    /// Next slot the consumer reads. Only written by the consumer.
    tail: CachePadded<AtomicUsize>,
    /// Slots in `tail..head` (mod N) are initialized.
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>
}

// SAFETY: Slots are only accessed under the SPSC discipline documented on `push`/`pop`.
// A slot is written by the producer before the Release store of `head` and
// read by the consumer after the Acquire load of `head` (and symmetrically for `tail`),
// so no slot is ever accessed by both threads at once.
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T, const N: usize> RingBuffer<T, N> {
    const VALID_CAPACITY: () = assert!(N >= 2 && N.is_power_of_two(), "ring buffer capacity must be a power of two");
    const MASK: usize = N - 1;

    /// Creates a new, empty ring buffer.
    ///
    /// Instantiating a ring buffer whose `N` is not a power of two fails to compile.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;

        let buffer = (0..N)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            buffer
        }
    }

    /// Attempts to enqueue a value.
    ///
    /// If the buffer is full, this returns the value back and nothing changes.
    /// This never blocks. Any retry policy belongs to the caller (see [`WaitPolicy`]).
    ///
    /// # Safety
    ///
    /// At most one thread may call `push` over the lifetime of the buffer
    /// (or, more precisely, calls to `push` must never run concurrently with each other).
    ///
    /// [`Producer`] upholds this automatically.
    pub unsafe fn push(&self, value: T) -> Result<(), T> {
        // Only this thread writes head.
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & Self::MASK;

        // Pairs with the consumer's Release store of tail,
        // which marks the slot at `next - 1` as done being read.
        if next == self.tail.load(Ordering::Acquire) {
            return Err(value);
        }

        // SAFETY: slot `head` is outside `tail..head`, so the consumer is not reading it,
        // and the caller guarantees no other producer is writing it.
        unsafe { (*self.buffer[head].get()).write(value); }
        self.head.store(next, Ordering::Release);

        Ok(())
    }

    /// Attempts to dequeue a value.
    ///
    /// If the buffer is empty, this returns `None` and nothing changes.
    /// This never blocks.
    ///
    /// # Safety
    ///
    /// At most one thread may call `pop` over the lifetime of the buffer
    /// (or, more precisely, calls to `pop` must never run concurrently with each other).
    ///
    /// [`Consumer`] upholds this automatically.
    pub unsafe fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);

        // Pairs with the producer's Release store of head,
        // which publishes the value written into slot `tail`.
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: slot `tail` is inside `tail..head`, so it was initialized by the producer
        // and the Acquire load above makes that write visible.
        // The caller guarantees no other consumer reads it.
        let value = unsafe { (*self.buffer[tail].get()).assume_init_read() };
        self.tail.store((tail + 1) & Self::MASK, Ordering::Release);

        Some(value)
    }

    /// The number of values which can be outstanding at once (`N - 1`).
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// A snapshot of the number of outstanding values.
    ///
    /// If the other side is active, this may be stale by the time it is read.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & Self::MASK
    }

    /// Whether the buffer is currently empty (`head == tail`).
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Whether the buffer is currently full (`(head + 1) mod N == tail`).
    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        (head + 1) & Self::MASK == self.tail.load(Ordering::Acquire)
    }
}

impl<T, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for RingBuffer<T, N> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let mut tail = *self.tail.get_mut();

        while tail != head {
            // SAFETY: every slot in tail..head is initialized, and we have exclusive access.
            unsafe { self.buffer[tail].get_mut().assume_init_drop(); }
            tail = (tail + 1) & Self::MASK;
        }
    }
}

impl<T, const N: usize> std::fmt::Debug for RingBuffer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Creates a new ring buffer and splits it into its producer and consumer handles.
///
/// Each handle can be moved to another thread,
/// but neither can be cloned or shared,
/// so the single-producer/single-consumer discipline holds by construction.
pub fn channel<T, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let ring = Arc::new(RingBuffer::new());

    let tx = Producer { ring: Arc::clone(&ring), _not_sync: PhantomData };
    let rx = Consumer { ring, _not_sync: PhantomData };
    (tx, rx)
}

/// The sending half of a [`channel`].
pub struct Producer<T, const N: usize> {
    ring: Arc<RingBuffer<T, N>>,
    // Send but !Sync.
    _not_sync: PhantomData<Cell<()>>
}
impl<T, const N: usize> Producer<T, N> {
    /// Attempts to enqueue a value, returning it back if the buffer is full.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        // SAFETY: Producer is the only pushing handle and is not Sync or Clone.
        unsafe { self.ring.push(value) }
    }

    /// Enqueues a value, retrying according to the waiter's policy while the buffer is full.
    ///
    /// If the waiter gives up, the value is returned back.
    pub fn push_wait(&mut self, mut value: T, waiter: &mut Waiter) -> Result<(), T> {
        loop {
            match self.try_push(value) {
                Ok(()) => return Ok(()),
                Err(v) if waiter.wait() => value = v,
                Err(v) => return Err(v),
            }
        }
    }

    /// Whether the consumer half has been dropped.
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.ring) == 1
    }

    /// The underlying ring buffer.
    pub fn ring(&self) -> &RingBuffer<T, N> {
        &self.ring
    }
}
impl<T, const N: usize> std::fmt::Debug for Producer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Producer").field(&*self.ring).finish()
    }
}

/// The receiving half of a [`channel`].
pub struct Consumer<T, const N: usize> {
    ring: Arc<RingBuffer<T, N>>,
    _not_sync: PhantomData<Cell<()>>
}
impl<T, const N: usize> Consumer<T, N> {
    /// Attempts to dequeue a value.
    pub fn try_pop(&mut self) -> Option<T> {
        // SAFETY: Consumer is the only popping handle and is not Sync or Clone.
        unsafe { self.ring.pop() }
    }

    /// Dequeues a value, retrying according to the waiter's policy while the buffer is empty.
    ///
    /// This returns `None` if the waiter gives up.
    pub fn pop_wait(&mut self, waiter: &mut Waiter) -> Option<T> {
        loop {
            if let Some(value) = self.try_pop() {
                return Some(value);
            }
            if !waiter.wait() {
                return None;
            }
        }
    }

    /// Whether the producer half has been dropped.
    ///
    /// Values pushed before the producer was dropped can still be popped.
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.ring) == 1
    }

    /// The underlying ring buffer.
    pub fn ring(&self) -> &RingBuffer<T, N> {
        &self.ring
    }
}
impl<T, const N: usize> std::fmt::Debug for Consumer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Consumer").field(&*self.ring).finish()
    }
}

/// How a caller retries a push onto a full buffer or a pop from an empty buffer.
///
/// This can be parsed from (and displayed as) a string:
/// `spin`, `yield`, `backoff`, or `bounded:LIMIT`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WaitPolicy {
    /// Busy-spin with no backoff and no yield. Never gives up.
    #[default]
    Spin,
    /// Yield the thread to the OS scheduler between attempts. Never gives up.
    Yield,
    /// Exponential backoff, eventually yielding between attempts. Never gives up.
    Backoff,
    /// Busy-spin, but give up after `limit` failed attempts.
    Bounded {
        /// The number of failed attempts before giving up.
        limit: u64
    }
}
impl WaitPolicy {
    /// Creates a fresh [`Waiter`] following this policy.
    pub fn waiter(self) -> Waiter {
        Waiter { policy: self, attempts: 0, backoff: Backoff::new() }
    }
}
impl std::fmt::Display for WaitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitPolicy::Spin    => f.write_str("spin"),
            WaitPolicy::Yield   => f.write_str("yield"),
            WaitPolicy::Backoff => f.write_str("backoff"),
            WaitPolicy::Bounded { limit } => write!(f, "bounded:{limit}"),
        }
    }
}
impl std::str::FromStr for WaitPolicy {
    type Err = WaitPolicyParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &*s.trim().to_lowercase() {
            "spin"    => Ok(WaitPolicy::Spin),
            "yield"   => Ok(WaitPolicy::Yield),
            "backoff" => Ok(WaitPolicy::Backoff),
            other => match other.strip_prefix("bounded:") {
                Some(n) => n.parse()
                    .map(|limit| WaitPolicy::Bounded { limit })
                    .map_err(|_| WaitPolicyParseErr(s.to_string())),
                None => Err(WaitPolicyParseErr(s.to_string())),
            }
        }
    }
}
impl TryFrom<String> for WaitPolicy {
    type Error = WaitPolicyParseErr;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
impl From<WaitPolicy> for String {
    fn from(value: WaitPolicy) -> Self {
        value.to_string()
    }
}

/// Error from parsing an unrecognized [`WaitPolicy`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WaitPolicyParseErr(String);
impl std::fmt::Display for WaitPolicyParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown wait policy {:?} (expected spin, yield, backoff, or bounded:LIMIT)", self.0)
    }
}
impl std::error::Error for WaitPolicyParseErr {}

/// The retry state of one wait (created by [`WaitPolicy::waiter`]).
#[derive(Debug)]
pub struct Waiter {
    policy: WaitPolicy,
    attempts: u64,
    backoff: Backoff
}
impl Waiter {
    /// Records one failed attempt and pauses according to the policy.
    ///
    /// Returns `false` if the policy gives up, in which case the caller should stop retrying.
    pub fn wait(&mut self) -> bool {
        self.attempts += 1;
        match self.policy {
            WaitPolicy::Spin    => std::hint::spin_loop(),
            WaitPolicy::Yield   => std::thread::yield_now(),
            WaitPolicy::Backoff => self.backoff.snooze(),
            WaitPolicy::Bounded { limit } => {
                if self.attempts > limit { return false; }
                std::hint::spin_loop();
            }
        }
        true
    }

    /// The number of failed attempts recorded so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Resets the waiter so it can be reused for another wait.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::{channel, RingBuffer, WaitPolicy};

    #[test]
    fn test_fifo_round_trip() {
        let (mut tx, mut rx) = channel::<u16, 8>();
        for i in 1..=7 {
            assert_eq!(tx.try_push(i), Ok(()));
        }
        for i in 1..=7 {
            assert_eq!(rx.try_pop(), Some(i));
        }
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_full_at_capacity() {
        let ring = RingBuffer::<u16, 16>::new();
        assert_eq!(ring.capacity(), 15);
        assert!(ring.is_empty());

        for i in 0..15 {
            assert!(!ring.is_full(), "ring reported full with {i} outstanding");
            assert_eq!(unsafe { ring.push(i) }, Ok(()));
            assert_eq!(ring.len(), usize::from(i) + 1);
        }
        assert!(ring.is_full());
        assert_eq!(unsafe { ring.push(99) }, Err(99));
        assert_eq!(ring.len(), 15);

        // one pop frees exactly one slot
        assert_eq!(unsafe { ring.pop() }, Some(0));
        assert!(!ring.is_full());
        assert_eq!(unsafe { ring.push(15) }, Ok(()));
        assert!(ring.is_full());
    }

    #[test]
    fn test_empty() {
        let ring = RingBuffer::<u32, 2>::new();
        assert_eq!(unsafe { ring.pop() }, None);
        assert_eq!(ring.len(), 0);

        assert_eq!(unsafe { ring.push(5) }, Ok(()));
        // capacity 1:
        assert_eq!(unsafe { ring.push(6) }, Err(6));
        assert!(!ring.is_empty());
        assert_eq!(unsafe { ring.pop() }, Some(5));
        assert!(ring.is_empty());
        assert_eq!(unsafe { ring.pop() }, None);
    }

    #[test]
    fn test_wrap_around() {
        let (mut tx, mut rx) = channel::<u32, 4>();
        let mut next_in = 0u32;
        let mut next_out = 0u32;

        // N - 1 in, N - 1 out, repeatedly
        for _ in 0..10_000 {
            for _ in 0..3 {
                assert_eq!(tx.try_push(next_in), Ok(()));
                next_in += 1;
            }
            assert!(tx.ring().is_full());
            for _ in 0..3 {
                assert_eq!(rx.try_pop(), Some(next_out));
                next_out += 1;
            }
            assert!(rx.ring().is_empty());
        }

        // interleaved, offset by one
        assert_eq!(tx.try_push(next_in), Ok(()));
        next_in += 1;
        for _ in 0..10_000 {
            assert_eq!(tx.try_push(next_in), Ok(()));
            next_in += 1;
            assert_eq!(rx.try_pop(), Some(next_out));
            next_out += 1;
        }
        assert_eq!(rx.ring().len(), 1);
    }

    #[test]
    fn test_drop_remaining() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, mut rx) = channel::<Counted, 8>();
        for _ in 0..5 {
            assert!(tx.try_push(Counted(Arc::clone(&drops))).is_ok());
        }
        drop(rx.try_pop());
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        drop(tx);
        assert!(rx.is_disconnected());
        drop(rx);
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_cross_thread_order() {
        const COUNT: u32 = 200_000;
        let (mut tx, mut rx) = channel::<u32, 64>();

        let producer = std::thread::spawn(move || {
            let mut waiter = WaitPolicy::Spin.waiter();
            for i in 0..COUNT {
                assert!(tx.push_wait(i, &mut waiter).is_ok());
                waiter.reset();
            }
        });

        let mut waiter = WaitPolicy::Yield.waiter();
        for i in 0..COUNT {
            assert_eq!(rx.pop_wait(&mut waiter), Some(i));
            waiter.reset();
        }
        producer.join().unwrap();
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_bounded_waiter_gives_up() {
        let (mut tx, mut rx) = channel::<u16, 2>();

        let mut waiter = WaitPolicy::Bounded { limit: 10 }.waiter();
        assert_eq!(rx.pop_wait(&mut waiter), None);
        assert_eq!(waiter.attempts(), 11);

        assert!(tx.try_push(1).is_ok());
        let mut waiter = WaitPolicy::Bounded { limit: 3 }.waiter();
        assert_eq!(tx.push_wait(2, &mut waiter), Err(2));
        assert_eq!(rx.try_pop(), Some(1));
    }

    #[test]
    fn test_wait_policy_parse() {
        assert_eq!("spin".parse(), Ok(WaitPolicy::Spin));
        assert_eq!("YIELD".parse(), Ok(WaitPolicy::Yield));
        assert_eq!("backoff".parse(), Ok(WaitPolicy::Backoff));
        assert_eq!("bounded:250".parse(), Ok(WaitPolicy::Bounded { limit: 250 }));
        assert!("bounded:".parse::<WaitPolicy>().is_err());
        assert!("sleep".parse::<WaitPolicy>().is_err());

        for policy in [WaitPolicy::Spin, WaitPolicy::Yield, WaitPolicy::Backoff, WaitPolicy::Bounded { limit: 7 }] {
            assert_eq!(policy.to_string().parse(), Ok(policy));
        }
    }

    proptest! {
        #[test]
        fn test_fifo_any_sequence(values in prop::collection::vec(any::<u16>(), 0..=31)) {
            let (mut tx, mut rx) = channel::<u16, 32>();
            for &v in &values {
                prop_assert_eq!(tx.try_push(v), Ok(()));
            }
            let popped: Vec<_> = std::iter::from_fn(|| rx.try_pop()).collect();
            prop_assert_eq!(popped, values);
        }

        #[test]
        fn test_interleaved_never_exceeds_capacity(ops in prop::collection::vec(any::<bool>(), 0..500)) {
            let (mut tx, mut rx) = channel::<u32, 8>();
            let mut model = std::collections::VecDeque::new();
            let mut next = 0u32;

            for push in ops {
                if push {
                    let result = tx.try_push(next);
                    if model.len() < 7 {
                        prop_assert_eq!(result, Ok(()));
                        model.push_back(next);
                    } else {
                        prop_assert_eq!(result, Err(next));
                    }
                    next += 1;
                } else {
                    prop_assert_eq!(rx.try_pop(), model.pop_front());
                }
                prop_assert_eq!(tx.ring().len(), model.len());
            }
        }
    }
}
