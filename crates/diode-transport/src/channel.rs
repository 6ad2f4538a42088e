//! # Bounded SPSC Channel
//!
//! A fixed-capacity single-producer/single-consumer ring queue whose
//! slots are allocated once up front and reused for the lifetime of the
//! channel. The pipeline stages exchange ownership of slot contents
//! through `reserve`/`commit` on the producing side and `peek`/`ack` on
//! the consuming side, so bulk buffers are filled and drained in place
//! without copying.
//!
//! Capacity `N` is allocated as `N + 1` slots; one slot always stays
//! empty so that `full` and `empty` are distinguishable from the
//! indices alone. A side that finds the ring full (resp. empty) first
//! tests without the lock — safe because there is exactly one producer
//! and one consumer — then takes the mutex, re-tests and waits on the
//! matching condition variable.
//!
//! `poison` marks the channel closed and wakes both sides; every
//! subsequent operation fails with [`Closed`]. Clean shutdown does not
//! use poison: the producer pushes a terminal sentinel value (a "poison
//! pill") through the ring instead, so committed items are never lost.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// The channel was poisoned; no further transfers are possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    /// Next slot to be written. Only the producer advances it.
    wr: AtomicUsize,
    /// Next slot to be read. Only the consumer advances it.
    rd: AtomicUsize,
    poisoned: AtomicBool,
    lock: Mutex<()>,
    not_full: Condvar,
    not_empty: Condvar,
}

// The producer only touches the slot at `wr`, the consumer the slot at
// `rd`, and the ring discipline keeps those disjoint until the index
// stores publish them to the other side.
unsafe impl<T: Send> Sync for Shared<T> {}
unsafe impl<T: Send> Send for Shared<T> {}

impl<T> Shared<T> {
    fn next(&self, idx: usize) -> usize {
        (idx + 1) % self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.next(self.wr.load(Ordering::Relaxed)) == self.rd.load(Ordering::Acquire)
    }

    fn is_empty(&self) -> bool {
        self.wr.load(Ordering::Acquire) == self.rd.load(Ordering::Relaxed)
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

/// Create a channel of `capacity` slots, each initialised by `init`.
///
/// Use this when the slots hold bulk buffers that must be allocated
/// once (the ring actually holds `capacity + 1` slots, see module doc).
pub fn bounded_with<T>(capacity: usize, mut init: impl FnMut() -> T) -> (Producer<T>, Consumer<T>) {
    assert!(capacity >= 1, "channel capacity must be at least 1");
    let slots: Box<[UnsafeCell<T>]> = (0..capacity + 1).map(|_| UnsafeCell::new(init())).collect();
    let shared = Arc::new(Shared {
        slots,
        wr: AtomicUsize::new(0),
        rd: AtomicUsize::new(0),
        poisoned: AtomicBool::new(false),
        lock: Mutex::new(()),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

/// Create a channel with default-initialised slots.
pub fn bounded<T: Default>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    bounded_with(capacity, T::default)
}

/// A handle that can poison the channel from outside either endpoint.
pub struct PoisonHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PoisonHandle<T> {
    pub fn poison(&self) {
        self.shared.poison();
    }
}

// ─── Producer ────────────────────────────────────────────────────────────────

/// The writing end. There is exactly one per channel.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Borrow the next write slot, blocking while the channel is full.
    ///
    /// Repeated calls without an intervening [`commit`](Self::commit)
    /// return the same slot. Fails with [`Closed`] once poisoned.
    pub fn reserve(&mut self) -> Result<&mut T, Closed> {
        let s = &*self.shared;
        if s.is_poisoned() {
            return Err(Closed);
        }
        if s.is_full() {
            let mut guard = s.lock.lock().unwrap();
            while s.is_full() && !s.is_poisoned() {
                guard = s.not_full.wait(guard).unwrap();
            }
        }
        if s.is_poisoned() {
            return Err(Closed);
        }
        let idx = s.wr.load(Ordering::Relaxed);
        // Sole producer: this slot stays invisible to the consumer
        // until `commit` advances `wr`.
        Ok(unsafe { &mut *s.slots[idx].get() })
    }

    /// Publish the slot handed out by the preceding `reserve`.
    pub fn commit(&mut self) -> Result<(), Closed> {
        let s = &*self.shared;
        if s.is_poisoned() {
            return Err(Closed);
        }
        let idx = s.wr.load(Ordering::Relaxed);
        s.wr.store(s.next(idx), Ordering::Release);
        let _guard = s.lock.lock().unwrap();
        s.not_empty.notify_one();
        Ok(())
    }

    /// Copy-in convenience over `reserve` + `commit`.
    pub fn send(&mut self, value: T) -> Result<(), Closed> {
        *self.reserve()? = value;
        self.commit()
    }

    /// Poison the channel, waking both sides.
    pub fn poison(&self) {
        self.shared.poison();
    }

    pub fn poison_handle(&self) -> PoisonHandle<T> {
        PoisonHandle {
            shared: self.shared.clone(),
        }
    }
}

// ─── Consumer ────────────────────────────────────────────────────────────────

/// The reading end. There is exactly one per channel.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    /// Borrow the next read slot, blocking while the channel is empty.
    ///
    /// The slot stays owned by the channel until [`ack`](Self::ack)
    /// releases it. Fails with [`Closed`] once poisoned.
    pub fn peek(&mut self) -> Result<&mut T, Closed> {
        let s = &*self.shared;
        if s.is_poisoned() {
            return Err(Closed);
        }
        if s.is_empty() {
            let mut guard = s.lock.lock().unwrap();
            while s.is_empty() && !s.is_poisoned() {
                guard = s.not_empty.wait(guard).unwrap();
            }
        }
        if s.is_poisoned() {
            return Err(Closed);
        }
        let idx = s.rd.load(Ordering::Relaxed);
        // Sole consumer: the producer will not reuse this slot until
        // `ack` advances `rd`.
        Ok(unsafe { &mut *s.slots[idx].get() })
    }

    /// Release the slot handed out by the preceding `peek`.
    pub fn ack(&mut self) -> Result<(), Closed> {
        let s = &*self.shared;
        if s.is_poisoned() {
            return Err(Closed);
        }
        let idx = s.rd.load(Ordering::Relaxed);
        s.rd.store(s.next(idx), Ordering::Release);
        let _guard = s.lock.lock().unwrap();
        s.not_full.notify_one();
        Ok(())
    }

    /// Copy-out convenience over `peek` + `ack`. The slot is left with
    /// `T::default()` in place of the taken value.
    pub fn recv(&mut self) -> Result<T, Closed>
    where
        T: Default,
    {
        let value = std::mem::take(self.peek()?);
        self.ack()?;
        Ok(value)
    }

    /// Poison the channel, waking both sides.
    pub fn poison(&self) {
        self.shared.poison();
    }

    pub fn poison_handle(&self) -> PoisonHandle<T> {
        PoisonHandle {
            shared: self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    /// One producer counting up, one consumer asserting strict order.
    fn spsc_order_run(capacity: usize, total: u32) {
        let (mut tx, mut rx) = bounded::<u32>(capacity);
        thread::scope(|s| {
            s.spawn(move || {
                for i in 0..total {
                    tx.send(i).unwrap();
                }
            });
            for expected in 0..total {
                assert_eq!(rx.recv().unwrap(), expected);
            }
        });
    }

    #[test]
    fn spsc_order_small_elements() {
        for capacity in [2, 32, 1024] {
            spsc_order_run(capacity, 100_000);
        }
    }

    #[test]
    fn spsc_order_bulk_buffers() {
        // 1500-byte slots filled in place, counter in the first 4 bytes.
        let total = 20_000u32;
        for capacity in [2, 32, 1024] {
            let (mut tx, mut rx) = bounded_with(capacity, || vec![0u8; 1500]);
            thread::scope(|s| {
                s.spawn(move || {
                    for i in 0..total {
                        let slot = tx.reserve().unwrap();
                        slot[..4].copy_from_slice(&i.to_be_bytes());
                        tx.commit().unwrap();
                    }
                });
                for expected in 0..total {
                    let slot = rx.peek().unwrap();
                    assert_eq!(slot.len(), 1500);
                    let got = u32::from_be_bytes(slot[..4].try_into().unwrap());
                    assert_eq!(got, expected);
                    rx.ack().unwrap();
                }
            });
        }
    }

    #[test]
    fn repeated_reserve_returns_same_slot() {
        let (mut tx, mut rx) = bounded::<u32>(4);
        *tx.reserve().unwrap() = 7;
        // Not committed yet; the second reserve sees the same slot.
        assert_eq!(*tx.reserve().unwrap(), 7);
        *tx.reserve().unwrap() = 9;
        tx.commit().unwrap();
        assert_eq!(rx.recv().unwrap(), 9);
    }

    #[test]
    fn poison_wakes_blocked_consumer() {
        let (tx, mut rx) = bounded::<u32>(4);
        let handle = thread::spawn(move || rx.peek().map(|v| *v));
        thread::sleep(Duration::from_millis(50));
        tx.poison();
        assert_eq!(handle.join().unwrap(), Err(Closed));
    }

    #[test]
    fn poison_wakes_blocked_producer() {
        let (mut tx, rx) = bounded::<u32>(1);
        tx.send(0).unwrap();
        let handle = thread::spawn(move || tx.send(1));
        thread::sleep(Duration::from_millis(50));
        rx.poison();
        assert_eq!(handle.join().unwrap(), Err(Closed));
    }

    #[test]
    fn operations_after_poison_fail() {
        let (mut tx, mut rx) = bounded::<u32>(4);
        tx.send(1).unwrap();
        tx.poison();
        assert_eq!(tx.send(2), Err(Closed));
        // Poison is terminal even with items still committed.
        assert!(rx.recv().is_err());
        // Idempotent.
        rx.poison();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn pill_flows_through_option_channel() {
        let (mut tx, mut rx) = bounded::<Option<u32>>(4);
        tx.send(Some(1)).unwrap();
        tx.send(None).unwrap();
        assert_eq!(rx.recv().unwrap(), Some(1));
        assert_eq!(rx.recv().unwrap(), None);
    }

    #[test]
    fn poison_handle_closes_from_outside() {
        let (mut tx, rx) = bounded::<u32>(4);
        let handle = rx.poison_handle();
        drop(rx);
        handle.poison();
        assert_eq!(tx.send(1), Err(Closed));
    }
}
