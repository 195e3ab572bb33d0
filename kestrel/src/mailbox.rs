//! # Lock-free Mailbox
//!
//! Fixed-capacity multi-producer, single-consumer ring of envelopes.
//!
//! ## Implementation Details
//! ### Slot protocol
//! Every slot cycles `EMPTY -> BUSY -> COMMITTED -> EMPTY`:
//! 1. A producer claims index `written + 1` by advancing `written` with a
//!    CAS, but only while fewer than `capacity` envelopes are unread. It then
//!    moves its slot `EMPTY -> BUSY`, stores the envelope and marks it
//!    `COMMITTED`.
//! 2. The consumer walks the range `[read + 1, written]`, moves each slot
//!    `COMMITTED -> BUSY`, takes the envelope and resets the slot to `EMPTY`.
//!    It stops at the first slot that is claimed but not yet committed and
//!    publishes the new `read` cursor once for the whole batch.
//!
//! The capacity check on claim means a producer never lands on a slot that
//! still holds unread data, so claiming and committing never wait on the
//! consumer.
//!
//! ### Backpressure
//! [`Mailbox::try_push`] fails with [`MailboxError::Full`] on a full ring.
//! [`Mailbox::push`] retries after a few cooperative yields and then parks
//! on a [`Notify`] the consumer signals whenever it frees slots. A producer
//! waiting for space therefore never holds its executor thread.
//!
//! ### Closing
//! Producers count themselves in flight between their closed check and
//! their commit. [`MailboxConsumer::close_and_drain`] waits for that count to
//! reach zero before the final drain, so every push that returned `Ok` is
//! either consumed or handed back.
//!
//! ### Parking
//! The consumer never takes a lock. When the ring is empty it yields a few
//! times and then parks on a [`Notify`] that every commit signals.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use kestrel_api::message::Envelope;
use tokio::sync::Notify;

use crate::error::MailboxError;

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const COMMITTED: u8 = 2;

/// Busy-spins before a blocked side starts yielding its thread.
const SPIN_LIMIT: u32 = 64;

/// Cooperative yields an idle consumer performs before parking.
const IDLE_YIELDS: u32 = 4;

/// Cooperative yields a producer performs on a full ring before parking.
const FULL_YIELDS: u32 = 4;

#[repr(align(64))]
struct CacheAligned<T>(T);

struct Slot {
    state: AtomicU8,
    item: UnsafeCell<Option<Envelope>>,
}

struct Ring {
    written: CacheAligned<AtomicUsize>,
    read: CacheAligned<AtomicUsize>,
    in_flight: AtomicUsize,
    parked: AtomicUsize,
    closed: AtomicBool,
    mask: usize,
    /// Signalled on commit and on close.
    data: Notify,
    /// Signalled when the consumer frees slots and on close.
    space: Notify,
    slots: Box<[Slot]>,
}

// SAFETY: a slot's item is only accessed by the side that moved the slot
// into BUSY, and each transition is a CAS, so no two threads ever touch the
// same UnsafeCell at once.
unsafe impl Sync for Ring {}

impl Ring {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.data.notify_one();
        self.space.notify_waiters();
    }
}

fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

/// Decrements a counter when dropped, so cancelled futures leave no trace.
struct Counted<'a>(&'a AtomicUsize);

impl<'a> Counted<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Counted<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Creates a mailbox with `capacity` slots.
///
/// # Panics
/// Panics if `capacity` is not a power of two. Engine configuration rounds
/// capacities before they reach this point.
pub fn channel(capacity: usize) -> (Mailbox, MailboxConsumer) {
    assert!(capacity.is_power_of_two(), "mailbox capacity must be a power of two");
    let slots = (0..capacity)
        .map(|_| Slot {
            state: AtomicU8::new(EMPTY),
            item: UnsafeCell::new(None),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let ring = Arc::new(Ring {
        written: CacheAligned(AtomicUsize::new(0)),
        read: CacheAligned(AtomicUsize::new(0)),
        in_flight: AtomicUsize::new(0),
        parked: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        mask: capacity - 1,
        data: Notify::new(),
        space: Notify::new(),
        slots,
    });

    (Mailbox { ring: ring.clone() }, MailboxConsumer { ring })
}

/// Producer side of a mailbox. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct Mailbox {
    ring: Arc<Ring>,
}

impl Mailbox {
    /// Enqueues an envelope without waiting.
    ///
    /// Fails with [`MailboxError::Full`] when every slot holds unread data
    /// and with [`MailboxError::Closed`] once the mailbox is closed. Both
    /// hand the envelope back.
    pub fn try_push(&self, envelope: Envelope) -> Result<(), MailboxError> {
        let ring = &*self.ring;
        let committed = {
            let _in_flight = Counted::enter(&ring.in_flight);
            self.claim_and_commit(envelope)
        };
        if committed.is_ok() {
            ring.data.notify_one();
        }
        committed
    }

    fn claim_and_commit(&self, envelope: Envelope) -> Result<(), MailboxError> {
        let ring = &*self.ring;
        if ring.closed.load(Ordering::SeqCst) {
            return Err(MailboxError::Closed(envelope));
        }

        let mut written = ring.written.0.load(Ordering::Acquire);
        loop {
            let read = ring.read.0.load(Ordering::SeqCst);
            // A stale `written` below `read` just fails the CAS and reloads.
            if written.saturating_sub(read) >= ring.capacity() {
                return Err(MailboxError::Full(envelope));
            }
            match ring.written.0.compare_exchange_weak(
                written,
                written + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => written = current,
            }
        }

        let slot = &ring.slots[(written + 1) & ring.mask];
        // The previous occupant of this slot is at or below `read`, so it is
        // already EMPTY; the loop only guards the protocol.
        let mut spins = 0;
        while slot
            .state
            .compare_exchange_weak(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff(&mut spins);
        }

        // SAFETY: EMPTY -> BUSY above grants this thread exclusive access.
        unsafe {
            *slot.item.get() = Some(envelope);
        }
        slot.state.store(COMMITTED, Ordering::Release);
        Ok(())
    }

    /// Enqueues an envelope, waiting for space while the ring is full.
    ///
    /// Waiting yields to the executor, so the consumer can run even when it
    /// shares this producer's thread. Fails only once the mailbox is closed.
    pub async fn push(&self, envelope: Envelope) -> Result<(), MailboxError> {
        let mut envelope = match self.try_push(envelope) {
            Err(MailboxError::Full(envelope)) => envelope,
            other => return other,
        };

        for _ in 0..FULL_YIELDS {
            tokio::task::yield_now().await;
            envelope = match self.try_push(envelope) {
                Err(MailboxError::Full(envelope)) => envelope,
                other => return other,
            };
        }

        let ring = &*self.ring;
        let _parked = Counted::enter(&ring.parked);
        loop {
            // Registered before the retry, so a slot freed in between still
            // wakes this producer.
            let space = ring.space.notified();
            envelope = match self.try_push(envelope) {
                Err(MailboxError::Full(envelope)) => envelope,
                other => return other,
            };
            space.await;
        }
    }

    /// Rejects further pushes and wakes both sides.
    pub fn close(&self) {
        self.ring.close();
    }

    pub fn is_closed(&self) -> bool {
        self.ring.closed.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Claimed but unconsumed envelopes (snapshot).
    pub fn len(&self) -> usize {
        let written = self.ring.written.0.load(Ordering::Acquire);
        let read = self.ring.read.0.load(Ordering::Acquire);
        written.saturating_sub(read)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer side of a mailbox. Exactly one exists per mailbox.
pub struct MailboxConsumer {
    ring: Arc<Ring>,
}

impl MailboxConsumer {
    /// Moves the committed prefix of `[read + 1, written]` into `batch`.
    ///
    /// Returns the number of envelopes appended. A slot that was claimed but
    /// not yet committed ends the batch; it is picked up by a later call,
    /// never skipped.
    pub fn try_recv_batch(&mut self, batch: &mut Vec<Envelope>) -> usize {
        let ring = &*self.ring;
        let read = ring.read.0.load(Ordering::Relaxed);
        let upper = ring.written.0.load(Ordering::Acquire);
        if upper <= read {
            return 0;
        }

        batch.reserve(upper - read);
        let mut taken = read;
        for index in read + 1..=upper {
            let slot = &ring.slots[index & ring.mask];
            if slot
                .state
                .compare_exchange(COMMITTED, BUSY, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                break;
            }

            // SAFETY: COMMITTED -> BUSY above grants this thread exclusive access.
            let item = unsafe { (*slot.item.get()).take() };
            slot.state.store(EMPTY, Ordering::Release);
            batch.extend(item);
            taken = index;
        }
        if taken == read {
            return 0;
        }

        ring.read.0.store(taken, Ordering::SeqCst);
        if ring.parked.load(Ordering::SeqCst) > 0 {
            ring.space.notify_waiters();
        }
        taken - read
    }

    /// Waits for the next committed range and appends it to `batch`.
    ///
    /// Returns `false` once the mailbox is closed, no producer is still
    /// committing, and the ring is drained.
    pub async fn recv_batch(&mut self, batch: &mut Vec<Envelope>) -> bool {
        let mut idle = 0;
        loop {
            if self.try_recv_batch(batch) > 0 {
                return true;
            }
            if self.ring.closed.load(Ordering::SeqCst) {
                if self.ring.in_flight.load(Ordering::SeqCst) == 0 {
                    return self.try_recv_batch(batch) > 0;
                }
                // A producer is between its closed check and its commit.
                tokio::task::yield_now().await;
                continue;
            }
            if idle < IDLE_YIELDS {
                idle += 1;
                tokio::task::yield_now().await;
            } else {
                self.ring.data.notified().await;
            }
        }
    }

    /// Closes the mailbox and moves everything left in it into `batch`.
    ///
    /// Returns only after every producer that got past the closed check has
    /// committed, so no accepted envelope stays behind in the ring.
    pub async fn close_and_drain(&mut self, batch: &mut Vec<Envelope>) {
        self.ring.close();
        while self.recv_batch(batch).await {}
    }

    pub fn close(&self) {
        self.ring.close();
    }
}

impl fmt::Debug for MailboxConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxConsumer")
            .field("capacity", &self.ring.capacity())
            .finish()
    }
}
