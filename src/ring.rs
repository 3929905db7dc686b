//! Ring transport: a single-producer/single-consumer circular buffer of
//! fixed-size packet slots, one direction for requests and one for
//! responses.
//!
//! Indices are free-running u32 counters compared with wrapping arithmetic;
//! only slot addressing is masked. Full and empty are distinguished by the
//! index difference, never by pointer equality, and an index pair outside
//! `cons <= prod <= cons + capacity` is an overrun that fails the
//! connection.
//!
//! Notification hold-off is layered on top as a pure optimization: the
//! consumer publishes the next index it wants to be signaled at, and the
//! producer skips the signal while the threshold has not been crossed. The
//! protocol stays correct if every enqueue signals and if none do, as long
//! as the peer eventually polls.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::constants::{DEFAULT_RING_CAPACITY, PACKET_SIZE};
use crate::error::{Result, SndError};
use crate::packet::Slot;

/// One half of the out-of-band notification pair: `signal` pokes the peer,
/// `wait` is poked by the peer. Stands in for the platform's event channel.
#[derive(Debug, Clone)]
pub struct EventChannel {
    pub signal: Arc<Notify>,
    pub wait: Arc<Notify>,
}

/// Creates a connected pair of event channel halves.
pub fn event_channel_pair() -> (EventChannel, EventChannel) {
    let a = Arc::new(Notify::new());
    let b = Arc::new(Notify::new());
    (
        EventChannel {
            signal: a.clone(),
            wait: b.clone(),
        },
        EventChannel { signal: b, wait: a },
    )
}

/// One ring direction: a slot array plus its producer/consumer index pair
/// and hold-off bookkeeping.
#[derive(Debug, Clone)]
pub struct Direction {
    slots: Vec<Slot>,
    capacity: u32,
    mask: u32,
    prod: u32,
    cons: u32,
    /// Index the consumer wants the next notification at.
    event: u32,
    /// Producer index at the last notification decision.
    published: u32,
}

impl Direction {
    /// The capacity is rounded up to the next power of two so index masking
    /// stays valid for any requested size.
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            slots: vec![[0; PACKET_SIZE]; capacity as usize],
            capacity,
            mask: capacity - 1,
            prod: 0,
            cons: 0,
            event: 1,
            published: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn prod(&self) -> u32 {
        self.prod
    }

    pub fn cons(&self) -> u32 {
        self.cons
    }

    /// Entries produced but not yet consumed.
    pub fn unconsumed(&self) -> u32 {
        self.prod.wrapping_sub(self.cons)
    }

    pub fn is_full(&self) -> bool {
        self.unconsumed() == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.unconsumed() == 0
    }

    fn check_indices(&self) -> Result<()> {
        if self.unconsumed() > self.capacity {
            return Err(SndError::RingOverrun {
                prod: self.prod,
                cons: self.cons,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Writes a slot and advances the producer index. Returns `false`,
    /// without writing, when the ring is full.
    pub fn try_enqueue(&mut self, slot: &Slot) -> Result<bool> {
        self.check_indices()?;
        if self.is_full() {
            return Ok(false);
        }
        self.slots[(self.prod & self.mask) as usize] = *slot;
        self.prod = self.prod.wrapping_add(1);
        Ok(true)
    }

    /// Takes the next unconsumed slot, if any.
    pub fn dequeue(&mut self) -> Result<Option<Slot>> {
        self.check_indices()?;
        if self.is_empty() {
            return Ok(None);
        }
        let slot = self.slots[(self.cons & self.mask) as usize];
        self.cons = self.cons.wrapping_add(1);
        Ok(Some(slot))
    }

    /// Drains every currently available slot. Restartable: a later poll
    /// picks up whatever was produced in between.
    pub fn dequeue_available(&mut self) -> Result<Vec<Slot>> {
        let mut out = Vec::new();
        while let Some(slot) = self.dequeue()? {
            out.push(slot);
        }
        Ok(out)
    }

    /// Producer side: whether the peer's published hold-off threshold was
    /// crossed since the last notification decision. Call once per push
    /// batch; the decision consumes the batch.
    pub fn should_notify_peer(&mut self) -> bool {
        let new = self.prod;
        let old = self.published;
        self.published = new;
        // Crossed if the threshold lies in (old, new].
        new.wrapping_sub(self.event) < new.wrapping_sub(old)
    }

    /// Consumer side: publish the index at which the next notification is
    /// wanted. Typically `cons + 1`: "signal me on the next entry".
    pub fn publish_hold_off(&mut self, index: u32) {
        self.event = index;
    }

    /// Consumer side: re-arm the hold-off at the next entry and report
    /// whether work raced in while it was being re-armed.
    pub fn final_check(&mut self) -> bool {
        self.publish_hold_off(self.cons.wrapping_add(1));
        !self.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn force_indices(&mut self, prod: u32, cons: u32) {
        self.prod = prod;
        self.cons = cons;
    }
}

/// The shared ring: requests flow frontend -> backend, responses flow back.
#[derive(Debug, Clone)]
pub struct Ring {
    pub req: Direction,
    pub rsp: Direction,
}

impl Ring {
    pub fn new(capacity: u32) -> Self {
        Self {
            req: Direction::new(capacity),
            rsp: Direction::new(capacity),
        }
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}
