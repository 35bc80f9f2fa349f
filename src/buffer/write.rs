//! The set buffer: a bounded channel carrying write events to the
//! background processor.
//!
//! New and Update events use a nonblocking send; under heavy write
//! pressure the cache sheds load by dropping them.  Delete events use a
//! blocking send so a Set followed by a Delete of the same key reaches
//! the processor in order.  Sync events (the backbone of `wait`) also
//! block; they carry a one-shot completion signal the processor fires
//! when it reaches them.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Capacity of the set buffer.
pub(crate) const SET_BUFFER_SIZE: usize = 32 * 1024;

/// An operation deferred to the processor.
pub(crate) enum Event<V> {
    /// A key not currently in the store; runs the admission policy.
    New {
        key: u64,
        conflict: u64,
        value: Arc<V>,
        cost: i64,
        expires_at: Option<Instant>,
    },
    /// A key whose store entry was already replaced in place; the policy
    /// ledger still needs the new cost.  The value rides along only for
    /// lazy cost computation.
    Update {
        key: u64,
        value: Arc<V>,
        cost: i64,
    },
    /// Remove the key from the policy and (conflict-checked) the store.
    Delete { key: u64, conflict: u64 },
    /// Quiescence marker: the processor signals the sender once every
    /// event ahead of this one has been applied.
    Sync(Sender<()>),
}

/// Bounded MPSC set buffer.
///
/// Any number of producer threads push; the single processor drains.
pub(crate) struct WriteBuffer<V> {
    tx: Sender<Event<V>>,
    rx: Receiver<Event<V>>,
}

impl<V> WriteBuffer<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        WriteBuffer { tx, rx }
    }

    /// Nonblocking send.  Returns the event back when the buffer is full
    /// so the caller can decide what the drop means.
    #[inline]
    pub(crate) fn try_push(&self, event: Event<V>) -> Result<(), Event<V>> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(ev) | TrySendError::Disconnected(ev) => ev,
        })
    }

    /// Blocking send, bounded by the channel capacity.  Used for Delete
    /// (ordering) and Sync (quiescence) events.
    #[inline]
    pub(crate) fn push(&self, event: Event<V>) {
        // The receiver lives inside the cache for its whole lifetime, so
        // the channel cannot disconnect while a handle exists.
        let _ = self.tx.send(event);
    }

    /// The consuming end, cloned by the processor at spawn.
    pub(crate) fn receiver(&self) -> Receiver<Event<V>> {
        self.rx.clone()
    }

    /// Pops one pending event without blocking.  Used by `clear` to drain
    /// synchronously while the processor is stopped.
    pub(crate) fn try_pop(&self) -> Option<Event<V>> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_event(key: u64) -> Event<u64> {
        Event::Delete { key, conflict: 0 }
    }

    #[test]
    fn try_push_returns_event_when_full() {
        let buf: WriteBuffer<u64> = WriteBuffer::new(2);
        assert!(buf.try_push(delete_event(1)).is_ok());
        assert!(buf.try_push(delete_event(2)).is_ok());
        let Err(Event::Delete { key, .. }) = buf.try_push(delete_event(3)) else {
            panic!("full buffer must hand the event back");
        };
        assert_eq!(key, 3);
    }

    #[test]
    fn events_drain_in_order() {
        let buf: WriteBuffer<u64> = WriteBuffer::new(8);
        buf.push(delete_event(1));
        buf.push(delete_event(2));
        let keys: Vec<u64> = std::iter::from_fn(|| buf.try_pop())
            .map(|ev| match ev {
                Event::Delete { key, .. } => key,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn receiver_sees_pushed_events() {
        let buf: WriteBuffer<u64> = WriteBuffer::new(8);
        let rx = buf.receiver();
        buf.push(delete_event(9));
        match rx.recv().expect("event must arrive") {
            Event::Delete { key, .. } => assert_eq!(key, 9),
            _ => panic!("unexpected event variant"),
        }
    }
}
