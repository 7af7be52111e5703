//! Captured deltas and the buffering/direct switch.
//!
//! `DeltaBuffer` is the update-capture sink for one index. Producers are the
//! store's writer threads, dispatching change events synchronously at commit;
//! the single consumer is the population job. One mutex guards the mode, the
//! deque, and the sequence counter, which is what makes the flip a single
//! linearization point: a producer either admits its delta before the seal
//! (and the seal drains it) or after (and applies it directly). Nothing is
//! lost, nothing applies twice.
//!
//! The buffer is bounded. Overflow poisons it and fails the population on
//! the spot; deltas are never silently dropped while the buffer is live.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use harrier_common::error::IndexError;
use harrier_common::types::{DeltaSeq, EntityId};
use harrier_common::value::ValueTuple;
use harrier_store::events::{ChangeObserver, PropertyChange};

use crate::accessor::IndexAccessor;
use crate::state::{PopulationMetrics, StateCell};

/// What a captured mutation did to the entity's indexed value.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaKind {
    Add { value: ValueTuple },
    Update { old: ValueTuple, new: ValueTuple },
    Remove,
}

/// One captured mutation, stamped with its admission sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub seq: DeltaSeq,
    pub entity: EntityId,
    pub kind: DeltaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Capture window open: admit and queue.
    Buffering,
    /// Flipped: apply mutations straight to the accessor.
    Direct,
    /// Overflowed: population is failed, events are discarded.
    Poisoned,
    /// Dropped or abandoned: events are discarded.
    Detached,
}

struct BufferInner {
    phase: Phase,
    deque: VecDeque<Delta>,
    next_seq: DeltaSeq,
}

/// Bounded MPSC capture buffer with an atomic buffering-to-direct switch.
pub struct DeltaBuffer {
    capacity: usize,
    accessor: Arc<IndexAccessor>,
    cell: Arc<StateCell>,
    metrics: Arc<PopulationMetrics>,
    inner: Mutex<BufferInner>,
}

impl DeltaBuffer {
    pub(crate) fn new(
        capacity: usize,
        accessor: Arc<IndexAccessor>,
        cell: Arc<StateCell>,
        metrics: Arc<PopulationMetrics>,
    ) -> Self {
        DeltaBuffer {
            capacity: capacity.max(1),
            accessor,
            cell,
            metrics,
            inner: Mutex::new(BufferInner {
                phase: Phase::Buffering,
                deque: VecDeque::new(),
                next_seq: DeltaSeq::ZERO,
            }),
        }
    }

    fn offer(&self, entity: EntityId, kind: DeltaKind) {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Buffering => {
                if inner.deque.len() >= self.capacity {
                    inner.phase = Phase::Poisoned;
                    inner.deque.clear();
                    drop(inner);
                    tracing::warn!(
                        capacity = self.capacity,
                        "capture buffer overflow, failing population"
                    );
                    self.cell
                        .fail(&format!("capture buffer overflow (capacity {})", self.capacity));
                    return;
                }
                let seq = inner.next_seq;
                inner.next_seq = seq.next();
                inner.deque.push_back(Delta { seq, entity, kind });
                self.metrics
                    .deltas_buffered
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Phase::Direct => {
                // Applied under the buffer lock so it cannot interleave with
                // a concurrent seal's residue drain.
                apply_kind(&self.accessor, entity, &kind);
                self.metrics
                    .deltas_applied_direct
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Phase::Poisoned | Phase::Detached => {}
        }
    }

    /// Pop up to `max` deltas in admission order. The single consumer
    /// applies them outside the lock; FIFO hand-off keeps per-entity order.
    pub(crate) fn drain_batch(&self, max: usize, out: &mut Vec<Delta>) -> usize {
        let mut inner = self.inner.lock();
        let mut n = 0;
        while n < max {
            match inner.deque.pop_front() {
                Some(delta) => {
                    out.push(delta);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// The flip primitive: apply every remaining buffered delta to the
    /// accessor and switch to direct mode, atomically with respect to
    /// producers. Returns the residue size.
    ///
    /// The critical section is bounded by the residue, so the caller drains
    /// to quiescence first.
    pub(crate) fn seal(&self) -> Result<usize, IndexError> {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Buffering => {
                let mut applied = 0usize;
                while let Some(delta) = inner.deque.pop_front() {
                    apply_kind(&self.accessor, delta.entity, &delta.kind);
                    applied += 1;
                }
                inner.phase = Phase::Direct;
                Ok(applied)
            }
            Phase::Poisoned => Err(IndexError::CaptureOverflow {
                capacity: self.capacity,
            }),
            Phase::Detached => Err(IndexError::Cancelled),
            Phase::Direct => Ok(0),
        }
    }

    /// Stop capturing and discard anything queued. Terminal.
    pub(crate) fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.phase = Phase::Detached;
        inner.deque.clear();
    }

    /// Queued delta count.
    pub(crate) fn depth(&self) -> usize {
        self.inner.lock().deque.len()
    }

    #[cfg(test)]
    fn is_direct(&self) -> bool {
        self.inner.lock().phase == Phase::Direct
    }
}

impl ChangeObserver for DeltaBuffer {
    fn on_change(&self, change: PropertyChange) {
        let kind = match (change.before, change.after) {
            (None, Some(value)) => DeltaKind::Add { value },
            (Some(old), Some(new)) => DeltaKind::Update { old, new },
            (Some(_), None) => DeltaKind::Remove,
            (None, None) => return,
        };
        self.offer(change.entity, kind);
    }
}

/// Apply one captured mutation to the accessor. Add and Update both resolve
/// to replace-on-add; the accessor's reverse binding locates the old entry,
/// so the old value is carried for observability, not lookup.
pub(crate) fn apply_kind(accessor: &IndexAccessor, entity: EntityId, kind: &DeltaKind) {
    match kind {
        DeltaKind::Add { value } | DeltaKind::Update { new: value, .. } => {
            accessor.add(entity, value);
        }
        DeltaKind::Remove => {
            accessor.remove(entity);
        }
    }
}
