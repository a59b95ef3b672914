use std::collections::BTreeMap;

use tokio::task::JoinHandle;
use tracing::warn;

use super::Completed;
use crate::error::EngineError;

/// Occupancy of one request slot, as seen from outside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Ready to take a submission.
    Free,
    /// Serving the frame submitted under `correlation_id`.
    Busy { correlation_id: u64 },
}

struct Slot {
    state: SlotState,
    /// The task serving the slot while busy
    task: Option<JoinHandle<()>>,
}

pub(crate) type Outcome<O, M> = Result<Completed<O, M>, EngineError>;

/// The slot records and the pending-result buffer. Both live behind a single
/// lock so that freeing a slot and buffering its result is one step.
pub(crate) struct SlotTable<O, M> {
    slots: Vec<Slot>,
    pending: BTreeMap<u64, Outcome<O, M>>,
    last_submitted: Option<u64>,
}

impl<O, M> SlotTable<O, M> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| Slot { state: SlotState::Free, task: None })
                .collect(),
            pending: BTreeMap::new(),
            last_submitted: None,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest-index free slot
    pub(crate) fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == SlotState::Free)
    }

    pub(crate) fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state != SlotState::Free).count()
    }

    pub(crate) fn states(&self) -> Vec<SlotState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ids must arrive strictly increasing; anything else is a caller bug.
    pub(crate) fn admit(&mut self, correlation_id: u64) {
        if let Some(last) = self.last_submitted {
            assert!(
                correlation_id > last,
                "correlation id {correlation_id} submitted after {last}; ids must strictly increase"
            );
        }
        self.last_submitted = Some(correlation_id);
    }

    pub(crate) fn occupy(&mut self, index: usize, correlation_id: u64, task: JoinHandle<()>) {
        let slot = &mut self.slots[index];
        debug_assert_eq!(slot.state, SlotState::Free);
        slot.state = SlotState::Busy { correlation_id };
        slot.task = Some(task);
    }

    /// Frees `index` if it is still serving `correlation_id`.
    pub(crate) fn release(&mut self, index: usize, correlation_id: u64) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.state == (SlotState::Busy { correlation_id }) => {
                slot.state = SlotState::Free;
                slot.task = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn store(&mut self, correlation_id: u64, outcome: Outcome<O, M>) {
        self.pending.insert(correlation_id, outcome);
    }

    pub(crate) fn take(&mut self, correlation_id: u64) -> Option<Outcome<O, M>> {
        self.pending.remove(&correlation_id)
    }

    /// Drops every buffered result, returning how many there were.
    pub(crate) fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    /// Frees slots whose task ended without reporting back.
    ///
    /// A task releases its slot before it finishes, so a busy slot with a
    /// finished task means the engine or the post-processing panicked. The
    /// correlation id is failed so the consumer does not wait on it forever.
    pub(crate) fn reap_terminated(&mut self) -> usize {
        let mut reaped = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let SlotState::Busy { correlation_id } = slot.state else {
                continue;
            };
            if !slot.task.as_ref().is_some_and(JoinHandle::is_finished) {
                continue;
            }
            warn!(slot = index, correlation_id, "inference task terminated without a result");
            slot.state = SlotState::Free;
            slot.task = None;
            self.pending
                .insert(correlation_id, Err(EngineError::TaskTerminated { slot: index }));
            reaped += 1;
        }
        reaped
    }
}
