//! Append-only step log with forward-only status transitions.

use tracing::{debug, warn};

use crate::core::types::{Step, StepId, StepKind, StepStatus, StepTransition};

/// Ordered log of every step the session has seen.
///
/// Batches are appended, never replaced. Ids are re-keyed on append so they
/// stay unique and increasing across batches from different sources.
#[derive(Debug, Clone)]
pub struct StepStore {
    steps: Vec<Step>,
    next_id: StepId,
}

impl Default for StepStore {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            next_id: 1,
        }
    }
}

impl StepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after `last_id` (used when resuming a saved project).
    ///
    /// `None` when `last_id` leaves no id to assign.
    pub fn resume_after(last_id: StepId) -> Option<Self> {
        Some(Self {
            steps: Vec::new(),
            next_id: last_id.checked_add(1)?,
        })
    }

    /// Append a parsed batch, assigning store ids in batch order.
    ///
    /// Every appended step starts `Pending` regardless of its incoming status.
    pub fn append(&mut self, batch: impl IntoIterator<Item = Step>) -> Vec<StepId> {
        let mut ids = Vec::new();
        for mut step in batch {
            step.id = self.next_id;
            step.status = StepStatus::Pending;
            step.reason = None;
            self.next_id += 1;
            ids.push(step.id);
            self.steps.push(step);
        }
        debug!(count = ids.len(), next_id = self.next_id, "appended step batch");
        ids
    }

    /// Append a single step built from its parts.
    pub fn push(&mut self, kind: StepKind, path: Option<&str>, payload: Option<&str>) -> StepId {
        let step = Step::new(0, kind, path, payload);
        self.append([step])[0]
    }

    /// Apply a batch of status changes together.
    ///
    /// Transitions that would move a step backwards (or out of a terminal
    /// state) are rejected. Returns the number of steps that changed.
    pub fn apply_transitions(&mut self, transitions: &[StepTransition]) -> usize {
        let mut changed = 0;
        for transition in transitions {
            let Some(step) = self.steps.iter_mut().find(|s| s.id == transition.id) else {
                warn!(id = transition.id, "transition for unknown step");
                continue;
            };
            if !step.status.can_transition_to(transition.status) {
                warn!(
                    id = step.id,
                    from = ?step.status,
                    to = ?transition.status,
                    "rejected backwards step transition"
                );
                continue;
            }
            step.status = transition.status;
            step.reason = if transition.status == StepStatus::Failed {
                transition.reason.clone()
            } else {
                None
            };
            changed += 1;
        }
        changed
    }

    /// Steps still waiting for reconciliation, in arrival order.
    pub fn pending(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Id of the most recently appended step.
    pub fn last_id(&self) -> Option<StepId> {
        self.steps.last().map(|s| s.id)
    }
}
