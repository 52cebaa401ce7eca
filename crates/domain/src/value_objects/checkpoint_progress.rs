//! Checkpoint state machine
//!
//! ```text
//! LOCKED ──► AVAILABLE ──► IN_PROGRESS ──► COMPLETED
//!               │               │      ├──► SKIPPED
//!               └───────────────┴──────┴──► FAILED
//! ```
//!
//! Every transition moves forward. The only way back is `reset`, which
//! restores the initial state computed from the prerequisite list.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointState {
    /// Prerequisites not yet met
    Locked,
    /// Can be completed
    Available,
    /// A composite trigger has recorded partial progress
    InProgress,
    /// Successfully finished
    Completed,
    /// Manually skipped
    Skipped,
    /// Failed (timed out or forced)
    Failed,
}

impl CheckpointState {
    /// Initial state for a checkpoint with or without prerequisites.
    pub fn initial(has_prerequisites: bool) -> Self {
        if has_prerequisites {
            Self::Locked
        } else {
            Self::Available
        }
    }

    /// AVAILABLE or IN_PROGRESS: the checkpoint is still listening for triggers.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Available | Self::InProgress)
    }

    /// COMPLETED, SKIPPED, or FAILED.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    pub fn can_transition_to(self, next: CheckpointState) -> bool {
        use CheckpointState::*;
        matches!(
            (self, next),
            (Locked, Available)
                | (Available, InProgress)
                | (Available, Completed)
                | (Available, Skipped)
                | (Available, Failed)
                | (InProgress, Completed)
                | (InProgress, Skipped)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Locked => "LOCKED",
            Self::Available => "AVAILABLE",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Runtime state of one checkpoint inside one adventure instance.
///
/// # Invariants
///
/// - `satisfied` only holds indices below the composite child count
/// - `satisfied` is empty whenever the checkpoint is resolved
/// - `completed_at` is set iff the state is COMPLETED
/// - `available_at` is set once the checkpoint has left LOCKED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProgress {
    state: CheckpointState,
    initial: CheckpointState,
    available_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    satisfied: BTreeSet<usize>,
}

impl CheckpointProgress {
    pub fn new(has_prerequisites: bool, now: DateTime<Utc>) -> Self {
        let initial = CheckpointState::initial(has_prerequisites);
        Self {
            state: initial,
            initial,
            available_at: (initial == CheckpointState::Available).then_some(now),
            completed_at: None,
            satisfied: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> CheckpointState {
        self.state
    }

    /// When the checkpoint became available; starts its own time limit.
    pub fn available_at(&self) -> Option<DateTime<Utc>> {
        self.available_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Composite child indices satisfied so far.
    pub fn satisfied(&self) -> &BTreeSet<usize> {
        &self.satisfied
    }

    /// Mutable access for the matcher. Only meaningful while the checkpoint is open.
    pub(crate) fn satisfied_mut(&mut self) -> &mut BTreeSet<usize> {
        &mut self.satisfied
    }

    fn transition(&mut self, next: CheckpointState) -> Result<CheckpointState, DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::invalid_state_transition(format!(
                "{} -> {}",
                self.state, next
            )));
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// LOCKED -> AVAILABLE.
    pub fn unlock(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(CheckpointState::Available)?;
        self.available_at = Some(now);
        Ok(())
    }

    /// AVAILABLE -> IN_PROGRESS; a no-op when already in progress.
    pub fn mark_in_progress(&mut self) -> Result<(), DomainError> {
        if self.state == CheckpointState::InProgress {
            return Ok(());
        }
        self.transition(CheckpointState::InProgress).map(|_| ())
    }

    /// Check-and-set to COMPLETED.
    ///
    /// Returns `Ok(false)` without touching anything when the checkpoint is
    /// already completed, so callers can run side effects exactly once.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<bool, DomainError> {
        if self.state == CheckpointState::Completed {
            return Ok(false);
        }
        self.transition(CheckpointState::Completed)?;
        self.completed_at = Some(now);
        self.satisfied.clear();
        Ok(true)
    }

    pub fn skip(&mut self) -> Result<(), DomainError> {
        self.transition(CheckpointState::Skipped)?;
        self.satisfied.clear();
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), DomainError> {
        self.transition(CheckpointState::Failed)?;
        self.satisfied.clear();
        Ok(())
    }

    /// Back to the initial state with no partial progress.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.state = self.initial;
        self.available_at = (self.initial == CheckpointState::Available).then_some(now);
        self.completed_at = None;
        self.satisfied.clear();
    }
}
