//! AdventureInstance aggregate - one team's run through an adventure
//!
//! The instance owns the runtime state of every checkpoint and the
//! instance-level clock. All checkpoint transitions go through here, so the
//! prerequisite rule and the completion rule are enforced in one place:
//!
//! - a checkpoint opens only when every prerequisite is COMPLETED
//! - the instance completes when every non-optional checkpoint is COMPLETED,
//!   decided in the same call that completes the last one
//!
//! # Rustic DDD Design
//!
//! - **Private fields**: runtime state is only reachable through methods
//! - **Shared definition**: the adventure is an `Arc`, never mutated
//! - **Outcome types**: mutations return what changed
//!   ([`AppliedEvent`], [`CheckpointCompletion`], [`InstanceStateChange`],
//!   [`InstanceTick`])

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Adventure, Checkpoint};
use crate::error::DomainError;
use crate::events::{fields, Event, EventKind};
use crate::ids::{CheckpointId, InstanceId, TeamId};
use crate::matcher::{self, CheckpointMatch, MatchOutcome};
use crate::value_objects::{CheckpointProgress, CheckpointState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdventureState {
    NotStarted,
    Running,
    Paused,
    Completed,
    Failed,
    Abandoned,
}

impl AdventureState {
    /// Running or paused.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Abandoned)
    }
}

impl fmt::Display for AdventureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
        };
        write!(f, "{}", s)
    }
}

/// Instance-level state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStateChange {
    pub from: AdventureState,
    pub to: AdventureState,
}

/// What completing one checkpoint changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointCompletion {
    pub checkpoint_id: CheckpointId,
    pub completed_at: DateTime<Utc>,
    /// Checkpoints that moved LOCKED -> AVAILABLE, in definition order
    pub unlocked: Vec<CheckpointId>,
    /// The instance moved to COMPLETED in this call
    pub adventure_completed: bool,
}

/// What applying one event changed.
#[derive(Debug, Default)]
pub struct AppliedEvent {
    /// In definition order; only the last can carry `adventure_completed`
    pub completions: Vec<CheckpointCompletion>,
    /// Matched checkpoints that could not be completed
    pub errors: Vec<(CheckpointId, DomainError)>,
}

/// What a clock tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceTick {
    /// Open checkpoints whose own time limit ran out
    pub expired_checkpoints: Vec<CheckpointId>,
    /// Set when the instance failed on this tick
    pub failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdventureInstance {
    id: InstanceId,
    adventure: Arc<Adventure>,
    team: TeamId,
    progress: BTreeMap<CheckpointId, CheckpointProgress>,
    state: AdventureState,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    paused_total: Duration,
    bonus_time: Duration,
    ended_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

impl AdventureInstance {
    pub fn new(id: InstanceId, adventure: Arc<Adventure>, team: TeamId, now: DateTime<Utc>) -> Self {
        let progress = adventure
            .checkpoints
            .iter()
            .map(|c| (c.id.clone(), CheckpointProgress::new(c.has_prerequisites(), now)))
            .collect();
        Self {
            id,
            adventure,
            team,
            progress,
            state: AdventureState::NotStarted,
            started_at: None,
            paused_at: None,
            paused_total: Duration::zero(),
            bonus_time: Duration::zero(),
            ended_at: None,
            failure_reason: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn adventure(&self) -> &Arc<Adventure> {
        &self.adventure
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn state(&self) -> AdventureState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn bonus_time(&self) -> Duration {
        self.bonus_time
    }

    pub fn checkpoint_state(&self, id: &CheckpointId) -> Option<CheckpointState> {
        self.progress.get(id).map(CheckpointProgress::state)
    }

    pub fn checkpoint_progress(&self, id: &CheckpointId) -> Option<&CheckpointProgress> {
        self.progress.get(id)
    }

    /// Checkpoints currently listening for triggers (AVAILABLE or IN_PROGRESS).
    pub fn available_checkpoints(&self) -> Vec<&Checkpoint> {
        self.checkpoints_where(|state| state.is_open())
    }

    /// Objective list shown to players: everything except hidden checkpoints
    /// that are still LOCKED.
    pub fn visible_checkpoints(&self) -> Vec<&Checkpoint> {
        self.adventure
            .checkpoints
            .iter()
            .filter(|c| !(c.hidden && self.checkpoint_state(&c.id) == Some(CheckpointState::Locked)))
            .collect()
    }

    fn checkpoints_where(&self, predicate: impl Fn(CheckpointState) -> bool) -> Vec<&Checkpoint> {
        self.adventure
            .checkpoints
            .iter()
            .filter(|c| self.checkpoint_state(&c.id).is_some_and(&predicate))
            .collect()
    }

    /// Completed checkpoints over all checkpoints.
    pub fn progress(&self) -> f32 {
        let total = self.progress.len();
        if total == 0 {
            return 1.0;
        }
        let completed = self
            .progress
            .values()
            .filter(|p| p.state() == CheckpointState::Completed)
            .count();
        completed as f32 / total as f32
    }

    /// Sum of points over completed checkpoints.
    pub fn score(&self) -> u32 {
        self.adventure
            .checkpoints
            .iter()
            .filter(|c| self.checkpoint_state(&c.id) == Some(CheckpointState::Completed))
            .map(|c| c.points)
            .sum()
    }

    /// Running time, excluding pauses.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::zero();
        };
        let end = self.ended_at.or(self.paused_at).unwrap_or(now);
        (end - started_at - self.paused_total).max(Duration::zero())
    }

    /// Time limit plus bonus minus elapsed, floored at zero. `None` when the
    /// adventure is untimed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let limit = self.adventure.time_limit()?;
        Some((limit + self.bonus_time - self.elapsed(now)).max(Duration::zero()))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_some_and(|r| r <= Duration::zero())
    }

    fn all_required_completed(&self) -> bool {
        self.adventure
            .checkpoints
            .iter()
            .filter(|c| !c.optional)
            .all(|c| self.checkpoint_state(&c.id) == Some(CheckpointState::Completed))
    }

    fn progress_mut(&mut self, id: &CheckpointId) -> Result<&mut CheckpointProgress, DomainError> {
        self.progress
            .get_mut(id)
            .ok_or_else(|| DomainError::not_found("Checkpoint", id.as_str()))
    }

    fn require_state(&self, allowed: impl Fn(AdventureState) -> bool, action: &str) -> Result<(), DomainError> {
        if allowed(self.state) {
            Ok(())
        } else {
            Err(DomainError::invalid_state_transition(format!(
                "cannot {} an instance that is {}",
                action, self.state
            )))
        }
    }

    // =========================================================================
    // Trigger handling
    // =========================================================================

    /// Evaluate `event` against every open checkpoint.
    ///
    /// Records composite progress and moves checkpoints with new partial
    /// progress to IN_PROGRESS. Returns one entry per checkpoint that matched
    /// or advanced; nothing is completed here. A manual event naming a
    /// checkpoint only reaches that checkpoint.
    pub fn match_event(&mut self, event: &Event) -> Vec<CheckpointMatch> {
        if self.state != AdventureState::Running {
            return Vec::new();
        }

        let target = (event.kind() == EventKind::Manual)
            .then(|| event.text(fields::CHECKPOINT_ID))
            .flatten();

        let mut results = Vec::new();
        for checkpoint in &self.adventure.checkpoints {
            if target.is_some_and(|t| checkpoint.id != t) {
                continue;
            }
            let Some(progress) = self.progress.get_mut(&checkpoint.id) else {
                continue;
            };
            if !progress.state().is_open() {
                continue;
            }

            let outcome = matcher::evaluate(&checkpoint.trigger, event, progress.satisfied_mut());
            match outcome {
                MatchOutcome::NoMatch => continue,
                MatchOutcome::Advanced { .. } => {
                    // open checkpoints can always move to IN_PROGRESS
                    let _ = progress.mark_in_progress();
                }
                MatchOutcome::Matched => {}
            }
            results.push(CheckpointMatch {
                checkpoint_id: checkpoint.id.clone(),
                outcome,
            });
        }
        results
    }

    /// Match `event` and complete every checkpoint it satisfied.
    ///
    /// All matched checkpoints complete before instance completion is
    /// decided, so definition order does not matter. Checkpoints unlocked by
    /// one of these completions are not evaluated against the same event.
    pub fn apply_event(&mut self, event: &Event, now: DateTime<Utc>) -> AppliedEvent {
        let matched: Vec<CheckpointId> = self
            .match_event(event)
            .into_iter()
            .filter(|m| m.outcome.is_match())
            .map(|m| m.checkpoint_id)
            .collect();

        let mut applied = AppliedEvent::default();
        for id in matched {
            match self.complete_progress(&id, now) {
                Ok(Some(completion)) => applied.completions.push(completion),
                Ok(None) => {}
                Err(e) => applied.errors.push((id, e)),
            }
        }

        if !applied.completions.is_empty() && self.finish_if_done(now) {
            if let Some(last) = applied.completions.last_mut() {
                last.adventure_completed = true;
            }
        }
        applied
    }

    // =========================================================================
    // Checkpoint transitions
    // =========================================================================

    /// Complete a checkpoint, unlock its dependents, and derive instance
    /// completion.
    ///
    /// Returns `Ok(None)` when the checkpoint was already COMPLETED; callers
    /// run completion side effects only for `Some`.
    pub fn complete_checkpoint(
        &mut self,
        id: &CheckpointId,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckpointCompletion>, DomainError> {
        self.require_state(|s| s == AdventureState::Running, "complete a checkpoint of")?;
        let Some(mut completion) = self.complete_progress(id, now)? else {
            return Ok(None);
        };
        completion.adventure_completed = self.finish_if_done(now);
        Ok(Some(completion))
    }

    /// Complete one checkpoint and unlock its dependents. Instance completion
    /// is left to the caller.
    fn complete_progress(
        &mut self,
        id: &CheckpointId,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckpointCompletion>, DomainError> {
        if !self.progress_mut(id)?.complete(now)? {
            return Ok(None);
        }

        let adventure = Arc::clone(&self.adventure);
        let mut unlocked = Vec::new();
        for dependent in adventure.dependents_of(id) {
            let ready = dependent
                .prerequisites
                .iter()
                .all(|p| self.checkpoint_state(p) == Some(CheckpointState::Completed));
            let Some(progress) = self.progress.get_mut(&dependent.id) else {
                continue;
            };
            if ready && progress.state() == CheckpointState::Locked {
                progress.unlock(now)?;
                unlocked.push(dependent.id.clone());
            }
        }

        Ok(Some(CheckpointCompletion {
            checkpoint_id: id.clone(),
            completed_at: now,
            unlocked,
            adventure_completed: false,
        }))
    }

    /// Move a running instance to COMPLETED once every required checkpoint is.
    fn finish_if_done(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != AdventureState::Running || !self.all_required_completed() {
            return false;
        }
        self.state = AdventureState::Completed;
        self.finish(now);
        true
    }

    /// Forced completion; only from AVAILABLE or IN_PROGRESS.
    pub fn manual_complete(
        &mut self,
        id: &CheckpointId,
        now: DateTime<Utc>,
    ) -> Result<CheckpointCompletion, DomainError> {
        let state = self.progress_mut(id)?.state();
        if !state.is_open() {
            return Err(DomainError::invalid_state_transition(format!(
                "checkpoint '{}' is {} and cannot be completed manually",
                id, state
            )));
        }
        self.complete_checkpoint(id, now)?.ok_or_else(|| {
            DomainError::invalid_state_transition(format!("checkpoint '{}' is already completed", id))
        })
    }

    /// Skip an open checkpoint. Dependents stay locked.
    pub fn skip_checkpoint(&mut self, id: &CheckpointId) -> Result<(), DomainError> {
        self.require_state(AdventureState::is_active, "skip a checkpoint of")?;
        self.progress_mut(id)?.skip()
    }

    pub fn fail_checkpoint(&mut self, id: &CheckpointId) -> Result<(), DomainError> {
        self.require_state(AdventureState::is_active, "fail a checkpoint of")?;
        self.progress_mut(id)?.fail()
    }

    // =========================================================================
    // Instance lifecycle
    // =========================================================================

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<InstanceStateChange, DomainError> {
        self.require_state(|s| s == AdventureState::NotStarted, "start")?;
        self.started_at = Some(now);
        Ok(self.transition(AdventureState::Running))
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<InstanceStateChange, DomainError> {
        self.require_state(|s| s == AdventureState::Running, "pause")?;
        self.paused_at = Some(now);
        Ok(self.transition(AdventureState::Paused))
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<InstanceStateChange, DomainError> {
        self.require_state(|s| s == AdventureState::Paused, "resume")?;
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total = self.paused_total + (now - paused_at).max(Duration::zero());
        }
        Ok(self.transition(AdventureState::Running))
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<InstanceStateChange, DomainError> {
        self.require_state(AdventureState::is_active, "fail")?;
        self.failure_reason = Some(reason.into());
        self.finish(now);
        Ok(self.transition(AdventureState::Failed))
    }

    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<InstanceStateChange, DomainError> {
        self.require_state(AdventureState::is_active, "abandon")?;
        self.finish(now);
        Ok(self.transition(AdventureState::Abandoned))
    }

    /// Add bonus time to a running or paused instance.
    pub fn add_time(&mut self, bonus: Duration) -> Result<(), DomainError> {
        self.require_state(AdventureState::is_active, "add time to")?;
        self.bonus_time = self.bonus_time + bonus;
        Ok(())
    }

    /// Full reset: initial checkpoint states, no partial progress, no bonus
    /// time, clock restarted, instance RUNNING.
    pub fn reset(&mut self, now: DateTime<Utc>) -> InstanceStateChange {
        for progress in self.progress.values_mut() {
            progress.reset(now);
        }
        self.started_at = Some(now);
        self.paused_at = None;
        self.paused_total = Duration::zero();
        self.bonus_time = Duration::zero();
        self.ended_at = None;
        self.failure_reason = None;
        self.transition(AdventureState::Running)
    }

    /// Enforce adventure and checkpoint time limits.
    pub fn tick(&mut self, now: DateTime<Utc>) -> InstanceTick {
        let mut tick = InstanceTick::default();
        if self.state != AdventureState::Running {
            return tick;
        }

        for checkpoint in &self.adventure.checkpoints {
            let Some(limit) = checkpoint.time_limit() else {
                continue;
            };
            let Some(progress) = self.progress.get_mut(&checkpoint.id) else {
                continue;
            };
            let timed_out = progress.state().is_open()
                && progress.available_at().is_some_and(|since| now - since >= limit);
            if timed_out && progress.fail().is_ok() {
                tick.expired_checkpoints.push(checkpoint.id.clone());
            }
        }

        let reason = if self.is_expired(now) {
            Some("Time limit exceeded".to_string())
        } else {
            tick.expired_checkpoints
                .iter()
                .find(|id| self.adventure.checkpoint(id).is_some_and(|c| !c.optional))
                .map(|id| format!("Checkpoint '{}' timed out", id))
        };

        if let Some(reason) = reason {
            self.failure_reason = Some(reason.clone());
            self.finish(now);
            self.transition(AdventureState::Failed);
            tick.failure = Some(reason);
        }
        tick
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        // a paused instance stops its clock where it paused
        self.ended_at = Some(self.paused_at.unwrap_or(now));
    }

    fn transition(&mut self, to: AdventureState) -> InstanceStateChange {
        let from = self.state;
        self.state = to;
        InstanceStateChange { from, to }
    }
}
