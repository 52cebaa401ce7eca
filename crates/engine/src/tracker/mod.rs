//! Instance tracker - drives adventure instances from bus events.
//!
//! The tracker owns every running [`AdventureInstance`], one per
//! (adventure, team). Attached to an [`EventBus`] it receives every
//! trigger-capable event kind, scopes the event to the relevant instances,
//! and lets each instance match and complete its open checkpoints.
//!
//! Each instance sits behind its own mutex. The whole match, complete, and
//! unlock step for one event happens under that mutex, which is what makes
//! completion exactly-once when the same event arrives on several workers.
//! Actions and follow-up events are dispatched after the lock is released.

mod effects;
mod snapshot;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use eira_domain::{
    Adventure, AdventureId, AdventureInstance, AdventureState, Checkpoint, CheckpointCompletion,
    CheckpointId, CheckpointState, DomainError, Event, EventKind, InstanceId, TeamId,
};

use crate::event_bus::{
    BusError, EventBus, Handler, HandlerError, HandlerGroup, HandlerGroupId, SubscriptionOptions,
};
use crate::infrastructure::ports::{ActionSink, ClockPort, TeamDirectory};
use crate::registry::AdventureRegistry;

use effects::{publish, CompletionEffects};
pub use snapshot::{CheckpointStatus, InstanceSnapshot};

pub const SHUTDOWN_REASON: &str = "Server shutdown";

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Unknown adventure instance: {0}")]
    UnknownInstance(InstanceId),
    #[error("Unknown adventure: {0}")]
    UnknownAdventure(AdventureId),
    #[error("Team {team} is already running adventure '{adventure}'")]
    AlreadyRunning { adventure: AdventureId, team: TeamId },
    #[error("Adventure '{adventure}' allows at most {max_teams} concurrent teams")]
    AdventureFull { adventure: AdventureId, max_teams: u32 },
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// One instance plus the immutable keys used to scope events without
/// taking its lock.
struct TrackedInstance {
    team: TeamId,
    adventure_id: AdventureId,
    instance: Mutex<AdventureInstance>,
}

impl TrackedInstance {
    fn lock(&self) -> MutexGuard<'_, AdventureInstance> {
        self.instance.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct InstanceTracker {
    bus: Arc<EventBus>,
    registry: Arc<AdventureRegistry>,
    actions: Arc<dyn ActionSink>,
    teams: Arc<dyn TeamDirectory>,
    clock: Arc<dyn ClockPort>,
    instances: DashMap<InstanceId, Arc<TrackedInstance>>,
    group: Mutex<Option<HandlerGroupId>>,
    // serializes the (adventure, team) uniqueness check with the insert
    starting: Mutex<()>,
}

impl InstanceTracker {
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<AdventureRegistry>,
        actions: Arc<dyn ActionSink>,
        teams: Arc<dyn TeamDirectory>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            bus,
            registry,
            actions,
            teams,
            clock,
            instances: DashMap::new(),
            group: Mutex::new(None),
            starting: Mutex::new(()),
        }
    }

    // =========================================================================
    // Bus wiring
    // =========================================================================

    /// Subscribe to every trigger-capable event kind. Calling it again while
    /// attached returns the existing group.
    pub fn attach(self: &Arc<Self>) -> HandlerGroupId {
        let mut group = self.group.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = *group {
            return id;
        }

        let tracker: Weak<Self> = Arc::downgrade(self);
        let handler: Handler = Arc::new(move |event: &Event| -> Result<(), HandlerError> {
            if let Some(tracker) = tracker.upgrade() {
                tracker.on_event(event);
            }
            Ok(())
        });
        let id = self.bus.register_handler_group(HandlerGroup::new("instance-tracker").on_each(
            EventKind::TRIGGER_KINDS,
            SubscriptionOptions::new(),
            handler,
        ));
        *group = Some(id);
        tracing::info!(
            group_id = %id,
            kinds = EventKind::TRIGGER_KINDS.len(),
            "Instance tracker subscribed to events"
        );
        id
    }

    pub fn detach(&self) -> bool {
        let id = self.group.lock().unwrap_or_else(PoisonError::into_inner).take();
        id.is_some_and(|id| self.bus.unregister_handler_group(id))
    }

    // =========================================================================
    // Instance creation
    // =========================================================================

    /// Start a registered adventure for `team`.
    pub fn start(&self, adventure: &AdventureId, team: TeamId) -> Result<InstanceId, TrackerError> {
        let definition = self
            .registry
            .get(adventure)
            .ok_or_else(|| TrackerError::UnknownAdventure(adventure.clone()))?;
        self.initialize_instance(definition, team)
    }

    /// Validate `adventure`, then create and start an instance; checkpoints
    /// without prerequisites are AVAILABLE, the rest LOCKED.
    pub fn initialize_instance(
        &self,
        adventure: Arc<Adventure>,
        team: TeamId,
    ) -> Result<InstanceId, TrackerError> {
        if self.bus.is_shut_down() {
            return Err(BusError::Shutdown.into());
        }
        adventure.validate()?;

        let _starting = self.starting.lock().unwrap_or_else(PoisonError::into_inner);
        let running: Vec<TeamId> = self
            .instances
            .iter()
            .filter(|entry| entry.adventure_id == adventure.id)
            .filter(|entry| entry.lock().state().is_active())
            .map(|entry| entry.team)
            .collect();
        if running.contains(&team) {
            return Err(TrackerError::AlreadyRunning {
                adventure: adventure.id.clone(),
                team,
            });
        }
        if running.len() >= adventure.max_teams as usize {
            return Err(TrackerError::AdventureFull {
                adventure: adventure.id.clone(),
                max_teams: adventure.max_teams,
            });
        }

        let now = self.clock.now();
        let id = InstanceId::new();
        let mut instance = AdventureInstance::new(id, Arc::clone(&adventure), team, now);
        instance.start(now)?;

        self.instances.insert(
            id,
            Arc::new(TrackedInstance {
                team,
                adventure_id: adventure.id.clone(),
                instance: Mutex::new(instance),
            }),
        );
        tracing::info!(
            instance_id = %id,
            adventure_id = %adventure.id,
            team_id = %team,
            "Adventure instance started"
        );
        publish(&self.bus, Event::adventure_started(id, &adventure.id, team));
        Ok(id)
    }

    // =========================================================================
    // Event handling
    // =========================================================================

    /// Match `event` against every relevant running instance.
    ///
    /// An event naming a team reaches only that team's instances; one naming
    /// only a player reaches the instances of teams the player belongs to;
    /// anything else reaches every instance.
    pub fn on_event(&self, event: &Event) {
        let scope = event.team_scope();
        let actor = event.actor();
        let targets: Vec<Arc<TrackedInstance>> = self
            .instances
            .iter()
            .filter(|entry| match (scope, actor) {
                (Some(team), _) => entry.team == team,
                (None, Some(player)) => self.teams.is_member_of_team(entry.team, player),
                (None, None) => true,
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for tracked in targets {
            let now = self.clock.now();
            let effects: Vec<CompletionEffects> = {
                let mut instance = tracked.lock();
                let applied = instance.apply_event(event, now);
                for (checkpoint_id, e) in &applied.errors {
                    tracing::warn!(
                        instance_id = %instance.id(),
                        checkpoint_id = %checkpoint_id,
                        event_kind = %event.kind(),
                        error = %e,
                        "Matched checkpoint could not be completed"
                    );
                }
                applied
                    .completions
                    .iter()
                    .map(|completion| CompletionEffects::capture(&instance, completion, Some(event), now))
                    .collect()
            };
            for effect in effects {
                tracing::debug!(
                    event_kind = %event.kind(),
                    checkpoint_id = %effect.checkpoint_id(),
                    "Trigger matched"
                );
                effect.dispatch(&self.actions, &self.bus);
            }
        }
    }

    // =========================================================================
    // Checkpoint operations
    // =========================================================================

    /// Complete a checkpoint regardless of its trigger. `cause` is the event
    /// that completed it, if any.
    ///
    /// Returns `Ok(None)` if it was already COMPLETED; side effects run only
    /// on the call that actually completed it.
    pub fn complete_checkpoint(
        &self,
        instance: InstanceId,
        checkpoint: &CheckpointId,
        cause: Option<&Event>,
    ) -> Result<Option<CheckpointCompletion>, TrackerError> {
        let now = self.clock.now();
        let (completion, effects) = self.with_instance_mut(instance, |inst| {
            let completion = inst.complete_checkpoint(checkpoint, now)?;
            let effects = completion
                .as_ref()
                .map(|c| CompletionEffects::capture(inst, c, cause, now));
            Ok::<_, DomainError>((completion, effects))
        })??;
        if let Some(effects) = effects {
            effects.dispatch(&self.actions, &self.bus);
        }
        Ok(completion)
    }

    /// Admin completion; only from AVAILABLE or IN_PROGRESS.
    pub fn manual_complete(
        &self,
        instance: InstanceId,
        checkpoint: &CheckpointId,
    ) -> Result<CheckpointCompletion, TrackerError> {
        let now = self.clock.now();
        let (completion, effects) = self.with_instance_mut(instance, |inst| {
            let completion = inst.manual_complete(checkpoint, now)?;
            let effects = CompletionEffects::capture(inst, &completion, None, now);
            Ok::<_, DomainError>((completion, effects))
        })??;
        tracing::info!(instance_id = %instance, checkpoint_id = %checkpoint, "Manual completion");
        effects.dispatch(&self.actions, &self.bus);
        Ok(completion)
    }

    pub fn skip_checkpoint(&self, instance: InstanceId, checkpoint: &CheckpointId) -> Result<(), TrackerError> {
        self.with_instance_mut(instance, |inst| inst.skip_checkpoint(checkpoint))??;
        tracing::info!(instance_id = %instance, checkpoint_id = %checkpoint, "Checkpoint skipped");
        Ok(())
    }

    pub fn fail_checkpoint(&self, instance: InstanceId, checkpoint: &CheckpointId) -> Result<(), TrackerError> {
        self.with_instance_mut(instance, |inst| inst.fail_checkpoint(checkpoint))??;
        tracing::info!(instance_id = %instance, checkpoint_id = %checkpoint, "Checkpoint failed");
        Ok(())
    }

    /// Back to the initial checkpoint states with a fresh clock.
    pub fn reset(&self, instance: InstanceId) -> Result<(), TrackerError> {
        let now = self.clock.now();
        let change = self.with_instance_mut(instance, |inst| inst.reset(now))?;
        tracing::info!(
            instance_id = %instance,
            from = %change.from,
            "Adventure instance reset"
        );
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_checkpoint_state(
        &self,
        instance: InstanceId,
        checkpoint: &CheckpointId,
    ) -> Result<CheckpointState, TrackerError> {
        self.with_instance(instance, |inst| {
            inst.checkpoint_state(checkpoint)
                .ok_or_else(|| DomainError::not_found("Checkpoint", checkpoint.as_str()))
        })?
        .map_err(TrackerError::from)
    }

    /// Checkpoints currently listening for triggers, in definition order.
    pub fn get_available_checkpoints(&self, instance: InstanceId) -> Result<Vec<Checkpoint>, TrackerError> {
        self.with_instance(instance, |inst| {
            inst.available_checkpoints().into_iter().cloned().collect()
        })
    }

    pub fn snapshot(&self, instance: InstanceId) -> Result<InstanceSnapshot, TrackerError> {
        let now = self.clock.now();
        self.with_instance(instance, |inst| InstanceSnapshot::capture(inst, now))
    }

    pub fn state(&self, instance: InstanceId) -> Result<AdventureState, TrackerError> {
        self.with_instance(instance, |inst| inst.state())
    }

    pub fn progress(&self, instance: InstanceId) -> Result<f32, TrackerError> {
        self.with_instance(instance, |inst| inst.progress())
    }

    pub fn score(&self, instance: InstanceId) -> Result<u32, TrackerError> {
        self.with_instance(instance, |inst| inst.score())
    }

    pub fn elapsed(&self, instance: InstanceId) -> Result<Duration, TrackerError> {
        let now = self.clock.now();
        self.with_instance(instance, |inst| inst.elapsed(now))
    }

    pub fn remaining(&self, instance: InstanceId) -> Result<Option<Duration>, TrackerError> {
        let now = self.clock.now();
        self.with_instance(instance, |inst| inst.remaining(now))
    }

    /// The team's running instance, if any.
    pub fn instance_for_team(&self, team: TeamId) -> Option<InstanceId> {
        self.instances
            .iter()
            .filter(|entry| entry.team == team)
            .find(|entry| entry.lock().state() == AdventureState::Running)
            .map(|entry| *entry.key())
    }

    /// Every RUNNING instance.
    pub fn active_instances(&self) -> Vec<InstanceId> {
        self.instances
            .iter()
            .filter(|entry| entry.lock().state() == AdventureState::Running)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Tracked instances in any state.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    // =========================================================================
    // Instance lifecycle
    // =========================================================================

    pub fn pause(&self, instance: InstanceId) -> Result<(), TrackerError> {
        let now = self.clock.now();
        self.with_instance_mut(instance, |inst| inst.pause(now))??;
        tracing::info!(instance_id = %instance, "Adventure instance paused");
        Ok(())
    }

    pub fn resume(&self, instance: InstanceId) -> Result<(), TrackerError> {
        let now = self.clock.now();
        self.with_instance_mut(instance, |inst| inst.resume(now))??;
        tracing::info!(instance_id = %instance, "Adventure instance resumed");
        Ok(())
    }

    pub fn add_time(&self, instance: InstanceId, bonus: Duration) -> Result<(), TrackerError> {
        self.with_instance_mut(instance, |inst| inst.add_time(bonus))??;
        tracing::info!(
            instance_id = %instance,
            bonus_secs = bonus.num_seconds(),
            "Bonus time added"
        );
        Ok(())
    }

    /// Fail a running or paused instance and announce it.
    pub fn fail(&self, instance: InstanceId, reason: &str) -> Result<(), TrackerError> {
        let now = self.clock.now();
        let (adventure, team) = self.with_instance_mut(instance, |inst| {
            inst.fail(reason, now)
                .map(|_| (inst.adventure().id.clone(), inst.team()))
        })??;
        tracing::warn!(instance_id = %instance, reason, "Adventure failed");
        publish(&self.bus, Event::adventure_failed(instance, &adventure, team, reason));
        Ok(())
    }

    pub fn abandon(&self, instance: InstanceId) -> Result<(), TrackerError> {
        let now = self.clock.now();
        self.with_instance_mut(instance, |inst| inst.abandon(now))??;
        tracing::info!(instance_id = %instance, "Adventure abandoned");
        Ok(())
    }

    /// Stop tracking an instance. Returns false if it was not tracked.
    pub fn cleanup_instance(&self, instance: InstanceId) -> bool {
        let removed = self.instances.remove(&instance).is_some();
        if removed {
            tracing::debug!(instance_id = %instance, "Adventure instance removed");
        }
        removed
    }

    /// Enforce time limits on every running instance. Returns the instances
    /// that failed.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<InstanceId> {
        let tracked: Vec<(InstanceId, Arc<TrackedInstance>)> = self
            .instances
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut failed = Vec::new();
        for (id, tracked) in tracked {
            let outcome = tracked.lock().tick(now);
            for checkpoint in &outcome.expired_checkpoints {
                tracing::warn!(instance_id = %id, checkpoint_id = %checkpoint, "Checkpoint timed out");
            }
            if let Some(reason) = outcome.failure {
                tracing::warn!(instance_id = %id, reason = %reason, "Adventure failed");
                publish(
                    &self.bus,
                    Event::adventure_failed(id, &tracked.adventure_id, tracked.team, &reason),
                );
                failed.push(id);
            }
        }
        failed
    }

    /// Fail every active instance and stop tracking them all.
    pub fn shutdown(&self) {
        let now = self.clock.now();
        let mut failed = 0usize;
        for entry in self.instances.iter() {
            let mut instance = entry.lock();
            if !instance.state().is_active() {
                continue;
            }
            if instance.fail(SHUTDOWN_REASON, now).is_ok() {
                failed += 1;
                publish(
                    &self.bus,
                    Event::adventure_failed(*entry.key(), &entry.adventure_id, entry.team, SHUTDOWN_REASON),
                );
            }
        }
        self.instances.clear();
        tracing::info!(failed, "Instance tracker shut down");
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn tracked(&self, instance: InstanceId) -> Result<Arc<TrackedInstance>, TrackerError> {
        self.instances
            .get(&instance)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TrackerError::UnknownInstance(instance))
    }

    fn with_instance<R>(
        &self,
        instance: InstanceId,
        f: impl FnOnce(&AdventureInstance) -> R,
    ) -> Result<R, TrackerError> {
        let tracked = self.tracked(instance)?;
        let guard = tracked.lock();
        Ok(f(&guard))
    }

    fn with_instance_mut<R>(
        &self,
        instance: InstanceId,
        f: impl FnOnce(&mut AdventureInstance) -> R,
    ) -> Result<R, TrackerError> {
        let tracked = self.tracked(instance)?;
        let mut guard = tracked.lock();
        Ok(f(&mut guard))
    }
}
