//! Side effects of a checkpoint completion.
//!
//! Effects are collected while the instance lock is held and dispatched after
//! it is released, so action sinks and bus subscribers never run under an
//! instance lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eira_domain::{
    AdventureInstance, CheckpointAction, CheckpointCompletion, CheckpointId, Event, EventKind,
};

use crate::event_bus::EventBus;
use crate::infrastructure::ports::{ActionContext, ActionSink};

struct Unlocked {
    checkpoint_id: CheckpointId,
    name: String,
    hidden: bool,
}

pub(crate) struct CompletionEffects {
    context: ActionContext,
    actions: Vec<CheckpointAction>,
    unlocked: Vec<Unlocked>,
    /// Kind of the event that completed the checkpoint; `None` for direct completion
    cause: Option<EventKind>,
    /// (elapsed seconds, score) when this completion finished the adventure
    finished: Option<(i64, u32)>,
}

impl CompletionEffects {
    /// Capture everything dispatch needs from `instance` right after
    /// `completion` was applied to it.
    pub(crate) fn capture(
        instance: &AdventureInstance,
        completion: &CheckpointCompletion,
        cause: Option<&Event>,
        now: DateTime<Utc>,
    ) -> Self {
        let adventure = instance.adventure();
        let checkpoint = adventure.checkpoint(&completion.checkpoint_id);

        let context = ActionContext {
            instance_id: instance.id(),
            adventure_id: adventure.id.clone(),
            team_id: instance.team(),
            checkpoint_id: completion.checkpoint_id.clone(),
            checkpoint_name: checkpoint.map(|c| c.name.clone()).unwrap_or_default(),
        };

        let unlocked = completion
            .unlocked
            .iter()
            .filter_map(|id| adventure.checkpoint(id))
            .map(|c| Unlocked {
                checkpoint_id: c.id.clone(),
                name: c.name.clone(),
                hidden: c.hidden,
            })
            .collect();

        let finished = completion
            .adventure_completed
            .then(|| (instance.elapsed(now).num_seconds(), instance.score()));

        Self {
            context,
            actions: checkpoint.map(|c| c.actions.clone()).unwrap_or_default(),
            unlocked,
            cause: cause.map(Event::kind),
            finished,
        }
    }

    pub(crate) fn checkpoint_id(&self) -> &CheckpointId {
        &self.context.checkpoint_id
    }

    /// Run the action list, announce unlocks, and publish lifecycle events.
    pub(crate) fn dispatch(self, sink: &Arc<dyn ActionSink>, bus: &EventBus) {
        let ctx = &self.context;
        tracing::info!(
            instance_id = %ctx.instance_id,
            adventure_id = %ctx.adventure_id,
            checkpoint_id = %ctx.checkpoint_id,
            cause = ?self.cause,
            "Checkpoint completed"
        );

        for action in &self.actions {
            if let Err(e) = sink.execute_action(ctx, action) {
                tracing::error!(
                    instance_id = %ctx.instance_id,
                    checkpoint_id = %ctx.checkpoint_id,
                    action = action.name(),
                    error = %e,
                    "Checkpoint action failed"
                );
            }
        }

        for unlocked in &self.unlocked {
            tracing::info!(
                instance_id = %ctx.instance_id,
                checkpoint_id = %unlocked.checkpoint_id,
                "Checkpoint unlocked"
            );
            publish(
                bus,
                Event::checkpoint_unlocked(
                    ctx.instance_id,
                    &ctx.adventure_id,
                    ctx.team_id,
                    &unlocked.checkpoint_id,
                    &unlocked.name,
                ),
            );
            if unlocked.hidden {
                continue;
            }
            let announcement = ActionContext {
                checkpoint_id: unlocked.checkpoint_id.clone(),
                checkpoint_name: unlocked.name.clone(),
                ..ctx.clone()
            };
            let broadcast = CheckpointAction::broadcast(format!("[New Objective] {}", unlocked.name));
            if let Err(e) = sink.execute_action(&announcement, &broadcast) {
                tracing::error!(
                    instance_id = %ctx.instance_id,
                    checkpoint_id = %unlocked.checkpoint_id,
                    error = %e,
                    "Objective broadcast failed"
                );
            }
        }

        publish(
            bus,
            Event::checkpoint_reached(
                ctx.instance_id,
                &ctx.adventure_id,
                ctx.team_id,
                &ctx.checkpoint_id,
                &ctx.checkpoint_name,
            ),
        );

        if let Some((elapsed_secs, score)) = self.finished {
            tracing::info!(
                instance_id = %ctx.instance_id,
                adventure_id = %ctx.adventure_id,
                team_id = %ctx.team_id,
                elapsed_secs,
                score,
                "Adventure completed"
            );
            publish(
                bus,
                Event::adventure_completed(
                    ctx.instance_id,
                    &ctx.adventure_id,
                    ctx.team_id,
                    elapsed_secs,
                    score,
                ),
            );
        }
    }
}

/// Lifecycle events are informational; a closed bus only costs the event.
pub(crate) fn publish(bus: &EventBus, event: Event) {
    let kind = event.kind();
    if let Err(e) = bus.publish(event) {
        tracing::warn!(event_kind = %kind, error = %e, "Lifecycle event dropped");
    }
}
