//! Action sink adapters.
//!
//! The production sink lives with the Minecraft bridge; these two cover the
//! demo runner and tests.

use std::sync::Mutex;

use eira_domain::CheckpointAction;

use crate::infrastructure::ports::{ActionContext, ActionError, ActionSink};

/// Writes every action to the log.
#[derive(Debug, Default)]
pub struct LoggingActionSink;

impl LoggingActionSink {
    pub fn new() -> Self {
        Self
    }
}

impl ActionSink for LoggingActionSink {
    fn execute_action(
        &self,
        context: &ActionContext,
        action: &CheckpointAction,
    ) -> Result<(), ActionError> {
        match action {
            CheckpointAction::Broadcast { message } => {
                tracing::info!(team_id = %context.team_id, "{}", message);
            }
            CheckpointAction::Webhook { url } => {
                tracing::info!(
                    instance_id = %context.instance_id,
                    checkpoint_id = %context.checkpoint_id,
                    url = %url,
                    "Webhook"
                );
            }
            CheckpointAction::EmitRedstone {
                position,
                strength,
                duration_ticks,
            } => {
                tracing::info!(
                    x = position.x,
                    y = position.y,
                    z = position.z,
                    strength = *strength,
                    duration_ticks = *duration_ticks,
                    "Emit redstone"
                );
            }
            CheckpointAction::NpcSpeak { npc_id, message } => {
                tracing::info!(npc_id = %npc_id, "{}", message);
            }
            other => {
                tracing::info!(
                    team_id = %context.team_id,
                    checkpoint_id = %context.checkpoint_id,
                    action = other.name(),
                    "Checkpoint action"
                );
            }
        }
        Ok(())
    }
}

/// One captured sink call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAction {
    pub context: ActionContext,
    pub action: CheckpointAction,
}

/// Keeps every call in memory.
#[derive(Debug, Default)]
pub struct RecordingActionSink {
    calls: Mutex<Vec<RecordedAction>>,
}

impl RecordingActionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedAction> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Messages of every recorded `Broadcast`, in call order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call.action {
                CheckpointAction::Broadcast { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActionSink for RecordingActionSink {
    fn execute_action(
        &self,
        context: &ActionContext,
        action: &CheckpointAction,
    ) -> Result<(), ActionError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| ActionError::delivery("recording sink lock poisoned"))?;
        calls.push(RecordedAction {
            context: context.clone(),
            action: action.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eira_domain::{AdventureId, CheckpointId, InstanceId, TeamId};

    fn context() -> ActionContext {
        ActionContext {
            instance_id: InstanceId::new(),
            adventure_id: AdventureId::new("vault").unwrap(),
            team_id: TeamId::new(),
            checkpoint_id: CheckpointId::new("key").unwrap(),
            checkpoint_name: "Find the key".to_string(),
        }
    }

    #[test]
    fn recording_sink_keeps_call_order() {
        let sink = RecordingActionSink::new();
        let ctx = context();
        sink.execute_action(&ctx, &CheckpointAction::broadcast("first")).unwrap();
        sink.execute_action(&ctx, &CheckpointAction::play_sound("minecraft:bell")).unwrap();
        sink.execute_action(&ctx, &CheckpointAction::broadcast("second")).unwrap();

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.broadcasts(), vec!["first", "second"]);
        assert_eq!(sink.calls()[1].context, ctx);
    }

    #[test]
    fn logging_sink_accepts_every_action() {
        let sink = LoggingActionSink::new();
        let ctx = context();
        for action in [
            CheckpointAction::broadcast("hello"),
            CheckpointAction::webhook("https://example.invalid/hook"),
            CheckpointAction::npc_speak("guard", "Well done"),
            CheckpointAction::show_title("Vault", None),
        ] {
            assert!(sink.execute_action(&ctx, &action).is_ok());
        }
    }
}
