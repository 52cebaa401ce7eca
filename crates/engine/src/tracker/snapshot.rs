//! Read-only view of a tracked instance.

use chrono::{DateTime, Utc};
use eira_domain::{
    AdventureId, AdventureInstance, AdventureState, CheckpointId, CheckpointState, InstanceId,
    TeamId,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStatus {
    pub id: CheckpointId,
    pub name: String,
    pub state: CheckpointState,
    pub optional: bool,
    /// Satisfied child triggers of a composite trigger
    pub satisfied: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub adventure_id: AdventureId,
    pub team_id: TeamId,
    pub state: AdventureState,
    pub progress: f32,
    pub score: u32,
    pub elapsed_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Every checkpoint except hidden ones that are still locked
    pub checkpoints: Vec<CheckpointStatus>,
}

impl InstanceSnapshot {
    pub(crate) fn capture(instance: &AdventureInstance, now: DateTime<Utc>) -> Self {
        let checkpoints = instance
            .visible_checkpoints()
            .into_iter()
            .filter_map(|checkpoint| {
                let progress = instance.checkpoint_progress(&checkpoint.id)?;
                Some(CheckpointStatus {
                    id: checkpoint.id.clone(),
                    name: checkpoint.name.clone(),
                    state: progress.state(),
                    optional: checkpoint.optional,
                    satisfied: progress.satisfied().len(),
                })
            })
            .collect();

        Self {
            id: instance.id(),
            adventure_id: instance.adventure().id.clone(),
            team_id: instance.team(),
            state: instance.state(),
            progress: instance.progress(),
            score: instance.score(),
            elapsed_secs: instance.elapsed(now).num_seconds(),
            remaining_secs: instance.remaining(now).map(|r| r.num_seconds()),
            failure_reason: instance.failure_reason().map(str::to_string),
            checkpoints,
        }
    }

    pub fn checkpoint(&self, id: &CheckpointId) -> Option<&CheckpointStatus> {
        self.checkpoints.iter().find(|c| &c.id == id)
    }
}
