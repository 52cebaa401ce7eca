//! Adventure entity - a validated graph of checkpoints
//!
//! Adventures are registered once and shared read-only by every instance.
//! [`Adventure::validate`] checks the checkpoint graph before registration:
//! unique ids, known prerequisite/unlock references, no prerequisite cycles,
//! and well-formed triggers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::checkpoint::Checkpoint;
use crate::error::DomainError;
use crate::ids::{AdventureId, CheckpointId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdventureKind {
    /// Checkpoints follow one after another
    #[default]
    Linear,
    /// Checkpoints can be done in any order
    Open,
    /// Against the clock
    Timed,
    /// Teams race each other
    Competitive,
    /// Teams work together
    Cooperative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adventure {
    pub id: AdventureId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: AdventureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
    #[serde(default = "default_min_team_size")]
    pub min_team_size: u32,
    #[serde(default = "default_max_team_size")]
    pub max_team_size: u32,
    #[serde(default = "default_max_teams")]
    pub max_teams: u32,
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

fn default_min_team_size() -> u32 {
    1
}

fn default_max_team_size() -> u32 {
    10
}

fn default_max_teams() -> u32 {
    1
}

impl Adventure {
    pub fn new(id: AdventureId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            kind: AdventureKind::default(),
            time_limit_secs: None,
            min_team_size: default_min_team_size(),
            max_team_size: default_max_team_size(),
            max_teams: default_max_teams(),
            checkpoints: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_kind(mut self, kind: AdventureKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_time_limit(mut self, limit: std::time::Duration) -> Self {
        self.time_limit_secs = Some(limit.as_secs());
        self
    }

    pub fn with_team_size(mut self, min: u32, max: u32) -> Self {
        self.min_team_size = min;
        self.max_team_size = max;
        self
    }

    pub fn with_max_teams(mut self, max_teams: u32) -> Self {
        self.max_teams = max_teams;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoints.push(checkpoint);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn checkpoint(&self, id: &CheckpointId) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| &c.id == id)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(Duration::seconds)
    }

    /// Checkpoints that might open once `completed` is done: the ones it
    /// unlocks explicitly, plus any that list it as a prerequisite.
    pub fn dependents_of<'a>(
        &'a self,
        completed: &'a CheckpointId,
    ) -> impl Iterator<Item = &'a Checkpoint> + 'a {
        let explicit = self
            .checkpoint(completed)
            .map(|c| c.unlocks.as_slice())
            .unwrap_or_default();
        self.checkpoints
            .iter()
            .filter(move |c| explicit.contains(&c.id) || c.prerequisites.contains(completed))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("adventure name cannot be empty"));
        }
        if self.checkpoints.is_empty() {
            return Err(DomainError::validation(format!(
                "adventure '{}' has no checkpoints",
                self.id
            )));
        }
        if self.min_team_size == 0 || self.min_team_size > self.max_team_size {
            return Err(DomainError::validation(format!(
                "invalid team size bounds {}..={}",
                self.min_team_size, self.max_team_size
            )));
        }

        let mut ids = BTreeSet::new();
        for checkpoint in &self.checkpoints {
            if !ids.insert(&checkpoint.id) {
                return Err(DomainError::invalid_trigger(format!(
                    "duplicate checkpoint id '{}'",
                    checkpoint.id
                )));
            }
        }

        for checkpoint in &self.checkpoints {
            for reference in checkpoint.prerequisites.iter().chain(&checkpoint.unlocks) {
                if !ids.contains(reference) {
                    return Err(DomainError::invalid_trigger(format!(
                        "checkpoint '{}' references unknown checkpoint '{}'",
                        checkpoint.id, reference
                    )));
                }
            }
            if checkpoint.prerequisites.contains(&checkpoint.id) {
                return Err(DomainError::invalid_trigger(format!(
                    "checkpoint '{}' requires itself",
                    checkpoint.id
                )));
            }
            checkpoint.trigger.validate().map_err(|e| {
                DomainError::invalid_trigger(format!("checkpoint '{}': {}", checkpoint.id, e))
            })?;
        }

        self.check_prerequisite_cycles()
    }

    /// Depth-first search over prerequisite edges.
    fn check_prerequisite_cycles(&self) -> Result<(), DomainError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            adventure: &'a Adventure,
            id: &'a CheckpointId,
            marks: &mut BTreeMap<&'a CheckpointId, Mark>,
        ) -> Result<(), DomainError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(DomainError::invalid_trigger(format!(
                        "prerequisite cycle through checkpoint '{}'",
                        id
                    )))
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(checkpoint) = adventure.checkpoint(id) {
                for prerequisite in &checkpoint.prerequisites {
                    visit(adventure, prerequisite, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        for checkpoint in &self.checkpoints {
            visit(self, &checkpoint.id, &mut marks)?;
        }
        Ok(())
    }
}
