//! Checkpoint entity - one objective inside an adventure
//!
//! A checkpoint names its trigger, the checkpoints that must be completed
//! before it opens (`prerequisites`), the checkpoints it tries to open once
//! completed (`unlocks`), and the actions to run on completion.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::trigger::TriggerSpec;
use crate::events::FieldValue;
use crate::ids::CheckpointId;
use crate::value_objects::BlockPos;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: TriggerSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<CheckpointId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlocks: Vec<CheckpointId>,
    /// Optional checkpoints don't block adventure completion
    #[serde(default)]
    pub optional: bool,
    /// Hidden checkpoints aren't listed while LOCKED
    #[serde(default)]
    pub hidden: bool,
    /// Run in order after completion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<CheckpointAction>,
    #[serde(default)]
    pub points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<CheckpointHint>,
    /// Seconds allowed once the checkpoint becomes available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Checkpoint {
    pub fn new(id: CheckpointId, name: impl Into<String>, trigger: impl Into<TriggerSpec>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            trigger: trigger.into(),
            prerequisites: Vec::new(),
            unlocks: Vec::new(),
            optional: false,
            hidden: false,
            actions: Vec::new(),
            points: 0,
            hint: None,
            time_limit_secs: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn requires(mut self, prerequisite: CheckpointId) -> Self {
        self.prerequisites.push(prerequisite);
        self
    }

    pub fn unlocks(mut self, dependent: CheckpointId) -> Self {
        self.unlocks.push(dependent);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_action(mut self, action: CheckpointAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    pub fn with_hint(mut self, npc_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.hint = Some(CheckpointHint {
            npc_id: npc_id.into(),
            message: message.into(),
        });
        self
    }

    pub fn with_time_limit(mut self, limit: std::time::Duration) -> Self {
        self.time_limit_secs = Some(limit.as_secs());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_prerequisites(&self) -> bool {
        !self.prerequisites.is_empty()
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(Duration::seconds)
    }
}

/// NPC that hints at how to reach a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointHint {
    pub npc_id: String,
    pub message: String,
}

/// Side effect requested when a checkpoint completes.
///
/// These are declarations only; the engine's action sink decides how each one
/// reaches the game or the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CheckpointAction {
    /// Message to every member of the team
    Broadcast { message: String },
    /// POST checkpoint data to an external URL
    Webhook { url: String },
    #[serde(rename_all = "camelCase")]
    EmitRedstone {
        position: BlockPos,
        strength: u8,
        duration_ticks: u32,
    },
    #[serde(rename_all = "camelCase")]
    NpcSpeak { npc_id: String, message: String },
    PlaySound { sound: String },
    ShowTitle {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
    },
    /// Write a value into the team's progress data
    SetProgress { key: String, value: FieldValue },
}

impl CheckpointAction {
    pub fn broadcast(message: impl Into<String>) -> Self {
        Self::Broadcast {
            message: message.into(),
        }
    }

    pub fn webhook(url: impl Into<String>) -> Self {
        Self::Webhook { url: url.into() }
    }

    pub fn emit_redstone(position: BlockPos, strength: u8, duration_ticks: u32) -> Self {
        Self::EmitRedstone {
            position,
            strength: strength.min(15),
            duration_ticks,
        }
    }

    pub fn npc_speak(npc_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NpcSpeak {
            npc_id: npc_id.into(),
            message: message.into(),
        }
    }

    pub fn play_sound(sound: impl Into<String>) -> Self {
        Self::PlaySound {
            sound: sound.into(),
        }
    }

    pub fn show_title(title: impl Into<String>, subtitle: Option<String>) -> Self {
        Self::ShowTitle {
            title: title.into(),
            subtitle,
        }
    }

    pub fn set_progress(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::SetProgress {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Short action name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Broadcast { .. } => "broadcast",
            Self::Webhook { .. } => "webhook",
            Self::EmitRedstone { .. } => "emitRedstone",
            Self::NpcSpeak { .. } => "npcSpeak",
            Self::PlaySound { .. } => "playSound",
            Self::ShowTitle { .. } => "showTitle",
            Self::SetProgress { .. } => "setProgress",
        }
    }
}
