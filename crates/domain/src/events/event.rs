use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::{EventCategory, EventKind};
use crate::ids::{AdventureId, CheckpointId, InstanceId, PlayerId, TeamId};
use crate::value_objects::BlockPos;

/// Field names shared by producers and the trigger matcher.
pub mod fields {
    pub const NPC_ID: &str = "npcId";
    pub const CHARACTER_ID: &str = "characterId";
    pub const MESSAGE_COUNT: &str = "messageCount";
    pub const SECRET_LEVEL: &str = "secretLevel";
    pub const CLUE_ID: &str = "clueId";
    pub const QUEST_ID: &str = "questId";
    pub const MOOD: &str = "mood";
    pub const TOPIC: &str = "topic";

    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const PARAMS: &str = "params";
    pub const HEADERS: &str = "headers";
    pub const BODY: &str = "body";
    pub const TRIGGER_ID: &str = "triggerId";

    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const Z: &str = "z";
    pub const STRENGTH: &str = "strength";
    pub const OLD_STRENGTH: &str = "oldStrength";
    pub const PULSE: &str = "pulse";
    pub const PATTERN: &str = "pattern";

    pub const AREA_ID: &str = "areaId";
    pub const BLOCK_ID: &str = "blockId";
    pub const ITEM_ID: &str = "itemId";
    pub const COUNT: &str = "count";
    pub const ENTITY_TYPE: &str = "entityType";
    pub const ENTITY_ID: &str = "entityId";

    pub const KEY: &str = "key";
    pub const VALUE: &str = "value";
    pub const FLAG: &str = "flag";
    pub const STORY_ID: &str = "storyId";
    pub const CHAPTER_ID: &str = "chapterId";

    pub const INSTANCE_ID: &str = "instanceId";
    pub const ADVENTURE_ID: &str = "adventureId";
    pub const CHECKPOINT_ID: &str = "checkpointId";
    pub const CHECKPOINT_NAME: &str = "checkpointName";
    pub const TEAM_ID: &str = "teamId";
    pub const TEAM_NAME: &str = "teamName";
    pub const PLAYER_ID: &str = "playerId";
    pub const REASON: &str = "reason";
    pub const ELAPSED_SECS: &str = "elapsedSecs";
    pub const SCORE: &str = "score";
    pub const COMMAND: &str = "command";
}

/// A primitive event field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// HTTP params and headers
    Map(BTreeMap<String, String>),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<BTreeMap<String, String>> for FieldValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self::Map(value)
    }
}

/// An event published on the bus.
///
/// Immutable once built, apart from the cancelled flag on cancellable kinds.
/// Builders (`with_*`) consume the event and are meant to be used before
/// publishing.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    kind: EventKind,
    source: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actor: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team: Option<TeamId>,
    #[serde(skip)]
    cancelled: AtomicBool,
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            source: self.source.clone(),
            fields: self.fields.clone(),
            actor: self.actor,
            team: self.team,
            cancelled: AtomicBool::new(self.is_cancelled()),
        }
    }
}

impl Event {
    pub fn new(kind: EventKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            fields: BTreeMap::new(),
            actor: None,
            team: None,
            cancelled: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Builder
    // =========================================================================

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_position(self, pos: BlockPos) -> Self {
        self.with_field(fields::X, pos.x)
            .with_field(fields::Y, pos.y)
            .with_field(fields::Z, pos.z)
    }

    pub fn with_actor(mut self, actor: PlayerId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_team(mut self, team: TeamId) -> Self {
        self.team = Some(team);
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn actor(&self) -> Option<PlayerId> {
        self.actor
    }

    pub fn team(&self) -> Option<TeamId> {
        self.team
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(FieldValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float; integers are widened.
    pub fn float(&self, key: &str) -> Option<f64> {
        match self.fields.get(key) {
            Some(FieldValue::Float(f)) => Some(*f),
            Some(FieldValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.fields.get(key) {
            Some(FieldValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn map(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        match self.fields.get(key) {
            Some(FieldValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Block position from the `x`/`y`/`z` fields, if all three are present.
    pub fn position(&self) -> Option<BlockPos> {
        Some(BlockPos::new(
            self.int(fields::X)?,
            self.int(fields::Y)?,
            self.int(fields::Z)?,
        ))
    }

    /// Category used for trigger matching.
    ///
    /// External triggers are classified by source: `redstone` behaves like a
    /// redstone event, `qr_code` and `nfc` like HTTP calls, anything else
    /// stays external.
    pub fn category(&self) -> EventCategory {
        if self.kind != EventKind::ExternalTrigger {
            return self.kind.default_category();
        }
        match self.source.as_str() {
            "redstone" => EventCategory::Redstone,
            "qr_code" | "nfc" => EventCategory::Http,
            _ => EventCategory::External,
        }
    }

    /// Team this event is scoped to: the explicit team, otherwise a `teamId`
    /// request parameter or field.
    pub fn team_scope(&self) -> Option<TeamId> {
        self.team.or_else(|| {
            self.map(fields::PARAMS)
                .and_then(|params| params.get(fields::TEAM_ID))
                .map(String::as_str)
                .or_else(|| self.text(fields::TEAM_ID))
                .and_then(|raw| raw.parse().ok())
        })
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Mark the event cancelled. Returns false (and does nothing) for kinds
    /// that are not cancellable.
    pub fn cancel(&self) -> bool {
        if !self.kind.is_cancellable() {
            return false;
        }
        self.cancelled.store(true, Ordering::Release);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    // =========================================================================
    // Typed constructors
    // =========================================================================

    pub fn conversation_started(npc_id: impl Into<String>, character_id: impl Into<String>) -> Self {
        Self::new(EventKind::ConversationStarted, "npc")
            .with_field(fields::NPC_ID, npc_id.into())
            .with_field(fields::CHARACTER_ID, character_id.into())
    }

    pub fn conversation_ended(npc_id: impl Into<String>, message_count: u32) -> Self {
        Self::new(EventKind::ConversationEnded, "npc")
            .with_field(fields::NPC_ID, npc_id.into())
            .with_field(fields::MESSAGE_COUNT, message_count)
    }

    pub fn secret_revealed(npc_id: impl Into<String>, secret_level: u32) -> Self {
        Self::new(EventKind::SecretRevealed, "npc")
            .with_field(fields::NPC_ID, npc_id.into())
            .with_field(fields::SECRET_LEVEL, secret_level)
    }

    pub fn clue_given(npc_id: impl Into<String>, clue_id: impl Into<String>) -> Self {
        Self::new(EventKind::ClueGiven, "npc")
            .with_field(fields::NPC_ID, npc_id.into())
            .with_field(fields::CLUE_ID, clue_id.into())
    }

    pub fn quest_accepted(npc_id: impl Into<String>, quest_id: impl Into<String>) -> Self {
        Self::new(EventKind::QuestAccepted, "npc")
            .with_field(fields::NPC_ID, npc_id.into())
            .with_field(fields::QUEST_ID, quest_id.into())
    }

    pub fn mood_changed(npc_id: impl Into<String>, mood: impl Into<String>) -> Self {
        Self::new(EventKind::MoodChanged, "npc")
            .with_field(fields::NPC_ID, npc_id.into())
            .with_field(fields::MOOD, mood.into())
    }

    pub fn http_received(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self::new(EventKind::HttpReceived, "http")
            .with_field(fields::ENDPOINT, endpoint.into())
            .with_field(fields::METHOD, method.into())
            .with_field(fields::PARAMS, params)
    }

    /// External hardware or service trigger (QR scan, NFC tag, sensor).
    /// `data` entries become event fields.
    pub fn external_trigger(
        source: impl Into<String>,
        trigger_id: impl Into<String>,
        data: BTreeMap<String, FieldValue>,
    ) -> Self {
        let mut event = Self::new(EventKind::ExternalTrigger, source)
            .with_field(fields::TRIGGER_ID, trigger_id.into());
        event.fields.extend(data);
        event
    }

    pub fn redstone_changed(pos: BlockPos, old_strength: u32, strength: u32) -> Self {
        Self::new(EventKind::RedstoneChanged, "redstone")
            .with_position(pos)
            .with_field(fields::OLD_STRENGTH, old_strength)
            .with_field(fields::STRENGTH, strength)
    }

    pub fn area_entered(pos: BlockPos) -> Self {
        Self::new(EventKind::AreaEntered, "game").with_position(pos)
    }

    pub fn area_exited(pos: BlockPos) -> Self {
        Self::new(EventKind::AreaExited, "game").with_position(pos)
    }

    pub fn item_obtained(item_id: impl Into<String>, count: u32) -> Self {
        Self::new(EventKind::ItemObtained, "game")
            .with_field(fields::ITEM_ID, item_id.into())
            .with_field(fields::COUNT, count)
    }

    pub fn item_used(item_id: impl Into<String>) -> Self {
        Self::new(EventKind::ItemUsed, "game").with_field(fields::ITEM_ID, item_id.into())
    }

    pub fn block_interacted(block_id: impl Into<String>, pos: BlockPos) -> Self {
        Self::new(EventKind::BlockInteracted, "game")
            .with_field(fields::BLOCK_ID, block_id.into())
            .with_position(pos)
    }

    pub fn entity_interacted(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(EventKind::EntityInteracted, "game")
            .with_field(fields::ENTITY_TYPE, entity_type.into())
            .with_field(fields::ENTITY_ID, entity_id.into())
    }

    pub fn entity_killed(entity_type: impl Into<String>) -> Self {
        Self::new(EventKind::EntityKilled, "game")
            .with_field(fields::ENTITY_TYPE, entity_type.into())
    }

    pub fn progress_updated(key: impl Into<String>, value: i64) -> Self {
        Self::new(EventKind::ProgressUpdated, "progress")
            .with_field(fields::KEY, key.into())
            .with_field(fields::VALUE, value)
    }

    pub fn flag_set(flag: impl Into<String>) -> Self {
        Self::new(EventKind::FlagSet, "progress").with_field(fields::FLAG, flag.into())
    }

    pub fn chapter_unlocked(story_id: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self::new(EventKind::ChapterUnlocked, "progress")
            .with_field(fields::STORY_ID, story_id.into())
            .with_field(fields::CHAPTER_ID, chapter_id.into())
    }

    pub fn server_command(command: impl Into<String>) -> Self {
        Self::new(EventKind::ServerCommand, "command").with_field(fields::COMMAND, command.into())
    }

    /// Forced completion of one checkpoint, optionally scoped with `with_team`.
    pub fn manual(checkpoint_id: &CheckpointId) -> Self {
        Self::new(EventKind::Manual, "manual").with_field(fields::CHECKPOINT_ID, checkpoint_id.as_str())
    }

    // Adventure lifecycle

    fn lifecycle(kind: EventKind, instance: InstanceId, adventure: &AdventureId, team: TeamId) -> Self {
        Self::new(kind, "adventure")
            .with_field(fields::INSTANCE_ID, instance.to_string())
            .with_field(fields::ADVENTURE_ID, adventure.as_str())
            .with_team(team)
    }

    pub fn adventure_started(instance: InstanceId, adventure: &AdventureId, team: TeamId) -> Self {
        Self::lifecycle(EventKind::AdventureStarted, instance, adventure, team)
    }

    pub fn checkpoint_reached(
        instance: InstanceId,
        adventure: &AdventureId,
        team: TeamId,
        checkpoint: &CheckpointId,
        checkpoint_name: &str,
    ) -> Self {
        Self::lifecycle(EventKind::CheckpointReached, instance, adventure, team)
            .with_field(fields::CHECKPOINT_ID, checkpoint.as_str())
            .with_field(fields::CHECKPOINT_NAME, checkpoint_name)
    }

    pub fn checkpoint_unlocked(
        instance: InstanceId,
        adventure: &AdventureId,
        team: TeamId,
        checkpoint: &CheckpointId,
        checkpoint_name: &str,
    ) -> Self {
        Self::lifecycle(EventKind::CheckpointUnlocked, instance, adventure, team)
            .with_field(fields::CHECKPOINT_ID, checkpoint.as_str())
            .with_field(fields::CHECKPOINT_NAME, checkpoint_name)
    }

    pub fn adventure_completed(
        instance: InstanceId,
        adventure: &AdventureId,
        team: TeamId,
        elapsed_secs: i64,
        score: u32,
    ) -> Self {
        Self::lifecycle(EventKind::AdventureCompleted, instance, adventure, team)
            .with_field(fields::ELAPSED_SECS, elapsed_secs)
            .with_field(fields::SCORE, score)
    }

    pub fn adventure_failed(
        instance: InstanceId,
        adventure: &AdventureId,
        team: TeamId,
        reason: &str,
    ) -> Self {
        Self::lifecycle(EventKind::AdventureFailed, instance, adventure, team)
            .with_field(fields::REASON, reason)
    }

    // Teams

    pub fn team_created(team: TeamId, name: impl Into<String>) -> Self {
        Self::new(EventKind::TeamCreated, "team")
            .with_field(fields::TEAM_NAME, name.into())
            .with_team(team)
    }

    pub fn team_disbanded(team: TeamId) -> Self {
        Self::new(EventKind::TeamDisbanded, "team").with_team(team)
    }

    pub fn team_member_joined(team: TeamId, player: PlayerId) -> Self {
        Self::new(EventKind::TeamMemberJoined, "team")
            .with_team(team)
            .with_actor(player)
    }

    pub fn team_member_left(team: TeamId, player: PlayerId) -> Self {
        Self::new(EventKind::TeamMemberLeft, "team")
            .with_team(team)
            .with_actor(player)
    }
}
