//! Trigger specifications - what completes a checkpoint
//!
//! A checkpoint carries exactly one [`TriggerSpec`]. Simple triggers test a
//! single event against a set of optional filters; composite triggers combine
//! simple ones and may accumulate progress across several events.
//!
//! Specs are declared once and never mutated. Every variant except
//! [`TriggerSpec::Custom`] (de)serializes, so adventures can be written as JSON:
//!
//! ```json
//! { "type": "composite", "mode": "anyOf", "children": [
//!     { "type": "http", "endpoint": "/qr" },
//!     { "type": "redstone", "position": { "x": 50, "y": 65, "z": 50 } }
//! ] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::events::{Event, EventCategory, EventKind};
use crate::value_objects::{Area, BlockPos};

/// Declarative trigger tree attached to a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerSpec {
    Redstone(RedstoneTrigger),
    Npc(NpcTrigger),
    Http(HttpTrigger),
    Game(GameTrigger),
    Progress(ProgressTrigger),
    Composite(CompositeTrigger),
    /// Completed only through a forced/manual completion
    Manual,
    /// User predicate; code-defined adventures only
    #[serde(skip)]
    Custom(CustomTrigger),
}

impl TriggerSpec {
    pub fn all_of(children: Vec<TriggerSpec>) -> Self {
        Self::Composite(CompositeTrigger::new(CompositeMode::AllOf, children))
    }

    pub fn any_of(children: Vec<TriggerSpec>) -> Self {
        Self::Composite(CompositeTrigger::new(CompositeMode::AnyOf, children))
    }

    pub fn sequence(children: Vec<TriggerSpec>) -> Self {
        Self::Composite(CompositeTrigger::new(CompositeMode::Sequence, children))
    }

    pub fn custom<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::Custom(CustomTrigger {
            description: description.into(),
            predicate: TriggerPredicate::new(predicate),
        })
    }

    /// Redstone, NPC, HTTP, game, and progress triggers.
    pub fn is_simple(&self) -> bool {
        self.category().is_some()
    }

    /// Category a simple trigger listens to.
    pub fn category(&self) -> Option<EventCategory> {
        match self {
            Self::Redstone(_) => Some(EventCategory::Redstone),
            Self::Npc(_) => Some(EventCategory::Npc),
            Self::Http(_) => Some(EventCategory::Http),
            Self::Game(_) => Some(EventCategory::Game),
            Self::Progress(_) => Some(EventCategory::Progress),
            Self::Composite(_) | Self::Manual | Self::Custom(_) => None,
        }
    }

    /// True for composites that keep partial progress between events.
    pub fn is_stateful(&self) -> bool {
        matches!(self, Self::Composite(c) if c.mode.is_stateful())
    }

    /// Reject malformed trigger trees.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::Redstone(t) => t.validate(),
            Self::Http(t) => t.validate(),
            Self::Progress(t) => t.validate(),
            Self::Npc(_) | Self::Game(_) | Self::Manual | Self::Custom(_) => Ok(()),
            Self::Composite(c) => c.validate(),
        }
    }

    /// Human-readable description for objective lists.
    pub fn describe(&self) -> String {
        match self {
            Self::Redstone(t) => t.describe(),
            Self::Npc(t) => t.describe(),
            Self::Http(t) => t.describe(),
            Self::Game(t) => t.describe(),
            Self::Progress(t) => t.describe(),
            Self::Composite(c) => c.describe(),
            Self::Manual => "Manual checkpoint".to_string(),
            Self::Custom(c) => c.description.clone(),
        }
    }
}

impl From<RedstoneTrigger> for TriggerSpec {
    fn from(value: RedstoneTrigger) -> Self {
        Self::Redstone(value)
    }
}

impl From<NpcTrigger> for TriggerSpec {
    fn from(value: NpcTrigger) -> Self {
        Self::Npc(value)
    }
}

impl From<HttpTrigger> for TriggerSpec {
    fn from(value: HttpTrigger) -> Self {
        Self::Http(value)
    }
}

impl From<GameTrigger> for TriggerSpec {
    fn from(value: GameTrigger) -> Self {
        Self::Game(value)
    }
}

impl From<ProgressTrigger> for TriggerSpec {
    fn from(value: ProgressTrigger) -> Self {
        Self::Progress(value)
    }
}

// =============================================================================
// Redstone
// =============================================================================

/// What kind of redstone signal completes the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RedstoneSignal {
    /// Strength at or above the minimum (default 1)
    #[default]
    On,
    /// Strength dropped to zero
    Off,
    /// Producer flagged a short pulse
    Pulse,
    /// Producer recognized a named on/off pattern
    Pattern(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedstoneTrigger {
    #[serde(default)]
    pub signal: RedstoneSignal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<BlockPos>,
    /// Euclidean radius around `position`; exact match when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_strength: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
}

impl RedstoneTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, pos: BlockPos) -> Self {
        self.position = Some(pos);
        self
    }

    pub fn within(mut self, radius: u32) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_min_strength(mut self, strength: u32) -> Self {
        self.min_strength = Some(strength);
        self
    }

    pub fn with_signal(mut self, signal: RedstoneSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_block(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = Some(block_id.into());
        self
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.radius.is_some() && self.position.is_none() {
            return Err(DomainError::invalid_trigger(
                "redstone trigger has a radius but no position",
            ));
        }
        if let RedstoneSignal::Pattern(p) = &self.signal {
            if p.trim().is_empty() {
                return Err(DomainError::invalid_trigger("redstone pattern cannot be empty"));
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let signal = match &self.signal {
            RedstoneSignal::On => "Redstone signal",
            RedstoneSignal::Off => "Redstone signal off",
            RedstoneSignal::Pulse => "Redstone pulse",
            RedstoneSignal::Pattern(_) => "Redstone pattern",
        };
        match self.position {
            Some(pos) => format!("{} at {}", signal, pos),
            None => format!("{} detected", signal),
        }
    }
}

// =============================================================================
// NPC
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NpcAction {
    StartConversation,
    EndConversation,
    RevealSecret,
    GiveClue,
    AcceptQuest,
    ChangeMood,
}

impl NpcAction {
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::StartConversation => EventKind::ConversationStarted,
            Self::EndConversation => EventKind::ConversationEnded,
            Self::RevealSecret => EventKind::SecretRevealed,
            Self::GiveClue => EventKind::ClueGiven,
            Self::AcceptQuest => EventKind::QuestAccepted,
            Self::ChangeMood => EventKind::MoodChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcTrigger {
    pub action: NpcAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_messages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_secret_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl NpcTrigger {
    pub fn new(action: NpcAction) -> Self {
        Self {
            action,
            npc_id: None,
            character_id: None,
            min_messages: None,
            min_secret_level: None,
            clue_id: None,
            mood: None,
            topic: None,
        }
    }

    pub fn with_npc(mut self, npc_id: impl Into<String>) -> Self {
        self.npc_id = Some(npc_id.into());
        self
    }

    pub fn with_character(mut self, character_id: impl Into<String>) -> Self {
        self.character_id = Some(character_id.into());
        self
    }

    pub fn with_min_messages(mut self, count: u32) -> Self {
        self.min_messages = Some(count);
        self
    }

    pub fn with_min_secret_level(mut self, level: u32) -> Self {
        self.min_secret_level = Some(level);
        self
    }

    pub fn with_clue(mut self, clue_id: impl Into<String>) -> Self {
        self.clue_id = Some(clue_id.into());
        self
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    fn describe(&self) -> String {
        let npc = self.npc_id.as_deref().unwrap_or("an NPC");
        match self.action {
            NpcAction::StartConversation => format!("Talk to {}", npc),
            NpcAction::RevealSecret => format!("Learn secret from {}", npc),
            NpcAction::GiveClue => format!("Get clue from {}", npc),
            NpcAction::AcceptQuest => format!("Accept quest from {}", npc),
            NpcAction::EndConversation | NpcAction::ChangeMood => "NPC interaction".to_string(),
        }
    }
}

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTrigger {
    pub endpoint: String,
    /// Compared case-insensitively; any method when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Header names compare case-insensitively
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
}

impl HttpTrigger {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: None,
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body_contains: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body_containing(mut self, needle: impl Into<String>) -> Self {
        self.body_contains = Some(needle.into());
        self
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.endpoint.trim().is_empty() {
            return Err(DomainError::invalid_trigger("HTTP trigger endpoint cannot be empty"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "HTTP {} to {}",
            self.method.as_deref().unwrap_or("request"),
            self.endpoint
        )
    }
}

// =============================================================================
// Game
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameAction {
    EnterArea,
    ExitArea,
    ObtainItem,
    UseItem,
    InteractBlock,
    InteractEntity,
    KillEntity,
}

impl GameAction {
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::EnterArea => EventKind::AreaEntered,
            Self::ExitArea => EventKind::AreaExited,
            Self::ObtainItem => EventKind::ItemObtained,
            Self::UseItem => EventKind::ItemUsed,
            Self::InteractBlock => EventKind::BlockInteracted,
            Self::InteractEntity => EventKind::EntityInteracted,
            Self::KillEntity => EventKind::EntityKilled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTrigger {
    pub action: GameAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<Area>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_pos: Option<BlockPos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl GameTrigger {
    pub fn new(action: GameAction) -> Self {
        Self {
            action,
            area: None,
            item_id: None,
            min_count: None,
            block_id: None,
            block_pos: None,
            entity_type: None,
            entity_id: None,
        }
    }

    pub fn enter_area(area: Area) -> Self {
        Self::new(GameAction::EnterArea).in_area(area)
    }

    pub fn obtain_item(item_id: impl Into<String>) -> Self {
        let mut trigger = Self::new(GameAction::ObtainItem);
        trigger.item_id = Some(item_id.into());
        trigger
    }

    pub fn kill_entity(entity_type: impl Into<String>) -> Self {
        let mut trigger = Self::new(GameAction::KillEntity);
        trigger.entity_type = Some(entity_type.into());
        trigger
    }

    pub fn in_area(mut self, area: Area) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_min_count(mut self, count: u32) -> Self {
        self.min_count = Some(count);
        self
    }

    pub fn with_block(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = Some(block_id.into());
        self
    }

    pub fn at_block(mut self, pos: BlockPos) -> Self {
        self.block_pos = Some(pos);
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    fn describe(&self) -> String {
        match self.action {
            GameAction::EnterArea => "Enter the designated area".to_string(),
            GameAction::ObtainItem => {
                format!("Obtain {}", self.item_id.as_deref().unwrap_or("an item"))
            }
            GameAction::KillEntity => {
                format!("Defeat {}", self.entity_type.as_deref().unwrap_or("an enemy"))
            }
            _ => "Game objective".to_string(),
        }
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Numeric comparison used by progress-value triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    Greater,
    #[default]
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Comparison {
    pub fn evaluate(self, actual: i64, expected: i64) -> bool {
        match self {
            Self::Equal => actual == expected,
            Self::NotEqual => actual != expected,
            Self::Greater => actual > expected,
            Self::GreaterOrEqual => actual >= expected,
            Self::Less => actual < expected,
            Self::LessOrEqual => actual <= expected,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressCondition {
    /// A progress key compared against a value
    #[serde(rename_all = "camelCase")]
    Value {
        key: String,
        #[serde(default)]
        comparison: Comparison,
        value: i64,
    },
    /// A flag became true
    Flag { flag: String },
    /// A story chapter was unlocked
    #[serde(rename_all = "camelCase")]
    Chapter { story_id: String, chapter_id: String },
}

impl ProgressCondition {
    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::Value { .. } => EventKind::ProgressUpdated,
            Self::Flag { .. } => EventKind::FlagSet,
            Self::Chapter { .. } => EventKind::ChapterUnlocked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTrigger {
    pub condition: ProgressCondition,
}

impl ProgressTrigger {
    pub fn value(key: impl Into<String>, comparison: Comparison, value: i64) -> Self {
        Self {
            condition: ProgressCondition::Value {
                key: key.into(),
                comparison,
                value,
            },
        }
    }

    pub fn flag(flag: impl Into<String>) -> Self {
        Self {
            condition: ProgressCondition::Flag { flag: flag.into() },
        }
    }

    pub fn chapter(story_id: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self {
            condition: ProgressCondition::Chapter {
                story_id: story_id.into(),
                chapter_id: chapter_id.into(),
            },
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        let empty = match &self.condition {
            ProgressCondition::Value { key, .. } => key.trim().is_empty(),
            ProgressCondition::Flag { flag } => flag.trim().is_empty(),
            ProgressCondition::Chapter {
                story_id,
                chapter_id,
            } => story_id.trim().is_empty() || chapter_id.trim().is_empty(),
        };
        if empty {
            return Err(DomainError::invalid_trigger(
                "progress trigger is missing its key",
            ));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.condition {
            ProgressCondition::Value {
                key,
                comparison,
                value,
            } => format!("Progress: {} {} {}", key, comparison.symbol(), value),
            ProgressCondition::Flag { flag } => format!("Complete: {}", flag),
            ProgressCondition::Chapter { chapter_id, .. } => format!("Reach chapter {}", chapter_id),
        }
    }
}

// =============================================================================
// Composite
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositeMode {
    /// Every child must match, across any number of events, in any order
    AllOf,
    /// Any child matching the current event is enough
    AnyOf,
    /// Children must match one after another
    Sequence,
}

impl CompositeMode {
    /// Modes that accumulate satisfied child indices between events.
    pub fn is_stateful(self) -> bool {
        matches!(self, Self::AllOf | Self::Sequence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeTrigger {
    pub mode: CompositeMode,
    pub children: Vec<TriggerSpec>,
}

impl CompositeTrigger {
    pub fn new(mode: CompositeMode, children: Vec<TriggerSpec>) -> Self {
        Self { mode, children }
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.children.is_empty() {
            return Err(DomainError::invalid_trigger("composite trigger has no children"));
        }
        for child in &self.children {
            if child.is_stateful() {
                return Err(DomainError::invalid_trigger(
                    "allOf and sequence triggers cannot be nested inside a composite",
                ));
            }
            child.validate()?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let n = self.children.len();
        match self.mode {
            CompositeMode::AllOf => format!("Complete all: {} objectives", n),
            CompositeMode::AnyOf => format!("Complete any: {} objectives", n),
            CompositeMode::Sequence => format!("Complete in order: {} steps", n),
        }
    }
}

// =============================================================================
// Custom
// =============================================================================

/// Shared event predicate.
#[derive(Clone)]
pub struct TriggerPredicate(Arc<dyn Fn(&Event) -> bool + Send + Sync>);

impl TriggerPredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn test(&self, event: &Event) -> bool {
        (self.0)(event)
    }
}

impl fmt::Debug for TriggerPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TriggerPredicate(..)")
    }
}

#[derive(Debug, Clone)]
pub struct CustomTrigger {
    pub description: String,
    pub predicate: TriggerPredicate,
}
