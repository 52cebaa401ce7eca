//! Bus events
//!
//! Every event published on the bus is an [`Event`]: a closed [`EventKind`]
//! tag, a source identifier, and an ordered map of named primitive fields.
//! Producers (game bridge, HTTP listener, NPC mod) normalize into this shape;
//! the trigger matcher only ever reads it.
//!
//! ## Categories
//!
//! Triggers are written against an [`EventCategory`], not a single kind. Most
//! kinds map to a fixed category; `ExternalTrigger` derives its category from
//! the event source (see [`Event::category`]).

mod event;

pub use event::{fields, Event, FieldValue};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of event kinds carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    // NPC
    ConversationStarted,
    ConversationEnded,
    SecretRevealed,
    ClueGiven,
    QuestAccepted,
    MoodChanged,

    // HTTP / external hardware
    HttpReceived,
    ExternalTrigger,
    RedstoneChanged,

    // Game world
    AreaEntered,
    AreaExited,
    ItemObtained,
    ItemUsed,
    BlockInteracted,
    EntityInteracted,
    EntityKilled,

    // Progress
    ProgressUpdated,
    FlagSet,
    ChapterUnlocked,

    // Adventure lifecycle
    AdventureStarted,
    CheckpointReached,
    CheckpointUnlocked,
    AdventureCompleted,
    AdventureFailed,

    // Teams
    TeamCreated,
    TeamDisbanded,
    TeamMemberJoined,
    TeamMemberLeft,

    /// A server command about to run. Handlers may veto it by cancelling.
    ServerCommand,

    /// Admin/API forced completion of a named checkpoint
    Manual,
}

impl EventKind {
    /// Kinds that can drive checkpoint triggers.
    pub const TRIGGER_KINDS: &'static [EventKind] = &[
        EventKind::ConversationStarted,
        EventKind::ConversationEnded,
        EventKind::SecretRevealed,
        EventKind::ClueGiven,
        EventKind::QuestAccepted,
        EventKind::MoodChanged,
        EventKind::HttpReceived,
        EventKind::ExternalTrigger,
        EventKind::RedstoneChanged,
        EventKind::AreaEntered,
        EventKind::AreaExited,
        EventKind::ItemObtained,
        EventKind::ItemUsed,
        EventKind::BlockInteracted,
        EventKind::EntityInteracted,
        EventKind::EntityKilled,
        EventKind::ProgressUpdated,
        EventKind::FlagSet,
        EventKind::ChapterUnlocked,
        EventKind::Manual,
    ];

    /// Only cancellable kinds honor [`Event::cancel`].
    pub fn is_cancellable(self) -> bool {
        matches!(self, EventKind::ServerCommand)
    }

    pub fn default_category(self) -> EventCategory {
        use EventKind::*;
        match self {
            ConversationStarted | ConversationEnded | SecretRevealed | ClueGiven
            | QuestAccepted | MoodChanged => EventCategory::Npc,
            HttpReceived => EventCategory::Http,
            ExternalTrigger => EventCategory::External,
            RedstoneChanged => EventCategory::Redstone,
            AreaEntered | AreaExited | ItemObtained | ItemUsed | BlockInteracted
            | EntityInteracted | EntityKilled => EventCategory::Game,
            ProgressUpdated | FlagSet | ChapterUnlocked => EventCategory::Progress,
            AdventureStarted | CheckpointReached | CheckpointUnlocked | AdventureCompleted
            | AdventureFailed => EventCategory::Adventure,
            TeamCreated | TeamDisbanded | TeamMemberJoined | TeamMemberLeft => {
                EventCategory::Team
            }
            ServerCommand => EventCategory::Command,
            Manual => EventCategory::Manual,
        }
    }

    pub fn as_str(self) -> &'static str {
        use EventKind::*;
        match self {
            ConversationStarted => "conversationStarted",
            ConversationEnded => "conversationEnded",
            SecretRevealed => "secretRevealed",
            ClueGiven => "clueGiven",
            QuestAccepted => "questAccepted",
            MoodChanged => "moodChanged",
            HttpReceived => "httpReceived",
            ExternalTrigger => "externalTrigger",
            RedstoneChanged => "redstoneChanged",
            AreaEntered => "areaEntered",
            AreaExited => "areaExited",
            ItemObtained => "itemObtained",
            ItemUsed => "itemUsed",
            BlockInteracted => "blockInteracted",
            EntityInteracted => "entityInteracted",
            EntityKilled => "entityKilled",
            ProgressUpdated => "progressUpdated",
            FlagSet => "flagSet",
            ChapterUnlocked => "chapterUnlocked",
            AdventureStarted => "adventureStarted",
            CheckpointReached => "checkpointReached",
            CheckpointUnlocked => "checkpointUnlocked",
            AdventureCompleted => "adventureCompleted",
            AdventureFailed => "adventureFailed",
            TeamCreated => "teamCreated",
            TeamDisbanded => "teamDisbanded",
            TeamMemberJoined => "teamMemberJoined",
            TeamMemberLeft => "teamMemberLeft",
            ServerCommand => "serverCommand",
            Manual => "manual",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping used by simple triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventCategory {
    Redstone,
    Npc,
    Http,
    Game,
    Progress,
    Adventure,
    Team,
    Command,
    Manual,
    /// External trigger from an unrecognized source
    External,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_server_commands_are_cancellable() {
        assert!(EventKind::ServerCommand.is_cancellable());
        assert!(!EventKind::ItemObtained.is_cancellable());
        assert!(!EventKind::Manual.is_cancellable());
    }

    #[test]
    fn trigger_kinds_exclude_lifecycle_events() {
        assert!(!EventKind::TRIGGER_KINDS.contains(&EventKind::CheckpointReached));
        assert!(!EventKind::TRIGGER_KINDS.contains(&EventKind::ServerCommand));
        assert!(EventKind::TRIGGER_KINDS.contains(&EventKind::Manual));
    }

    #[test]
    fn kind_names_match_serde() {
        for kind in EventKind::TRIGGER_KINDS {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
