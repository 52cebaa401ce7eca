pub mod aggregates;
pub mod entities;
pub mod error;
pub mod events;
pub mod ids;
pub mod matcher;
pub mod value_objects;

// Re-export definition entities
pub use entities::{
    Adventure, AdventureKind, Checkpoint, CheckpointAction, CheckpointHint, Comparison,
    CompositeMode, CompositeTrigger, CustomTrigger, GameAction, GameTrigger, HttpTrigger,
    NpcAction, NpcTrigger, ProgressCondition, ProgressTrigger, RedstoneSignal, RedstoneTrigger,
    TriggerPredicate, TriggerSpec,
};

pub use aggregates::{
    AdventureInstance, AdventureState, AppliedEvent, CheckpointCompletion, InstanceStateChange,
    InstanceTick,
};

pub use error::DomainError;
pub use events::{fields, Event, EventCategory, EventKind, FieldValue};

pub use matcher::{CheckpointMatch, MatchOutcome};

// Re-export ID types
pub use ids::{AdventureId, CheckpointId, InstanceId, PlayerId, TeamId};

// Re-export value objects
pub use value_objects::{Area, BlockPos, CheckpointProgress, CheckpointState};
