//! Domain entities - Adventure definitions and their triggers

mod adventure;
mod checkpoint;
mod trigger;

pub use adventure::{Adventure, AdventureKind};
pub use checkpoint::{Checkpoint, CheckpointAction, CheckpointHint};
pub use trigger::{
    Comparison, CompositeMode, CompositeTrigger, CustomTrigger, GameAction, GameTrigger,
    HttpTrigger, NpcAction, NpcTrigger, ProgressCondition, ProgressTrigger, RedstoneSignal,
    RedstoneTrigger, TriggerPredicate, TriggerSpec,
};
