//! Value objects - Immutable objects defined by their attributes

mod checkpoint_progress;
mod position;

// Per-checkpoint runtime state and its transition rules
pub use checkpoint_progress::{CheckpointProgress, CheckpointState};

// World coordinates used by redstone and area triggers
pub use position::{Area, BlockPos};
