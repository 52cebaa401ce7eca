//! Aggregate roots - domain objects that own their related data
//!
//! Each aggregate:
//! - Has a unique identity
//! - Owns all its constituent parts (enforced by Rust ownership)
//! - Exposes behavior through methods, not public fields
//! - Returns outcome types from mutations

pub mod adventure_instance;

pub use adventure_instance::{
    AdventureInstance, AdventureState, AppliedEvent, CheckpointCompletion, InstanceStateChange,
    InstanceTick,
};
