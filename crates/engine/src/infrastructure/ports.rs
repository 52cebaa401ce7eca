//! Port traits for infrastructure boundaries.
//!
//! These are the only abstractions the runtime depends on. Ports exist for:
//! - Checkpoint actions (in-game broadcasts, webhooks, redstone output)
//! - Team membership lookups (owned by the external store)
//! - Clock (for testing)

use chrono::{DateTime, Utc};
use eira_domain::{AdventureId, CheckpointAction, CheckpointId, InstanceId, PlayerId, TeamId};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action '{action}' is not supported by this sink")]
    Unsupported { action: &'static str },
    #[error("Action delivery failed: {0}")]
    Delivery(String),
}

impl ActionError {
    pub fn delivery(message: impl ToString) -> Self {
        Self::Delivery(message.to_string())
    }
}

// =============================================================================
// Action Context
// =============================================================================

/// Where a checkpoint action came from. Passed to every sink call so adapters
/// can route team broadcasts and tag webhooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionContext {
    pub instance_id: InstanceId,
    pub adventure_id: AdventureId,
    pub team_id: TeamId,
    pub checkpoint_id: CheckpointId,
    pub checkpoint_name: String,
}

// =============================================================================
// Outbound Ports
// =============================================================================

/// Receives completion side effects.
///
/// Called outside any instance lock, once per action, in definition order.
#[cfg_attr(test, mockall::automock)]
pub trait ActionSink: Send + Sync {
    fn execute_action(
        &self,
        context: &ActionContext,
        action: &CheckpointAction,
    ) -> Result<(), ActionError>;
}

/// Team membership as seen by the external store.
#[cfg_attr(test, mockall::automock)]
pub trait TeamDirectory: Send + Sync {
    fn is_member_of_team(&self, team: TeamId, player: PlayerId) -> bool;
}

// =============================================================================
// Testability Ports
// =============================================================================

#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
