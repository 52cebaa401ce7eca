//! Unified error types for the domain layer
//!
//! Provides a common error type for definition validation, trigger
//! configuration problems, and illegal state-machine transitions, so adapters
//! never need to fall back to String or anyhow.

use thiserror::Error;

/// Unified error type for domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Validation failed (e.g., invalid field values)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid ID format
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Entity not found
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Malformed trigger specification, caught at adventure registration
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// State transition not allowed
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl DomainError {
    /// Creates a validation error for definition rules that were violated.
    ///
    /// Use this when an adventure or checkpoint definition is inconsistent:
    /// - Required fields are empty or missing
    /// - Identifiers are duplicated or dangling
    /// - The prerequisite graph contains a cycle
    ///
    /// # Example
    /// ```ignore
    /// if adventure.checkpoints.is_empty() {
    ///     return Err(DomainError::validation("adventure has no checkpoints"));
    /// }
    /// ```
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Create an invalid ID error
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Create an invalid trigger error
    pub fn invalid_trigger(msg: impl Into<String>) -> Self {
        Self::InvalidTrigger(msg.into())
    }

    /// Create an invalid state transition error
    pub fn invalid_state_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    /// True for errors the caller can recover from by retrying later
    /// (an illegal transition on the current state, as opposed to a bad id).
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::InvalidStateTransition(_))
    }
}
