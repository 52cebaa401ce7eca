//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod action_sink;
pub mod clock;
pub mod config;
pub mod ports;
pub mod team_directory;
