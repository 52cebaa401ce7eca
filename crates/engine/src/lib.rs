//! Eira Engine library.
//!
//! Runtime half of the adventure system: the in-process event bus and the
//! checkpoint engine that consumes it.
//!
//! ## Structure
//!
//! - `event_bus/` - Subscriptions, priority delivery, worker pool
//! - `tracker/` - Adventure instances driven by bus events
//! - `registry` - Validated adventure definitions
//! - `infrastructure/` - Ports and their adapters, configuration
//! - `script` - JSON-lines event scripts for the demo runner
//! - `app` - Application composition

pub mod app;
pub mod event_bus;
pub mod infrastructure;
pub mod registry;
pub mod script;
pub mod tracker;

pub use app::App;
