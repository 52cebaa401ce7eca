//! Eira Engine - demo runner.
//!
//! Loads the configured adventure definitions, starts one instance per
//! definition for a demo team, replays the configured event script through
//! the bus, and prints the resulting instance snapshots.

use std::sync::Arc;

use anyhow::Context;
use eira_domain::TeamId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eira_engine::infrastructure::{
    action_sink::LoggingActionSink, clock::SystemClock, config::EngineConfig,
};
use eira_engine::{script, App};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the binary may run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eira_engine=debug,eira_domain=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Eira Engine");

    let config = EngineConfig::from_env()?;
    let script_path = config.script_path.clone();
    let app = App::new(
        config,
        Arc::new(LoggingActionSink::new()),
        Arc::new(SystemClock::new()),
    )?;

    let adventures = app
        .load_adventures()
        .await
        .context("loading adventure definitions")?;
    if adventures.is_empty() {
        tracing::warn!("No adventures loaded; set EIRA_ADVENTURE_PATH");
    }

    let team = TeamId::new();
    let mut instances = Vec::new();
    for adventure in adventures {
        let id = app
            .tracker
            .initialize_instance(adventure, team)
            .context("starting demo instance")?;
        instances.push(id);
    }

    if let Some(path) = script_path {
        let events = script::load_script(&path)
            .await
            .with_context(|| format!("loading event script {}", path.display()))?;
        for event in events {
            let event = if event.team_scope().is_none() && event.actor().is_none() {
                event.with_team(team)
            } else {
                event
            };
            app.bus.publish_sync(event)?;
        }
        app.bus.wait_idle().await;
    }

    for id in instances {
        let snapshot = app.tracker.snapshot(id)?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    app.shutdown().await;
    Ok(())
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
