//! Application state and composition.

use std::sync::{Arc, Mutex, PoisonError};

use eira_domain::Adventure;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event_bus::{BusError, EventBus, HandlerGroupId};
use crate::infrastructure::{
    config::EngineConfig,
    ports::{ActionSink, ClockPort},
    team_directory::InMemoryTeamDirectory,
};
use crate::registry::{AdventureRegistry, RegistryError};
use crate::tracker::InstanceTracker;

/// Main application state.
///
/// Owns the bus and everything subscribed to it. Must be created inside a
/// tokio runtime.
pub struct App {
    pub config: EngineConfig,
    pub bus: Arc<EventBus>,
    pub registry: Arc<AdventureRegistry>,
    pub tracker: Arc<InstanceTracker>,
    pub teams: Arc<InMemoryTeamDirectory>,
    team_group: HandlerGroupId,
    cancel_token: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    pub fn new(
        config: EngineConfig,
        actions: Arc<dyn ActionSink>,
        clock: Arc<dyn ClockPort>,
    ) -> Result<Self, BusError> {
        let bus = Arc::new(EventBus::new(config.bus_workers)?);
        let registry = Arc::new(AdventureRegistry::new());
        let teams = Arc::new(InMemoryTeamDirectory::new());

        let team_group = bus.register_handler_group(teams.handler_group());
        let tracker = Arc::new(InstanceTracker::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            actions,
            teams.clone(),
            Arc::clone(&clock),
        ));
        tracker.attach();

        let cancel_token = CancellationToken::new();
        let ticker = tokio::spawn(tick_loop(
            Arc::clone(&tracker),
            clock,
            config.tick_interval,
            cancel_token.clone(),
        ));

        tracing::info!(
            bus_workers = config.bus_workers,
            tick_interval_ms = config.tick_interval.as_millis() as u64,
            "Engine composed"
        );

        Ok(Self {
            config,
            bus,
            registry,
            tracker,
            teams,
            team_group,
            cancel_token,
            ticker: Mutex::new(Some(ticker)),
        })
    }

    /// Register the definitions at `EIRA_ADVENTURE_PATH`, if configured.
    pub async fn load_adventures(&self) -> Result<Vec<Arc<Adventure>>, RegistryError> {
        match &self.config.adventure_path {
            Some(path) => self.registry.load_file(path).await,
            None => Ok(Vec::new()),
        }
    }

    /// Stop the tick loop, fail every active instance, and drain the bus.
    pub async fn shutdown(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        tracing::info!("Engine shutting down");
        self.cancel_token.cancel();

        let ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                tracing::warn!(error = %e, "Tick loop ended abnormally");
            }
        }

        self.tracker.shutdown();
        self.tracker.detach();
        self.bus.unregister_handler_group(self.team_group);
        self.bus.shutdown().await;
    }
}

async fn tick_loop(
    tracker: Arc<InstanceTracker>,
    clock: Arc<dyn ClockPort>,
    period: std::time::Duration,
    cancel_token: CancellationToken,
) {
    tracing::debug!(period_ms = period.as_millis() as u64, "Tick loop started");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::debug!("Tick loop stopped");
                break;
            }
            _ = interval.tick() => {
                let failed = tracker.tick(clock.now());
                if !failed.is_empty() {
                    tracing::warn!(count = failed.len(), "Timed out adventure instances");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use eira_domain::{
        AdventureId, AdventureState, Checkpoint, CheckpointId, Event, PlayerId, TeamId,
        TriggerSpec,
    };

    use crate::infrastructure::action_sink::RecordingActionSink;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::ports::MockClockPort;

    fn app_with_clock(tick_ms: u64, clock: Arc<dyn ClockPort>) -> App {
        let config = EngineConfig {
            tick_interval: Duration::from_millis(tick_ms),
            ..EngineConfig::default()
        };
        App::new(config, Arc::new(RecordingActionSink::new()), clock).unwrap()
    }

    fn app(tick_ms: u64) -> App {
        app_with_clock(tick_ms, Arc::new(SystemClock::new()))
    }

    fn sprint(limit: Duration) -> Adventure {
        Adventure::new(AdventureId::new("sprint").unwrap(), "Sprint")
            .with_time_limit(limit)
            .with_checkpoint(Checkpoint::new(
                CheckpointId::new("finish").unwrap(),
                "Finish",
                TriggerSpec::Manual,
            ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wires_tracker_and_team_directory() {
        let app = app(1000);
        let stats = app.bus.stats();
        assert_eq!(stats.handler_groups, 2);

        let (team, player) = (TeamId::new(), PlayerId::new());
        app.bus.publish_sync(Event::team_member_joined(team, player)).unwrap();
        assert_eq!(app.teams.team_of(player), Some(team));

        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_loop_fails_expired_instances() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);
        let mut clock = MockClockPort::new();
        clock.expect_now().returning(move || {
            if flag.load(Ordering::SeqCst) {
                start + chrono::Duration::seconds(2)
            } else {
                start
            }
        });
        let app = app_with_clock(20, Arc::new(clock));
        let adventure = app.registry.register(sprint(Duration::from_secs(1))).unwrap();
        let id = app.tracker.initialize_instance(adventure, TeamId::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(app.tracker.state(id).unwrap(), AdventureState::Running);

        expired.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(app.tracker.state(id).unwrap(), AdventureState::Failed);
        app.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_is_idempotent_and_closes_the_bus() {
        let app = app(1000);
        let adventure = app.registry.register(sprint(Duration::from_secs(600))).unwrap();
        app.tracker.initialize_instance(adventure, TeamId::new()).unwrap();

        app.shutdown().await;
        app.shutdown().await;

        assert!(app.tracker.is_empty());
        assert!(app.bus.is_shut_down());
        assert_eq!(app.bus.stats().handler_groups, 0);
        assert!(app.bus.publish(Event::flag_set("late")).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_adventure_path_loads_nothing() {
        let app = app(1000);
        assert!(app.load_adventures().await.unwrap().is_empty());
        app.shutdown().await;
    }
}
