//! Event bus and checkpoint engine working together.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eira_domain::{
    Adventure, AdventureId, AdventureState, BlockPos, Checkpoint, CheckpointAction, CheckpointId,
    CheckpointState, Event, EventKind, GameTrigger, HttpTrigger, RedstoneTrigger, TeamId,
    TriggerSpec,
};
use eira_engine::event_bus::{BusError, EventBus, SubscriptionOptions};
use eira_engine::infrastructure::action_sink::RecordingActionSink;
use eira_engine::infrastructure::clock::SystemClock;
use eira_engine::infrastructure::team_directory::InMemoryTeamDirectory;
use eira_engine::registry::AdventureRegistry;
use eira_engine::tracker::InstanceTracker;

fn cp(id: &str) -> CheckpointId {
    CheckpointId::new(id).unwrap()
}

struct Engine {
    bus: Arc<EventBus>,
    registry: Arc<AdventureRegistry>,
    tracker: Arc<InstanceTracker>,
    sink: Arc<RecordingActionSink>,
}

fn engine() -> Engine {
    let bus = Arc::new(EventBus::new(4).unwrap());
    let registry = Arc::new(AdventureRegistry::new());
    let sink = Arc::new(RecordingActionSink::new());
    let teams = Arc::new(InMemoryTeamDirectory::new());
    bus.register_handler_group(teams.handler_group());
    let tracker = Arc::new(InstanceTracker::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        sink.clone(),
        teams,
        Arc::new(SystemClock::new()),
    ));
    tracker.attach();
    Engine {
        bus,
        registry,
        tracker,
        sink,
    }
}

/// A (obtain diamond) unlocks B; C is ANY_OF(http /qr, redstone at
/// 50,65,50); D is SEQUENCE(keycard, redstone at 60,65,0).
fn heist() -> Adventure {
    Adventure::new(AdventureId::new("heist").unwrap(), "The Heist")
        .with_checkpoint(
            Checkpoint::new(cp("a"), "Find a diamond", GameTrigger::obtain_item("minecraft:diamond"))
                .unlocks(cp("b"))
                .with_action(CheckpointAction::broadcast("Diamond secured")),
        )
        .with_checkpoint(
            Checkpoint::new(cp("b"), "Reach the vault", TriggerSpec::Manual).requires(cp("a")),
        )
        .with_checkpoint(Checkpoint::new(
            cp("c"),
            "Disable the alarm",
            TriggerSpec::any_of(vec![
                HttpTrigger::new("/qr").into(),
                RedstoneTrigger::new().at(BlockPos::new(50, 65, 50)).into(),
            ]),
        ))
        .with_checkpoint(Checkpoint::new(
            cp("d"),
            "Open the side door",
            TriggerSpec::sequence(vec![
                GameTrigger::obtain_item("keycard").into(),
                RedstoneTrigger::new().at(BlockPos::new(60, 65, 0)).into(),
            ]),
        ))
}

#[tokio::test(flavor = "multi_thread")]
async fn obtaining_the_item_completes_a_and_opens_b() {
    let e = engine();
    let id = e.tracker.initialize_instance(Arc::new(heist()), TeamId::new()).unwrap();

    e.bus.publish_sync(Event::item_obtained("minecraft:diamond", 1)).unwrap();

    assert_eq!(e.tracker.get_checkpoint_state(id, &cp("a")).unwrap(), CheckpointState::Completed);
    assert_eq!(e.tracker.get_checkpoint_state(id, &cp("b")).unwrap(), CheckpointState::Available);
    assert_eq!(
        e.sink.broadcasts(),
        vec!["Diamond secured", "[New Objective] Reach the vault"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn any_of_completes_on_either_child() {
    let e = engine();
    let adventure = Arc::new(heist().with_max_teams(2));
    let by_http = e.tracker.initialize_instance(adventure.clone(), TeamId::new()).unwrap();

    e.bus.publish_sync(Event::http_received("/qr", "POST", BTreeMap::new())).unwrap();
    assert_eq!(e.tracker.get_checkpoint_state(by_http, &cp("c")).unwrap(), CheckpointState::Completed);

    let team = TeamId::new();
    let by_redstone = e.tracker.initialize_instance(adventure, team).unwrap();
    e.bus
        .publish_sync(Event::redstone_changed(BlockPos::new(50, 65, 51), 0, 15).with_team(team))
        .unwrap();
    assert_eq!(e.tracker.get_checkpoint_state(by_redstone, &cp("c")).unwrap(), CheckpointState::Available);

    e.bus
        .publish_sync(Event::redstone_changed(BlockPos::new(50, 65, 50), 0, 15).with_team(team))
        .unwrap();
    assert_eq!(e.tracker.get_checkpoint_state(by_redstone, &cp("c")).unwrap(), CheckpointState::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_ignores_out_of_order_steps() {
    let e = engine();
    let id = e.tracker.initialize_instance(Arc::new(heist()), TeamId::new()).unwrap();
    let door = BlockPos::new(60, 65, 0);

    e.bus.publish_sync(Event::redstone_changed(door, 0, 15)).unwrap();
    let snapshot = e.tracker.snapshot(id).unwrap();
    let d = snapshot.checkpoint(&cp("d")).unwrap();
    assert_eq!(d.state, CheckpointState::Available);
    assert_eq!(d.satisfied, 0);

    e.bus.publish_sync(Event::item_obtained("keycard", 1)).unwrap();
    assert_eq!(e.tracker.get_checkpoint_state(id, &cp("d")).unwrap(), CheckpointState::InProgress);

    e.bus.publish_sync(Event::redstone_changed(door, 15, 0)).unwrap();
    assert_eq!(e.tracker.get_checkpoint_state(id, &cp("d")).unwrap(), CheckpointState::InProgress);

    e.bus.publish_sync(Event::redstone_changed(door, 0, 15)).unwrap();
    assert_eq!(e.tracker.get_checkpoint_state(id, &cp("d")).unwrap(), CheckpointState::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_publishes_complete_once() {
    let e = engine();
    let id = e.tracker.initialize_instance(Arc::new(heist()), TeamId::new()).unwrap();

    let publishers: Vec<_> = (0..16)
        .map(|_| {
            let bus = Arc::clone(&e.bus);
            tokio::spawn(async move {
                bus.publish(Event::item_obtained("minecraft:diamond", 1)).unwrap();
            })
        })
        .collect();
    for publisher in publishers {
        publisher.await.unwrap();
    }
    e.bus.wait_idle().await;

    assert_eq!(e.tracker.get_checkpoint_state(id, &cp("a")).unwrap(), CheckpointState::Completed);
    let secured = e
        .sink
        .broadcasts()
        .into_iter()
        .filter(|m| m == "Diamond secured")
        .count();
    assert_eq!(secured, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn completing_everything_finishes_the_adventure() {
    let e = engine();
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completed);
    e.bus.subscribe(EventKind::AdventureCompleted, SubscriptionOptions::new(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let id = e.tracker.initialize_instance(Arc::new(heist()), TeamId::new()).unwrap();

    for event in [
        Event::item_obtained("minecraft:diamond", 1),
        Event::manual(&cp("b")),
        Event::http_received("/qr", "GET", BTreeMap::new()),
        Event::item_obtained("keycard", 1),
        Event::redstone_changed(BlockPos::new(60, 65, 0), 0, 15),
    ] {
        e.bus.publish_sync(event).unwrap();
    }
    e.bus.wait_idle().await;

    assert_eq!(e.tracker.state(id).unwrap(), AdventureState::Completed);
    assert_eq!(e.tracker.progress(id).unwrap(), 1.0);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_async_handlers() {
    let bus = EventBus::new(2).unwrap();
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    bus.subscribe(
        EventKind::FlagSet,
        SubscriptionOptions::new().asynchronous(),
        move |_| {
            std::thread::sleep(Duration::from_millis(20));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    for i in 0..5 {
        bus.publish(Event::flag_set(format!("flag-{}", i))).unwrap();
    }
    bus.shutdown().await;

    assert_eq!(handled.load(Ordering::SeqCst), 5);
    assert_eq!(
        bus.publish(Event::flag_set("late")).unwrap_err(),
        BusError::Shutdown
    );
    assert!(bus.publish_sync(Event::flag_set("late")).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_instances_fail_on_tick() {
    let e = engine();
    let adventure = heist().with_time_limit(Duration::from_secs(60));
    let id = e.tracker.initialize_instance(Arc::new(adventure), TeamId::new()).unwrap();

    assert!(e.tracker.tick(chrono::Utc::now()).is_empty());
    let later = chrono::Utc::now() + chrono::Duration::seconds(61);
    assert_eq!(e.tracker.tick(later), vec![id]);
    assert_eq!(e.tracker.state(id).unwrap(), AdventureState::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn json_definitions_drive_instances() {
    let e = engine();
    let json = r#"{
        "id": "relay",
        "name": "Relay",
        "timeLimitSecs": 900,
        "checkpoints": [
            {"id": "scan", "name": "Scan the poster",
             "trigger": {"type": "composite", "mode": "anyOf", "children": [
                 {"type": "http", "endpoint": "/qr"},
                 {"type": "redstone", "position": {"x": 50, "y": 65, "z": 50}}
             ]},
             "unlocks": ["talk"], "points": 5},
            {"id": "talk", "name": "Talk to the guard",
             "trigger": {"type": "npc", "action": "startConversation", "npcId": "guard"},
             "prerequisites": ["scan"], "points": 10}
        ]
    }"#;
    let loaded = e.registry.load_json(json).unwrap();
    assert_eq!(loaded.len(), 1);

    let id = e
        .tracker
        .start(&AdventureId::new("relay").unwrap(), TeamId::new())
        .unwrap();
    e.bus.publish_sync(Event::http_received("/qr", "GET", BTreeMap::new())).unwrap();
    e.bus
        .publish_sync(Event::conversation_started("guard", "player-1"))
        .unwrap();

    assert_eq!(e.tracker.state(id).unwrap(), AdventureState::Completed);
    assert_eq!(e.tracker.score(id).unwrap(), 15);
    assert!(e.tracker.remaining(id).unwrap().is_some());
}
