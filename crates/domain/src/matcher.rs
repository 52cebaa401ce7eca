//! Trigger matching
//!
//! Pure functions that test an [`Event`] against a [`TriggerSpec`].
//!
//! [`matches`] is stateless and answers "does this event satisfy the trigger
//! on its own". [`evaluate`] additionally threads the per-checkpoint set of
//! satisfied composite children, which is how `allOf` and `sequence` triggers
//! accumulate progress across events.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entities::{
    CompositeMode, GameTrigger, HttpTrigger, NpcTrigger, ProgressCondition, ProgressTrigger,
    RedstoneSignal, RedstoneTrigger, TriggerSpec,
};
use crate::events::{fields, Event, EventCategory, EventKind};
use crate::ids::CheckpointId;

/// Result of evaluating one event against one checkpoint trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchOutcome {
    NoMatch,
    /// A composite recorded a new child but is not complete yet
    Advanced { satisfied: usize, total: usize },
    Matched,
}

impl MatchOutcome {
    pub fn is_match(self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Outcome for a specific checkpoint, as reported by an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMatch {
    pub checkpoint_id: CheckpointId,
    pub outcome: MatchOutcome,
}

/// Evaluate `spec` against `event`, recording composite progress in `satisfied`.
///
/// `satisfied` only changes for `allOf` and `sequence` composites, and only by
/// adding indices below the child count.
pub fn evaluate(spec: &TriggerSpec, event: &Event, satisfied: &mut BTreeSet<usize>) -> MatchOutcome {
    let TriggerSpec::Composite(composite) = spec else {
        return if matches(spec, event) {
            MatchOutcome::Matched
        } else {
            MatchOutcome::NoMatch
        };
    };

    let total = composite.children.len();
    let before = satisfied.len();

    match composite.mode {
        CompositeMode::AnyOf => {
            return if composite.children.iter().any(|c| matches(c, event)) {
                MatchOutcome::Matched
            } else {
                MatchOutcome::NoMatch
            };
        }
        CompositeMode::AllOf => {
            for (index, child) in composite.children.iter().enumerate() {
                if !satisfied.contains(&index) && matches(child, event) {
                    satisfied.insert(index);
                }
            }
        }
        CompositeMode::Sequence => {
            let next = satisfied.len();
            if let Some(child) = composite.children.get(next) {
                if matches(child, event) {
                    satisfied.insert(next);
                }
            }
        }
    }

    if total > 0 && satisfied.len() >= total {
        MatchOutcome::Matched
    } else if satisfied.len() > before {
        MatchOutcome::Advanced {
            satisfied: satisfied.len(),
            total,
        }
    } else {
        MatchOutcome::NoMatch
    }
}

/// Stateless test of a single event.
///
/// Stateful composites only match here when one event satisfies every child;
/// they never appear nested in a validated adventure.
pub fn matches(spec: &TriggerSpec, event: &Event) -> bool {
    match spec {
        TriggerSpec::Redstone(t) => redstone_matches(t, event),
        TriggerSpec::Npc(t) => npc_matches(t, event),
        TriggerSpec::Http(t) => http_matches(t, event),
        TriggerSpec::Game(t) => game_matches(t, event),
        TriggerSpec::Progress(t) => progress_matches(t, event),
        TriggerSpec::Composite(c) => match c.mode {
            CompositeMode::AnyOf => c.children.iter().any(|child| matches(child, event)),
            CompositeMode::AllOf | CompositeMode::Sequence => {
                !c.children.is_empty() && c.children.iter().all(|child| matches(child, event))
            }
        },
        TriggerSpec::Manual => event.kind() == EventKind::Manual,
        TriggerSpec::Custom(c) => c.predicate.test(event),
    }
}

fn text_is(event: &Event, key: &str, expected: Option<&str>) -> bool {
    expected.map_or(true, |want| event.text(key) == Some(want))
}

fn at_least(event: &Event, key: &str, min: Option<u32>) -> bool {
    min.map_or(true, |min| {
        event.int(key).is_some_and(|value| value >= i64::from(min))
    })
}

fn is_subset(required: &BTreeMap<String, String>, actual: Option<&BTreeMap<String, String>>) -> bool {
    if required.is_empty() {
        return true;
    }
    let Some(actual) = actual else {
        return false;
    };
    required
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}

fn redstone_matches(trigger: &RedstoneTrigger, event: &Event) -> bool {
    if event.category() != EventCategory::Redstone {
        return false;
    }

    if let Some(target) = trigger.position {
        let Some(pos) = event.position() else {
            return false;
        };
        let in_range = match trigger.radius {
            Some(radius) => target.is_within(&pos, radius),
            None => target == pos,
        };
        if !in_range {
            return false;
        }
    }

    if !text_is(event, fields::BLOCK_ID, trigger.block_id.as_deref()) {
        return false;
    }

    match &trigger.signal {
        RedstoneSignal::On => at_least(event, fields::STRENGTH, Some(trigger.min_strength.unwrap_or(1))),
        RedstoneSignal::Off => event.int(fields::STRENGTH) == Some(0),
        RedstoneSignal::Pulse => {
            event.bool(fields::PULSE) == Some(true)
                && at_least(event, fields::STRENGTH, trigger.min_strength)
        }
        RedstoneSignal::Pattern(pattern) => {
            event.text(fields::PATTERN) == Some(pattern.as_str())
                && at_least(event, fields::STRENGTH, trigger.min_strength)
        }
    }
}

fn npc_matches(trigger: &NpcTrigger, event: &Event) -> bool {
    event.kind() == trigger.action.event_kind()
        && text_is(event, fields::NPC_ID, trigger.npc_id.as_deref())
        && text_is(event, fields::CHARACTER_ID, trigger.character_id.as_deref())
        && at_least(event, fields::MESSAGE_COUNT, trigger.min_messages)
        && at_least(event, fields::SECRET_LEVEL, trigger.min_secret_level)
        && text_is(event, fields::CLUE_ID, trigger.clue_id.as_deref())
        && text_is(event, fields::MOOD, trigger.mood.as_deref())
        && text_is(event, fields::TOPIC, trigger.topic.as_deref())
}

fn http_matches(trigger: &HttpTrigger, event: &Event) -> bool {
    if event.category() != EventCategory::Http {
        return false;
    }
    if event.text(fields::ENDPOINT) != Some(trigger.endpoint.as_str()) {
        return false;
    }
    if let Some(method) = &trigger.method {
        let same = event
            .text(fields::METHOD)
            .is_some_and(|m| m.eq_ignore_ascii_case(method));
        if !same {
            return false;
        }
    }
    if !is_subset(&trigger.params, event.map(fields::PARAMS)) {
        return false;
    }
    if !trigger.headers.is_empty() {
        let Some(headers) = event.map(fields::HEADERS) else {
            return false;
        };
        let all_present = trigger.headers.iter().all(|(name, value)| {
            headers
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case(name) && v == value)
        });
        if !all_present {
            return false;
        }
    }
    match &trigger.body_contains {
        Some(needle) => event
            .text(fields::BODY)
            .is_some_and(|body| body.contains(needle.as_str())),
        None => true,
    }
}

fn game_matches(trigger: &GameTrigger, event: &Event) -> bool {
    if event.kind() != trigger.action.event_kind() {
        return false;
    }
    if let Some(area) = &trigger.area {
        if !event.position().is_some_and(|pos| area.contains(&pos)) {
            return false;
        }
    }
    if let Some(block_pos) = trigger.block_pos {
        if event.position() != Some(block_pos) {
            return false;
        }
    }
    if let Some(min) = trigger.min_count {
        // item events without a count carry a single item
        let count = event.int(fields::COUNT).unwrap_or(1);
        if count < i64::from(min) {
            return false;
        }
    }
    text_is(event, fields::ITEM_ID, trigger.item_id.as_deref())
        && text_is(event, fields::BLOCK_ID, trigger.block_id.as_deref())
        && text_is(event, fields::ENTITY_TYPE, trigger.entity_type.as_deref())
        && text_is(event, fields::ENTITY_ID, trigger.entity_id.as_deref())
}

fn progress_matches(trigger: &ProgressTrigger, event: &Event) -> bool {
    if event.kind() != trigger.condition.event_kind() {
        return false;
    }
    match &trigger.condition {
        ProgressCondition::Value {
            key,
            comparison,
            value,
        } => {
            event.text(fields::KEY) == Some(key.as_str())
                && event
                    .int(fields::VALUE)
                    .is_some_and(|actual| comparison.evaluate(actual, *value))
        }
        ProgressCondition::Flag { flag } => event.text(fields::FLAG) == Some(flag.as_str()),
        ProgressCondition::Chapter {
            story_id,
            chapter_id,
        } => {
            event.text(fields::STORY_ID) == Some(story_id.as_str())
                && event.text(fields::CHAPTER_ID) == Some(chapter_id.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Comparison, GameAction, NpcAction};
    use crate::value_objects::{Area, BlockPos};

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    mod redstone {
        use super::*;

        #[test]
        fn exact_position_without_radius() {
            let spec: TriggerSpec = RedstoneTrigger::new().at(BlockPos::new(50, 65, 50)).into();
            assert!(matches(&spec, &Event::redstone_changed(BlockPos::new(50, 65, 50), 0, 15)));
            assert!(!matches(&spec, &Event::redstone_changed(BlockPos::new(50, 65, 51), 0, 15)));
        }

        #[test]
        fn radius_uses_euclidean_distance() {
            let spec: TriggerSpec = RedstoneTrigger::new()
                .at(BlockPos::new(0, 64, 0))
                .within(5)
                .into();
            assert!(matches(&spec, &Event::redstone_changed(BlockPos::new(3, 68, 0), 0, 1)));
            assert!(!matches(&spec, &Event::redstone_changed(BlockPos::new(4, 68, 0), 0, 1)));
        }

        #[test]
        fn strength_threshold_defaults_to_one() {
            let spec: TriggerSpec = RedstoneTrigger::new().into();
            assert!(!matches(&spec, &Event::redstone_changed(BlockPos::new(0, 0, 0), 5, 0)));
            assert!(matches(&spec, &Event::redstone_changed(BlockPos::new(0, 0, 0), 0, 1)));

            let strong: TriggerSpec = RedstoneTrigger::new().with_min_strength(10).into();
            assert!(!matches(&strong, &Event::redstone_changed(BlockPos::new(0, 0, 0), 0, 9)));
            assert!(matches(&strong, &Event::redstone_changed(BlockPos::new(0, 0, 0), 0, 10)));
        }

        #[test]
        fn off_signal_requires_zero_strength() {
            let spec: TriggerSpec = RedstoneTrigger::new().with_signal(RedstoneSignal::Off).into();
            assert!(matches(&spec, &Event::redstone_changed(BlockPos::new(0, 0, 0), 15, 0)));
            assert!(!matches(&spec, &Event::redstone_changed(BlockPos::new(0, 0, 0), 0, 15)));
        }

        #[test]
        fn external_redstone_source_counts_as_redstone() {
            let spec: TriggerSpec = RedstoneTrigger::new().into();
            let mut data = BTreeMap::new();
            data.insert(fields::STRENGTH.to_string(), 15i64.into());
            let event = Event::external_trigger("redstone", "relay-1", data);
            assert!(matches(&spec, &event));
        }
    }

    mod npc {
        use super::*;

        #[test]
        fn filters_by_npc_and_message_count() {
            let spec: TriggerSpec = NpcTrigger::new(NpcAction::EndConversation)
                .with_npc("oracle")
                .with_min_messages(3)
                .into();
            assert!(matches(&spec, &Event::conversation_ended("oracle", 3)));
            assert!(!matches(&spec, &Event::conversation_ended("oracle", 2)));
            assert!(!matches(&spec, &Event::conversation_ended("guard", 5)));
        }

        #[test]
        fn action_must_match_event_kind() {
            let spec: TriggerSpec = NpcTrigger::new(NpcAction::RevealSecret).with_npc("oracle").into();
            assert!(!matches(&spec, &Event::conversation_started("oracle", "c1")));
            assert!(matches(&spec, &Event::secret_revealed("oracle", 1)));
        }

        #[test]
        fn secret_level_is_a_minimum() {
            let spec: TriggerSpec = NpcTrigger::new(NpcAction::RevealSecret)
                .with_min_secret_level(2)
                .into();
            assert!(!matches(&spec, &Event::secret_revealed("oracle", 1)));
            assert!(matches(&spec, &Event::secret_revealed("oracle", 3)));
        }
    }

    mod http {
        use super::*;

        #[test]
        fn method_is_case_insensitive() {
            let spec: TriggerSpec = HttpTrigger::new("/qr").with_method("post").into();
            assert!(matches(&spec, &Event::http_received("/qr", "POST", BTreeMap::new())));
            assert!(!matches(&spec, &Event::http_received("/qr", "GET", BTreeMap::new())));
        }

        #[test]
        fn any_method_when_unspecified() {
            let spec: TriggerSpec = HttpTrigger::new("/qr").into();
            assert!(matches(&spec, &Event::http_received("/qr", "GET", BTreeMap::new())));
            assert!(!matches(&spec, &Event::http_received("/other", "GET", BTreeMap::new())));
        }

        #[test]
        fn params_must_be_a_subset() {
            let spec: TriggerSpec = HttpTrigger::new("/door").with_param("code", "1234").into();
            let ok = Event::http_received("/door", "POST", params(&[("code", "1234"), ("x", "y")]));
            let wrong = Event::http_received("/door", "POST", params(&[("code", "0000")]));
            let missing = Event::http_received("/door", "POST", BTreeMap::new());
            assert!(matches(&spec, &ok));
            assert!(!matches(&spec, &wrong));
            assert!(!matches(&spec, &missing));
        }

        #[test]
        fn headers_and_body() {
            let spec: TriggerSpec = HttpTrigger::new("/hook")
                .with_header("X-Token", "secret")
                .with_body_containing("unlock")
                .into();
            let event = Event::http_received("/hook", "POST", BTreeMap::new())
                .with_field(fields::HEADERS, params(&[("x-token", "secret")]))
                .with_field(fields::BODY, "please unlock the gate");
            assert!(matches(&spec, &event));

            let no_body = Event::http_received("/hook", "POST", BTreeMap::new())
                .with_field(fields::HEADERS, params(&[("x-token", "secret")]));
            assert!(!matches(&spec, &no_body));
        }

        #[test]
        fn qr_scan_counts_as_http() {
            let spec: TriggerSpec = HttpTrigger::new("/qr/clue-1").into();
            let mut data = BTreeMap::new();
            data.insert(fields::ENDPOINT.to_string(), "/qr/clue-1".into());
            assert!(matches(&spec, &Event::external_trigger("qr_code", "clue-1", data)));
        }
    }

    mod game {
        use super::*;

        #[test]
        fn item_id_and_count() {
            let spec: TriggerSpec = GameTrigger::obtain_item("minecraft:diamond")
                .with_min_count(3)
                .into();
            assert!(matches(&spec, &Event::item_obtained("minecraft:diamond", 3)));
            assert!(!matches(&spec, &Event::item_obtained("minecraft:diamond", 2)));
            assert!(!matches(&spec, &Event::item_obtained("minecraft:emerald", 5)));
            assert!(!matches(&spec, &Event::item_used("minecraft:diamond")));
        }

        #[test]
        fn area_containment() {
            let area = Area::new(BlockPos::new(0, 60, 0), BlockPos::new(10, 70, 10));
            let spec: TriggerSpec = GameTrigger::enter_area(area).into();
            assert!(matches(&spec, &Event::area_entered(BlockPos::new(5, 64, 5))));
            assert!(!matches(&spec, &Event::area_entered(BlockPos::new(11, 64, 5))));
            assert!(!matches(&spec, &Event::area_exited(BlockPos::new(5, 64, 5))));
        }

        #[test]
        fn block_position() {
            let spec: TriggerSpec = GameTrigger::new(GameAction::InteractBlock)
                .with_block("minecraft:lever")
                .at_block(BlockPos::new(1, 2, 3))
                .into();
            assert!(matches(&spec, &Event::block_interacted("minecraft:lever", BlockPos::new(1, 2, 3))));
            assert!(!matches(&spec, &Event::block_interacted("minecraft:lever", BlockPos::new(1, 2, 4))));
        }
    }

    mod progress {
        use super::*;

        #[test]
        fn value_comparisons() {
            let spec: TriggerSpec = ProgressTrigger::value("keys", Comparison::GreaterOrEqual, 3).into();
            assert!(matches(&spec, &Event::progress_updated("keys", 3)));
            assert!(!matches(&spec, &Event::progress_updated("keys", 2)));
            assert!(!matches(&spec, &Event::progress_updated("doors", 5)));

            let ne: TriggerSpec = ProgressTrigger::value("keys", Comparison::NotEqual, 0).into();
            assert!(matches(&ne, &Event::progress_updated("keys", 1)));
        }

        #[test]
        fn flag_and_chapter() {
            let flag: TriggerSpec = ProgressTrigger::flag("gate_open").into();
            assert!(matches(&flag, &Event::flag_set("gate_open")));
            assert!(!matches(&flag, &Event::flag_set("gate_closed")));

            let chapter: TriggerSpec = ProgressTrigger::chapter("main", "ch2").into();
            assert!(matches(&chapter, &Event::chapter_unlocked("main", "ch2")));
            assert!(!matches(&chapter, &Event::chapter_unlocked("side", "ch2")));
        }
    }

    mod composite {
        use super::*;

        fn item(id: &str) -> TriggerSpec {
            GameTrigger::obtain_item(id).into()
        }

        #[test]
        fn all_of_matches_in_any_order() {
            let spec = TriggerSpec::all_of(vec![item("a"), item("b"), item("c")]);
            let mut satisfied = BTreeSet::new();

            assert_eq!(
                evaluate(&spec, &Event::item_obtained("c", 1), &mut satisfied),
                MatchOutcome::Advanced { satisfied: 1, total: 3 }
            );
            assert_eq!(
                evaluate(&spec, &Event::item_obtained("c", 1), &mut satisfied),
                MatchOutcome::NoMatch
            );
            assert_eq!(
                evaluate(&spec, &Event::item_obtained("a", 1), &mut satisfied),
                MatchOutcome::Advanced { satisfied: 2, total: 3 }
            );
            assert_eq!(
                evaluate(&spec, &Event::item_obtained("b", 1), &mut satisfied),
                MatchOutcome::Matched
            );
            assert_eq!(satisfied.len(), 3);
        }

        #[test]
        fn all_of_counts_every_child_one_event_satisfies() {
            let spec = TriggerSpec::all_of(vec![item("a"), GameTrigger::new(GameAction::ObtainItem).into()]);
            let mut satisfied = BTreeSet::new();
            assert!(evaluate(&spec, &Event::item_obtained("a", 1), &mut satisfied).is_match());
        }

        #[test]
        fn any_of_is_stateless() {
            let spec = TriggerSpec::any_of(vec![
                HttpTrigger::new("/qr").into(),
                RedstoneTrigger::new().at(BlockPos::new(50, 65, 50)).into(),
            ]);
            let mut satisfied = BTreeSet::new();
            assert!(evaluate(&spec, &Event::http_received("/qr", "GET", BTreeMap::new()), &mut satisfied)
                .is_match());
            assert!(satisfied.is_empty());
            assert_eq!(
                evaluate(&spec, &Event::item_obtained("x", 1), &mut satisfied),
                MatchOutcome::NoMatch
            );
        }

        #[test]
        fn sequence_ignores_out_of_order_events() {
            let spec = TriggerSpec::sequence(vec![
                item("minecraft:keycard"),
                RedstoneTrigger::new().at(BlockPos::new(60, 65, 0)).into(),
            ]);
            let mut satisfied = BTreeSet::new();
            let redstone = Event::redstone_changed(BlockPos::new(60, 65, 0), 0, 15);

            assert_eq!(evaluate(&spec, &redstone, &mut satisfied), MatchOutcome::NoMatch);
            assert!(satisfied.is_empty());

            assert_eq!(
                evaluate(&spec, &Event::item_obtained("minecraft:keycard", 1), &mut satisfied),
                MatchOutcome::Advanced { satisfied: 1, total: 2 }
            );
            assert_eq!(evaluate(&spec, &redstone, &mut satisfied), MatchOutcome::Matched);
        }

        #[test]
        fn nested_any_of_inside_all_of() {
            let spec = TriggerSpec::all_of(vec![
                TriggerSpec::any_of(vec![item("a"), item("b")]),
                ProgressTrigger::flag("door").into(),
            ]);
            let mut satisfied = BTreeSet::new();
            evaluate(&spec, &Event::item_obtained("b", 1), &mut satisfied);
            assert!(evaluate(&spec, &Event::flag_set("door"), &mut satisfied).is_match());
        }
    }

    #[test]
    fn manual_and_custom() {
        let cp = CheckpointId::new("door").unwrap();
        assert!(matches(&TriggerSpec::Manual, &Event::manual(&cp)));
        assert!(!matches(&TriggerSpec::Manual, &Event::flag_set("door")));

        let custom = TriggerSpec::custom("Any flag starting with 'g'", |e| {
            e.text(fields::FLAG).is_some_and(|f| f.starts_with('g'))
        });
        assert!(matches(&custom, &Event::flag_set("gate")));
        assert!(!matches(&custom, &Event::flag_set("door")));
    }
}
