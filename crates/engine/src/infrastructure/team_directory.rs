//! In-memory team membership.
//!
//! Teams are owned by the external store; this directory mirrors membership
//! from the team lifecycle events the bridge publishes.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use eira_domain::{Event, EventKind, PlayerId, TeamId};

use crate::event_bus::{HandlerError, HandlerGroup, Priority, SubscriptionOptions};
use crate::infrastructure::ports::TeamDirectory;

#[derive(Debug, Default)]
pub struct InMemoryTeamDirectory {
    teams: DashMap<TeamId, BTreeSet<PlayerId>>,
}

impl InMemoryTeamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, team: TeamId, player: PlayerId) {
        self.teams.entry(team).or_default().insert(player);
        tracing::debug!(team_id = %team, player_id = %player, "Team member added");
    }

    /// Returns false if the player was not on the team.
    pub fn remove_member(&self, team: TeamId, player: PlayerId) -> bool {
        self.teams
            .get_mut(&team)
            .map(|mut members| members.remove(&player))
            .unwrap_or(false)
    }

    pub fn disband(&self, team: TeamId) -> bool {
        self.teams.remove(&team).is_some()
    }

    pub fn members(&self, team: TeamId) -> Vec<PlayerId> {
        self.teams
            .get(&team)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn team_of(&self, player: PlayerId) -> Option<TeamId> {
        self.teams
            .iter()
            .find(|entry| entry.value().contains(&player))
            .map(|entry| *entry.key())
    }

    /// Handlers that keep this directory in step with team events.
    ///
    /// They run at `High` priority so membership is current before the
    /// instance tracker sees any event from the same publisher.
    pub fn handler_group(self: &Arc<Self>) -> HandlerGroup {
        let options = SubscriptionOptions::new().with_priority(Priority::High);
        let created = Arc::clone(self);
        let joined = Arc::clone(self);
        let left = Arc::clone(self);
        let disbanded = Arc::clone(self);

        HandlerGroup::new("team-directory")
            .on(EventKind::TeamCreated, options, move |event| {
                let team = require_team(event)?;
                created.teams.entry(team).or_default();
                Ok(())
            })
            .on(EventKind::TeamMemberJoined, options, move |event| {
                let (team, player) = require_membership(event)?;
                joined.add_member(team, player);
                Ok(())
            })
            .on(EventKind::TeamMemberLeft, options, move |event| {
                let (team, player) = require_membership(event)?;
                left.remove_member(team, player);
                Ok(())
            })
            .on(EventKind::TeamDisbanded, options, move |event| {
                let team = require_team(event)?;
                disbanded.disband(team);
                Ok(())
            })
    }
}

impl TeamDirectory for InMemoryTeamDirectory {
    fn is_member_of_team(&self, team: TeamId, player: PlayerId) -> bool {
        self.teams
            .get(&team)
            .is_some_and(|members| members.contains(&player))
    }
}

fn require_team(event: &Event) -> Result<TeamId, HandlerError> {
    event
        .team()
        .ok_or_else(|| HandlerError::failed(format!("{} event without a team", event.kind())))
}

fn require_membership(event: &Event) -> Result<(TeamId, PlayerId), HandlerError> {
    let team = require_team(event)?;
    let player = event
        .actor()
        .ok_or_else(|| HandlerError::failed(format!("{} event without a player", event.kind())))?;
    Ok((team, player))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    #[test]
    fn membership() {
        let directory = InMemoryTeamDirectory::new();
        let team = TeamId::new();
        let alice = PlayerId::new();
        let bob = PlayerId::new();

        directory.add_member(team, alice);
        assert!(directory.is_member_of_team(team, alice));
        assert!(!directory.is_member_of_team(team, bob));
        assert_eq!(directory.team_of(alice), Some(team));

        assert!(directory.remove_member(team, alice));
        assert!(!directory.remove_member(team, alice));
        assert!(directory.members(team).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn follows_team_events() {
        let bus = EventBus::new(1).unwrap();
        let directory = Arc::new(InMemoryTeamDirectory::new());
        bus.register_handler_group(directory.handler_group());

        let team = TeamId::new();
        let player = PlayerId::new();
        bus.publish_sync(Event::team_created(team, "Red")).unwrap();
        bus.publish_sync(Event::team_member_joined(team, player)).unwrap();
        assert!(directory.is_member_of_team(team, player));

        bus.publish_sync(Event::team_member_left(team, player)).unwrap();
        assert!(!directory.is_member_of_team(team, player));

        bus.publish_sync(Event::team_disbanded(team)).unwrap();
        assert!(directory.team_of(player).is_none());
    }
}
