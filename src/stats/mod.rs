//! Player statistics aggregated from canonical events.
//!
//! Kills credit the killer and charge the victim. Suicides and deaths without
//! a killer only charge the victim. Events of unknown category are ignored.

pub mod players;

pub use players::{PlayerStats, PlayerSummary, Rival};

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::event::{CanonicalEvent, EventCategory};

type Players = IndexMap<String, PlayerStats>;

fn entry<'a>(
    players: &'a mut Players,
    player_id: &str,
    name: &str,
    platform: &str,
    event: &CanonicalEvent,
) -> &'a mut PlayerStats {
    players
        .entry(player_id.to_string())
        .or_insert_with(|| PlayerStats::new(player_id, name, platform, event.timestamp))
}

fn record(players: &mut Players, event: &CanonicalEvent) {
    if event.victim_id.is_empty() {
        return;
    }

    match event.category {
        EventCategory::Kill if !event.killer_id.is_empty() => {
            entry(
                players,
                &event.killer_id,
                &event.killer_name,
                &event.killer_platform,
                event,
            )
            .record_kill(event);
            entry(
                players,
                &event.victim_id,
                &event.victim_name,
                &event.victim_platform,
                event,
            )
            .record_death(event);
        }
        EventCategory::Kill | EventCategory::Death => {
            entry(
                players,
                &event.victim_id,
                &event.victim_name,
                &event.victim_platform,
                event,
            )
            .record_death(event);
        }
        EventCategory::Suicide => {
            entry(
                players,
                &event.victim_id,
                &event.victim_name,
                &event.victim_platform,
                event,
            )
            .record_suicide(event);
        }
        EventCategory::Unknown => {}
    }
}

fn summarize(players: &Players) -> Vec<PlayerSummary> {
    let name_of = |id: &str| players.get(id).map(|p| p.player_name.as_str());
    players.values().map(|p| p.summary(name_of)).collect()
}

/// Aggregate a batch of events into per-player stats, keyed by player id.
pub fn aggregate<'a>(events: impl IntoIterator<Item = &'a CanonicalEvent>) -> Players {
    let mut players = Players::new();
    for event in events {
        record(&mut players, event);
    }
    players
}

/// Summaries for a batch of events, in first-seen order.
pub fn summaries<'a>(events: impl IntoIterator<Item = &'a CanonicalEvent>) -> Vec<PlayerSummary> {
    summarize(&aggregate(events))
}

/// Process-lifetime player statistics for every server.
#[derive(Debug, Default)]
pub struct PlayerStatsAggregator {
    servers: DashMap<String, Players>,
}

impl PlayerStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &CanonicalEvent) {
        let mut players = self.servers.entry(event.server_id.clone()).or_default();
        record(&mut players, event);
    }

    /// Leaderboard for one server, most kills first.
    pub fn leaderboard(&self, server_id: &str) -> Vec<PlayerSummary> {
        let Some(players) = self.servers.get(server_id) else {
            return Vec::new();
        };
        let mut board = summarize(&players);
        board.sort_by(|a, b| {
            b.kills
                .cmp(&a.kills)
                .then_with(|| a.deaths.cmp(&b.deaths))
                .then_with(|| a.player_name.cmp(&b.player_name))
        });
        board
    }

    pub fn player(&self, server_id: &str, player_id: &str) -> Option<PlayerSummary> {
        let players = self.servers.get(server_id)?;
        let name_of = |id: &str| players.get(id).map(|p| p.player_name.as_str());
        players.get(player_id).map(|p| p.summary(name_of))
    }

    pub fn player_count(&self, server_id: &str) -> usize {
        self.servers.get(server_id).map_or(0, |p| p.len())
    }
}
