//! Per-player statistics.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::event::{CanonicalEvent, UNKNOWN};

/// Running totals for one player on one server.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStats {
    pub player_id: String,
    pub player_name: String,
    pub kills: u64,
    pub deaths: u64,
    pub suicides: u64,
    pub weapons: IndexMap<String, u64>,
    pub victims: IndexMap<String, u64>,
    pub killers: IndexMap<String, u64>,
    pub longest_kill: f64,
    pub total_distance: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub platform: String,
    pub kills_by_platform: IndexMap<String, u64>,
    pub deaths_by_platform: IndexMap<String, u64>,
}

/// A counterpart player and how often they were met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rival {
    pub player_id: String,
    pub player_name: String,
    pub count: u64,
}

/// Serializable view of [`PlayerStats`] with derived values filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSummary {
    pub player_id: String,
    pub player_name: String,
    pub kills: u64,
    pub deaths: u64,
    pub suicides: u64,
    pub kd_ratio: f64,
    pub longest_kill: f64,
    pub avg_kill_distance: f64,
    pub favorite_weapon: Option<String>,
    pub most_killed: Option<Rival>,
    pub nemesis: Option<Rival>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub platform: String,
    pub kills_by_platform: IndexMap<String, u64>,
    pub deaths_by_platform: IndexMap<String, u64>,
    /// Platform this player has killed most often, if any platform is known.
    pub dominant_platform: Option<String>,
}

/// Highest count wins; ties go to whichever was seen first.
pub(crate) fn top(counts: &IndexMap<String, u64>) -> Option<(&str, u64)> {
    let mut best: Option<(&str, u64)> = None;
    for (key, count) in counts {
        if best.is_none_or(|(_, c)| *count > c) {
            best = Some((key.as_str(), *count));
        }
    }
    best
}

fn bump(map: &mut IndexMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

fn known(value: &str) -> bool {
    !value.is_empty() && value != UNKNOWN
}

impl PlayerStats {
    pub fn new(
        player_id: impl Into<String>,
        player_name: impl Into<String>,
        platform: impl Into<String>,
        seen: DateTime<Utc>,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            player_name: player_name.into(),
            kills: 0,
            deaths: 0,
            suicides: 0,
            weapons: IndexMap::new(),
            victims: IndexMap::new(),
            killers: IndexMap::new(),
            longest_kill: 0.0,
            total_distance: 0.0,
            first_seen: seen,
            last_seen: seen,
            platform: platform.into(),
            kills_by_platform: IndexMap::new(),
            deaths_by_platform: IndexMap::new(),
        }
    }

    fn touch(&mut self, name: &str, platform: &str, at: DateTime<Utc>) {
        if !name.is_empty() {
            self.player_name = name.to_string();
        }
        if known(platform) {
            self.platform = platform.to_string();
        }
        self.first_seen = self.first_seen.min(at);
        self.last_seen = self.last_seen.max(at);
    }

    /// Credit a kill described by `event` to this player as the killer.
    pub(crate) fn record_kill(&mut self, event: &CanonicalEvent) {
        self.touch(&event.killer_name, &event.killer_platform, event.timestamp);
        self.kills += 1;
        let weapon = if event.weapon.is_empty() { UNKNOWN } else { event.weapon.as_str() };
        bump(&mut self.weapons, weapon);
        bump(&mut self.victims, &event.victim_id);
        self.total_distance += event.distance;
        self.longest_kill = self.longest_kill.max(event.distance);
        if known(&event.victim_platform) {
            bump(&mut self.kills_by_platform, &event.victim_platform);
        }
    }

    /// Count a death described by `event` against this player as the victim.
    pub(crate) fn record_death(&mut self, event: &CanonicalEvent) {
        self.touch(&event.victim_name, &event.victim_platform, event.timestamp);
        self.deaths += 1;
        if !event.killer_id.is_empty() {
            bump(&mut self.killers, &event.killer_id);
            if known(&event.killer_platform) {
                bump(&mut self.deaths_by_platform, &event.killer_platform);
            }
        }
    }

    pub(crate) fn record_suicide(&mut self, event: &CanonicalEvent) {
        self.touch(&event.victim_name, &event.victim_platform, event.timestamp);
        self.deaths += 1;
        self.suicides += 1;
    }

    /// Kills per death, treating zero deaths as one.
    pub fn kd_ratio(&self) -> f64 {
        self.kills as f64 / self.deaths.max(1) as f64
    }

    pub fn avg_kill_distance(&self) -> f64 {
        if self.kills == 0 {
            0.0
        } else {
            self.total_distance / self.kills as f64
        }
    }

    pub fn favorite_weapon(&self) -> Option<&str> {
        top(&self.weapons).map(|(weapon, _)| weapon)
    }

    /// Build the summary; `name_of` resolves counterpart ids to display names.
    pub fn summary<'a>(&self, name_of: impl Fn(&str) -> Option<&'a str>) -> PlayerSummary {
        let rival = |counts: &IndexMap<String, u64>| {
            top(counts).map(|(id, count)| Rival {
                player_id: id.to_string(),
                player_name: name_of(id).unwrap_or(UNKNOWN).to_string(),
                count,
            })
        };

        PlayerSummary {
            player_id: self.player_id.clone(),
            player_name: self.player_name.clone(),
            kills: self.kills,
            deaths: self.deaths,
            suicides: self.suicides,
            kd_ratio: self.kd_ratio(),
            longest_kill: self.longest_kill,
            avg_kill_distance: self.avg_kill_distance(),
            favorite_weapon: self.favorite_weapon().map(str::to_string),
            most_killed: rival(&self.victims),
            nemesis: rival(&self.killers),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            platform: self.platform.clone(),
            kills_by_platform: self.kills_by_platform.clone(),
            deaths_by_platform: self.deaths_by_platform.clone(),
            dominant_platform: top(&self.kills_by_platform).map(|(p, _)| p.to_string()),
        }
    }
}
