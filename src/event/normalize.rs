//! Field-name aliasing and canonical event construction.
//!
//! Different log producers name the same column differently. The alias table
//! is an ordered, finite mapping: for every canonical field the first alias
//! that carries a non-empty value wins. Keys that are not aliases of anything
//! pass through to [`CanonicalEvent::extra`].

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;

use super::category::{Classification, categorize};
use super::{CanonicalEvent, UNKNOWN, event_id};
use crate::parser::timestamp;

/// A raw row keyed by source field name, in source order.
pub type RawRecord = IndexMap<String, String>;

/// Canonical fields resolved through the alias table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Timestamp,
    KillerName,
    KillerId,
    VictimName,
    VictimId,
    Weapon,
    Distance,
    KillerPlatform,
    VictimPlatform,
    Map,
    ServerId,
}

/// Alias table, searched in order.
pub const ALIASES: [(Field, &[&str]); 11] = [
    (
        Field::Timestamp,
        &["timestamp", "date", "time", "datetime", "event_time"],
    ),
    (
        Field::KillerName,
        &["killer_name", "attacker_name", "player1_name", "source"],
    ),
    (
        Field::KillerId,
        &["killer_id", "attacker_id", "player1_id", "source_id"],
    ),
    (
        Field::VictimName,
        &["victim_name", "target_name", "player2_name", "target"],
    ),
    (Field::VictimId, &["victim_id", "target_id", "player2_id"]),
    (
        Field::Weapon,
        &["weapon", "weapon_name", "item", "cause", "details"],
    ),
    (Field::Distance, &["distance", "range", "length"]),
    (
        Field::KillerPlatform,
        &["killer_platform", "killer_console", "platform"],
    ),
    (Field::VictimPlatform, &["victim_platform", "victim_console"]),
    (Field::Map, &["map", "location", "area"]),
    (Field::ServerId, &["server_id", "server", "game_server"]),
];

/// Source field carrying a pre-computed event id.
pub const ID_FIELD: &str = "id";
/// Source field carrying an explicit category.
pub const CATEGORY_FIELD: &str = "event_type";
/// Source field carrying an explicit suicide flag.
pub const SUICIDE_FIELD: &str = "is_suicide";

/// Where a record came from.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub server_id: &'a str,
    pub map: Option<&'a str>,
    /// Substituted for unparseable row timestamps.
    pub now: DateTime<Utc>,
}

fn is_reserved(key: &str) -> bool {
    key == ID_FIELD
        || key == CATEGORY_FIELD
        || key == SUICIDE_FIELD
        || ALIASES
            .iter()
            .any(|(_, aliases)| aliases.contains(&key))
}

/// Case-insensitive view of a raw record.
struct Lookup<'r> {
    fields: IndexMap<String, &'r str>,
}

impl<'r> Lookup<'r> {
    fn new(raw: &'r RawRecord) -> Self {
        let mut fields = IndexMap::with_capacity(raw.len());
        for (key, value) in raw {
            fields
                .entry(key.trim().to_ascii_lowercase())
                .or_insert(value.trim());
        }
        Self { fields }
    }

    fn get(&self, key: &str) -> Option<&'r str> {
        self.fields.get(key).copied().filter(|v| !v.is_empty())
    }

    /// First alias present in the record wins, even when its value is empty.
    fn resolve(&self, field: Field) -> Option<&'r str> {
        ALIASES
            .iter()
            .find(|(f, _)| *f == field)
            .and_then(|(_, aliases)| {
                aliases
                    .iter()
                    .find_map(|alias| self.fields.get(*alias).copied())
            })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Coerce a distance to a non-negative float. Anything else becomes `0.0`.
pub fn parse_distance(value: Option<&str>) -> f64 {
    let Some(value) = value else {
        return 0.0;
    };
    match value.parse::<f64>() {
        Ok(distance) if distance.is_finite() && distance >= 0.0 => distance,
        _ => {
            debug!(value, "Non-numeric distance, using 0");
            0.0
        }
    }
}

/// Build a canonical event from a raw record.
///
/// Never fails: missing parts become empty strings, an unparseable timestamp
/// becomes `ctx.now` with `degraded` set.
pub fn normalize(raw: &RawRecord, ctx: &NormalizeContext<'_>) -> CanonicalEvent {
    let lookup = Lookup::new(raw);
    let text = |field| lookup.resolve(field).unwrap_or("").to_string();
    let platform = |field| {
        lookup
            .resolve(field)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string()
    };

    let raw_timestamp = lookup.resolve(Field::Timestamp).unwrap_or("");
    let (timestamp, degraded) = match timestamp::parse(raw_timestamp) {
        Ok(parsed) => (parsed.instant, false),
        Err(_) => (ctx.now, true),
    };

    let killer_name = text(Field::KillerName);
    let killer_id = text(Field::KillerId);
    let victim_name = text(Field::VictimName);
    let victim_id = text(Field::VictimId);
    let weapon = text(Field::Weapon);

    let category = categorize(&Classification {
        explicit_category: lookup.get(CATEGORY_FIELD),
        suicide_flag: lookup.get(SUICIDE_FIELD).and_then(parse_flag),
        timestamp: raw_timestamp,
        killer_name: &killer_name,
        killer_id: &killer_id,
        victim_name: &victim_name,
        victim_id: &victim_id,
        weapon: &weapon,
    });

    let id = match lookup.get(ID_FIELD) {
        Some(id) => id.to_string(),
        None => event_id(raw_timestamp, &killer_name, &victim_name, &weapon),
    };

    let server_id = if ctx.server_id.is_empty() {
        text(Field::ServerId)
    } else {
        ctx.server_id.to_string()
    };
    let map = ctx
        .map
        .or_else(|| lookup.resolve(Field::Map).filter(|v| !v.is_empty()))
        .map(str::to_string);

    let extra = raw
        .iter()
        .filter(|(key, _)| !is_reserved(&key.trim().to_ascii_lowercase()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    CanonicalEvent {
        id,
        timestamp,
        distance: parse_distance(lookup.resolve(Field::Distance)),
        killer_platform: platform(Field::KillerPlatform),
        victim_platform: platform(Field::VictimPlatform),
        killer_name,
        killer_id,
        victim_name,
        victim_id,
        weapon,
        map,
        server_id,
        category,
        degraded,
        extra,
    }
}
