//! Query-side filtering of canonical events.

use chrono::{DateTime, Utc};

use super::{CanonicalEvent, EventCategory};

/// Conjunction of optional predicates. An empty filter matches everything.
///
/// Time and distance bounds are inclusive; weapon comparison ignores case.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Matches either the killer or the victim.
    pub player_id: Option<String>,
    pub min_distance: Option<f64>,
    pub max_distance: Option<f64>,
    pub weapon: Option<String>,
    pub category: Option<EventCategory>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn player(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn distance(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_distance = min;
        self.max_distance = max;
        self
    }

    pub fn weapon(mut self, weapon: impl Into<String>) -> Self {
        self.weapon = Some(weapon.into());
        self
    }

    pub fn category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        if self.start.is_some_and(|start| event.timestamp < start)
            || self.end.is_some_and(|end| event.timestamp > end)
        {
            return false;
        }

        if let Some(player) = &self.player_id
            && event.killer_id != *player
            && event.victim_id != *player
        {
            return false;
        }

        if self.min_distance.is_some_and(|min| event.distance < min)
            || self.max_distance.is_some_and(|max| event.distance > max)
        {
            return false;
        }

        if let Some(weapon) = &self.weapon
            && !event.weapon.eq_ignore_ascii_case(weapon)
        {
            return false;
        }

        self.category.is_none_or(|category| event.category == category)
    }

    /// Keep the matching events, preserving order.
    pub fn apply<'a, I>(&self, events: I) -> Vec<&'a CanonicalEvent>
    where
        I: IntoIterator<Item = &'a CanonicalEvent>,
    {
        events.into_iter().filter(|e| self.matches(e)).collect()
    }
}
