//! Suicide detection and event categorisation.
//!
//! Both functions are pure over a borrowed view of an event. The rule order
//! is significant: reordering changes observed classifications.

use super::EventCategory;

/// Weapon fragments that mark a self-inflicted death when no killer id exists.
const SELF_INFLICTED_CAUSES: [&str; 8] = [
    "suicide",
    "fall",
    "falldamage",
    "thirst",
    "hunger",
    "malarky",
    "zombie",
    "radiation",
];

const SUICIDE_PHRASES: [&str; 3] = ["suicide", "killed themselves", "took their own life"];

const ENVIRONMENT_KILLERS: [&str; 3] = ["environment", "world", "game"];

const ENVIRONMENT_WEAPONS: [&str; 6] = [
    "environment",
    "world",
    "game",
    "fall damage",
    "falldamage",
    "radiation",
];

/// The fields categorisation looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classification<'a> {
    pub explicit_category: Option<&'a str>,
    pub suicide_flag: Option<bool>,
    pub timestamp: &'a str,
    pub killer_name: &'a str,
    pub killer_id: &'a str,
    pub victim_name: &'a str,
    pub victim_id: &'a str,
    pub weapon: &'a str,
}

fn present(value: &str) -> bool {
    !value.trim().is_empty()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Layered suicide heuristic. First matching rule wins.
pub fn is_suicide(event: &Classification<'_>) -> bool {
    if let Some(flag) = event.suicide_flag {
        return flag;
    }

    let weapon = event.weapon.to_lowercase();

    if present(event.killer_id) && present(event.victim_id) && event.killer_id == event.victim_id {
        return true;
    }

    if !present(event.killer_id)
        && present(event.victim_id)
        && contains_any(&weapon, &SELF_INFLICTED_CAUSES)
    {
        return true;
    }

    if present(event.killer_name)
        && present(event.victim_name)
        && event.killer_name.to_lowercase() == event.victim_name.to_lowercase()
    {
        return true;
    }

    if contains_any(&weapon, &SUICIDE_PHRASES) {
        return true;
    }

    let killer = event.killer_name.trim().to_lowercase();
    ENVIRONMENT_KILLERS.contains(&killer.as_str()) || contains_any(&weapon, &ENVIRONMENT_WEAPONS)
}

/// Assign a category: explicit value, then suicide, then kill/death, else unknown.
pub fn categorize(event: &Classification<'_>) -> EventCategory {
    if let Some(label) = event.explicit_category.filter(|l| present(l)) {
        return match EventCategory::from_label(label) {
            Some(category) => category,
            None => {
                tracing::debug!(value = label, "Unrecognised explicit event category");
                EventCategory::Unknown
            }
        };
    }

    if is_suicide(event) {
        return EventCategory::Suicide;
    }

    if present(event.victim_name) && present(event.timestamp) {
        return if present(event.killer_name) {
            EventCategory::Kill
        } else {
            EventCategory::Death
        };
    }

    EventCategory::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view<'a>(
        killer_name: &'a str,
        killer_id: &'a str,
        victim_name: &'a str,
        victim_id: &'a str,
        weapon: &'a str,
    ) -> Classification<'a> {
        Classification {
            timestamp: "2025.05.04-00.09.16",
            killer_name,
            killer_id,
            victim_name,
            victim_id,
            weapon,
            ..Default::default()
        }
    }

    #[test]
    fn test_same_ids_is_suicide() {
        let event = view("Njshh", "1", "Njshh", "1", "suicide_by_relocation");
        assert!(is_suicide(&event));
        assert_eq!(categorize(&event), EventCategory::Suicide);
    }

    #[test]
    fn test_plain_kill() {
        let event = view("OGz DelBoy", "55", "TedTornado", "77", "land_vehicle");
        assert!(!is_suicide(&event));
        assert_eq!(categorize(&event), EventCategory::Kill);
    }

    #[test]
    fn test_missing_killer_id_with_fall() {
        let event = view("", "", "Bob", "9", "Fall");
        assert_eq!(categorize(&event), EventCategory::Suicide);
    }

    #[test]
    fn test_self_inflicted_cause_needs_empty_killer_id() {
        // "hunger" only counts as a cause of death when there is no killer id.
        let event = view("Alice", "3", "Bob", "9", "hunger_strike_rifle");
        assert!(!is_suicide(&event));
    }

    #[test]
    fn test_names_compare_case_insensitively() {
        let event = view("bob", "1", "BOB", "2", "AK-74");
        assert!(is_suicide(&event));
    }

    #[test]
    fn test_suicide_phrases() {
        let event = view("Alice", "1", "Bob", "2", "Killed Themselves");
        assert!(is_suicide(&event));
    }

    #[test]
    fn test_environment_killer_and_weapon() {
        assert!(is_suicide(&view("World", "1", "Bob", "2", "AK-74")));
        assert!(is_suicide(&view("Alice", "1", "Bob", "2", "Radiation zone")));
        assert!(!is_suicide(&view("Worldwide", "1", "Bob", "2", "AK-74")));
    }

    #[test]
    fn test_explicit_flag_and_category_win() {
        let flagged = Classification {
            suicide_flag: Some(true),
            ..view("Alice", "1", "Bob", "2", "AK-74")
        };
        assert_eq!(categorize(&flagged), EventCategory::Suicide);

        let cleared = Classification {
            suicide_flag: Some(false),
            ..view("Njshh", "1", "Njshh", "1", "suicide_by_relocation")
        };
        assert!(!is_suicide(&cleared));
        assert_eq!(categorize(&cleared), EventCategory::Kill);

        let explicit = Classification {
            explicit_category: Some("death"),
            ..view("Bob", "1", "Bob", "1", "suicide")
        };
        assert_eq!(categorize(&explicit), EventCategory::Death);

        let bogus = Classification {
            explicit_category: Some("teamkill"),
            ..view("Alice", "1", "Bob", "2", "AK-74")
        };
        assert_eq!(categorize(&bogus), EventCategory::Unknown);
    }

    #[test]
    fn test_death_and_unknown() {
        assert_eq!(
            categorize(&view("", "1", "Bob", "2", "AK-74")),
            EventCategory::Death
        );
        assert_eq!(
            categorize(&view("Alice", "1", "", "2", "AK-74")),
            EventCategory::Unknown
        );
    }
}
