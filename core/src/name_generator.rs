//! Deterministic names for synthetic investors, funds and SPVs.

use crate::rng::ScenarioRng;

pub struct NameGenerator;

impl NameGenerator {
    /// "First Last" for a natural-person investor.
    pub fn person_name(rng: &mut ScenarioRng) -> String {
        let first = Self::pick(rng, FIRST_NAMES);
        let last = Self::pick(rng, LAST_NAMES);
        format!("{first} {last}")
    }

    /// A pooled vehicle, e.g. "Harbour Growth Feeder Fund".
    pub fn fund_name(rng: &mut ScenarioRng, kind: &str) -> String {
        let place = Self::pick(rng, PLACES);
        let theme = Self::pick(rng, THEMES);
        format!("{place} {theme} {kind}")
    }

    /// A special-purpose vehicle, numbered so names stay unique.
    pub fn spv_name(rng: &mut ScenarioRng, n: usize) -> String {
        let place = Self::pick(rng, PLACES);
        let suffix = Self::pick(rng, SPV_SUFFIXES);
        format!("{place} Asset {n:03} {suffix}")
    }

    fn pick(rng: &mut ScenarioRng, list: &'static [&'static str]) -> &'static str {
        list[rng.next_index(list.len())]
    }
}

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda",
    "David", "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica",
    "Thomas", "Sarah", "Charles", "Karen", "Daniel", "Nancy", "Matthew", "Lisa",
    "Anthony", "Margaret", "Mark", "Sandra", "Paul", "Ashley", "Andrew", "Emily",
    "Ahmed", "Ingrid", "Kenji", "Lucia", "Olu", "Priya", "Sven", "Wei",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis",
    "Rodriguez", "Martinez", "Hernandez", "Lopez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin", "Lee", "Thompson", "White", "Harris", "Clark",
    "Okafor", "Lindqvist", "Tanaka", "Rossi", "Patel", "Nguyen", "Schmidt", "Dubois",
];

const PLACES: &[&str] = &[
    "Harbour", "Northgate", "Meridian", "Summit", "Riverside", "Lakeshore", "Granite",
    "Atlas", "Beacon", "Crescent", "Kestrel", "Pinnacle", "Westbridge", "Albion",
];

const THEMES: &[&str] = &[
    "Growth", "Income", "Opportunities", "Infrastructure", "Credit", "Real Assets",
    "Select", "Balanced", "Strategic", "Global",
];

const SPV_SUFFIXES: &[&str] = &["Holdings S.à r.l.", "Holdings Ltd", "Propco Ltd", "HoldCo B.V.", "SPV LLC"];
