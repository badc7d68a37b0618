//! The opaque player identifier and the total order used for initiation
//! direction and host election.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque, non-empty identifier for a participant in the mesh.
///
/// The only semantic use of a [`PlayerId`] is its place in the total order
/// defined by [`compare_player_ids`] — the value itself carries no other
/// meaning to this crate.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wraps a raw string as a [`PlayerId`]. Callers are responsible for the
    /// non-empty invariant; this type does not validate it, matching the
    /// source spec's treatment of the id as opaque.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw string this id was built from.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PlayerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl PartialOrd for PlayerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlayerId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_player_ids(&self.0, &other.0)
    }
}

/// Returns whether `raw` is made up exclusively of ASCII digits (and is
/// non-empty) — the precondition for the numeric comparison branch below.
fn is_digit_run(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

/// The total order on raw id strings used for both initiator-direction
/// selection and host election (source spec §4.7):
///
/// - if both ids are pure digit runs, compare them as big integers (so
///   `"2"` sorts before `"10"`); on numeric equality, fall back to strict
///   lexicographic order of the raw strings (so `"02"` sorts before `"2"`);
/// - otherwise, strict byte-wise lexicographic order, locale-independent.
pub fn compare_player_ids(a: &str, b: &str) -> Ordering {
    if is_digit_run(a) && is_digit_run(b) {
        let a_trimmed = a.trim_start_matches('0');
        let b_trimmed = b.trim_start_matches('0');
        let numeric = a_trimmed
            .len()
            .cmp(&b_trimmed.len())
            .then_with(|| a_trimmed.cmp(b_trimmed));
        return numeric.then_with(|| a.as_bytes().cmp(b.as_bytes()));
    }
    a.as_bytes().cmp(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_runs_compare_numerically() {
        assert_eq!(compare_player_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_player_ids("10", "2"), Ordering::Greater);
    }

    #[test]
    fn numeric_tie_falls_back_to_lexicographic() {
        assert_eq!(compare_player_ids("02", "2"), Ordering::Less);
        assert_eq!(compare_player_ids("2", "02"), Ordering::Greater);
        assert_eq!(compare_player_ids("2", "2"), Ordering::Equal);
    }

    #[test]
    fn mixed_ids_are_byte_lexicographic() {
        assert_eq!(compare_player_ids("2", "A"), Ordering::Less);
        assert_eq!(compare_player_ids("Alice", "Bob"), Ordering::Less);
    }

    #[test]
    fn player_id_ord_matches_free_function() {
        let mut ids: Vec<PlayerId> = vec!["10", "2", "A"].into_iter().map(PlayerId::from).collect();
        ids.sort();
        let raw: Vec<&str> = ids.iter().map(PlayerId::as_str).collect();
        assert_eq!(raw, vec!["2", "10", "A"]);
    }
}
