//! Payload comparison for completed pairs.

use std::fmt::Write;

use super::outcome::OutcomeStatus;

/// Marker appended when more differing positions exist than were reported.
pub const ELISION_MARKER: &str = "(more differences...)";

/// Compares two payloads character by character.
///
/// Equal payloads are a match with no summary. Otherwise the summary starts
/// with a length note when the lengths differ, then lists at most
/// `preview_limit` differing positions over the common prefix length.
pub fn classify(legacy: &str, modern: &str, preview_limit: usize) -> (OutcomeStatus, Option<String>) {
    if legacy == modern {
        return (OutcomeStatus::Match, None);
    }
    (
        OutcomeStatus::Mismatch,
        Some(diff_summary(legacy, modern, preview_limit)),
    )
}

fn diff_summary(legacy: &str, modern: &str, preview_limit: usize) -> String {
    let mut out = String::new();

    let legacy_len = legacy.chars().count();
    let modern_len = modern.chars().count();
    if legacy_len != modern_len {
        let _ = write!(out, "Length differs: legacy={legacy_len}, modern={modern_len}; ");
    }

    let mut reported = 0usize;
    let mut elided = false;
    for (pos, (a, b)) in legacy.chars().zip(modern.chars()).enumerate() {
        if a == b {
            continue;
        }
        if reported == preview_limit {
            elided = true;
            break;
        }
        let _ = write!(out, "Pos {pos}: '{a}' vs '{b}'; ");
        reported += 1;
    }

    if elided {
        out.push_str(ELISION_MARKER);
    }

    out.trim_end().to_string()
}
