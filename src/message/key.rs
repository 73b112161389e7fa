//! Correlation key extraction.
//!
//! Every message starts with a fixed-width header identifying the logical
//! business event it belongs to:
//!
//! ```text
//! producer tag (7) | date MMDDYYYY (8) | time HHMMSS (6) | sequence (3)
//! ```
//!
//! Widths are counted in characters, not bytes.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Key length in characters.
pub const KEY_LEN: usize = 24;

const TAG_END: usize = 7;
const DATE_END: usize = 15;
const TIME_END: usize = 21;

/// Errors that can occur while extracting a correlation key.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("payload too short for correlation key: {len} chars, need {KEY_LEN}")]
    TooShort { len: usize },
}

/// Fixed-width key shared by both halves of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Full key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Producing program tag (characters 0..7).
    pub fn producer_tag(&self) -> &str {
        self.char_range(0, TAG_END)
    }

    /// Date component (characters 7..15).
    pub fn date(&self) -> &str {
        self.char_range(TAG_END, DATE_END)
    }

    /// Time component (characters 15..21).
    pub fn time(&self) -> &str {
        self.char_range(DATE_END, TIME_END)
    }

    /// Sequence number component (characters 21..24).
    pub fn sequence(&self) -> &str {
        self.char_range(TIME_END, KEY_LEN)
    }

    fn char_range(&self, start: usize, end: usize) -> &str {
        let lo = byte_offset(&self.0, start);
        let hi = byte_offset(&self.0, end);
        self.0.get(lo..hi).unwrap_or("")
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the correlation key from the head of a payload.
pub fn parse_key(payload: &str) -> Result<CorrelationKey, KeyParseError> {
    let end = byte_offset(payload, KEY_LEN);
    let head = payload.get(..end).unwrap_or(payload);
    let len = head.chars().count();
    if len < KEY_LEN {
        return Err(KeyParseError::TooShort { len });
    }
    Ok(CorrelationKey(head.to_string()))
}

/// Byte offset of the `n`th character, clamped to the string length.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}
