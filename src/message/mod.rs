pub mod key;

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

pub use self::key::{parse_key, CorrelationKey, KeyParseError, KEY_LEN};

/// SourceKind identifies which producer a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SourceKind {
    Legacy = 0,
    Modern = 1,
}

impl SourceKind {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Modern => "modern",
        }
    }

    /// Convert from the canonical label name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "legacy" => Some(Self::Legacy),
            "modern" => Some(Self::Modern),
            _ => None,
        }
    }

    /// Returns both sources in a stable order.
    pub const fn all() -> &'static [SourceKind] {
        &[Self::Legacy, Self::Modern]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as delivered by a transport, before any parsing.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub payload: Vec<u8>,
    /// Transport-level correlation token. Informational only, never used for pairing.
    pub correlation_token: Vec<u8>,
}

impl RawMessage {
    pub fn new(payload: impl Into<Vec<u8>>, correlation_token: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            correlation_token: correlation_token.into(),
        }
    }

    /// Decodes the payload as UTF-8, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Upper-case hex rendering of the correlation token, for logging.
    pub fn token_hex(&self) -> String {
        let mut out = String::with_capacity(self.correlation_token.len() * 2);
        for b in &self.correlation_token {
            out.push_str(&format!("{b:02X}"));
        }
        out
    }
}

/// A parsed message ready for the pairing store.
#[derive(Debug, Clone)]
pub struct Submission {
    pub key: CorrelationKey,
    pub payload: String,
    pub source: SourceKind,
    pub arrival: SystemTime,
}
