//! Streaming reconciliation of a legacy and a modernized message producer.
//!
//! Messages from both streams are paired by a 24-character correlation key,
//! compared, and classified as MATCH, MISMATCH or ORPHANED. Aggregate
//! snapshots are published periodically to pluggable sinks.

pub mod clock;
pub mod config;
pub mod engine;
pub mod export;
pub mod message;
pub mod reconcile;
pub mod simulate;
pub mod sink;
pub mod source;

pub use crate::engine::{Engine, EngineState, LifecycleError};
