//! Operational surfaces: Prometheus metrics and the HTTP health server.

pub mod health;
