//! # Observability
//!
//! Metrics emission for the orchestration engine and per-model token usage
//! accounting for the administrative surface.

pub mod telemetry;
pub mod usage;

pub use telemetry::{EngineTelemetry, init_metrics_exporter};
pub use usage::{ModelUsageSummary, UsageTracker};
