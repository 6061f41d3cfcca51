//! # Usage Tracking
//!
//! Per-model token accounting fed by the invocation layer. Unlike the
//! `metrics` counters, which are write-only, the tracker can be read back
//! by the administrative surface.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scribe_core::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsageSummary {
    pub model: String,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub usage: TokenUsage,
    pub last_used_at: Option<DateTime<Utc>>
}

impl ModelUsageSummary {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            successful_calls: 0,
            failed_calls: 0,
            usage: TokenUsage::default(),
            last_used_at: None
        }
    }
}

/// Cheap to clone; clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    models: Arc<RwLock<HashMap<String, ModelUsageSummary>>>
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, model: &str, usage: &TokenUsage) {
        let mut models = self.models.write();
        let entry = models
            .entry(model.to_string())
            .or_insert_with(|| ModelUsageSummary::new(model));
        entry.successful_calls += 1;
        entry.usage.add(usage);
        entry.last_used_at = Some(Utc::now());

        tracing::debug!(
            model,
            total_tokens = usage.total_tokens,
            "Recorded model usage"
        );
    }

    pub fn record_failure(&self, model: &str) {
        let mut models = self.models.write();
        let entry = models
            .entry(model.to_string())
            .or_insert_with(|| ModelUsageSummary::new(model));
        entry.failed_calls += 1;
        entry.last_used_at = Some(Utc::now());
    }

    pub fn summary(&self, model: &str) -> Option<ModelUsageSummary> {
        self.models.read().get(model).cloned()
    }

    /// Sorted by model name.
    pub fn summaries(&self) -> Vec<ModelUsageSummary> {
        let mut all: Vec<_> = self.models.read().values().cloned().collect();
        all.sort_by(|a, b| a.model.cmp(&b.model));
        all
    }

    pub fn total_usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for summary in self.models.read().values() {
            total.add(&summary.usage);
        }
        total
    }

    pub fn reset(&self) {
        self.models.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates_per_model() {
        let tracker = UsageTracker::new();
        tracker.record_success("gpt-4o", &TokenUsage::new(100, 50));
        tracker.record_success("gpt-4o", &TokenUsage::new(10, 5));
        tracker.record_failure("gpt-4o");
        tracker.record_success("gpt-4o-mini", &TokenUsage::new(7, 3));

        let main = tracker.summary("gpt-4o").unwrap();
        assert_eq!(main.successful_calls, 2);
        assert_eq!(main.failed_calls, 1);
        assert_eq!(main.usage, TokenUsage::new(110, 55));

        assert_eq!(tracker.total_usage().total_tokens, 175);
        let models: Vec<_> = tracker.summaries().into_iter().map(|s| s.model).collect();
        assert_eq!(models, vec!["gpt-4o", "gpt-4o-mini"]);
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = UsageTracker::new();
        let clone = tracker.clone();
        clone.record_failure("m");
        assert_eq!(tracker.summary("m").unwrap().failed_calls, 1);

        tracker.reset();
        assert!(clone.summaries().is_empty());
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let tracker = UsageTracker::new();
        tracker.record_success("m", &TokenUsage::new(1, 1));
        let json = serde_json::to_value(tracker.summary("m").unwrap()).unwrap();
        assert_eq!(json["successfulCalls"], 1);
        assert_eq!(json["usage"]["totalTokens"], 2);
    }
}
