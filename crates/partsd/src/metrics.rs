//! Prometheus metrics for the turn pipeline

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct EngineMetrics {
    pub turns_total: IntCounterVec,
    pub rules_total: IntCounterVec,
    pub plan_origin_total: IntCounterVec,
    pub retrieval_path_total: IntCounterVec,
    pub validator_rejections_total: IntCounterVec,
    pub topic_drift_resets_total: IntCounter,
    pub active_sessions: IntGauge,
    pub confidence: Histogram,
    pub turn_seconds: Histogram,

    registry: Arc<Registry>,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let turns_total = register_int_counter_vec_with_registry!(
            "partsd_turns_total",
            "Chat turns answered, by response type",
            &["route"],
            registry
        )?;

        let rules_total = register_int_counter_vec_with_registry!(
            "partsd_router_rules_total",
            "Router rule that picked the route",
            &["rule"],
            registry
        )?;

        let plan_origin_total = register_int_counter_vec_with_registry!(
            "partsd_plan_origin_total",
            "Where the turn's plan came from (model, cache, continuation, fallback, skipped)",
            &["origin"],
            registry
        )?;

        let retrieval_path_total = register_int_counter_vec_with_registry!(
            "partsd_retrieval_path_total",
            "Retrieval stage that produced recommended parts",
            &["path"],
            registry
        )?;

        let validator_rejections_total = register_int_counter_vec_with_registry!(
            "partsd_validator_rejections_total",
            "Responses rejected by the validator, by reason",
            &["reason"],
            registry
        )?;

        let topic_drift_resets_total = register_int_counter_with_registry!(
            "partsd_topic_drift_resets_total",
            "Turns that dropped carried session state",
            registry
        )?;

        let active_sessions = register_int_gauge_with_registry!(
            "partsd_active_sessions",
            "Conversations currently held in memory",
            registry
        )?;

        let confidence = register_histogram_with_registry!(
            "partsd_turn_confidence",
            "Confidence score per turn",
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.55, 0.6, 0.7, 0.8, 0.9, 1.0],
            registry
        )?;

        let turn_seconds = register_histogram_with_registry!(
            "partsd_turn_seconds",
            "End-to-end turn latency in seconds",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0],
            registry
        )?;

        Ok(Self {
            turns_total,
            rules_total,
            plan_origin_total,
            retrieval_path_total,
            validator_rejections_total,
            topic_drift_resets_total,
            active_sessions,
            confidence,
            turn_seconds,
            registry: Arc::new(registry),
        })
    }

    pub fn record_turn(&self, route: &str, rule: &str, origin: &str, confidence: f64, secs: f64) {
        self.turns_total.with_label_values(&[route]).inc();
        self.rules_total.with_label_values(&[rule]).inc();
        self.plan_origin_total.with_label_values(&[origin]).inc();
        self.confidence.observe(confidence);
        self.turn_seconds.observe(secs);
    }

    pub fn record_retrieval(&self, path: &str) {
        self.retrieval_path_total.with_label_values(&[path]).inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.validator_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_drift_reset(&self) {
        self.topic_drift_resets_total.inc();
    }

    pub fn set_active_sessions(&self, n: usize) {
        self.active_sessions.set(n as i64);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_turn("model_required", "symptom_without_model", "model", 0.4, 0.02);
        metrics.record_rejection("unknown_part_in_text");
        metrics.record_drift_reset();

        let text = metrics.export().unwrap();
        assert!(text.contains("partsd_turns_total{route=\"model_required\"} 1"));
        assert!(text.contains("partsd_router_rules_total{rule=\"symptom_without_model\"} 1"));
        assert!(text.contains("partsd_validator_rejections_total"));
        assert!(text.contains("partsd_topic_drift_resets_total 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.record_drift_reset();
        assert!(b.export().unwrap().contains("partsd_topic_drift_resets_total 0"));
    }
}
