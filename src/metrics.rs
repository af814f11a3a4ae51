//! Engine Metrics
//!
//! Prometheus counters and histograms for port invocations, timeouts and
//! signals. Each engine owns its own `prometheus::Registry` so several
//! engines can live in one process.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix
pub const NAMESPACE: &str = "saga_ports";

/// Prometheus metrics for one engine
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    invocations: IntCounterVec,
    timeouts: IntCounterVec,
    duration: HistogramVec,
    signals: IntCounterVec,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let invocations = IntCounterVec::new(
            Opts::new("port_invocations_total", "Port attempts by outcome").namespace(NAMESPACE),
            &["model", "port", "outcome"],
        )?;
        let timeouts = IntCounterVec::new(
            Opts::new("port_timeouts_total", "Port attempts that outlived their timeout")
                .namespace(NAMESPACE),
            &["model", "port"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("port_duration_seconds", "Duration of adapter calls")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0]),
            &["model", "port"],
        )?;
        let signals = IntCounterVec::new(
            Opts::new("signals_total", "Signals emitted on the event bus").namespace(NAMESPACE),
            &["kind"],
        )?;

        registry.register(Box::new(invocations.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(signals.clone()))?;

        Ok(Self {
            registry,
            invocations,
            timeouts,
            duration,
            signals,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_invocation(&self, model: &str, port: &str, outcome: &str) {
        self.invocations
            .with_label_values(&[model, port, outcome])
            .inc();
    }

    pub fn record_timeout(&self, model: &str, port: &str) {
        self.timeouts.with_label_values(&[model, port]).inc();
    }

    pub fn observe_duration(&self, model: &str, port: &str, elapsed: Duration) {
        self.duration
            .with_label_values(&[model, port])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_signal(&self, kind: &str) {
        self.signals.with_label_values(&[kind]).inc();
    }

    pub fn invocations(&self, model: &str, port: &str, outcome: &str) -> u64 {
        self.invocations
            .with_label_values(&[model, port, outcome])
            .get()
    }

    pub fn timeouts(&self, model: &str, port: &str) -> u64 {
        self.timeouts.with_label_values(&[model, port]).get()
    }

    pub fn signals(&self, kind: &str) -> u64 {
        self.signals.with_label_values(&[kind]).get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_invocation("ORDER", "reserve", "completed");
        metrics.record_invocation("ORDER", "reserve", "completed");
        metrics.record_timeout("ORDER", "reserve");
        metrics.record_signal("portTimeout");

        assert_eq!(metrics.invocations("ORDER", "reserve", "completed"), 2);
        assert_eq!(metrics.invocations("ORDER", "reserve", "exhausted"), 0);
        assert_eq!(metrics.timeouts("ORDER", "reserve"), 1);
        assert_eq!(metrics.signals("portTimeout"), 1);
    }

    #[test]
    fn test_gather_text() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.observe_duration("ORDER", "ship", Duration::from_millis(120));
        let text = metrics.gather_text().unwrap();
        assert!(text.contains("saga_ports_port_duration_seconds"));
    }
}
