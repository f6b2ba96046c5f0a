use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

/// Process-wide adapter metrics.
///
/// Built once in `main` and injected wherever instrumentation happens; there
/// is no global registry.
#[derive(Clone)]
pub struct AdapterMetrics {
    registry: Registry,

    /// Backend request latency, labeled `{path, server}`.
    pub query_latency: HistogramVec,
    /// Backend request errors by typed kind, labeled `{error_code, path, server}`.
    pub query_errors: IntCounterVec,
    /// Number of discovered rules, labeled `{type: normal|external}`.
    pub discovered_rules: IntGaugeVec,
    /// API errors served to clients, labeled `{type}`.
    pub errors_served: IntCounterVec,
}

impl AdapterMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let query_latency = HistogramVec::new(
            HistogramOpts::new(
                "prom_adapter_query_latency_seconds",
                "Latency of requests to the query backend",
            ),
            &["path", "server"],
        )?;
        let query_errors = IntCounterVec::new(
            Opts::new(
                "prom_adapter_query_errors_total",
                "Errors from requests to the query backend",
            ),
            &["error_code", "path", "server"],
        )?;
        let discovered_rules = IntGaugeVec::new(
            Opts::new(
                "prom_adapter_discovered_rules",
                "Number of discovery rules currently loaded",
            ),
            &["type"],
        )?;
        let errors_served = IntCounterVec::new(
            Opts::new(
                "prom_adapter_errors_served_total",
                "API errors served to clients",
            ),
            &["type"],
        )?;

        registry.register(Box::new(query_latency.clone()))?;
        registry.register(Box::new(query_errors.clone()))?;
        registry.register(Box::new(discovered_rules.clone()))?;
        registry.register(Box::new(errors_served.clone()))?;

        Ok(Self {
            registry,
            query_latency,
            query_errors,
            discovered_rules,
            errors_served,
        })
    }

    /// The registry backing these metrics, for the `/metrics` encoder.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for AdapterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_collectors_register() {
        let metrics = AdapterMetrics::new().unwrap();

        metrics
            .query_latency
            .with_label_values(&["/api/v1/query", "prom:9090"])
            .observe(0.01);
        metrics
            .query_errors
            .with_label_values(&["timeout", "/api/v1/query", "prom:9090"])
            .inc();
        metrics.discovered_rules.with_label_values(&["normal"]).set(3);
        metrics.errors_served.with_label_values(&["custom"]).inc();

        let families = metrics.registry().gather();
        assert_eq!(families.len(), 4);
    }
}
