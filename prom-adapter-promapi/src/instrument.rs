use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::Error;
use crate::metrics::AdapterMetrics;
use crate::types::{QueryResult, Selector, Series};
use crate::QueryBackend;

/// A `QueryBackend` wrapper recording per-endpoint latency histograms and
/// typed error counters.
#[derive(Debug)]
pub struct Instrumented<B> {
    inner: B,
    server: String,
    metrics: Arc<AdapterMetrics>,
}

impl<B> Instrumented<B> {
    pub fn new(inner: B, server: impl ToString, metrics: Arc<AdapterMetrics>) -> Self {
        Self {
            inner,
            server: server.to_string(),
            metrics,
        }
    }

    fn record<T>(&self, path: &str, elapsed: f64, result: &Result<T, Error>) {
        self.metrics
            .query_latency
            .with_label_values(&[path, &self.server])
            .observe(elapsed);

        if let Err(err) = result {
            let kind = err.kind().as_str();
            warn!(path, error_code = kind, "backend request failed");
            self.metrics
                .query_errors
                .with_label_values(&[kind, path, &self.server])
                .inc();
        }
    }
}

#[async_trait]
impl<B: QueryBackend> QueryBackend for Instrumented<B> {
    async fn series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        selectors: &[Selector],
    ) -> Result<Vec<Series>, Error> {
        let started = std::time::Instant::now();
        let result = self.inner.series(start, end, selectors).await;
        self.record("/api/v1/series", started.elapsed().as_secs_f64(), &result);
        result
    }

    async fn query(&self, at: DateTime<Utc>, expr: &str) -> Result<QueryResult, Error> {
        let started = std::time::Instant::now();
        let result = self.inner.query(at, expr).await;
        self.record("/api/v1/query", started.elapsed().as_secs_f64(), &result);
        result
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
        expr: &str,
    ) -> Result<QueryResult, Error> {
        let started = std::time::Instant::now();
        let result = self.inner.query_range(start, end, step, expr).await;
        self.record(
            "/api/v1/query_range",
            started.elapsed().as_secs_f64(),
            &result,
        );
        result
    }
}
