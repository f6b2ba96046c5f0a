//! Typed client for the Prometheus HTTP query API: series discovery, instant
//! queries and range queries, with a well-defined error taxonomy and an
//! instrumented wrapper for request metrics.

pub use client::{Client, HttpVerb};
pub use error::{Error, ErrorKind};
pub use instrument::Instrumented;
pub use metrics::AdapterMetrics;
pub use types::{QueryResult, RangeSeries, Sample, SamplePair, Selector, Series};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

mod client;
mod error;
mod instrument;
mod metrics;
mod types;

/// The operations the adapter needs from a query backend.
///
/// `Client` is the production implementation; tests substitute in-memory
/// fakes.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// List the series matching any of `selectors` within `[start, end]`.
    /// The backend may collapse duplicates.
    async fn series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        selectors: &[Selector],
    ) -> Result<Vec<Series>, Error>;

    /// Evaluate `expr` at the instant `at`.
    async fn query(&self, at: DateTime<Utc>, expr: &str) -> Result<QueryResult, Error>;

    /// Evaluate `expr` over `[start, end]` at `step` resolution.
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
        expr: &str,
    ) -> Result<QueryResult, Error>;
}
