use thiserror::Error;

use prom_adapter_ext::{metav1, StatusExt as _};
use prom_adapter_rules::QueryError;

/// Everything that can go wrong answering a metrics API request.
///
/// Backend and cluster detail stays in the logs; clients get a generic
/// message so nothing internal leaks.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("metric {metric:?} not found")]
    MetricNotFound { kind: String, metric: String },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("backend query failed: {0}")]
    Backend(#[from] prom_adapter_promapi::Error),

    #[error("listing objects failed: {0}")]
    DynamicClient(#[from] kube::Error),

    #[error("no Kubernetes client available for object listing")]
    NoDynamicClient,

    #[error("unexpected query result: {0}")]
    UnexpectedResult(&'static str),
}

impl ProviderError {
    pub fn metric_not_found(kind: impl ToString, metric: impl ToString) -> Self {
        Self::MetricNotFound {
            kind: kind.to_string(),
            metric: metric.to_string(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::MetricNotFound { .. } => 404,
            Self::Query(_) => 400,
            Self::Backend(_)
            | Self::DynamicClient(_)
            | Self::NoDynamicClient
            | Self::UnexpectedResult(_) => 500,
        }
    }

    /// The status object served to the client.
    pub fn status(&self) -> metav1::Status {
        match self {
            Self::MetricNotFound { kind, metric } => metav1::Status::not_found(kind, metric),
            Self::Query(_) => metav1::Status::bad_request("unable to fetch metrics"),
            _ => metav1::Status::internal("unable to fetch metrics"),
        }
    }
}
