//! The external-metrics provider: registry lookup, query execution and
//! conversion into `ExternalMetricValue`s.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use prom_adapter_ext::{emv1beta1, metav1, TimeExt as _};
use prom_adapter_promapi::{QueryBackend, QueryResult};
use prom_adapter_rules::Requirement;

use crate::custom::milli_quantity;
use crate::errors::ProviderError;
use crate::external_registry::ExternalMetricRegistry;

pub struct ExternalMetricsProvider {
    backend: Arc<dyn QueryBackend>,
    registry: Arc<ExternalMetricRegistry>,
}

impl ExternalMetricsProvider {
    pub fn new(backend: Arc<dyn QueryBackend>, registry: Arc<ExternalMetricRegistry>) -> Self {
        Self { backend, registry }
    }

    pub fn registry(&self) -> &ExternalMetricRegistry {
        &self.registry
    }

    pub async fn metrics_for(
        &self,
        namespace: &str,
        metric: &str,
        metric_selector: &[Requirement],
    ) -> Result<emv1beta1::ExternalMetricValueList, ProviderError> {
        let query = self
            .registry
            .query_for_metric(namespace, metric, metric_selector)?;
        debug!(%query, metric, "executing external metrics query");

        let result = self.backend.query(Utc::now(), query.as_str()).await?;
        let items = match result {
            QueryResult::Vector(samples) => samples
                .into_iter()
                .map(|sample| {
                    emv1beta1::ExternalMetricValue::new(metric)
                        .labels(sample.metric.labels)
                        .timestamp(metav1::Time::from_unix(sample.value.timestamp))
                        .value(milli_quantity(sample.value.value))
                })
                .collect(),
            // a scalar produces a single value with no labels
            QueryResult::Scalar(pair) => vec![emv1beta1::ExternalMetricValue::new(metric)
                .timestamp(metav1::Time::from_unix(pair.timestamp))
                .value(milli_quantity(pair.value))],
            QueryResult::Matrix(_) => {
                return Err(ProviderError::UnexpectedResult(
                    "expected a vector or scalar result",
                ))
            }
        };

        Ok(emv1beta1::ExternalMetricValueList {
            metadata: metav1::ListMeta::default(),
            items,
        })
    }
}

impl std::fmt::Debug for ExternalMetricsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalMetricsProvider")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
