//! The external-metrics series registry: discovered metrics keyed by API
//! metric name alone.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use prom_adapter_promapi::{Selector, Series};
use prom_adapter_rules::{MetricNamer, MetricUpdateResult, Requirement};

use crate::errors::ProviderError;
use crate::registry::{LengthMismatch, SeriesRegistration};

#[derive(Default)]
struct Snapshot {
    info: HashMap<String, SeriesRegistration>,
    metrics: Vec<String>,
}

/// Indexes known external metric names; snapshot discipline matches the
/// custom registry.
pub struct ExternalMetricRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Default for ExternalMetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalMetricRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn set_series(
        &self,
        series_per_namer: &[Vec<Series>],
        namers: &[Arc<MetricNamer>],
    ) -> Result<(), LengthMismatch> {
        if series_per_namer.len() != namers.len() {
            return Err(LengthMismatch);
        }

        let mut info = HashMap::new();
        for (namer, series_list) in namers.iter().zip(series_per_namer) {
            for series in series_list {
                let metric = match namer.metric_name_for_series(series) {
                    Ok(metric) => metric,
                    Err(err) => {
                        warn!(series = %series.name, error = %err, "skipping unnameable series");
                        continue;
                    }
                };
                let registration = SeriesRegistration {
                    series: series.name.clone(),
                    namer: Arc::clone(namer),
                };
                // discovery order within one cycle is unspecified; the last
                // entry wins
                if let Some(previous) = info.insert(metric.clone(), registration) {
                    if previous.series != series.name {
                        warn!(
                            metric,
                            shadowed = %previous.series,
                            series = %series.name,
                            "multiple series map to the same external metric, last write wins"
                        );
                    }
                }
            }
        }

        let mut metrics: Vec<String> = info.keys().cloned().collect();
        metrics.sort();

        *self.snapshot.write() = Arc::new(Snapshot { info, metrics });
        Ok(())
    }

    pub fn list_all_metrics(&self) -> Vec<String> {
        self.snapshot.read().metrics.clone()
    }

    pub fn query_for_metric(
        &self,
        namespace: &str,
        metric: &str,
        metric_selector: &[Requirement],
    ) -> Result<Selector, ProviderError> {
        let snapshot = self.snapshot.read().clone();
        let registration = snapshot
            .info
            .get(metric)
            .ok_or_else(|| ProviderError::metric_not_found("externalmetrics", metric))?;

        Ok(registration.namer.query_for_external_series(
            &registration.series,
            namespace,
            metric_selector,
        )?)
    }
}

/// Wire the registry to a lister as its update callback.
pub fn registry_callback(
    registry: Arc<ExternalMetricRegistry>,
) -> Box<dyn Fn(&MetricUpdateResult) + Send + Sync> {
    Box::new(move |result| {
        if let Err(err) = registry.set_series(&result.series, &result.namers) {
            warn!(error = %err, "rejecting inconsistent discovery result");
        }
    })
}

impl std::fmt::Debug for ExternalMetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalMetricRegistry")
            .field("metrics", &self.snapshot.read().metrics.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use prom_adapter_rules::{NameMapping, ResourceMapper, ResourceMapping, Rule};

    use super::*;

    fn namer(metrics_query: &str) -> Arc<MetricNamer> {
        let rule = Rule {
            series_query: "queue_length".to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: Some("<<.Resource>>".to_string()),
                overrides: Default::default(),
                namespaced: None,
            },
            name: NameMapping::default(),
            metrics_query: metrics_query.to_string(),
        };
        Arc::new(MetricNamer::from_rule(&rule, Arc::new(ResourceMapper::default())).unwrap())
    }

    #[test]
    fn discovered_names_are_listed_sorted() {
        let registry = ExternalMetricRegistry::new();
        let namer = namer("<<.Series>>{<<.LabelMatchers>>}");

        registry
            .set_series(
                &[vec![Series::new("queue_length"), Series::new("batch_depth")]],
                &[namer],
            )
            .unwrap();

        assert_eq!(
            registry.list_all_metrics(),
            vec!["batch_depth".to_string(), "queue_length".to_string()]
        );
    }

    #[test]
    fn query_delegates_to_the_namer() {
        let registry = ExternalMetricRegistry::new();
        registry
            .set_series(
                &[vec![Series::new("queue_length")]],
                &[namer("<<.Series>>{<<.LabelMatchers>>}")],
            )
            .unwrap();

        let query = registry
            .query_for_metric(
                "",
                "queue_length",
                &[Requirement::new(
                    "queue_name",
                    prom_adapter_rules::Operator::In,
                    vec!["processing".to_string()],
                )],
            )
            .unwrap();
        assert_eq!(query.as_str(), r#"queue_length{queue_name=~"processing"}"#);
    }

    #[test]
    fn unknown_external_metric_is_not_found() {
        let registry = ExternalMetricRegistry::new();
        let err = registry.query_for_metric("", "nope", &[]).unwrap_err();
        assert!(matches!(err, ProviderError::MetricNotFound { .. }));
    }
}
