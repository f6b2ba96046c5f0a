//! The custom-metrics series registry: the catalog of discovered API metrics
//! keyed by `(group-resource, namespaced, name)`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use prom_adapter_promapi::{Sample, SamplePair, Selector};
use prom_adapter_rules::{
    GroupResource, MetricNamer, MetricUpdateResult, Requirement, ResourceMapper,
    CLUSTER_SCOPED_RESOURCES,
};

use crate::errors::ProviderError;

/// Canonical key of one custom-metrics API object.
///
/// After normalization two `MetricInfo`s are equal iff they denote the same
/// API metric.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricInfo {
    pub group_resource: GroupResource,
    pub namespaced: bool,
    pub metric: String,
}

impl MetricInfo {
    pub fn new(group_resource: GroupResource, namespaced: bool, metric: impl ToString) -> Self {
        Self {
            group_resource,
            namespaced,
            metric: metric.to_string(),
        }
    }

    fn normalized(&self, mapper: &ResourceMapper) -> Self {
        let group_resource = mapper.normalize(&self.group_resource.group, &self.group_resource.resource);
        // these resources never live in a namespace, whatever the request said
        let namespaced = if CLUSTER_SCOPED_RESOURCES.contains(&group_resource.resource.as_str()) {
            false
        } else {
            self.namespaced
        };
        Self {
            group_resource,
            namespaced,
            metric: self.metric.clone(),
        }
    }
}

/// What the registry knows about one API metric.
#[derive(Clone, Debug)]
pub struct SeriesRegistration {
    pub series: String,
    pub namer: Arc<MetricNamer>,
}

#[derive(Default)]
struct Snapshot {
    info: HashMap<MetricInfo, SeriesRegistration>,
    metrics: Vec<MetricInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("series list and namer list lengths differ")]
pub struct LengthMismatch;

/// Indexes known custom metrics and answers "query for this metric on these
/// objects".
///
/// The whole snapshot is swapped under a writer lock on every discovery
/// cycle; readers see either the previous or the next catalog, never a mix.
pub struct CustomMetricRegistry {
    mapper: Arc<ResourceMapper>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl CustomMetricRegistry {
    pub fn new(mapper: Arc<ResourceMapper>) -> Self {
        Self {
            mapper,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// The lister callback: rebuild the catalog from one discovery cycle.
    pub fn set_series(
        &self,
        series_per_namer: &[Vec<prom_adapter_promapi::Series>],
        namers: &[Arc<MetricNamer>],
    ) -> Result<(), LengthMismatch> {
        if series_per_namer.len() != namers.len() {
            return Err(LengthMismatch);
        }

        let mut info = HashMap::new();
        for (namer, series_list) in namers.iter().zip(series_per_namer) {
            for series in series_list {
                let (resources, namespaced) = namer.resources_for_series(series);
                let metric = match namer.metric_name_for_series(series) {
                    Ok(metric) => metric,
                    Err(err) => {
                        warn!(series = %series.name, error = %err, "skipping unnameable series");
                        continue;
                    }
                };

                for resource in resources {
                    let key = MetricInfo::new(resource, namespaced, &metric).normalized(&self.mapper);
                    let registration = SeriesRegistration {
                        series: series.name.clone(),
                        namer: Arc::clone(namer),
                    };
                    if let Some(previous) = info.insert(key.clone(), registration) {
                        if previous.series != series.name {
                            warn!(
                                metric = %key.metric,
                                resource = %key.group_resource,
                                shadowed = %previous.series,
                                series = %series.name,
                                "multiple series map to the same API metric, last write wins"
                            );
                        }
                    }
                }
            }
        }

        let mut metrics: Vec<MetricInfo> = info.keys().cloned().collect();
        metrics.sort();

        *self.snapshot.write() = Arc::new(Snapshot { info, metrics });
        Ok(())
    }

    /// Everything currently advertised, for discovery documents.
    pub fn list_all_metrics(&self) -> Vec<MetricInfo> {
        self.snapshot.read().metrics.clone()
    }

    fn registration(&self, info: &MetricInfo) -> Option<(MetricInfo, SeriesRegistration)> {
        let normalized = info.normalized(&self.mapper);
        let snapshot = self.snapshot.read().clone();
        snapshot
            .info
            .get(&normalized)
            .cloned()
            .map(|registration| (normalized, registration))
    }

    /// Build the backend query answering `info` for the named objects.
    pub fn query_for_metric(
        &self,
        info: &MetricInfo,
        namespace: &str,
        metric_selector: &[Requirement],
        names: &[String],
    ) -> Result<Selector, ProviderError> {
        let (normalized, registration) = self.registration(info).ok_or_else(|| {
            ProviderError::metric_not_found(info.group_resource.to_string(), &info.metric)
        })?;

        Ok(registration.namer.query_for_series(
            &registration.series,
            &normalized.group_resource,
            namespace,
            metric_selector,
            names,
        )?)
    }

    /// Key each vector sample by the object name carried in the resource
    /// label. Samples without the label are skipped.
    pub fn match_values_to_names(
        &self,
        info: &MetricInfo,
        samples: &[Sample],
    ) -> Result<HashMap<String, SamplePair>, ProviderError> {
        let (normalized, registration) = self.registration(info).ok_or_else(|| {
            ProviderError::metric_not_found(info.group_resource.to_string(), &info.metric)
        })?;
        let label = registration
            .namer
            .label_for_resource(&normalized.group_resource)?;

        Ok(samples
            .iter()
            .filter_map(|sample| {
                sample
                    .metric
                    .labels
                    .get(&label)
                    .map(|name| (name.clone(), sample.value))
            })
            .collect())
    }
}

/// Wire the registry to a lister as its update callback.
pub fn registry_callback(registry: Arc<CustomMetricRegistry>) -> Box<dyn Fn(&MetricUpdateResult) + Send + Sync> {
    Box::new(move |result| {
        if let Err(err) = registry.set_series(&result.series, &result.namers) {
            warn!(error = %err, "rejecting inconsistent discovery result");
        }
    })
}

impl std::fmt::Debug for CustomMetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomMetricRegistry")
            .field("metrics", &self.snapshot.read().metrics.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use prom_adapter_promapi::Series;
    use prom_adapter_rules::{GroupResourceSpec, NameMapping, ResourceMapping, Rule};

    use super::*;

    fn namer(series_query: &str, matches: &str, overrides: &[(&str, &str)]) -> Arc<MetricNamer> {
        let rule = Rule {
            series_query: series_query.to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: None,
                overrides: overrides
                    .iter()
                    .map(|(label, resource)| {
                        ((*label).to_string(), GroupResourceSpec::resource(resource))
                    })
                    .collect::<BTreeMap<_, _>>(),
                namespaced: None,
            },
            name: NameMapping {
                matches: matches.to_string(),
                as_: String::new(),
            },
            metrics_query: "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
        };
        Arc::new(MetricNamer::from_rule(&rule, Arc::new(ResourceMapper::default())).unwrap())
    }

    fn registry() -> CustomMetricRegistry {
        CustomMetricRegistry::new(Arc::new(ResourceMapper::default()))
    }

    fn pod_series() -> Series {
        Series::new("container_some_usage")
            .label("pod", "p1")
            .label("namespace", "n")
            .label("container", "c1")
    }

    #[test]
    fn set_series_requires_matching_lengths() {
        let registry = registry();
        let err = registry
            .set_series(&[Vec::new(), Vec::new()], &[])
            .unwrap_err();
        assert_eq!(err, LengthMismatch);
    }

    #[test]
    fn discovered_series_become_metric_infos() {
        let registry = registry();
        let namer = namer(
            r#"{__name__=~"^container_.*"}"#,
            "^container_(.*)$",
            &[("pod", "pod"), ("namespace", "namespace")],
        );

        registry
            .set_series(&[vec![pod_series()]], &[namer])
            .unwrap();

        let metrics = registry.list_all_metrics();
        // one entry per detected resource: pods and namespaces
        assert_eq!(metrics.len(), 2);
        assert!(metrics.contains(&MetricInfo::new(
            GroupResource::core("pods"),
            true,
            "some_usage"
        )));
        // the namespaces resource is forced cluster-scoped
        assert!(metrics.contains(&MetricInfo::new(
            GroupResource::core("namespaces"),
            false,
            "some_usage"
        )));
    }

    #[test]
    fn query_for_metric_accepts_unnormalized_spellings() {
        let registry = registry();
        let namer = namer(
            r#"{__name__=~"^container_.*"}"#,
            "^container_(.*)$",
            &[("pod", "pod"), ("namespace", "namespace")],
        );
        registry
            .set_series(&[vec![pod_series()]], &[namer])
            .unwrap();

        // singular spelling normalizes to the same catalog entry
        let info = MetricInfo::new(GroupResource::core("pod"), true, "some_usage");
        let query = registry
            .query_for_metric(&info, "n", &[], &["p1".to_string()])
            .unwrap();
        assert_eq!(
            query.as_str(),
            r#"sum(container_some_usage{namespace="n",pod="p1"}) by (pod)"#
        );
    }

    #[test]
    fn unknown_metric_is_not_found() {
        let registry = registry();
        let info = MetricInfo::new(GroupResource::core("pods"), true, "nope");

        let err = registry
            .query_for_metric(&info, "n", &[], &["p1".to_string()])
            .unwrap_err();
        assert!(matches!(err, ProviderError::MetricNotFound { .. }));
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn every_listed_metric_is_queryable() {
        let registry = registry();
        let namer = namer(
            r#"{__name__=~"^container_.*"}"#,
            "^container_(.*)$",
            &[("pod", "pod"), ("namespace", "namespace")],
        );
        registry
            .set_series(&[vec![pod_series()]], &[namer])
            .unwrap();

        for info in registry.list_all_metrics() {
            let namespace = if info.namespaced { "n" } else { "" };
            assert!(registry
                .query_for_metric(&info, namespace, &[], &["x".to_string()])
                .is_ok());
        }
    }

    #[test]
    fn match_values_keys_by_resource_label() {
        let registry = registry();
        let namer = namer(
            r#"{__name__=~"^container_.*"}"#,
            "^container_(.*)$",
            &[("pod", "pod"), ("namespace", "namespace")],
        );
        registry
            .set_series(&[vec![pod_series()]], &[namer])
            .unwrap();

        let info = MetricInfo::new(GroupResource::core("pods"), true, "some_usage");
        let samples: Vec<Sample> = serde_json::from_value(serde_json::json!([
            {"metric": {"pod": "p1"}, "value": [1.0, "4"]},
            {"metric": {"pod": "p2"}, "value": [1.0, "7"]},
            {"metric": {"container": "c"}, "value": [1.0, "9"]},
        ]))
        .unwrap();

        let by_name = registry.match_values_to_names(&info, &samples).unwrap();
        assert_eq!(by_name.len(), 2);
        assert_eq!(by_name["p1"].value, 4.0);
        assert_eq!(by_name["p2"].value, 7.0);
    }

    #[test]
    fn snapshot_is_replaced_wholesale() {
        let registry = registry();
        let namer = namer(
            r#"{__name__=~"^container_.*"}"#,
            "^container_(.*)$",
            &[("pod", "pod"), ("namespace", "namespace")],
        );

        registry
            .set_series(&[vec![pod_series()]], &[Arc::clone(&namer)])
            .unwrap();
        assert_eq!(registry.list_all_metrics().len(), 2);

        registry.set_series(&[Vec::new()], &[namer]).unwrap();
        assert!(registry.list_all_metrics().is_empty());
    }
}
