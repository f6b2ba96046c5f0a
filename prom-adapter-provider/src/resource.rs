//! The resource-metrics provider: CPU and memory for pods and nodes, backed
//! by the fixed queries of the `resourceRules` block.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::debug;

use prom_adapter_ext::{metav1, metricsv1, ObjectMetaExt as _, TimeExt as _};
use prom_adapter_promapi::{QueryBackend, Sample, SamplePair, Selector};
use prom_adapter_rules::{
    GroupResource, NamingError, QueryArgs, QueryError, QueryTemplate, ResourceConverter,
    ResourceMapper, ResourceRule, ResourceRules,
};

use crate::custom::milli_quantity;
use crate::errors::ProviderError;

/// A pod the caller wants metrics for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// One dimension (CPU or memory) of the resource metrics queries.
struct MetricsQuery {
    container_query: QueryTemplate,
    node_query: QueryTemplate,
    converter: ResourceConverter,
    container_label: String,
}

impl MetricsQuery {
    fn from_rule(rule: &ResourceRule, mapper: Arc<ResourceMapper>) -> Result<Self, NamingError> {
        Ok(Self {
            container_query: QueryTemplate::compile(&rule.container_query)?,
            node_query: QueryTemplate::compile(&rule.node_query)?,
            converter: ResourceConverter::new(&rule.resources, mapper)?,
            container_label: rule.container_label.clone(),
        })
    }

    fn pod_label(&self) -> Result<String, QueryError> {
        Ok(self.converter.label_for_resource(&GroupResource::core("pods"))?)
    }

    fn node_label(&self) -> Result<String, QueryError> {
        Ok(self.converter.label_for_resource(&GroupResource::core("nodes"))?)
    }

    fn namespace_label(&self) -> Result<String, QueryError> {
        Ok(self.converter.namespace_label()?)
    }

    fn container_query_for(
        &self,
        namespace: &str,
        pods: &[String],
    ) -> Result<Selector, QueryError> {
        let namespace_label = self.namespace_label()?;
        let pod_label = self.pod_label()?;
        let joined = pods.join("|");

        let matchers = format!(
            r#"{namespace_label}="{namespace}",{pod_label}=~"{joined}""#
        );
        let values_by_name = BTreeMap::from([
            (namespace_label, namespace.to_string()),
            (pod_label.clone(), joined),
        ]);
        let group_by = vec![pod_label, self.container_label.clone()];

        Ok(self.container_query.render(&QueryArgs {
            series: "",
            label_matchers: &matchers,
            label_values_by_name: &values_by_name,
            group_by: &group_by.join(","),
            group_by_slice: &group_by,
        })?)
    }

    /// Key container samples by `(pod, container)`.
    fn index_containers(&self, samples: Vec<Sample>) -> HashMap<(String, String), SamplePair> {
        let Ok(pod_label) = self.pod_label() else {
            return HashMap::new();
        };
        samples
            .into_iter()
            .filter_map(|sample| {
                let pod = sample.metric.labels.get(&pod_label)?.clone();
                let container = sample.metric.labels.get(&self.container_label)?.clone();
                Some(((pod, container), sample.value))
            })
            .collect()
    }

    fn node_query_for(&self, nodes: &[String]) -> Result<Selector, QueryError> {
        let node_label = self.node_label()?;
        let joined = nodes.join("|");

        let matchers = format!(r#"{node_label}=~"{joined}""#);
        let values_by_name = BTreeMap::from([(node_label.clone(), joined)]);
        let group_by = vec![node_label];

        Ok(self.node_query.render(&QueryArgs {
            series: "",
            label_matchers: &matchers,
            label_values_by_name: &values_by_name,
            group_by: &group_by.join(","),
            group_by_slice: &group_by,
        })?)
    }
}

/// CPU and memory for pods and nodes.
pub struct ResourceMetricsProvider {
    backend: Arc<dyn QueryBackend>,
    cpu: MetricsQuery,
    memory: MetricsQuery,
    window: Duration,
}

impl ResourceMetricsProvider {
    pub fn from_rules(
        backend: Arc<dyn QueryBackend>,
        rules: &ResourceRules,
        mapper: Arc<ResourceMapper>,
    ) -> Result<Self, NamingError> {
        Ok(Self {
            backend,
            cpu: MetricsQuery::from_rule(&rules.cpu, Arc::clone(&mapper))?,
            memory: MetricsQuery::from_rule(&rules.memory, mapper)?,
            window: rules.window,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Per-container CPU and memory for the given pods, one `PodMetrics` per
    /// pod that has at least one sample. Queries run per namespace, CPU and
    /// memory in parallel.
    pub async fn pod_metrics(
        &self,
        pods: &[PodRef],
    ) -> Result<Vec<metricsv1::PodMetrics>, ProviderError> {
        let mut by_namespace: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for pod in pods {
            by_namespace
                .entry(&pod.namespace)
                .or_default()
                .push(pod.name.clone());
        }

        let fetches = by_namespace.into_iter().map(|(namespace, names)| {
            let cpu_query = self.cpu.container_query_for(namespace, &names);
            let memory_query = self.memory.container_query_for(namespace, &names);
            async move {
                let (cpu_query, memory_query) = (cpu_query?, memory_query?);
                debug!(namespace, %cpu_query, %memory_query, "querying pod resource usage");
                let (cpu, memory) = tokio::try_join!(
                    self.backend.query(Utc::now(), cpu_query.as_str()),
                    self.backend.query(Utc::now(), memory_query.as_str()),
                )?;
                let cpu = self.cpu.index_containers(vector(cpu)?);
                let memory = self.memory.index_containers(vector(memory)?);
                Ok::<_, ProviderError>((namespace.to_string(), cpu, memory))
            }
        });
        let per_namespace: HashMap<String, _> = try_join_all(fetches)
            .await?
            .into_iter()
            .map(|(namespace, cpu, memory)| (namespace, (cpu, memory)))
            .collect();

        let mut items = Vec::new();
        for pod in pods {
            let Some((cpu, memory)) = per_namespace.get(pod.namespace.as_str()) else {
                continue;
            };
            if let Some(metrics) = assemble_pod(pod, cpu, memory, self.window) {
                items.push(metrics);
            }
        }
        Ok(items)
    }

    /// CPU and memory usage for the given nodes, fetched as one parallel
    /// CPU+memory pair and keyed by the node resource label.
    pub async fn node_metrics(
        &self,
        nodes: &[String],
    ) -> Result<Vec<metricsv1::NodeMetrics>, ProviderError> {
        let cpu_query = self.cpu.node_query_for(nodes)?;
        let memory_query = self.memory.node_query_for(nodes)?;
        debug!(%cpu_query, %memory_query, "querying node resource usage");

        let (cpu, memory) = tokio::try_join!(
            self.backend.query(Utc::now(), cpu_query.as_str()),
            self.backend.query(Utc::now(), memory_query.as_str()),
        )?;
        let cpu = index_by_label(&self.cpu.node_label()?, vector(cpu)?);
        let memory = index_by_label(&self.memory.node_label()?, vector(memory)?);

        let mut items = Vec::new();
        for node in nodes {
            let cpu_sample = cpu.get(node).copied();
            let memory_sample = memory.get(node).copied();
            if cpu_sample.is_none() && memory_sample.is_none() {
                continue;
            }

            let timestamp = earliest(cpu_sample.iter().chain(memory_sample.iter()));
            items.push(metricsv1::NodeMetrics {
                metadata: metav1::ObjectMeta::new(node),
                timestamp: metav1::Time::from_unix(timestamp),
                window: self.window,
                usage: metricsv1::Usage {
                    cpu: milli_quantity(sanitize(cpu_sample)),
                    memory: milli_quantity(sanitize(memory_sample)),
                },
            });
        }
        Ok(items)
    }

}

fn vector(result: prom_adapter_promapi::QueryResult) -> Result<Vec<Sample>, ProviderError> {
    match result {
        prom_adapter_promapi::QueryResult::Vector(samples) => Ok(samples),
        _ => Err(ProviderError::UnexpectedResult("expected a vector result")),
    }
}

fn index_by_label(label: &str, samples: Vec<Sample>) -> HashMap<String, SamplePair> {
    samples
        .into_iter()
        .filter_map(|sample| {
            let key = sample.metric.labels.get(label)?.clone();
            Some((key, sample.value))
        })
        .collect()
}

/// NaN, negative and missing samples all surface as zero.
fn sanitize(sample: Option<SamplePair>) -> f64 {
    match sample {
        Some(pair) if pair.value.is_finite() && pair.value >= 0.0 => pair.value,
        _ => 0.0,
    }
}

/// The earliest timestamp across the samples composing a response.
fn earliest<'a>(samples: impl Iterator<Item = &'a SamplePair>) -> f64 {
    let min = samples
        .map(|sample| sample.timestamp)
        .fold(f64::INFINITY, f64::min);
    if min.is_finite() {
        min
    } else {
        0.0
    }
}

fn assemble_pod(
    pod: &PodRef,
    cpu: &HashMap<(String, String), SamplePair>,
    memory: &HashMap<(String, String), SamplePair>,
    window: Duration,
) -> Option<metricsv1::PodMetrics> {
    let mut container_names: Vec<&String> = cpu
        .keys()
        .chain(memory.keys())
        .filter(|(name, _)| *name == pod.name)
        .map(|(_, container)| container)
        .collect();
    container_names.sort();
    container_names.dedup();
    if container_names.is_empty() {
        return None;
    }

    let mut contributing = Vec::new();
    let mut containers = Vec::new();
    for container in container_names {
        let key = (pod.name.clone(), container.clone());
        let cpu_sample = cpu.get(&key).copied();
        let memory_sample = memory.get(&key).copied();
        contributing.extend(cpu_sample.iter().copied());
        contributing.extend(memory_sample.iter().copied());

        containers.push(metricsv1::Container {
            name: container.clone(),
            usage: metricsv1::Usage {
                cpu: milli_quantity(sanitize(cpu_sample)),
                memory: milli_quantity(sanitize(memory_sample)),
            },
        });
    }

    Some(metricsv1::PodMetrics {
        metadata: metav1::ObjectMeta::with_namespace(&pod.name, &pod.namespace),
        timestamp: metav1::Time::from_unix(earliest(contributing.iter())),
        window,
        containers,
    })
}

impl std::fmt::Debug for ResourceMetricsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMetricsProvider")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
