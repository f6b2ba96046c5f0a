//! The custom-metrics provider: resolves objects, builds the backend query
//! and shapes the API response.

use std::sync::Arc;

use chrono::Utc;
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::ApiResource as KubeApiResource;
use kube::ResourceExt as _;
use tracing::debug;

use prom_adapter_ext::{cmv1beta2, metav1, resource, QuantityExt as _, TimeExt as _};
use prom_adapter_promapi::QueryBackend;
use prom_adapter_rules::{GroupResource, Requirement, ResourceMapper};

use crate::errors::ProviderError;
use crate::registry::{CustomMetricRegistry, MetricInfo};

/// Milli-quantity of a backend sample: `value × 1000`, suffixed `m`.
pub(crate) fn milli_quantity(value: f64) -> resource::Quantity {
    resource::Quantity::from_milli((value * 1000.0) as i64)
}

pub struct CustomMetricsProvider {
    backend: Arc<dyn QueryBackend>,
    registry: Arc<CustomMetricRegistry>,
    mapper: Arc<ResourceMapper>,
    client: Option<kube::Client>,
}

impl std::fmt::Debug for CustomMetricsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomMetricsProvider")
            .field("registry", &self.registry)
            .field("client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl CustomMetricsProvider {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        registry: Arc<CustomMetricRegistry>,
        mapper: Arc<ResourceMapper>,
        client: Option<kube::Client>,
    ) -> Self {
        Self {
            backend,
            registry,
            mapper,
            client,
        }
    }

    pub fn registry(&self) -> &CustomMetricRegistry {
        &self.registry
    }

    /// Answer a single-object request:
    /// `/namespaces/{ns}/{resource}/{name}/{metric}`.
    pub async fn metric_for_object(
        &self,
        resource: &GroupResource,
        namespace: &str,
        name: &str,
        metric: &str,
        metric_selector: &[Requirement],
    ) -> Result<cmv1beta2::MetricValue, ProviderError> {
        let info = MetricInfo::new(resource.clone(), !namespace.is_empty(), metric);
        let names = [name.to_string()];
        let query =
            self.registry
                .query_for_metric(&info, namespace, metric_selector, &names)?;
        debug!(%query, metric, "executing custom metrics query");

        let result = self.backend.query(Utc::now(), query.as_str()).await?;
        let samples = result
            .as_vector()
            .ok_or(ProviderError::UnexpectedResult("expected a vector result"))?;
        let sample = samples.first().ok_or_else(|| {
            ProviderError::metric_not_found(resource.to_string(), metric)
        })?;

        Ok(self.metric_value(resource, namespace, name, metric, sample.value))
    }

    /// Answer a selector request:
    /// `/namespaces/{ns}/{resource}/*/{metric}?labelSelector=...`.
    ///
    /// Objects are listed through the dynamic client, then matched to samples
    /// by the resource label.
    pub async fn metrics_for_selector(
        &self,
        resource: &GroupResource,
        namespace: &str,
        selector: &str,
        metric: &str,
        metric_selector: &[Requirement],
    ) -> Result<cmv1beta2::MetricValueList, ProviderError> {
        let names = self.object_names(resource, namespace, selector).await?;
        let info = MetricInfo::new(resource.clone(), !namespace.is_empty(), metric);
        let query =
            self.registry
                .query_for_metric(&info, namespace, metric_selector, &names)?;
        debug!(%query, metric, objects = names.len(), "executing custom metrics query");

        let result = self.backend.query(Utc::now(), query.as_str()).await?;
        let samples = result
            .as_vector()
            .ok_or(ProviderError::UnexpectedResult("expected a vector result"))?;
        let by_name = self.registry.match_values_to_names(&info, samples)?;

        let items = names
            .iter()
            .filter_map(|name| by_name.get(name).map(|value| (name, *value)))
            .map(|(name, value)| self.metric_value(resource, namespace, name, metric, value))
            .collect();

        Ok(cmv1beta2::MetricValueList {
            metadata: metav1::ListMeta::default(),
            items,
        })
    }

    async fn object_names(
        &self,
        resource: &GroupResource,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let client = self.client.clone().ok_or(ProviderError::NoDynamicClient)?;

        let (api_version, kind) = self
            .mapper
            .kind_for(resource)
            .unwrap_or_else(|| ("v1".to_string(), self.mapper.singular(resource)));
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), api_version),
        };
        let api_resource = KubeApiResource {
            group: group.clone(),
            version: version.clone(),
            api_version: if group.is_empty() {
                version
            } else {
                format!("{group}/{version}")
            },
            kind,
            plural: resource.resource.clone(),
        };

        let api: Api<DynamicObject> = if namespace.is_empty() {
            Api::all_with(client, &api_resource)
        } else {
            Api::namespaced_with(client, namespace, &api_resource)
        };

        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(selector)
        };
        let objects = api.list(&params).await?;
        Ok(objects.items.iter().map(|object| object.name_any()).collect())
    }

    fn metric_value(
        &self,
        resource: &GroupResource,
        namespace: &str,
        name: &str,
        metric: &str,
        value: prom_adapter_promapi::SamplePair,
    ) -> cmv1beta2::MetricValue {
        let (api_version, kind) = self
            .mapper
            .kind_for(resource)
            .map(|(api_version, kind)| (Some(api_version), kind))
            .unwrap_or_else(|| (None, self.mapper.singular(resource)));

        let namespace = (!namespace.is_empty()).then(|| namespace.to_string());
        let object_ref = cmv1beta2::object_reference(
            api_version,
            kind,
            namespace,
            name,
        );

        cmv1beta2::MetricValue::with_object_ref(metric, object_ref)
            .timestamp(metav1::Time::from_unix(value.timestamp))
            .value(milli_quantity(value.value))
    }
}
