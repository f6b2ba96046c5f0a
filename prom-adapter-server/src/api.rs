//! HTTP surface: the three aggregated API groups, discovery documents,
//! process metrics and health.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use kube::api::{Api, ListParams};
use kube::ResourceExt as _;
use serde::Deserialize;
use tracing::error;

use prom_adapter_ext::{corev1, metav1, metricsv1, APIResourceExt as _, StatusExt as _};
use prom_adapter_promapi::AdapterMetrics;
use prom_adapter_provider::{
    CustomMetricsProvider, ExternalMetricsProvider, PodRef, ProviderError, ResourceMetricsProvider,
};
use prom_adapter_rules::{selector, GroupResource, Requirement};

use prom_adapter_api::custom_metrics::v1beta2 as cmv1beta2;
use prom_adapter_api::external_metrics::v1beta1 as emv1beta1;

pub(crate) struct AppState {
    pub(crate) custom: CustomMetricsProvider,
    pub(crate) external: ExternalMetricsProvider,
    pub(crate) resource: Option<ResourceMetricsProvider>,
    pub(crate) client: Option<kube::Client>,
    pub(crate) metrics: Arc<AdapterMetrics>,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(process_metrics))
        .route("/apis/custom.metrics.k8s.io", get(custom_group))
        .route("/apis/custom.metrics.k8s.io/v1beta2", get(custom_resource_list))
        .route(
            "/apis/custom.metrics.k8s.io/v1beta2/namespaces/{namespace}/{resource}/{name}/{metric}",
            get(custom_namespaced),
        )
        .route(
            "/apis/custom.metrics.k8s.io/v1beta2/{resource}/{name}/{metric}",
            get(custom_root),
        )
        .route("/apis/external.metrics.k8s.io", get(external_group))
        .route(
            "/apis/external.metrics.k8s.io/v1beta1",
            get(external_resource_list),
        )
        .route(
            "/apis/external.metrics.k8s.io/v1beta1/namespaces/{namespace}/{metric}",
            get(external_metrics_handler),
        )
        .route("/apis/metrics.k8s.io/v1beta1", get(resource_api_list))
        .route("/apis/metrics.k8s.io/v1beta1/nodes", get(all_nodes))
        .route("/apis/metrics.k8s.io/v1beta1/nodes/{name}", get(node_by_name))
        .route("/apis/metrics.k8s.io/v1beta1/pods", get(all_pods))
        .route(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{namespace}/pods",
            get(namespaced_pods),
        )
        .route(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{namespace}/pods/{name}",
            get(pod_by_name),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricsParams {
    #[serde(default)]
    label_selector: Option<String>,
    #[serde(default)]
    metric_label_selector: Option<String>,
}

impl MetricsParams {
    fn metric_requirements(&self) -> Result<Vec<Requirement>, Response> {
        selector::parse(self.metric_label_selector.as_deref().unwrap_or(""))
            .map_err(|_| bad_selector())
    }

    /// For external metrics the label selector selects metric labels.
    fn label_requirements(&self) -> Result<Vec<Requirement>, Response> {
        selector::parse(self.label_selector.as_deref().unwrap_or("")).map_err(|_| bad_selector())
    }
}

fn bad_selector() -> Response {
    let status = metav1::Status::bad_request("unable to fetch metrics");
    (StatusCode::BAD_REQUEST, Json(status)).into_response()
}

fn provider_error(state: &AppState, api_type: &'static str, err: &ProviderError) -> Response {
    state
        .metrics
        .errors_served
        .with_label_values(&[api_type])
        .inc();
    error!(api = api_type, error = %err, "request failed");

    let code =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(err.status())).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn process_metrics(State(state): State<Arc<AppState>>) -> Response {
    use prometheus::Encoder as _;

    let families = state.metrics.registry().gather();
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "encoding process metrics failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- custom metrics ---------------------------------------------------------

async fn custom_group() -> Json<metav1::APIGroup> {
    Json(api_group(
        cmv1beta2::CUSTOM_METRICS_API_GROUP,
        cmv1beta2::CUSTOM_METRICS_API_GROUP_VERSION,
        cmv1beta2::CUSTOM_METRICS_API_VERSION,
    ))
}

async fn custom_resource_list(State(state): State<Arc<AppState>>) -> Json<metav1::APIResourceList> {
    let resources = state
        .custom
        .registry()
        .list_all_metrics()
        .into_iter()
        .map(|info| metav1::APIResource {
            name: format!("{}/{}", info.group_resource, info.metric),
            namespaced: info.namespaced,
            kind: "MetricValueList".to_string(),
            verbs: vec!["get".to_string()],
            ..Default::default()
        })
        .collect();

    Json(metav1::APIResourceList {
        group_version: cmv1beta2::CUSTOM_METRICS_API_GROUP_VERSION.to_string(),
        resources,
    })
}

async fn custom_namespaced(
    State(state): State<Arc<AppState>>,
    Path((namespace, resource, name, metric)): Path<(String, String, String, String)>,
    Query(params): Query<MetricsParams>,
) -> Response {
    serve_custom(&state, &namespace, &resource, &name, &metric, &params).await
}

async fn custom_root(
    State(state): State<Arc<AppState>>,
    Path((resource, name, metric)): Path<(String, String, String)>,
    Query(params): Query<MetricsParams>,
) -> Response {
    serve_custom(&state, "", &resource, &name, &metric, &params).await
}

async fn serve_custom(
    state: &AppState,
    namespace: &str,
    resource: &str,
    name: &str,
    metric: &str,
    params: &MetricsParams,
) -> Response {
    let group_resource = GroupResource::from_path(resource);
    let metric_selector = match params.metric_requirements() {
        Ok(requirements) => requirements,
        Err(response) => return response,
    };

    if name == "*" {
        let selector = params.label_selector.as_deref().unwrap_or("");
        match state
            .custom
            .metrics_for_selector(&group_resource, namespace, selector, metric, &metric_selector)
            .await
        {
            Ok(list) => Json(list).into_response(),
            Err(err) => provider_error(state, "custom", &err),
        }
    } else {
        match state
            .custom
            .metric_for_object(&group_resource, namespace, name, metric, &metric_selector)
            .await
        {
            Ok(value) => Json(cmv1beta2::MetricValueList {
                metadata: metav1::ListMeta::default(),
                items: vec![value],
            })
            .into_response(),
            Err(err) => provider_error(state, "custom", &err),
        }
    }
}

// --- external metrics -------------------------------------------------------

async fn external_group() -> Json<metav1::APIGroup> {
    Json(api_group(
        emv1beta1::EXTERNAL_METRICS_API_GROUP,
        emv1beta1::EXTERNAL_METRICS_API_GROUP_VERSION,
        emv1beta1::EXTERNAL_METRICS_API_VERSION,
    ))
}

async fn external_resource_list(
    State(state): State<Arc<AppState>>,
) -> Json<metav1::APIResourceList> {
    let resources = state
        .external
        .registry()
        .list_all_metrics()
        .into_iter()
        .map(|metric| metav1::APIResource {
            name: metric,
            namespaced: true,
            kind: "ExternalMetricValueList".to_string(),
            verbs: vec!["get".to_string()],
            ..Default::default()
        })
        .collect();

    Json(metav1::APIResourceList {
        group_version: emv1beta1::EXTERNAL_METRICS_API_GROUP_VERSION.to_string(),
        resources,
    })
}

async fn external_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, metric)): Path<(String, String)>,
    Query(params): Query<MetricsParams>,
) -> Response {
    let requirements = match params.label_requirements() {
        Ok(requirements) => requirements,
        Err(response) => return response,
    };

    match state
        .external
        .metrics_for(&namespace, &metric, &requirements)
        .await
    {
        Ok(list) => Json(list).into_response(),
        Err(err) => provider_error(&state, "external", &err),
    }
}

// --- resource metrics -------------------------------------------------------

async fn resource_api_list() -> Json<metav1::APIResourceList> {
    Json(metav1::APIResourceList {
        group_version: metricsv1::METRICS_API_GROUP_VERSION.to_string(),
        resources: vec![
            metricsv1::NodeMetrics::api_resource(),
            metricsv1::PodMetrics::api_resource(),
        ],
    })
}

fn no_resource_rules(state: &AppState) -> Response {
    state
        .metrics
        .errors_served
        .with_label_values(&["resource"])
        .inc();
    let status = metav1::Status::not_found("metrics.k8s.io", "resource metrics are not configured");
    (StatusCode::NOT_FOUND, Json(status)).into_response()
}

async fn all_nodes(State(state): State<Arc<AppState>>) -> Response {
    let Some(provider) = &state.resource else {
        return no_resource_rules(&state);
    };
    let names = match list_node_names(&state).await {
        Ok(names) => names,
        Err(err) => return provider_error(&state, "resource", &err),
    };

    match provider.node_metrics(&names).await {
        Ok(items) => Json(metricsv1::NodeMetricsList {
            metadata: metav1::ListMeta::default(),
            items,
        })
        .into_response(),
        Err(err) => provider_error(&state, "resource", &err),
    }
}

async fn node_by_name(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let Some(provider) = &state.resource else {
        return no_resource_rules(&state);
    };

    match provider.node_metrics(std::slice::from_ref(&name)).await {
        Ok(mut items) if !items.is_empty() => Json(items.remove(0)).into_response(),
        Ok(_) => {
            let status = metav1::Status::not_found("nodemetrics", &name);
            (StatusCode::NOT_FOUND, Json(status)).into_response()
        }
        Err(err) => provider_error(&state, "resource", &err),
    }
}

async fn all_pods(State(state): State<Arc<AppState>>) -> Response {
    serve_pods(&state, None, None).await
}

async fn namespaced_pods(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
) -> Response {
    serve_pods(&state, Some(namespace), None).await
}

async fn pod_by_name(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    serve_pods(&state, Some(namespace), Some(name)).await
}

async fn serve_pods(state: &AppState, namespace: Option<String>, name: Option<String>) -> Response {
    let Some(provider) = &state.resource else {
        return no_resource_rules(state);
    };
    let pods = match list_pod_refs(state, namespace.as_deref(), name.as_deref()).await {
        Ok(pods) => pods,
        Err(err) => return provider_error(state, "resource", &err),
    };

    match provider.pod_metrics(&pods).await {
        Ok(mut items) => match name {
            Some(name) if items.is_empty() => {
                let status = metav1::Status::not_found("podmetrics", &name);
                (StatusCode::NOT_FOUND, Json(status)).into_response()
            }
            Some(_) => Json(items.remove(0)).into_response(),
            None => Json(metricsv1::PodMetricsList {
                metadata: metav1::ListMeta::default(),
                items,
            })
            .into_response(),
        },
        Err(err) => provider_error(state, "resource", &err),
    }
}

async fn list_node_names(state: &AppState) -> Result<Vec<String>, ProviderError> {
    let client = state.client.clone().ok_or(ProviderError::NoDynamicClient)?;
    let nodes: Api<corev1::Node> = Api::all(client);
    let list = nodes.list_metadata(&ListParams::default()).await?;
    Ok(list.items.iter().map(|node| node.name_any()).collect())
}

async fn list_pod_refs(
    state: &AppState,
    namespace: Option<&str>,
    name: Option<&str>,
) -> Result<Vec<PodRef>, ProviderError> {
    let client = state.client.clone().ok_or(ProviderError::NoDynamicClient)?;
    let pods: Api<corev1::Pod> = match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    match name {
        Some(name) => {
            // a single pod; the fetch doubles as the existence check
            match pods.get_metadata_opt(name).await? {
                Some(pod) => Ok(vec![PodRef::new(
                    pod.namespace().unwrap_or_default(),
                    pod.name_any(),
                )]),
                None => Ok(Vec::new()),
            }
        }
        None => {
            let list = pods.list_metadata(&ListParams::default()).await?;
            Ok(list
                .items
                .iter()
                .map(|pod| PodRef::new(pod.namespace().unwrap_or_default(), pod.name_any()))
                .collect())
        }
    }
}

fn api_group(name: &str, group_version: &str, version: &str) -> metav1::APIGroup {
    let discovery_version = metav1::GroupVersionForDiscovery {
        group_version: group_version.to_string(),
        version: version.to_string(),
    };
    metav1::APIGroup {
        name: name.to_string(),
        preferred_version: Some(discovery_version.clone()),
        server_address_by_client_cidrs: None,
        versions: vec![discovery_version],
    }
}
