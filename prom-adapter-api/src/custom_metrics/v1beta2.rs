use constcat::concat;

use super::*;

pub const CUSTOM_METRICS_API_GROUP: &str = "custom.metrics.k8s.io";
pub const CUSTOM_METRICS_API_VERSION: &str = "v1beta2";
pub const CUSTOM_METRICS_API_GROUP_VERSION: &str =
    concat!(CUSTOM_METRICS_API_GROUP, "/", CUSTOM_METRICS_API_VERSION);

/// `MetricIdentifier` identifies a metric by name and, optionally, selector
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricIdentifier {
    /// name is the name of the given metric
    ///
    pub name: String,
    /// selector represents the label selector that could be used to select
    /// this metric, and will generally just be the selector passed in to
    /// the query used to fetch this metric.
    /// When left blank, only the metric's Name will be used to gather metrics.
    /// +optional
    ///
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<metav1::LabelSelector>,
}

impl MetricIdentifier {
    pub fn new(name: impl ToString) -> Self {
        let name = name.to_string();
        let selector = None;
        Self { name, selector }
    }

    /// Attach the label selector the metric was fetched with.
    ///
    pub fn selector(self, selector: impl Into<Option<metav1::LabelSelector>>) -> Self {
        Self {
            selector: selector.into(),
            ..self
        }
    }
}

/// `MetricValue` is the metric value for some object
///
/// The described object is dynamic: which group-resource it belongs to is
/// only known at request time, so the reference is carried as a plain
/// `corev1::ObjectReference` built by the caller.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub metadata: metav1::ObjectMeta,

    /// a reference to the described object
    ///
    pub described_object: corev1::ObjectReference,

    pub metric: MetricIdentifier,

    /// indicates the time at which the metrics were produced
    ///
    pub timestamp: metav1::Time,

    /// indicates the window ([Timestamp-Window, Timestamp]) from
    /// which these metrics were calculated, when returning rate
    /// metrics calculated from cumulative metrics (or zero for
    /// non-calculated instantaneous metrics).
    ///
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<i64>,

    /// the value of the metric for this
    ///
    pub value: resource::Quantity,
}

impl k8s::Resource for MetricValue {
    const API_VERSION: &'static str = CUSTOM_METRICS_API_GROUP_VERSION;
    const GROUP: &'static str = CUSTOM_METRICS_API_GROUP;
    const KIND: &'static str = "MetricValue";
    const VERSION: &'static str = CUSTOM_METRICS_API_VERSION;
    const URL_PATH_SEGMENT: &'static str = "metricvalues";
    type Scope = k8s::NamespaceResourceScope;
}

impl k8s::Metadata for MetricValue {
    type Ty = metav1::ObjectMeta;

    fn metadata(&self) -> &<Self as k8s::Metadata>::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut <Self as k8s::Metadata>::Ty {
        &mut self.metadata
    }
}

impl k8s::ListableResource for MetricValue {
    const LIST_KIND: &'static str = "MetricValueList";
}

pub type MetricValueList = k8s::List<MetricValue>;

impl MetricValue {
    /// Create a `MetricValue` describing the object behind `object_ref`.
    ///
    pub fn with_object_ref(metric: impl ToString, object_ref: corev1::ObjectReference) -> Self {
        let metric = MetricIdentifier::new(metric);

        let metadata = metav1::ObjectMeta {
            name: Some(metric.name.clone()),
            namespace: object_ref.namespace.clone(),
            ..default()
        };

        Self {
            metadata,
            described_object: object_ref,
            metric,
            timestamp: metav1::Time(default()),
            window_seconds: None,
            value: default(),
        }
    }

    /// Set timestamp for this `MetricValue`
    ///
    pub fn timestamp(self, timestamp: metav1::Time) -> Self {
        Self { timestamp, ..self }
    }

    /// Set the metric value
    ///
    pub fn value(self, value: resource::Quantity) -> Self {
        Self { value, ..self }
    }

    /// Set the calculation window in whole seconds
    ///
    pub fn window_seconds(self, window_seconds: impl Into<Option<i64>>) -> Self {
        Self {
            window_seconds: window_seconds.into(),
            ..self
        }
    }
}

/// Build the object reference for a dynamically addressed object.
///
pub fn object_reference(
    api_version: impl Into<Option<String>>,
    kind: impl ToString,
    namespace: impl Into<Option<String>>,
    name: impl ToString,
) -> corev1::ObjectReference {
    corev1::ObjectReference {
        api_version: api_version.into(),
        kind: Some(kind.to_string()),
        name: Some(name.to_string()),
        namespace: namespace.into(),
        ..default()
    }
}
