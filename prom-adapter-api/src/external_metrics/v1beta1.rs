use std::collections::BTreeMap;

use constcat::concat;

use super::*;

pub const EXTERNAL_METRICS_API_GROUP: &str = "external.metrics.k8s.io";
pub const EXTERNAL_METRICS_API_VERSION: &str = "v1beta1";
pub const EXTERNAL_METRICS_API_GROUP_VERSION: &str =
    concat!(EXTERNAL_METRICS_API_GROUP, "/", EXTERNAL_METRICS_API_VERSION);

/// `ExternalMetricValue` is a metric value for external metric
/// (not associated with any Kubernetes object).
///
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricValue {
    pub metadata: metav1::ObjectMeta,

    /// the name of the metric
    ///
    pub metric_name: String,

    /// a set of labels that identify a single time series for the metric
    ///
    pub metric_labels: BTreeMap<String, String>,

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

    /// the value of the metric
    ///
    pub value: resource::Quantity,
}

impl k8s::Resource for ExternalMetricValue {
    const API_VERSION: &'static str = EXTERNAL_METRICS_API_GROUP_VERSION;
    const GROUP: &'static str = EXTERNAL_METRICS_API_GROUP;
    const KIND: &'static str = "ExternalMetricValue";
    const VERSION: &'static str = EXTERNAL_METRICS_API_VERSION;
    const URL_PATH_SEGMENT: &'static str = "externalmetricvalues";
    type Scope = k8s::NamespaceResourceScope;
}

impl k8s::Metadata for ExternalMetricValue {
    type Ty = metav1::ObjectMeta;

    fn metadata(&self) -> &<Self as k8s::Metadata>::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut <Self as k8s::Metadata>::Ty {
        &mut self.metadata
    }
}

impl k8s::ListableResource for ExternalMetricValue {
    const LIST_KIND: &'static str = "ExternalMetricValueList";
}

pub type ExternalMetricValueList = k8s::List<ExternalMetricValue>;

impl ExternalMetricValue {
    /// Create an `ExternalMetricValue` carrying only the metric name.
    ///
    pub fn new(metric_name: impl ToString) -> Self {
        Self {
            metadata: default(),
            metric_name: metric_name.to_string(),
            metric_labels: BTreeMap::new(),
            timestamp: metav1::Time(default()),
            window_seconds: None,
            value: default(),
        }
    }

    /// Attach the series labels identifying this value
    ///
    pub fn labels(self, metric_labels: BTreeMap<String, String>) -> Self {
        Self {
            metric_labels,
            ..self
        }
    }

    /// Set timestamp for this value
    ///
    pub fn timestamp(self, timestamp: metav1::Time) -> Self {
        Self { timestamp, ..self }
    }

    /// Set the metric value
    ///
    pub fn value(self, value: resource::Quantity) -> Self {
        Self { value, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_no_labels() {
        let value = ExternalMetricValue::new("queue_length");

        assert_eq!(value.metric_name, "queue_length");
        assert!(value.metric_labels.is_empty());
        assert_eq!(value.window_seconds, None);
    }

    #[test]
    fn labels_and_value_chain() {
        let labels = BTreeMap::from([("queue_name".to_string(), "processing".to_string())]);
        let value = ExternalMetricValue::new("queue_length")
            .labels(labels.clone())
            .value(resource::Quantity("42000m".to_string()));

        assert_eq!(value.metric_labels, labels);
        assert_eq!(value.value.0, "42000m");
    }

    #[test]
    fn serializes_camel_case() {
        let value = ExternalMetricValue::new("queue_length");
        let json = serde_json::to_value(&value).unwrap();

        assert!(json.get("metricName").is_some());
        assert!(json.get("metricLabels").is_some());
    }
}
