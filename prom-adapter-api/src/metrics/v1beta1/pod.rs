use std::time::Duration;

use super::*;

/// `PodMetrics` sets resource usage metrics of a pod.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PodMetrics {
    pub metadata: metav1::ObjectMeta,

    /// the following fields define time interval from which metrics were
    /// collected from the interval [Timestamp-Window, Timestamp].
    ///
    pub timestamp: metav1::Time,

    #[serde(with = "duration")]
    pub window: Duration,

    /// metrics for all containers are collected within the same time window
    ///
    pub containers: Vec<Container>,
}

impl k8s::Resource for PodMetrics {
    const API_VERSION: &'static str = METRICS_API_GROUP_VERSION;
    const GROUP: &'static str = METRICS_API_GROUP;
    const KIND: &'static str = "PodMetrics";
    const VERSION: &'static str = METRICS_API_VERSION;
    const URL_PATH_SEGMENT: &'static str = "pods";
    type Scope = k8s::NamespaceResourceScope;
}

impl k8s::Metadata for PodMetrics {
    type Ty = metav1::ObjectMeta;

    fn metadata(&self) -> &<Self as k8s::Metadata>::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut <Self as k8s::Metadata>::Ty {
        &mut self.metadata
    }
}

impl k8s::ListableResource for PodMetrics {
    const LIST_KIND: &'static str = "PodMetricsList";
}
