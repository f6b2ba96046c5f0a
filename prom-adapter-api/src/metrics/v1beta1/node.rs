use std::time::Duration;

use super::*;

/// `NodeMetrics` sets resource usage metrics of a node.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub metadata: metav1::ObjectMeta,

    /// the following fields define time interval from which metrics were
    /// collected from the interval [Timestamp-Window, Timestamp].
    ///
    pub timestamp: metav1::Time,

    #[serde(with = "duration")]
    pub window: Duration,

    /// the memory usage is the memory working set
    ///
    pub usage: Usage,
}

impl k8s::Resource for NodeMetrics {
    const API_VERSION: &'static str = METRICS_API_GROUP_VERSION;
    const GROUP: &'static str = METRICS_API_GROUP;
    const KIND: &'static str = "NodeMetrics";
    const VERSION: &'static str = METRICS_API_VERSION;
    const URL_PATH_SEGMENT: &'static str = "nodes";
    type Scope = k8s::ClusterResourceScope;
}

impl k8s::Metadata for NodeMetrics {
    type Ty = metav1::ObjectMeta;

    fn metadata(&self) -> &<Self as k8s::Metadata>::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut <Self as k8s::Metadata>::Ty {
        &mut self.metadata
    }
}

impl k8s::ListableResource for NodeMetrics {
    const LIST_KIND: &'static str = "NodeMetricsList";
}
