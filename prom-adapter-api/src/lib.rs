//! Resource definitions for the three aggregated metrics API groups served by
//! the adapter: `metrics.k8s.io`, `custom.metrics.k8s.io` and
//! `external.metrics.k8s.io`.

pub use k8s_openapi as k8s;
pub use k8s_openapi::api::core::v1 as corev1;
pub use k8s_openapi::apimachinery::pkg::api::resource;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

pub use metrics::v1beta1;
pub use quantity::{QuantityExt, QuantityParseError};

pub mod custom_metrics;
pub mod external_metrics;
pub mod metrics;

mod quantity;

/// Return the default value for the given type.
pub fn default<T: Default>() -> T {
    T::default()
}
