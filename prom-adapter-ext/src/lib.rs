pub use prom_adapter_api::custom_metrics::v1beta2 as cmv1beta2;
pub use prom_adapter_api::external_metrics::v1beta1 as emv1beta1;
pub use prom_adapter_api::metrics::v1beta1 as metricsv1;
pub use prom_adapter_api::{QuantityExt, QuantityParseError};

pub use k8s_openapi as openapi;
pub use k8s_openapi::api::core::v1 as corev1;
pub use k8s_openapi::apimachinery::pkg::api::resource;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

pub use time::TimeExt;

use openapi::Resource;

mod time;

pub trait ObjectMetaExt {
    fn new(name: impl ToString) -> Self;
    fn with_namespace(name: impl ToString, namespace: impl ToString) -> Self;
    fn created(self, ts: impl Into<Option<metav1::Time>>) -> Self;
}

impl ObjectMetaExt for metav1::ObjectMeta {
    /// Creates an `ObjectMeta` with `name` set and all other fields left as defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
    /// use prom_adapter_ext::ObjectMetaExt as _;
    ///
    /// let meta = metav1::ObjectMeta::new("my-pod");
    /// assert_eq!(meta.name.as_deref(), Some("my-pod"));
    /// ```
    fn new(name: impl ToString) -> Self {
        let name = Some(name.to_string());
        Self { name, ..default() }
    }

    /// Creates an `ObjectMeta` with the given name and namespace.
    fn with_namespace(name: impl ToString, namespace: impl ToString) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            ..Self::new(name)
        }
    }

    /// Sets the object's creation timestamp and returns the updated `ObjectMeta`.
    fn created(self, ts: impl Into<Option<metav1::Time>>) -> Self {
        Self {
            creation_timestamp: ts.into(),
            ..self
        }
    }
}

pub trait APIResourceExt {
    fn api_resource() -> metav1::APIResource;
}

impl APIResourceExt for metricsv1::PodMetrics {
    /// API resource descriptor for PodMetrics.
    ///
    /// Produces a metav1::APIResource with the resource `name` set to `Self::URL_PATH_SEGMENT`,
    /// `namespaced` set to `true`, `kind` set to `Self::KIND`, `verbs` containing `["get", "list"]`,
    /// and other fields set to their defaults.
    fn api_resource() -> metav1::APIResource {
        metav1::APIResource {
            name: Self::URL_PATH_SEGMENT.to_string(),
            namespaced: true,
            kind: Self::KIND.to_string(),
            verbs: vec!["get".to_string(), "list".to_string()],
            ..default()
        }
    }
}

impl APIResourceExt for metricsv1::NodeMetrics {
    fn api_resource() -> metav1::APIResource {
        metav1::APIResource {
            name: Self::URL_PATH_SEGMENT.to_string(),
            namespaced: false,
            kind: Self::KIND.to_string(),
            verbs: vec!["get".to_string(), "list".to_string()],
            ..default()
        }
    }
}

pub trait StatusExt {
    fn not_found(kind: impl ToString, name: impl ToString) -> Self;
    fn bad_request(message: impl ToString) -> Self;
    fn internal(message: impl ToString) -> Self;
}

impl StatusExt for metav1::Status {
    /// Constructs a Kubernetes `Status` representing a NotFound error for the
    /// specified resource kind and name.
    ///
    /// The returned `Status` has HTTP code `404`, reason `"NotFound"`, status
    /// `"Failure"`, a message of the form `<kind> "<name>" not found`, and
    /// `details` containing the resource `kind` and `name`.
    ///
    /// # Examples
    ///
    /// ```
    /// use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
    /// use prom_adapter_ext::StatusExt as _;
    ///
    /// let s = Status::not_found("metrics", "some_usage");
    /// assert_eq!(s.code, Some(404));
    /// assert_eq!(s.reason.as_deref(), Some("NotFound"));
    /// assert!(s.message.unwrap().contains(r#"metrics "some_usage" not found"#));
    /// ```
    fn not_found(kind: impl ToString, name: impl ToString) -> Self {
        let kind = kind.to_string();
        let name = name.to_string();
        let message = format!(r#"{kind} "{name}" not found"#);
        let details = metav1::StatusDetails {
            name: Some(name),
            kind: Some(kind),
            ..default()
        };
        Self {
            code: Some(404),
            details: Some(details),
            message: Some(message),
            metadata: metav1::ListMeta::default(),
            reason: Some("NotFound".to_string()),
            status: Some("Failure".to_string()),
        }
    }

    /// A `400 BadRequest` status with the given message.
    fn bad_request(message: impl ToString) -> Self {
        Self {
            code: Some(400),
            details: None,
            message: Some(message.to_string()),
            metadata: metav1::ListMeta::default(),
            reason: Some("BadRequest".to_string()),
            status: Some("Failure".to_string()),
        }
    }

    /// A `500 InternalError` status with the given message.
    fn internal(message: impl ToString) -> Self {
        Self {
            code: Some(500),
            details: None,
            message: Some(message.to_string()),
            metadata: metav1::ListMeta::default(),
            reason: Some("InternalError".to_string()),
            status: Some("Failure".to_string()),
        }
    }
}

/// Return the default value for the given type.
///
/// # Examples
///
/// ```
/// let x: i32 = prom_adapter_ext::default::<i32>();
/// assert_eq!(x, 0);
/// ```
pub fn default<T: Default>() -> T {
    T::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta_with_namespace() {
        let meta = metav1::ObjectMeta::with_namespace("demo", "kube-system");

        assert_eq!(meta.name.as_deref(), Some("demo"));
        assert_eq!(meta.namespace.as_deref(), Some("kube-system"));
    }

    #[test]
    fn status_not_found_shape() {
        let status = metav1::Status::not_found("metrics", "ingress_hits");

        assert_eq!(status.code, Some(404));
        assert_eq!(status.reason.as_deref(), Some("NotFound"));
        let details = status.details.unwrap();
        assert_eq!(details.kind.as_deref(), Some("metrics"));
        assert_eq!(details.name.as_deref(), Some("ingress_hits"));
    }

    #[test]
    fn status_bad_request_shape() {
        let status = metav1::Status::bad_request("unable to fetch metrics");

        assert_eq!(status.code, Some(400));
        assert_eq!(status.status.as_deref(), Some("Failure"));
    }

    #[test]
    fn pod_metrics_api_resource() {
        let resource = metricsv1::PodMetrics::api_resource();

        assert!(resource.namespaced);
        assert_eq!(resource.name, "pods");
        assert_eq!(resource.verbs, vec!["get".to_string(), "list".to_string()]);
    }
}
