//! In-memory metric registries fed by the discovery lister, and the three
//! providers answering custom, external and resource metrics requests.

pub use custom::CustomMetricsProvider;
pub use errors::ProviderError;
pub use external::ExternalMetricsProvider;
pub use external_registry::ExternalMetricRegistry;
pub use registry::{CustomMetricRegistry, MetricInfo, SeriesRegistration};
pub use resource::{PodRef, ResourceMetricsProvider};

pub mod custom;
pub mod errors;
pub mod external;
pub mod external_registry;
pub mod registry;
pub mod resource;
