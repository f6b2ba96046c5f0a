//! Discovery rules: the configuration model, resource/label conversion, query
//! templates, per-rule metric namers and the periodic series lister that keeps
//! the registries fed.

pub use config::{
    AdapterConfig, ConfigError, GroupResourceSpec, NameMapping, RegexFilter, ResourceMapping,
    ResourceRule, ResourceRules, Rule,
};
pub use lister::{MetricUpdateResult, PeriodicLister, UpdateCallback};
pub use mapper::{GroupResource, ResourceInfo, ResourceMapper};
pub use naming::{MetricNamer, NamingError, QueryError};
pub use resource::{ConverterError, ResourceConverter, CLUSTER_SCOPED_RESOURCES};
pub use selector::{Operator, Requirement, SelectorParseError};
pub use template::{QueryArgs, QueryTemplate, TemplateError};

pub mod config;
pub mod lister;
pub mod mapper;
pub mod naming;
pub mod resource;
pub mod selector;
pub mod template;
