//! The discovery configuration model: strict YAML in, immutable rules out.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration from {path:?}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level discovery configuration.
///
/// Unknown keys anywhere in the document reject it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdapterConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_rules: Vec<Rule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_rules: Option<ResourceRules>,
}

/// One declarative record translating a family of backend series into an API
/// metric family.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Rule {
    /// Backend series selector used for discovery.
    pub series_query: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series_filters: Vec<RegexFilter>,

    #[serde(default)]
    pub resources: ResourceMapping,

    #[serde(default)]
    pub name: NameMapping,

    #[serde(default = "default_metrics_query")]
    pub metrics_query: String,
}

fn default_metrics_query() -> String {
    "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string()
}

/// A series-name filter; exactly one of `is`/`isNot` must be set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegexFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not: Option<String>,
}

impl RegexFilter {
    pub fn is(pattern: impl ToString) -> Self {
        Self {
            is: Some(pattern.to_string()),
            is_not: None,
        }
    }

    pub fn is_not(pattern: impl ToString) -> Self {
        Self {
            is: None,
            is_not: Some(pattern.to_string()),
        }
    }
}

/// How series labels map to Kubernetes resources: a template over
/// `<<.Group>>`/`<<.Resource>>`, per-label overrides, or both.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, GroupResourceSpec>,

    /// Force the namespaced flag instead of deriving it from the labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaced: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroupResourceSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    pub resource: String,
}

impl GroupResourceSpec {
    pub fn resource(resource: impl ToString) -> Self {
        Self {
            group: String::new(),
            resource: resource.to_string(),
        }
    }
}

/// Regex rename from series name to API metric name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NameMapping {
    /// Defaults to `.*` when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub matches: String,

    /// Replacement; defaults to `$0` or `$1` depending on capture count.
    #[serde(default, rename = "as", skip_serializing_if = "String::is_empty")]
    pub as_: String,
}

/// Fixed queries backing the resource metrics API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRules {
    pub cpu: ResourceRule,
    pub memory: ResourceRule,

    /// The window resource metrics report, e.g. `1m`.
    #[serde(with = "window")]
    pub window: Duration,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRule {
    pub container_query: String,
    pub node_query: String,

    #[serde(default)]
    pub resources: ResourceMapping,

    pub container_label: String,
}

mod window {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let secs = window.as_secs();
        let rendered = if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        };
        serializer.serialize_str(&rendered)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let nanos = go_parse_duration::parse_duration(&raw)
            .map_err(|err| D::Error::custom(format!("invalid window {raw:?}: {err:?}")))?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}

impl AdapterConfig {
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(document)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&document)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The built-in configuration used when no config file is given: cAdvisor
    /// CPU/memory resource rules plus rate conversion for cumulative
    /// container and non-container series.
    pub fn default_rules() -> Self {
        let container_resources = ResourceMapping {
            template: None,
            overrides: BTreeMap::from([
                ("namespace".to_string(), GroupResourceSpec::resource("namespace")),
                ("pod".to_string(), GroupResourceSpec::resource("pod")),
            ]),
            namespaced: None,
        };
        let node_resources = ResourceMapping {
            template: None,
            overrides: BTreeMap::from([
                ("instance".to_string(), GroupResourceSpec::resource("node")),
                ("namespace".to_string(), GroupResourceSpec::resource("namespace")),
                ("pod".to_string(), GroupResourceSpec::resource("pod")),
            ]),
            namespaced: None,
        };

        Self {
            rules: vec![
                // cumulative cAdvisor seconds metrics
                Rule {
                    series_query: r#"{__name__=~"^container_.*_seconds_total$",container!="POD",namespace!="",pod!=""}"#.to_string(),
                    series_filters: Vec::new(),
                    resources: container_resources.clone(),
                    name: NameMapping {
                        matches: "^container_(.*)_seconds_total$".to_string(),
                        as_: String::new(),
                    },
                    metrics_query: r#"sum(rate(<<.Series>>{<<.LabelMatchers>>,container!="POD"}[1m])) by (<<.GroupBy>>)"#.to_string(),
                },
                // other cumulative cAdvisor metrics
                Rule {
                    series_query: r#"{__name__=~"^container_.*_total$",container!="POD",namespace!="",pod!=""}"#.to_string(),
                    series_filters: vec![RegexFilter::is_not("^container_.*_seconds_total$")],
                    resources: container_resources.clone(),
                    name: NameMapping {
                        matches: "^container_(.*)_total$".to_string(),
                        as_: String::new(),
                    },
                    metrics_query: r#"sum(rate(<<.Series>>{<<.LabelMatchers>>,container!="POD"}[1m])) by (<<.GroupBy>>)"#.to_string(),
                },
                // instantaneous cAdvisor metrics
                Rule {
                    series_query: r#"{__name__=~"^container_.*",container!="POD",namespace!="",pod!=""}"#.to_string(),
                    series_filters: vec![RegexFilter::is_not("^container_.*_total$")],
                    resources: container_resources,
                    name: NameMapping {
                        matches: "^container_(.*)$".to_string(),
                        as_: String::new(),
                    },
                    metrics_query: r#"sum(<<.Series>>{<<.LabelMatchers>>,container!="POD"}) by (<<.GroupBy>>)"#.to_string(),
                },
                // non-container cumulative metrics
                Rule {
                    series_query: r#"{namespace!="",__name__!~"^container_.*"}"#.to_string(),
                    series_filters: vec![RegexFilter::is_not(".*_seconds_total")],
                    resources: ResourceMapping {
                        template: Some("<<.Resource>>".to_string()),
                        overrides: BTreeMap::new(),
                        namespaced: None,
                    },
                    name: NameMapping {
                        matches: "^(.*)_total$".to_string(),
                        as_: String::new(),
                    },
                    metrics_query: "sum(rate(<<.Series>>{<<.LabelMatchers>>}[1m])) by (<<.GroupBy>>)".to_string(),
                },
                // non-container gauges
                Rule {
                    series_query: r#"{namespace!="",__name__!~"^container_.*"}"#.to_string(),
                    series_filters: vec![RegexFilter::is_not(".*_total$")],
                    resources: ResourceMapping {
                        template: Some("<<.Resource>>".to_string()),
                        overrides: BTreeMap::new(),
                        namespaced: None,
                    },
                    name: NameMapping::default(),
                    metrics_query: "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
                },
            ],
            external_rules: Vec::new(),
            resource_rules: Some(ResourceRules {
                cpu: ResourceRule {
                    container_query: "sum(rate(container_cpu_usage_seconds_total{<<.LabelMatchers>>}[1m])) by (<<.GroupBy>>)".to_string(),
                    node_query: r#"sum(rate(container_cpu_usage_seconds_total{<<.LabelMatchers>>,id='/'}[1m])) by (<<.GroupBy>>)"#.to_string(),
                    resources: node_resources.clone(),
                    container_label: "container".to_string(),
                },
                memory: ResourceRule {
                    container_query: "sum(container_memory_working_set_bytes{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
                    node_query: r#"sum(container_memory_working_set_bytes{<<.LabelMatchers>>,id='/'}) by (<<.GroupBy>>)"#.to_string(),
                    resources: node_resources,
                    container_label: "container".to_string(),
                },
                window: Duration::from_secs(60),
            }),
        }
    }
}
