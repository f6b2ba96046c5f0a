//! Per-rule metric namers: series filtering, API metric naming and backend
//! query construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use prom_adapter_promapi::{Selector, Series};

use crate::config::Rule;
use crate::mapper::{GroupResource, ResourceMapper};
use crate::resource::{ConverterError, ResourceConverter};
use crate::selector::{Operator, Requirement};
use crate::template::{QueryArgs, QueryTemplate, TemplateError};

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("series filter must set exactly one of `is` and `isNot`")]
    InvalidFilter,

    #[error("invalid regex {pattern:?}: {source}")]
    BadRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("name mapping {0:?} has multiple capture groups and needs an explicit `as`")]
    AmbiguousCaptures(String),

    #[error("series name {series:?} does not match {pattern:?}")]
    NameDoesNotMatch { series: String, pattern: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Converter(#[from] ConverterError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("operator {0:?} is not supported by the backend")]
    UnsupportedOperator(&'static str),

    #[error("selector requirement on {0:?} has no values")]
    MalformedRequirement(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Converter(#[from] ConverterError),
}

#[derive(Clone, Debug)]
struct SeriesMatcher {
    regex: Regex,
    positive: bool,
}

impl SeriesMatcher {
    fn compile(pattern: &str, positive: bool) -> Result<Self, NamingError> {
        let regex = Regex::new(pattern).map_err(|source| NamingError::BadRegex {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex, positive })
    }

    fn accepts(&self, name: &str) -> bool {
        self.regex.is_match(name) == self.positive
    }
}

/// The compiled runtime form of a rule: owns series filtering, API metric
/// naming and backend query construction.
#[derive(Debug)]
pub struct MetricNamer {
    series_query: Selector,
    matchers: Vec<SeriesMatcher>,
    name_matches: Regex,
    name_as: String,
    template: QueryTemplate,
    converter: ResourceConverter,
    namespaced_override: Option<bool>,
}

impl MetricNamer {
    pub fn from_rule(rule: &Rule, mapper: Arc<ResourceMapper>) -> Result<Self, NamingError> {
        let mut matchers = Vec::with_capacity(rule.series_filters.len() + 1);
        for filter in &rule.series_filters {
            match (&filter.is, &filter.is_not) {
                (Some(pattern), None) => matchers.push(SeriesMatcher::compile(pattern, true)?),
                (None, Some(pattern)) => matchers.push(SeriesMatcher::compile(pattern, false)?),
                _ => return Err(NamingError::InvalidFilter),
            }
        }

        let matches = if rule.name.matches.is_empty() {
            ".*"
        } else {
            &rule.name.matches
        };
        let name_matches = Regex::new(matches).map_err(|source| NamingError::BadRegex {
            pattern: matches.to_string(),
            source,
        })?;
        // the name rule doubles as an implicit positive filter
        matchers.push(SeriesMatcher {
            regex: name_matches.clone(),
            positive: true,
        });

        let name_as = if rule.name.as_.is_empty() {
            // captures_len counts the implicit whole-match group
            match name_matches.captures_len() - 1 {
                0 => "$0".to_string(),
                1 => "$1".to_string(),
                _ => return Err(NamingError::AmbiguousCaptures(matches.to_string())),
            }
        } else {
            rule.name.as_.clone()
        };

        let template = QueryTemplate::compile(&rule.metrics_query)?;
        let converter = ResourceConverter::new(&rule.resources, mapper)?;

        Ok(Self {
            series_query: Selector::new(&rule.series_query),
            matchers,
            name_matches,
            name_as,
            template,
            converter,
            namespaced_override: rule.resources.namespaced,
        })
    }

    /// The rule's series selector, used for discovery.
    pub fn selector(&self) -> &Selector {
        &self.series_query
    }

    /// Keep the series whose name every matcher accepts.
    pub fn filter_series(&self, series: Vec<Series>) -> Vec<Series> {
        series
            .into_iter()
            .filter(|series| self.matchers.iter().all(|m| m.accepts(&series.name)))
            .collect()
    }

    /// The API metric name for a discovered series.
    pub fn metric_name_for_series(&self, series: &Series) -> Result<String, NamingError> {
        let captures =
            self.name_matches
                .captures(&series.name)
                .ok_or_else(|| NamingError::NameDoesNotMatch {
                    series: series.name.clone(),
                    pattern: self.name_matches.as_str().to_string(),
                })?;
        let mut name = String::new();
        captures.expand(&self.name_as, &mut name);
        Ok(name)
    }

    /// The group-resources this series refers to and whether the resulting
    /// metric is namespaced, honoring the rule's `namespaced` override.
    pub fn resources_for_series(&self, series: &Series) -> (Vec<GroupResource>, bool) {
        let (resources, namespaced) = self.converter.resources_for_series(series);
        (resources, self.namespaced_override.unwrap_or(namespaced))
    }

    /// The backend label carrying objects of `resource`.
    pub fn label_for_resource(&self, resource: &GroupResource) -> Result<String, QueryError> {
        Ok(self.converter.label_for_resource(resource)?)
    }

    /// Build the backend query for `series` over the named objects.
    pub fn query_for_series(
        &self,
        series: &str,
        resource: &GroupResource,
        namespace: &str,
        metric_selector: &[Requirement],
        names: &[String],
    ) -> Result<Selector, QueryError> {
        let namespace = if self.namespaced_override == Some(false) {
            ""
        } else {
            namespace
        };
        self.query_for(series, namespace, Some((resource, names)), metric_selector)
    }

    /// External variant: no resource matcher, and the namespace only applies
    /// when the rule is namespaced and the request namespace is a real one.
    pub fn query_for_external_series(
        &self,
        series: &str,
        namespace: &str,
        metric_selector: &[Requirement],
    ) -> Result<Selector, QueryError> {
        let namespace = match (self.namespaced_override, namespace) {
            (Some(false), _) | (_, "default") => "",
            (_, namespace) => namespace,
        };
        self.query_for(series, namespace, None, metric_selector)
    }

    fn query_for(
        &self,
        series: &str,
        namespace: &str,
        resource: Option<(&GroupResource, &[String])>,
        metric_selector: &[Requirement],
    ) -> Result<Selector, QueryError> {
        let mut matchers: Vec<(String, String)> = Vec::new();
        let mut values_by_name = BTreeMap::new();

        let mut requirements = metric_selector.to_vec();
        requirements.sort_by(|a, b| a.key.cmp(&b.key));
        for requirement in &requirements {
            let rendered = matcher_for(requirement)?;
            upsert(&mut matchers, &requirement.key, rendered);
            values_by_name.insert(requirement.key.clone(), requirement.values.join("|"));
        }

        if !namespace.is_empty() {
            let label = self.namespace_label();
            upsert(&mut matchers, &label, format!(r#"{label}="{namespace}""#));
            values_by_name.insert(label, namespace.to_string());
        }

        let mut group_by = Vec::new();
        if let Some((resource, names)) = resource {
            let label = self.converter.label_for_resource(resource)?;
            match names {
                [] => {}
                [name] => upsert(&mut matchers, &label, format!(r#"{label}="{name}""#)),
                names => upsert(
                    &mut matchers,
                    &label,
                    format!(r#"{label}=~"{}""#, names.join("|")),
                ),
            }
            values_by_name.insert(label.clone(), names.join("|"));
            group_by.push(label);
        }

        let label_matchers = matchers
            .into_iter()
            .map(|(_, matcher)| matcher)
            .collect::<Vec<_>>()
            .join(",");
        let group_by_joined = group_by.join(",");

        let args = QueryArgs {
            series,
            label_matchers: &label_matchers,
            label_values_by_name: &values_by_name,
            group_by: &group_by_joined,
            group_by_slice: &group_by,
        };
        Ok(self.template.render(&args)?)
    }

    /// The label carrying the namespace; rules that map no label to the
    /// `namespaces` resource fall back to the conventional `namespace`.
    fn namespace_label(&self) -> String {
        self.converter
            .namespace_label()
            .unwrap_or_else(|_| "namespace".to_string())
    }
}

/// Keep at most one matcher per label name; a later matcher for the same
/// label replaces the earlier one in place.
fn upsert(matchers: &mut Vec<(String, String)>, label: &str, rendered: String) {
    match matchers.iter_mut().find(|(existing, _)| existing.as_str() == label) {
        Some((_, slot)) => *slot = rendered,
        None => matchers.push((label.to_string(), rendered)),
    }
}

/// Render one selector requirement as a backend matcher.
fn matcher_for(requirement: &Requirement) -> Result<String, QueryError> {
    let key = &requirement.key;
    let values = &requirement.values;
    let joined = values.join("|");

    let rendered = match requirement.operator {
        Operator::Equals | Operator::DoubleEquals => match values.as_slice() {
            [] => return Err(QueryError::MalformedRequirement(key.clone())),
            [value] => format!(r#"{key}="{value}""#),
            _ => format!(r#"{key}=~"{joined}""#),
        },
        Operator::NotEquals => match values.as_slice() {
            [] => return Err(QueryError::MalformedRequirement(key.clone())),
            [value] => format!(r#"{key}!="{value}""#),
            _ => format!(r#"{key}!~"{joined}""#),
        },
        Operator::In => match values.as_slice() {
            [] => return Err(QueryError::MalformedRequirement(key.clone())),
            _ => format!(r#"{key}=~"{joined}""#),
        },
        Operator::NotIn => match values.as_slice() {
            [] => return Err(QueryError::MalformedRequirement(key.clone())),
            _ => format!(r#"{key}!~"{joined}""#),
        },
        // "has this label" is expressed as label != empty
        Operator::Exists => match values.as_slice() {
            [] => format!(r#"{key}!="""#),
            _ => format!(r#"{key}=~"{joined}""#),
        },
        Operator::DoesNotExist => match values.as_slice() {
            [] => format!(r#"{key}="""#),
            _ => format!(r#"{key}!~"{joined}""#),
        },
        Operator::GreaterThan => return Err(QueryError::UnsupportedOperator("GreaterThan")),
        Operator::LessThan => return Err(QueryError::UnsupportedOperator("LessThan")),
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::{GroupResourceSpec, NameMapping, RegexFilter, ResourceMapping};

    fn mapper() -> Arc<ResourceMapper> {
        Arc::new(ResourceMapper::default())
    }

    fn container_rule() -> Rule {
        Rule {
            series_query: r#"{__name__=~"^container_.*"}"#.to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: None,
                overrides: BTreeMap::from([
                    ("pod".to_string(), GroupResourceSpec::resource("pod")),
                    (
                        "namespace".to_string(),
                        GroupResourceSpec::resource("namespace"),
                    ),
                ]),
                namespaced: None,
            },
            name: NameMapping {
                matches: "^container_(.*)$".to_string(),
                as_: String::new(),
            },
            metrics_query: r#"sum(<<.Series>>{<<.LabelMatchers>>,container!="POD"}) by (<<.GroupBy>>)"#
                .to_string(),
        }
    }

    fn ingress_rule() -> Rule {
        Rule {
            series_query: r#"ingress_hits_total{kube_namespace!=""}"#.to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: Some("kube_<<.Resource>>".to_string()),
                overrides: BTreeMap::new(),
                namespaced: None,
            },
            name: NameMapping {
                matches: "^(.*)_total$".to_string(),
                as_: String::new(),
            },
            metrics_query: "sum(rate(<<.Series>>{<<.LabelMatchers>>}[1m])) by (<<.GroupBy>>)"
                .to_string(),
        }
    }

    fn external_rule() -> Rule {
        Rule {
            series_query: "queue_length".to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: Some("<<.Resource>>".to_string()),
                overrides: BTreeMap::new(),
                namespaced: None,
            },
            name: NameMapping::default(),
            metrics_query: "<<.Series>>{<<.LabelMatchers>>}".to_string(),
        }
    }

    #[test]
    fn container_gauge_query_over_multiple_pods() {
        let namer = MetricNamer::from_rule(&container_rule(), mapper()).unwrap();

        let query = namer
            .query_for_series(
                "container_some_usage",
                &GroupResource::core("pods"),
                "n",
                &[],
                &["p1".to_string(), "p2".to_string()],
            )
            .unwrap();

        assert_eq!(
            query.as_str(),
            r#"sum(container_some_usage{namespace="n",pod=~"p1|p2",container!="POD"}) by (pod)"#
        );
    }

    #[test]
    fn namespaced_counter_becomes_rate() {
        let namer = MetricNamer::from_rule(&ingress_rule(), mapper()).unwrap();

        let query = namer
            .query_for_series(
                "ingress_hits_total",
                &GroupResource::core("services"),
                "n",
                &[],
                &["s".to_string()],
            )
            .unwrap();

        assert_eq!(
            query.as_str(),
            r#"sum(rate(ingress_hits_total{kube_namespace="n",kube_service="s"}[1m])) by (kube_service)"#
        );
    }

    #[test]
    fn external_metric_with_label_selector() {
        let namer = MetricNamer::from_rule(&external_rule(), mapper()).unwrap();

        let query = namer
            .query_for_external_series(
                "queue_length",
                "",
                &[Requirement::new(
                    "queue_name",
                    Operator::In,
                    vec!["processing".to_string()],
                )],
            )
            .unwrap();

        assert_eq!(query.as_str(), r#"queue_length{queue_name=~"processing"}"#);
    }

    #[test]
    fn external_namespace_is_skipped_for_default() {
        let namer = MetricNamer::from_rule(&external_rule(), mapper()).unwrap();

        let query = namer
            .query_for_external_series("queue_length", "default", &[])
            .unwrap();
        assert_eq!(query.as_str(), "queue_length{}");

        let query = namer
            .query_for_external_series("queue_length", "workloads", &[])
            .unwrap();
        assert_eq!(query.as_str(), r#"queue_length{namespace="workloads"}"#);
    }

    #[test]
    fn unsupported_operator_is_rejected() {
        let namer = MetricNamer::from_rule(&external_rule(), mapper()).unwrap();

        let err = namer
            .query_for_external_series(
                "queue_length",
                "",
                &[Requirement::new(
                    "shards",
                    Operator::GreaterThan,
                    vec!["3".to_string()],
                )],
            )
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator("GreaterThan")));
    }

    #[test]
    fn filter_series_is_a_conjunction_and_idempotent() {
        let mut rule = container_rule();
        rule.series_filters = vec![
            RegexFilter::is("^container_.*"),
            RegexFilter::is_not(".*_total$"),
        ];
        let namer = MetricNamer::from_rule(&rule, mapper()).unwrap();

        let all = vec![
            Series::new("container_some_usage"),
            Series::new("container_hits_total"),
            Series::new("node_cpu"),
        ];

        let filtered = namer.filter_series(all.clone());
        assert_eq!(filtered, vec![Series::new("container_some_usage")]);
        assert!(filtered.iter().all(|series| all.contains(series)));

        let again = namer.filter_series(filtered.clone());
        assert_eq!(again, filtered);
    }

    #[test]
    fn name_defaults_to_whole_match_without_captures() {
        let rule = Rule {
            name: NameMapping::default(),
            ..external_rule()
        };
        let namer = MetricNamer::from_rule(&rule, mapper()).unwrap();

        let name = namer
            .metric_name_for_series(&Series::new("queue_length"))
            .unwrap();
        assert_eq!(name, "queue_length");
    }

    #[test]
    fn name_defaults_to_first_capture_with_one_group() {
        let namer = MetricNamer::from_rule(&ingress_rule(), mapper()).unwrap();

        let name = namer
            .metric_name_for_series(&Series::new("ingress_hits_total"))
            .unwrap();
        assert_eq!(name, "ingress_hits");
    }

    #[test]
    fn ambiguous_captures_without_as_fail_construction() {
        let rule = Rule {
            name: NameMapping {
                matches: "^(.*)_(total|sum)$".to_string(),
                as_: String::new(),
            },
            ..external_rule()
        };

        let err = MetricNamer::from_rule(&rule, mapper()).unwrap_err();
        assert!(matches!(err, NamingError::AmbiguousCaptures(_)));
    }

    #[test]
    fn explicit_as_with_braced_group() {
        let rule = Rule {
            name: NameMapping {
                matches: "^(.*)_total$".to_string(),
                as_: "${1}_per_second".to_string(),
            },
            ..external_rule()
        };
        let namer = MetricNamer::from_rule(&rule, mapper()).unwrap();

        let name = namer
            .metric_name_for_series(&Series::new("ingress_hits_total"))
            .unwrap();
        assert_eq!(name, "ingress_hits_per_second");
    }

    #[test]
    fn filter_with_both_patterns_is_invalid() {
        let mut rule = external_rule();
        rule.series_filters = vec![RegexFilter {
            is: Some("a".to_string()),
            is_not: Some("b".to_string()),
        }];

        assert!(matches!(
            MetricNamer::from_rule(&rule, mapper()),
            Err(NamingError::InvalidFilter)
        ));
    }

    #[test]
    fn at_most_one_matcher_per_label() {
        let namer = MetricNamer::from_rule(&external_rule(), mapper()).unwrap();

        let query = namer
            .query_for_external_series(
                "queue_length",
                "",
                &[
                    Requirement::new("queue_name", Operator::Equals, vec!["a".to_string()]),
                    Requirement::new("queue_name", Operator::In, vec!["b".to_string()]),
                ],
            )
            .unwrap();

        assert_eq!(query.as_str().matches("queue_name").count(), 1);
    }

    #[test]
    fn exists_and_not_exists_render_empty_comparisons() {
        let namer = MetricNamer::from_rule(&external_rule(), mapper()).unwrap();

        let query = namer
            .query_for_external_series(
                "queue_length",
                "",
                &[
                    Requirement::new("region", Operator::Exists, Vec::new()),
                    Requirement::new("tier", Operator::DoesNotExist, Vec::new()),
                ],
            )
            .unwrap();

        assert_eq!(query.as_str(), r#"queue_length{region!="",tier=""}"#);
    }
}
