use std::collections::BTreeMap;

use thiserror::Error;

use prom_adapter_promapi::Selector;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder in template {0:?}")]
    Unclosed(String),

    #[error("unknown template field {field:?} in template {template:?}")]
    UnknownField { template: String, field: String },

    #[error("template {0:?} rendered to an empty query")]
    EmptyQuery(String),
}

/// The values a metrics-query template can interpolate.
#[derive(Clone, Debug)]
pub struct QueryArgs<'a> {
    /// Backend metric name being queried.
    pub series: &'a str,
    /// Comma-joined rendered matchers, e.g. `ns="x",pod=~"a|b"`.
    pub label_matchers: &'a str,
    /// Pipe-joined values per label, for templates that need one label's
    /// values on their own.
    pub label_values_by_name: &'a BTreeMap<String, String>,
    /// Comma-joined group-by label names.
    pub group_by: &'a str,
    /// The group-by labels as a list.
    pub group_by_slice: &'a [String],
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Series,
    LabelMatchers,
    /// `<<index .LabelValuesByName "label">>`
    LabelValues(String),
    GroupBy,
    /// Rendered comma-joined like `GroupBy`; the placeholder is kept distinct
    /// so templates written against the list form stay valid.
    GroupBySlice,
}

/// A compiled metrics-query template with `<<` `>>` delimiters.
///
/// The placeholder set is closed: `.Series`, `.LabelMatchers`, `.GroupBy`,
/// `.GroupBySlice` and `index .LabelValuesByName "<label>"`.
#[derive(Clone, Debug)]
pub struct QueryTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl QueryTemplate {
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("<<") {
            if !rest[..open].is_empty() {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find(">>")
                .ok_or_else(|| TemplateError::Unclosed(source.to_string()))?;
            segments.push(parse_field(source, after[..close].trim())?);
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, args: &QueryArgs<'_>) -> Result<Selector, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Series => out.push_str(args.series),
                Segment::LabelMatchers => out.push_str(args.label_matchers),
                Segment::LabelValues(label) => {
                    if let Some(values) = args.label_values_by_name.get(label) {
                        out.push_str(values);
                    }
                }
                Segment::GroupBy => out.push_str(args.group_by),
                Segment::GroupBySlice => out.push_str(&args.group_by_slice.join(",")),
            }
        }
        if out.is_empty() {
            return Err(TemplateError::EmptyQuery(self.source.clone()));
        }
        Ok(Selector(out))
    }
}

fn parse_field(template: &str, field: &str) -> Result<Segment, TemplateError> {
    match field {
        ".Series" => Ok(Segment::Series),
        ".LabelMatchers" => Ok(Segment::LabelMatchers),
        ".GroupBy" => Ok(Segment::GroupBy),
        ".GroupBySlice" => Ok(Segment::GroupBySlice),
        _ => {
            if let Some(rest) = field.strip_prefix("index .LabelValuesByName") {
                let label = rest.trim().trim_matches(['"', '\'']);
                if !label.is_empty() {
                    return Ok(Segment::LabelValues(label.to_string()));
                }
            }
            Err(TemplateError::UnknownField {
                template: template.to_string(),
                field: field.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(values: &'a BTreeMap<String, String>, group_by_slice: &'a [String]) -> QueryArgs<'a> {
        QueryArgs {
            series: "ingress_hits_total",
            label_matchers: r#"kube_namespace="n",kube_service="s""#,
            label_values_by_name: values,
            group_by: "kube_service",
            group_by_slice,
        }
    }

    #[test]
    fn renders_rate_template() {
        let template =
            QueryTemplate::compile("sum(rate(<<.Series>>{<<.LabelMatchers>>}[1m])) by (<<.GroupBy>>)")
                .unwrap();
        let values = BTreeMap::new();
        let group_by = ["kube_service".to_string()];

        let query = template.render(&args(&values, &group_by)).unwrap();
        assert_eq!(
            query.as_str(),
            r#"sum(rate(ingress_hits_total{kube_namespace="n",kube_service="s"}[1m])) by (kube_service)"#
        );
    }

    #[test]
    fn renders_label_values_by_name() {
        let template =
            QueryTemplate::compile(r#"avg_over_time(q{name=~"<<index .LabelValuesByName "queue">>"}[5m])"#)
                .unwrap();
        let values = BTreeMap::from([("queue".to_string(), "a|b".to_string())]);

        let query = template.render(&args(&values, &[])).unwrap();
        assert_eq!(query.as_str(), r#"avg_over_time(q{name=~"a|b"}[5m])"#);
    }

    #[test]
    fn unknown_field_is_rejected_at_compile_time() {
        let err = QueryTemplate::compile("sum(<<.Rate>>)").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownField { field, .. } if field == ".Rate"));
    }

    #[test]
    fn unclosed_placeholder_is_rejected() {
        let err = QueryTemplate::compile("sum(<<.Series)").unwrap_err();
        assert!(matches!(err, TemplateError::Unclosed(_)));
    }

    #[test]
    fn empty_render_is_an_error() {
        let template = QueryTemplate::compile("<<.GroupBy>>").unwrap();
        let values = BTreeMap::new();
        let empty_args = QueryArgs {
            series: "",
            label_matchers: "",
            label_values_by_name: &values,
            group_by: "",
            group_by_slice: &[],
        };

        let err = template.render(&empty_args).unwrap_err();
        assert!(matches!(err, TemplateError::EmptyQuery(_)));
    }

    #[test]
    fn group_by_slice_joins_with_commas() {
        let template = QueryTemplate::compile("by (<<.GroupBySlice>>)").unwrap();
        let values = BTreeMap::new();
        let group_by = ["pod".to_string(), "container".to_string()];

        let query = template.render(&args(&values, &group_by)).unwrap();
        assert_eq!(query.as_str(), "by (pod,container)");
    }
}
