//! Bidirectional mapping between Kubernetes group-resources and backend
//! label names, driven by a naming template plus per-label overrides.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use thiserror::Error;

use prom_adapter_promapi::Series;

use crate::config::{GroupResourceSpec, ResourceMapping};
use crate::mapper::{sanitize_group, GroupResource, ResourceMapper};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConverterError {
    #[error("either a resource template or overrides must be configured")]
    EmptyMapping,

    #[error("resource template {0:?} has no <<.Resource>> placeholder")]
    MissingResourcePlaceholder(String),

    #[error("resource template {0:?} is malformed")]
    MalformedTemplate(String),

    #[error("no label mapping for resource {0}")]
    NoLabelForResource(GroupResource),
}

/// The group-resources that never make a series namespaced, and are
/// themselves cluster-scoped in the custom metrics API.
pub const CLUSTER_SCOPED_RESOURCES: [&str; 3] = ["namespaces", "nodes", "persistentvolumes"];

#[derive(Clone, Debug, PartialEq, Eq)]
enum LabelSegment {
    Literal(String),
    Group,
    Resource,
}

/// The `resources.template` of a rule, compiled once: renders label names
/// from group-resources and recognizes label names of series.
#[derive(Clone, Debug)]
struct LabelTemplate {
    segments: Vec<LabelSegment>,
    matcher: Regex,
}

impl LabelTemplate {
    fn compile(source: &str) -> Result<Self, ConverterError> {
        let mut segments = Vec::new();
        let mut saw_resource = false;
        let mut rest = source;

        while let Some(open) = rest.find("<<") {
            if !rest[..open].is_empty() {
                segments.push(LabelSegment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find(">>")
                .ok_or_else(|| ConverterError::MalformedTemplate(source.to_string()))?;
            match after[..close].trim() {
                ".Group" => segments.push(LabelSegment::Group),
                ".Resource" => {
                    saw_resource = true;
                    segments.push(LabelSegment::Resource);
                }
                _ => return Err(ConverterError::MalformedTemplate(source.to_string())),
            }
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(LabelSegment::Literal(rest.to_string()));
        }

        if !saw_resource {
            return Err(ConverterError::MissingResourcePlaceholder(source.to_string()));
        }

        let mut pattern = String::from("^");
        for segment in &segments {
            match segment {
                LabelSegment::Literal(text) => pattern.push_str(&regex::escape(text)),
                LabelSegment::Group => pattern.push_str("(?P<group>.+?)"),
                LabelSegment::Resource => pattern.push_str("(?P<resource>.+?)"),
            }
        }
        pattern.push('$');
        let matcher =
            Regex::new(&pattern).map_err(|_| ConverterError::MalformedTemplate(source.to_string()))?;

        Ok(Self { segments, matcher })
    }

    fn render(&self, group: &str, resource: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                LabelSegment::Literal(text) => out.push_str(text),
                LabelSegment::Group => out.push_str(group),
                LabelSegment::Resource => out.push_str(resource),
            }
        }
        out
    }

    /// Try to read a label name as a group-resource.
    fn extract(&self, label: &str) -> Option<(String, String)> {
        let captures = self.matcher.captures(label)?;
        let group = captures
            .name("group")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let resource = captures.name("resource")?.as_str().to_string();
        Some((group, resource))
    }
}

/// Converts between group-resources and the backend labels that carry them.
///
/// Lookup results are memoized; the caches take a reader-writer lock with a
/// double-check on the write path, so concurrent readers never block each
/// other.
#[derive(Debug)]
pub struct ResourceConverter {
    template: Option<LabelTemplate>,
    overrides: HashMap<String, GroupResource>,
    mapper: Arc<ResourceMapper>,
    label_cache: RwLock<HashMap<GroupResource, String>>,
}

impl ResourceConverter {
    pub fn new(
        mapping: &ResourceMapping,
        mapper: Arc<ResourceMapper>,
    ) -> Result<Self, ConverterError> {
        let template = match mapping.template.as_deref() {
            None | Some("") => None,
            Some(source) => Some(LabelTemplate::compile(source)?),
        };
        if template.is_none() && mapping.overrides.is_empty() {
            return Err(ConverterError::EmptyMapping);
        }

        let mut overrides = HashMap::new();
        let mut label_cache = HashMap::new();
        for (label, GroupResourceSpec { group, resource }) in &mapping.overrides {
            let normalized = mapper.normalize(group, resource);
            // the inverted form answers LabelForResource without touching
            // the template
            label_cache.insert(normalized.clone(), label.clone());
            overrides.insert(label.clone(), normalized);
        }

        Ok(Self {
            template,
            overrides,
            mapper,
            label_cache: RwLock::new(label_cache),
        })
    }

    /// The backend label that carries objects of `resource`.
    pub fn label_for_resource(&self, resource: &GroupResource) -> Result<String, ConverterError> {
        if let Some(label) = self.label_cache.read().get(resource) {
            return Ok(label.clone());
        }

        let template = self
            .template
            .as_ref()
            .ok_or_else(|| ConverterError::NoLabelForResource(resource.clone()))?;
        let singular = self.mapper.singular(resource);
        let label = template.render(&sanitize_group(&resource.group), &singular);

        let mut cache = self.label_cache.write();
        // a concurrent miss may have raced us here; the rendered label is
        // deterministic so either write wins
        cache.entry(resource.clone()).or_insert_with(|| label.clone());
        Ok(label)
    }

    /// All group-resources a series' labels refer to, and whether the series
    /// is namespaced.
    pub fn resources_for_series(&self, series: &Series) -> (Vec<GroupResource>, bool) {
        let mut resources = Vec::new();
        let mut namespaced = false;

        for label in series.labels.keys() {
            let resource = match self.overrides.get(label) {
                Some(resource) => Some(resource.clone()),
                None => self.template.as_ref().and_then(|template| {
                    template
                        .extract(label)
                        .map(|(group, resource)| self.mapper.normalize(&group, &resource))
                }),
            };

            if let Some(resource) = resource {
                if !CLUSTER_SCOPED_RESOURCES.contains(&resource.resource.as_str()) {
                    namespaced = true;
                }
                resources.push(resource);
            }
        }

        (resources, namespaced)
    }

    /// The label carrying the namespace, per this rule's mapping.
    pub fn namespace_label(&self) -> Result<String, ConverterError> {
        self.label_for_resource(&GroupResource::core("namespaces"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn mapping(template: Option<&str>, overrides: &[(&str, &str)]) -> ResourceMapping {
        ResourceMapping {
            template: template.map(str::to_string),
            overrides: overrides
                .iter()
                .map(|(label, resource)| {
                    ((*label).to_string(), GroupResourceSpec::resource(resource))
                })
                .collect::<BTreeMap<_, _>>(),
            namespaced: None,
        }
    }

    fn converter(template: Option<&str>, overrides: &[(&str, &str)]) -> ResourceConverter {
        ResourceConverter::new(&mapping(template, overrides), Arc::new(ResourceMapper::default()))
            .unwrap()
    }

    #[test]
    fn construction_requires_template_or_overrides() {
        let err = ResourceConverter::new(
            &ResourceMapping::default(),
            Arc::new(ResourceMapper::default()),
        )
        .unwrap_err();
        assert_eq!(err, ConverterError::EmptyMapping);
    }

    #[test]
    fn template_must_mention_resource() {
        let err = ResourceConverter::new(
            &mapping(Some("kube_<<.Group>>"), &[]),
            Arc::new(ResourceMapper::default()),
        )
        .unwrap_err();
        assert!(matches!(err, ConverterError::MissingResourcePlaceholder(_)));
    }

    #[test]
    fn overrides_answer_label_for_resource() {
        let converter = converter(None, &[("kube_namespace", "namespace"), ("kube_service", "service")]);

        assert_eq!(
            converter
                .label_for_resource(&GroupResource::core("services"))
                .unwrap(),
            "kube_service"
        );
    }

    #[test]
    fn template_renders_singular_and_sanitized_group() {
        let converter = converter(Some("kube_<<.Group>>_<<.Resource>>"), &[]);

        assert_eq!(
            converter
                .label_for_resource(&GroupResource::new("apps", "deployments"))
                .unwrap(),
            "kube_apps_deployment"
        );
        assert_eq!(
            converter
                .label_for_resource(&GroupResource::new("networking.k8s.io", "ingresses"))
                .unwrap(),
            "kube_networking_k8s_io_ingress"
        );
    }

    #[test]
    fn label_lookup_is_memoized() {
        let converter = converter(Some("kube_<<.Resource>>"), &[]);
        let first = converter
            .label_for_resource(&GroupResource::core("pods"))
            .unwrap();

        assert!(converter
            .label_cache
            .read()
            .contains_key(&GroupResource::core("pods")));
        let second = converter
            .label_for_resource(&GroupResource::core("pods"))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn series_resources_via_override() {
        let converter = converter(None, &[("pod", "pod"), ("namespace", "namespace")]);
        let series = Series::new("container_some_usage")
            .label("pod", "p1")
            .label("namespace", "n")
            .label("container", "c1");

        let (resources, namespaced) = converter.resources_for_series(&series);
        assert!(resources.contains(&GroupResource::core("pods")));
        assert!(resources.contains(&GroupResource::core("namespaces")));
        assert!(namespaced);
    }

    #[test]
    fn series_with_only_cluster_scoped_labels_is_not_namespaced() {
        let converter = converter(None, &[("instance", "node")]);
        let series = Series::new("node_cpu_seconds_total").label("instance", "node-1");

        let (resources, namespaced) = converter.resources_for_series(&series);
        assert_eq!(resources, vec![GroupResource::core("nodes")]);
        assert!(!namespaced);
    }

    #[test]
    fn series_resources_via_template() {
        let converter = converter(Some("kube_<<.Resource>>"), &[]);
        let series = Series::new("ingress_hits_total")
            .label("kube_service", "s")
            .label("kube_namespace", "n");

        let (resources, namespaced) = converter.resources_for_series(&series);
        assert!(resources.contains(&GroupResource::core("services")));
        assert!(resources.contains(&GroupResource::core("namespaces")));
        assert!(namespaced);
    }

    #[test]
    fn namespace_label_uses_mapping() {
        let first_converter = converter(None, &[("kube_namespace", "namespace")]);
        assert_eq!(first_converter.namespace_label().unwrap(), "kube_namespace");

        let second_converter = converter(Some("kube_<<.Resource>>"), &[]);
        assert_eq!(second_converter.namespace_label().unwrap(), "kube_namespace");
    }
}
