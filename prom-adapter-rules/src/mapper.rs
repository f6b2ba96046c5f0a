use std::collections::HashMap;
use std::fmt;

use kube::discovery::Scope;
use kube::{Client, Discovery};

/// A Kubernetes group-resource in canonical form: plural lowercase resource
/// noun plus (possibly empty) API group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl ToString, resource: impl ToString) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }

    /// A resource in the core (empty) group.
    pub fn core(resource: impl ToString) -> Self {
        Self::new("", resource)
    }

    /// Parse the `resource[.group]` form used in API request paths.
    pub fn from_path(spec: &str) -> Self {
        match spec.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::core(spec),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// What the mapper knows about one API resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub singular: String,
    pub namespaced: bool,
}

/// Normalizes group-resources the way a Kubernetes REST mapper would:
/// singular, kind or plural spellings all resolve to the canonical plural
/// lowercase form.
///
/// A static seed table keeps the adapter usable without cluster access;
/// `from_discovery` augments it with everything the API server advertises.
#[derive(Clone, Debug)]
pub struct ResourceMapper {
    // keyed by (group, spelling) where spelling is plural, singular or
    // lowercased kind
    by_spelling: HashMap<(String, String), usize>,
    infos: Vec<ResourceInfo>,
}

macro_rules! seed {
    ($(($group:literal, $version:literal, $kind:literal, $plural:literal, $singular:literal, $namespaced:literal)),* $(,)?) => {
        vec![$(ResourceInfo {
            group: $group.to_string(),
            version: $version.to_string(),
            kind: $kind.to_string(),
            plural: $plural.to_string(),
            singular: $singular.to_string(),
            namespaced: $namespaced,
        }),*]
    };
}

impl Default for ResourceMapper {
    fn default() -> Self {
        Self::with_infos(Self::seed_infos())
    }
}

impl ResourceMapper {
    fn seed_infos() -> Vec<ResourceInfo> {
        seed![
            ("", "v1", "Pod", "pods", "pod", true),
            ("", "v1", "Service", "services", "service", true),
            ("", "v1", "Namespace", "namespaces", "namespace", false),
            ("", "v1", "Node", "nodes", "node", false),
            ("", "v1", "PersistentVolume", "persistentvolumes", "persistentvolume", false),
            (
                "",
                "v1",
                "PersistentVolumeClaim",
                "persistentvolumeclaims",
                "persistentvolumeclaim",
                true
            ),
            ("", "v1", "ConfigMap", "configmaps", "configmap", true),
            ("", "v1", "Secret", "secrets", "secret", true),
            ("apps", "v1", "Deployment", "deployments", "deployment", true),
            ("apps", "v1", "StatefulSet", "statefulsets", "statefulset", true),
            ("apps", "v1", "DaemonSet", "daemonsets", "daemonset", true),
            ("apps", "v1", "ReplicaSet", "replicasets", "replicaset", true),
            ("batch", "v1", "Job", "jobs", "job", true),
            ("batch", "v1", "CronJob", "cronjobs", "cronjob", true),
            ("networking.k8s.io", "v1", "Ingress", "ingresses", "ingress", true),
        ]
    }

    pub fn with_infos(infos: Vec<ResourceInfo>) -> Self {
        let mut by_spelling = HashMap::new();
        for (index, info) in infos.iter().enumerate() {
            for spelling in [&info.plural, &info.singular, &info.kind.to_lowercase()] {
                by_spelling
                    .entry((info.group.clone(), spelling.to_lowercase()))
                    .or_insert(index);
            }
        }
        Self { by_spelling, infos }
    }

    /// Build a mapper from live API discovery, keeping the seed table as a
    /// fallback for resources the cluster does not advertise.
    pub async fn from_discovery(client: Client) -> kube::Result<Self> {
        let discovery = Discovery::new(client).run().await?;
        let mut infos = Self::seed_infos();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                let singular = resource.kind.to_lowercase();
                infos.push(ResourceInfo {
                    group: resource.group.clone(),
                    version: resource.version.clone(),
                    kind: resource.kind.clone(),
                    plural: resource.plural.clone(),
                    singular,
                    namespaced: capabilities.scope == Scope::Namespaced,
                });
            }
        }
        Ok(Self::with_infos(infos))
    }

    fn lookup(&self, group: &str, spelling: &str) -> Option<&ResourceInfo> {
        self.by_spelling
            .get(&(group.to_string(), spelling.to_lowercase()))
            .map(|&index| &self.infos[index])
    }

    /// Find a resource by spelling, matching the group after label
    /// sanitization (`.`/`-` replaced by `_`), used when the group was
    /// extracted from a label name.
    fn lookup_sanitized(&self, group: &str, spelling: &str) -> Option<&ResourceInfo> {
        let spelling = spelling.to_lowercase();
        self.infos.iter().find(|info| {
            sanitize_group(&info.group) == group
                && (info.plural == spelling
                    || info.singular == spelling
                    || info.kind.to_lowercase() == spelling)
        })
    }

    /// Normalize `(group, resource)` to canonical plural lowercase form. An
    /// unknown resource passes through lowercased, with a naive
    /// pluralization.
    pub fn normalize(&self, group: &str, resource: &str) -> GroupResource {
        if let Some(info) = self.lookup(group, resource) {
            return GroupResource::new(&info.group, &info.plural);
        }
        if let Some(info) = self.lookup_sanitized(group, resource) {
            return GroupResource::new(&info.group, &info.plural);
        }
        let resource = resource.to_lowercase();
        let resource = if resource.ends_with('s') {
            resource
        } else {
            format!("{resource}s")
        };
        GroupResource::new(group, resource)
    }

    /// The singular form of a group-resource.
    pub fn singular(&self, resource: &GroupResource) -> String {
        match self.lookup(&resource.group, &resource.resource) {
            Some(info) => info.singular.clone(),
            None => resource
                .resource
                .strip_suffix('s')
                .unwrap_or(&resource.resource)
                .to_string(),
        }
    }

    /// Kind and apiVersion for building object references; `None` for
    /// resources the mapper has never heard of.
    pub fn kind_for(&self, resource: &GroupResource) -> Option<(String, String)> {
        self.lookup(&resource.group, &resource.resource).map(|info| {
            let api_version = if info.group.is_empty() {
                info.version.clone()
            } else {
                format!("{}/{}", info.group, info.version)
            };
            (api_version, info.kind.clone())
        })
    }

}

/// Replace the characters a Kubernetes group may carry that a label name may
/// not.
pub fn sanitize_group(group: &str) -> String {
    group.replace(['.', '-'], "_")
}
