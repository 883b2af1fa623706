//! Plinth core types: the resource model, label maps and deferred outputs.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeSpec, Service,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};

mod error;
pub mod output;

pub use error::{GraphError, OutputError};
pub use output::{Output, Resolver, Source, StackToken};

pub mod prelude {
    pub use super::{
        is_subset, label_map, object_meta, GraphError, LabelMap, Output, OutputError, Resource, ResourceId,
        ResourceKind, ResourceSpec,
    };
}

/// Ordered label set, used both as object labels and as selector criteria.
pub type LabelMap = BTreeMap<String, String>;

pub fn label_map<I, K, V>(pairs: I) -> LabelMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// True when every key/value of `selector` is present in `labels`.
pub fn is_subset(selector: &LabelMap, labels: &LabelMap) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Object metadata with a name and optional labels; everything else is left
/// for the API server to fill in.
pub fn object_meta(name: &str, labels: Option<&LabelMap>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: labels.cloned(),
        ..ObjectMeta::default()
    }
}

/// The resource kinds a stack can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    Service,
    PersistentVolume,
    PersistentVolumeClaim,
    ConfigMap,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::PersistentVolume,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::ConfigMap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => <Deployment as k8s_openapi::Resource>::KIND,
            ResourceKind::Service => <Service as k8s_openapi::Resource>::KIND,
            ResourceKind::PersistentVolume => <PersistentVolume as k8s_openapi::Resource>::KIND,
            ResourceKind::PersistentVolumeClaim => <PersistentVolumeClaim as k8s_openapi::Resource>::KIND,
            ResourceKind::ConfigMap => <ConfigMap as k8s_openapi::Resource>::KIND,
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => <Deployment as k8s_openapi::Resource>::API_VERSION,
            ResourceKind::Service => <Service as k8s_openapi::Resource>::API_VERSION,
            ResourceKind::PersistentVolume => <PersistentVolume as k8s_openapi::Resource>::API_VERSION,
            ResourceKind::PersistentVolumeClaim => <PersistentVolumeClaim as k8s_openapi::Resource>::API_VERSION,
            ResourceKind::ConfigMap => <ConfigMap as k8s_openapi::Resource>::API_VERSION,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version().split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), self.api_version().to_string()),
        };
        GroupVersionKind { group, version, kind: self.as_str().to_string() }
    }

    /// `v1/Service` or `apps/v1/Deployment`.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.as_str())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource inside one stack: kind plus logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Kind-specific desired state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    Deployment(DeploymentSpec),
    Service(ServiceSpec),
    PersistentVolume(PersistentVolumeSpec),
    PersistentVolumeClaim(PersistentVolumeClaimSpec),
    ConfigMap { data: BTreeMap<String, String> },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Deployment(_) => ResourceKind::Deployment,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::PersistentVolume(_) => ResourceKind::PersistentVolume,
            ResourceSpec::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            ResourceSpec::ConfigMap { .. } => ResourceKind::ConfigMap,
        }
    }
}

/// A declared infrastructure object.
///
/// `name` is the logical key of the resource inside its stack and never
/// changes after construction. `metadata.name` is the Kubernetes object name;
/// the two may differ. When no object name is given the key is used.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    name: String,
    metadata: ObjectMeta,
    spec: ResourceSpec,
    id_hint: Option<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, mut metadata: ObjectMeta, spec: ResourceSpec) -> Result<Self, GraphError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GraphError::InvalidName {
                kind: spec.kind(),
                name,
                reason: "resource name must not be empty".into(),
            });
        }
        if metadata.name.is_none() {
            metadata.name = Some(name.clone());
        }
        Ok(Self { name, metadata, spec, id_hint: None })
    }

    /// Ask the backend to adopt an existing object with this id.
    pub fn with_id_hint(mut self, id: impl Into<String>) -> Self {
        self.id_hint = Some(id.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn kind(&self) -> ResourceKind { self.spec.kind() }
    pub fn id(&self) -> ResourceId { ResourceId::new(self.kind(), self.name.clone()) }
    pub fn metadata(&self) -> &ObjectMeta { &self.metadata }
    pub fn spec(&self) -> &ResourceSpec { &self.spec }
    pub fn id_hint(&self) -> Option<&str> { self.id_hint.as_deref() }

    pub fn metadata_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or(&self.name)
    }

    /// Full manifest (`apiVersion`, `kind`, `metadata`, `spec`/`data`) as JSON.
    pub fn to_inputs(&self) -> Result<serde_json::Value, serde_json::Error> {
        let metadata = self.metadata.clone();
        match &self.spec {
            ResourceSpec::Deployment(spec) => serde_json::to_value(Deployment {
                metadata,
                spec: Some(spec.clone()),
                ..Deployment::default()
            }),
            ResourceSpec::Service(spec) => serde_json::to_value(Service {
                metadata,
                spec: Some(spec.clone()),
                ..Service::default()
            }),
            ResourceSpec::PersistentVolume(spec) => serde_json::to_value(PersistentVolume {
                metadata,
                spec: Some(spec.clone()),
                ..PersistentVolume::default()
            }),
            ResourceSpec::PersistentVolumeClaim(spec) => serde_json::to_value(PersistentVolumeClaim {
                metadata,
                spec: Some(spec.clone()),
                ..PersistentVolumeClaim::default()
            }),
            ResourceSpec::ConfigMap { data } => serde_json::to_value(ConfigMap {
                metadata,
                data: Some(data.clone()),
                ..ConfigMap::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map(name: &str) -> Resource {
        let labels = label_map([("app", "postgres")]);
        Resource::new(
            name,
            object_meta("postgres-config", Some(&labels)),
            ResourceSpec::ConfigMap { data: label_map([("POSTGRES-DB", "postgresdb")]) },
        )
        .unwrap()
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = Resource::new("", ObjectMeta::default(), ResourceSpec::ConfigMap { data: BTreeMap::new() })
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidName { kind: ResourceKind::ConfigMap, .. }));
    }

    #[test]
    fn missing_object_name_falls_back_to_key() {
        let r = Resource::new("cfg", ObjectMeta::default(), ResourceSpec::ConfigMap { data: BTreeMap::new() }).unwrap();
        assert_eq!(r.metadata_name(), "cfg");
        assert_eq!(r.metadata().name.as_deref(), Some("cfg"));
    }

    #[test]
    fn key_and_object_name_stay_distinct() {
        let r = config_map("pg-cfg");
        assert_eq!(r.name(), "pg-cfg");
        assert_eq!(r.metadata_name(), "postgres-config");
        assert_eq!(r.id(), ResourceId::new(ResourceKind::ConfigMap, "pg-cfg"));
    }

    #[test]
    fn inputs_carry_type_meta() {
        let v = config_map("pg-cfg").to_inputs().unwrap();
        assert_eq!(v["apiVersion"], "v1");
        assert_eq!(v["kind"], "ConfigMap");
        assert_eq!(v["metadata"]["name"], "postgres-config");
        assert_eq!(v["metadata"]["labels"]["app"], "postgres");
        assert_eq!(v["data"]["POSTGRES-DB"], "postgresdb");
    }

    #[test]
    fn gvk_keys() {
        assert_eq!(ResourceKind::Deployment.gvk_key(), "apps/v1/Deployment");
        assert_eq!(ResourceKind::Service.gvk_key(), "v1/Service");
        let gvk = ResourceKind::Deployment.gvk();
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(ResourceKind::PersistentVolumeClaim.gvk().group, "");
    }

    #[test]
    fn subset_matching() {
        let labels = label_map([("app", "kafka"), ("id", "0")]);
        assert!(is_subset(&label_map([("app", "kafka")]), &labels));
        assert!(is_subset(&labels, &labels));
        assert!(!is_subset(&label_map([("app", "zookeeper-1")]), &labels));
        assert!(is_subset(&LabelMap::new(), &labels));
    }
}
