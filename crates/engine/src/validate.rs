//! Graph checks that run after the builder and before any backend call.

use k8s_openapi::api::apps::v1::DeploymentSpec;
use once_cell::sync::Lazy;
use plinth_core::{is_subset, GraphError, LabelMap, Resource, ResourceId, ResourceKind, ResourceSpec};
use regex::Regex;
use rustc_hash::FxHashSet;

const RFC_1123_SUBDOMAIN_MAX_LENGTH: usize = 253;
const RFC_1123_SUBDOMAIN_ERROR_MSG: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character";

static RFC_1123_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("static regex")
});

/// Names declared per kind, plus the pod-template labels of every deployment.
struct Declared<'a> {
    claims: FxHashSet<&'a str>,
    config_maps: FxHashSet<&'a str>,
    volumes: FxHashSet<&'a str>,
    pod_labels: Vec<LabelMap>,
}

impl<'a> Declared<'a> {
    fn collect<I: Iterator<Item = &'a Resource>>(resources: I) -> Self {
        let mut d = Declared {
            claims: FxHashSet::default(),
            config_maps: FxHashSet::default(),
            volumes: FxHashSet::default(),
            pod_labels: Vec::new(),
        };
        for r in resources {
            match r.spec() {
                ResourceSpec::PersistentVolumeClaim(_) => { d.claims.insert(r.metadata_name()); }
                ResourceSpec::ConfigMap { .. } => { d.config_maps.insert(r.metadata_name()); }
                ResourceSpec::PersistentVolume(_) => { d.volumes.insert(r.metadata_name()); }
                ResourceSpec::Deployment(spec) => d.pod_labels.push(template_labels(spec)),
                ResourceSpec::Service(_) => {}
            }
        }
        d
    }

    fn require(&self, from: &ResourceId, target: ResourceKind, name: &str) -> Result<(), GraphError> {
        let known = match target {
            ResourceKind::PersistentVolumeClaim => &self.claims,
            ResourceKind::ConfigMap => &self.config_maps,
            ResourceKind::PersistentVolume => &self.volumes,
            ResourceKind::Deployment | ResourceKind::Service => return Ok(()),
        };
        if known.contains(name) {
            Ok(())
        } else {
            Err(GraphError::DanglingReference { from: from.clone(), target: target.as_str(), name: name.to_string() })
        }
    }
}

fn template_labels(spec: &DeploymentSpec) -> LabelMap {
    spec.template.metadata.as_ref().and_then(|m| m.labels.clone()).unwrap_or_default()
}

/// Check names and cross references of a declared graph.
pub fn check<'a, I>(resources: I) -> Result<(), GraphError>
where
    I: Iterator<Item = &'a Resource> + Clone,
{
    let declared = Declared::collect(resources.clone());
    let mut objects: FxHashSet<(ResourceKind, &str)> = FxHashSet::default();
    for r in resources {
        check_name(r)?;
        if !objects.insert((r.kind(), r.metadata_name())) {
            return Err(GraphError::DuplicateObjectName { kind: r.kind(), name: r.metadata_name().to_string() });
        }
        let id = r.id();
        match r.spec() {
            ResourceSpec::Deployment(spec) => check_deployment(&id, spec, &declared)?,
            ResourceSpec::Service(spec) => {
                if let Some(selector) = spec.selector.as_ref().filter(|s| !s.is_empty()) {
                    if !declared.pod_labels.iter().any(|labels| is_subset(selector, labels)) {
                        return Err(GraphError::UnmatchedSelector(id));
                    }
                }
            }
            ResourceSpec::PersistentVolumeClaim(spec) => {
                if let Some(volume) = spec.volume_name.as_deref() {
                    declared.require(&id, ResourceKind::PersistentVolume, volume)?;
                }
            }
            ResourceSpec::PersistentVolume(_) | ResourceSpec::ConfigMap { .. } => {}
        }
    }
    Ok(())
}

fn check_name(r: &Resource) -> Result<(), GraphError> {
    let name = r.metadata_name();
    let reason = if name.len() > RFC_1123_SUBDOMAIN_MAX_LENGTH {
        format!("must be no more than {RFC_1123_SUBDOMAIN_MAX_LENGTH} characters")
    } else if !RFC_1123_SUBDOMAIN.is_match(name) {
        RFC_1123_SUBDOMAIN_ERROR_MSG.to_string()
    } else {
        return Ok(());
    };
    Err(GraphError::InvalidName { kind: r.kind(), name: name.to_string(), reason })
}

fn check_deployment(id: &ResourceId, spec: &DeploymentSpec, declared: &Declared<'_>) -> Result<(), GraphError> {
    if let Some(selector) = spec.selector.match_labels.as_ref() {
        if !is_subset(selector, &template_labels(spec)) {
            return Err(GraphError::SelectorMismatch(id.clone()));
        }
    }
    let Some(pod) = spec.template.spec.as_ref() else { return Ok(()) };
    let volumes = pod.volumes.as_deref().unwrap_or(&[]);
    for v in volumes {
        if let Some(pvc) = v.persistent_volume_claim.as_ref() {
            declared.require(id, ResourceKind::PersistentVolumeClaim, &pvc.claim_name)?;
        }
        if let Some(name) = v.config_map.as_ref().and_then(|c| c.name.as_deref()) {
            declared.require(id, ResourceKind::ConfigMap, name)?;
        }
    }
    let pod_volumes: FxHashSet<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
    for c in pod.containers.iter().chain(pod.init_containers.iter().flatten()) {
        for mount in c.volume_mounts.iter().flatten() {
            if !pod_volumes.contains(mount.name.as_str()) {
                return Err(GraphError::DanglingReference {
                    from: id.clone(),
                    target: "Volume",
                    name: mount.name.clone(),
                });
            }
        }
        for source in c.env_from.iter().flatten() {
            if let Some(name) = source.config_map_ref.as_ref().and_then(|r| r.name.as_deref()) {
                declared.require(id, ResourceKind::ConfigMap, name)?;
            }
        }
        for var in c.env.iter().flatten() {
            let key_ref = var.value_from.as_ref().and_then(|s| s.config_map_key_ref.as_ref());
            if let Some(name) = key_ref.and_then(|r| r.name.as_deref()) {
                declared.require(id, ResourceKind::ConfigMap, name)?;
            }
        }
    }
    Ok(())
}
