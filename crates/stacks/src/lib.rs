//! Plinth stacks: the concrete environments and a small registry the CLI
//! selects from.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{
    ContainerPort, EnvVar, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    ServicePort, ServiceSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use plinth_core::LabelMap;
use plinth_engine::StackBuilder;
use serde::de::DeserializeOwned;

pub mod database;
pub mod dev;

pub use database::DatabaseStack;
pub use dev::DevStack;

pub const DEFAULT_STACK: &str = "dev";

pub fn names() -> &'static [&'static str] {
    &["database", "dev"]
}

/// Look up a stack by name, overriding its defaults with YAML `values` if given.
pub fn by_name(name: &str, values: Option<&str>) -> Result<Box<dyn StackBuilder>> {
    match name {
        "database" => Ok(Box::new(load_values::<DatabaseStack>(values)?)),
        "dev" => Ok(Box::new(load_values::<DevStack>(values)?)),
        other => Err(anyhow!("unknown stack: {} (expected one of: {})", other, names().join(", "))),
    }
}

fn load_values<T: DeserializeOwned + Default>(values: Option<&str>) -> Result<T> {
    match values {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml).context("parsing stack values"),
        _ => Ok(T::default()),
    }
}

// ---- manifest helpers shared by the stacks ----

pub(crate) fn storage(size: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])
}

pub(crate) fn claim_spec(storage_class: Option<&str>, access_mode: &str, size: &str) -> PersistentVolumeClaimSpec {
    let mut spec = PersistentVolumeClaimSpec {
        storage_class_name: storage_class.map(str::to_string),
        access_modes: Some(vec![access_mode.to_string()]),
        ..Default::default()
    };
    spec.resources.get_or_insert_with(Default::default).requests = Some(storage(size));
    spec
}

pub(crate) fn claim_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn container_ports(ports: &[i32]) -> Option<Vec<ContainerPort>> {
    Some(ports.iter().map(|p| ContainerPort { container_port: *p, ..Default::default() }).collect())
}

pub(crate) fn env(pairs: &[(&str, &str)]) -> Option<Vec<EnvVar>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| EnvVar { name: k.to_string(), value: Some(v.to_string()), ..Default::default() })
            .collect(),
    )
}

pub(crate) fn service_port(name: Option<&str>, port: i32, protocol: Option<&str>) -> ServicePort {
    ServicePort {
        name: name.map(str::to_string),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: protocol.map(str::to_string),
        ..Default::default()
    }
}

pub(crate) fn service_spec(service_type: Option<&str>, selector: &LabelMap, ports: Vec<ServicePort>) -> ServiceSpec {
    ServiceSpec {
        type_: service_type.map(str::to_string),
        selector: Some(selector.clone()),
        ports: Some(ports),
        ..Default::default()
    }
}

/// Deployment whose selector and pod template share `labels`.
pub(crate) fn deployment_spec(labels: &LabelMap, replicas: i32, pod: PodSpec) -> DeploymentSpec {
    DeploymentSpec {
        replicas: Some(replicas),
        selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta { labels: Some(labels.clone()), ..Default::default() }),
            spec: Some(pod),
        },
        ..Default::default()
    }
}
