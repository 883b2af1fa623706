//! Redis and Postgres, each with its own storage and a NodePort service.

use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, EnvFromSource, HostPathVolumeSource, PersistentVolumeSpec, PodSpec, VolumeMount,
};
use plinth_core::{label_map, object_meta, GraphError, LabelMap, Resource, ResourceSpec};
use plinth_engine::{StackBuilder, StackContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{claim_spec, claim_volume, container_ports, deployment_spec, service_port, service_spec, storage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisValues {
    pub image: String,
    pub replicas: i32,
    pub port: i32,
    pub storage_size: String,
    pub access_mode: String,
    pub labels: LabelMap,
}

impl Default for RedisValues {
    fn default() -> Self {
        Self {
            image: "redis:latest".into(),
            replicas: 1,
            port: 6379,
            storage_size: "100Mi".into(),
            access_mode: "ReadWriteMany".into(),
            labels: label_map([("app", "redis-app")]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresValues {
    pub image: String,
    pub replicas: i32,
    pub port: i32,
    pub storage_size: String,
    pub storage_class: String,
    pub host_path: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub labels: LabelMap,
}

impl Default for PostgresValues {
    fn default() -> Self {
        Self {
            image: "postgres:10.4".into(),
            replicas: 1,
            port: 5432,
            storage_size: "5Gi".into(),
            storage_class: "manual".into(),
            host_path: "/mnt/data".into(),
            database: "postgresdb".into(),
            user: "postgresadmin".into(),
            password: "admin123".into(),
            labels: label_map([("app", "postgres")]),
        }
    }
}

/// Redis with a claimed data volume, plus Postgres backed by a host-path
/// persistent volume and configured from a config map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseStack {
    pub redis: RedisValues,
    pub postgres: PostgresValues,
}

const REDIS_CLAIM: &str = "redis-data";
const POSTGRES_CONFIG: &str = "postgres-config";
const POSTGRES_VOLUME: &str = "postgres-pv-volume";
const POSTGRES_CLAIM: &str = "postgres-pv-claim";

impl StackBuilder for DatabaseStack {
    fn name(&self) -> &str { "database" }

    fn build(&self, ctx: &mut StackContext) -> Result<(), GraphError> {
        self.redis(ctx)?;
        self.postgres(ctx)
    }
}

impl DatabaseStack {
    fn redis(&self, ctx: &mut StackContext) -> Result<(), GraphError> {
        let v = &self.redis;
        ctx.register(Resource::new(
            REDIS_CLAIM,
            object_meta(REDIS_CLAIM, Some(&v.labels)),
            ResourceSpec::PersistentVolumeClaim(claim_spec(None, &v.access_mode, &v.storage_size)),
        )?)?;

        let pod = PodSpec {
            containers: vec![Container {
                name: "redis".into(),
                image: Some(v.image.clone()),
                image_pull_policy: Some("IfNotPresent".into()),
                ports: container_ports(&[v.port]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "data".into(),
                    mount_path: "/data".into(),
                    read_only: Some(false),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![claim_volume("data", REDIS_CLAIM)]),
            ..Default::default()
        };
        // Keyed apart from the service; the object itself is still "redis".
        ctx.register(Resource::new(
            "redis_bd",
            object_meta("redis", None),
            ResourceSpec::Deployment(deployment_spec(&v.labels, v.replicas, pod)),
        )?)?;

        let service = ctx.register(Resource::new(
            "redis",
            object_meta("redis", Some(&v.labels)),
            ResourceSpec::Service(service_spec(Some("NodePort"), &v.labels, vec![service_port(None, v.port, None)])),
        )?)?;
        debug!(service = %service.declared_name(), port = v.port, "redis declared");
        ctx.export("redis", service.metadata_name())
    }

    fn postgres(&self, ctx: &mut StackContext) -> Result<(), GraphError> {
        let v = &self.postgres;
        ctx.register(Resource::new(
            POSTGRES_CONFIG,
            object_meta(POSTGRES_CONFIG, Some(&v.labels)),
            ResourceSpec::ConfigMap {
                data: label_map([
                    ("POSTGRES-DB", v.database.as_str()),
                    ("POSTGRES-USER", v.user.as_str()),
                    ("POSTGRES-PASSWORD", v.password.as_str()),
                    ("ALLOWED_HOSTS", "*"),
                ]),
            },
        )?)?;

        let mut volume_labels = v.labels.clone();
        volume_labels.insert("type".into(), "local".into());
        ctx.register(Resource::new(
            POSTGRES_VOLUME,
            object_meta(POSTGRES_VOLUME, Some(&volume_labels)),
            ResourceSpec::PersistentVolume(PersistentVolumeSpec {
                storage_class_name: Some(v.storage_class.clone()),
                capacity: Some(storage(&v.storage_size)),
                access_modes: Some(vec!["ReadWriteMany".into()]),
                host_path: Some(HostPathVolumeSource { path: v.host_path.clone(), type_: None }),
                ..Default::default()
            }),
        )?)?;

        ctx.register(Resource::new(
            POSTGRES_CLAIM,
            object_meta(POSTGRES_CLAIM, Some(&v.labels)),
            ResourceSpec::PersistentVolumeClaim(claim_spec(Some(&v.storage_class), "ReadWriteMany", &v.storage_size)),
        )?)?;

        let pod = PodSpec {
            containers: vec![Container {
                name: "postgres".into(),
                image: Some(v.image.clone()),
                image_pull_policy: Some("IfNotPresent".into()),
                ports: container_ports(&[v.port]),
                env_from: Some(vec![EnvFromSource {
                    config_map_ref: Some(ConfigMapEnvSource { name: Some(POSTGRES_CONFIG.into()), ..Default::default() }),
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "postgresdb".into(),
                    mount_path: "/var/lib/postgresql/data".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![claim_volume("postgresdb", POSTGRES_CLAIM)]),
            ..Default::default()
        };
        ctx.register(Resource::new(
            "postgres",
            object_meta("postgres", None),
            ResourceSpec::Deployment(deployment_spec(&v.labels, v.replicas, pod)),
        )?)?;

        let service = ctx.register(Resource::new(
            "postgres",
            object_meta("postgres", Some(&v.labels)),
            ResourceSpec::Service(service_spec(Some("NodePort"), &v.labels, vec![service_port(None, v.port, None)])),
        )?)?;
        debug!(service = %service.declared_name(), port = v.port, "postgres declared");
        ctx.export("postgres", service.metadata_name())
    }
}
