//! Single-broker Kafka wired to a single Zookeeper node.

use k8s_openapi::api::core::v1::{Container, PodSpec};
use plinth_core::{label_map, object_meta, GraphError, LabelMap, Resource, ResourceSpec};
use plinth_engine::{StackBuilder, StackContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{container_ports, deployment_spec, env, service_port, service_spec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZookeeperValues {
    pub image: String,
    pub replicas: i32,
    pub client_port: i32,
    pub follower_port: i32,
    pub leader_port: i32,
    pub labels: LabelMap,
}

impl Default for ZookeeperValues {
    fn default() -> Self {
        Self {
            image: "wurstmeister/zookeeper".into(),
            replicas: 1,
            client_port: 2181,
            follower_port: 2888,
            leader_port: 3888,
            labels: label_map([("app", "zookeeper-1")]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaValues {
    pub image: String,
    pub replicas: i32,
    pub port: i32,
    pub broker_id: u32,
    pub advertised_host: String,
    pub topics: String,
    pub labels: LabelMap,
}

impl Default for KafkaValues {
    fn default() -> Self {
        Self {
            image: "wurstmeister/kafka".into(),
            replicas: 1,
            port: 9092,
            broker_id: 0,
            advertised_host: "localhost".into(),
            topics: "simple.topic:1:1".into(),
            labels: label_map([("app", "kafka"), ("id", "0")]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevStack {
    pub zookeeper: ZookeeperValues,
    pub kafka: KafkaValues,
}

impl StackBuilder for DevStack {
    fn name(&self) -> &str { "dev" }

    fn build(&self, ctx: &mut StackContext) -> Result<(), GraphError> {
        let zookeeper = self.zookeeper(ctx)?;
        self.kafka(ctx, &zookeeper)
    }
}

impl DevStack {
    /// Returns the `host:port` Kafka uses to reach Zookeeper.
    fn zookeeper(&self, ctx: &mut StackContext) -> Result<String, GraphError> {
        let v = &self.zookeeper;
        let pod = PodSpec {
            containers: vec![Container {
                name: "zoo1".into(),
                image: Some(v.image.clone()),
                ports: container_ports(&[v.client_port]),
                env: env(&[("ZOOKEEPER_ID", "1"), ("ZOOKEEPER_SERVER_1", "zoo1")]),
                ..Default::default()
            }],
            ..Default::default()
        };
        ctx.register(Resource::new(
            "zookeeper-deploy",
            object_meta("zookeeper-deploy", None),
            ResourceSpec::Deployment(deployment_spec(&v.labels, v.replicas, pod)),
        )?)?;

        let ports = vec![
            service_port(Some("client"), v.client_port, Some("TCP")),
            service_port(Some("follower"), v.follower_port, Some("TCP")),
            service_port(Some("leader"), v.leader_port, Some("TCP")),
        ];
        let service = ctx.register(Resource::new(
            "zoo",
            object_meta("zoo1", Some(&v.labels)),
            ResourceSpec::Service(service_spec(None, &v.labels, ports)),
        )?)?;
        ctx.export("zoo", service.metadata_name())?;
        Ok(format!("{}:{}", service.declared_name(), v.client_port))
    }

    fn kafka(&self, ctx: &mut StackContext, zookeeper: &str) -> Result<(), GraphError> {
        let v = &self.kafka;
        debug!(zookeeper, broker = v.broker_id, "wiring kafka");
        let broker_id = v.broker_id.to_string();
        let advertised = format!("PLAINTEXT://{}:{}", v.advertised_host, v.port);
        let listeners = format!("PLAINTEXT://0.0.0.0:{}", v.port);
        let pod = PodSpec {
            containers: vec![Container {
                name: "kafka".into(),
                image: Some(v.image.clone()),
                ports: container_ports(&[v.port]),
                env: env(&[
                    ("KAFKA_ZOOKEEPER_CONNECT", zookeeper),
                    ("KAFKA_ADVERTISED_LISTENERS", &advertised),
                    ("KAFKA_LISTENERS", &listeners),
                    ("KAFKA_BROKER_ID", &broker_id),
                    ("KAFKA_CREATE_TOPICS", &v.topics),
                ]),
                ..Default::default()
            }],
            ..Default::default()
        };
        ctx.register(Resource::new(
            "kafka-deploy",
            object_meta("kafka-broker", Some(&v.labels)),
            ResourceSpec::Deployment(deployment_spec(&v.labels, v.replicas, pod)),
        )?)?;

        let service = ctx.register(Resource::new(
            "kafka-service",
            object_meta("kafka-service", Some(&label_map([("name", "kafka")]))),
            ResourceSpec::Service(service_spec(
                Some("NodePort"),
                &v.labels,
                vec![service_port(Some("kafka-port"), v.port, Some("TCP"))],
            )),
        )?)?;
        ctx.export("kafka", service.metadata_name())
    }
}
