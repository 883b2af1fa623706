use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use plinth_backend::MockBackend;
use plinth_core::{label_map, object_meta, GraphError, Resource, ResourceKind, ResourceSpec};
use plinth_engine::harness::{run_stack, run_stack_under_test};
use plinth_engine::{Engine, EngineError, StackBuilder, StackContext};
use plinth_stacks::{by_name, DevStack};

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn declares_services_and_deployments_only() {
    let resources = run_stack::<DevStack>().await.unwrap();
    let kinds: BTreeSet<_> = resources.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, BTreeSet::from([ResourceKind::Deployment, ResourceKind::Service]));
    assert_eq!(resources.len(), 4);
}

#[tokio::test]
async fn kafka_and_zookeeper_names() {
    let outcome = run_stack_under_test(&DevStack::default()).await.unwrap();
    assert_eq!(outcome.metadata_names(ResourceKind::Service), names(&["kafka-service", "zoo1"]));
    assert_eq!(outcome.metadata_names(ResourceKind::Deployment), names(&["zookeeper-deploy", "kafka-broker"]));
    assert_eq!(outcome.output("kafka").and_then(|v| v.as_str()), Some("kafka-service"));
    assert_eq!(outcome.output("zoo").and_then(|v| v.as_str()), Some("zoo1"));
}

#[tokio::test]
async fn zookeeper_service_exposes_three_ports() {
    let outcome = run_stack_under_test(&DevStack::default()).await.unwrap();
    let zoo = outcome.of_kind(ResourceKind::Service).find(|r| r.name() == "zoo").unwrap();
    let ports: Vec<_> = zoo.state["spec"]["ports"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| (p["name"].as_str().unwrap().to_string(), p["port"].as_i64().unwrap()))
        .collect();
    assert_eq!(
        ports,
        vec![("client".to_string(), 2181), ("follower".to_string(), 2888), ("leader".to_string(), 3888)]
    );
    assert!(zoo.state["spec"].get("type").is_none());
}

#[tokio::test]
async fn kafka_service_selects_the_broker() {
    let outcome = run_stack_under_test(&DevStack::default()).await.unwrap();
    let svc = outcome.of_kind(ResourceKind::Service).find(|r| r.name() == "kafka-service").unwrap();
    assert_eq!(svc.state["spec"]["type"], "NodePort");
    assert_eq!(svc.state["spec"]["selector"], serde_json::json!({ "app": "kafka", "id": "0" }));
    assert_eq!(svc.state["metadata"]["labels"], serde_json::json!({ "name": "kafka" }));
}

#[tokio::test]
async fn runs_are_idempotent_and_echo_inputs() {
    let a = run_stack::<DevStack>().await.unwrap();
    let b = run_stack::<DevStack>().await.unwrap();
    assert_eq!(a, b);

    let engine = Engine::new(MockBackend::new());
    let outcome = engine.run(&DevStack::default()).await.unwrap();
    for (req, res) in engine.backend().requests().iter().zip(&outcome.resources) {
        assert_eq!(req.inputs, res.state);
        assert_eq!(res.id.as_deref(), Some(&format!("{}_id", req.name)[..]));
    }
}

#[tokio::test]
async fn values_file_moves_the_broker_port() {
    let stack = by_name("dev", Some("kafka:\n  port: 19092\n")).unwrap();
    let outcome = run_stack_under_test(&*stack).await.unwrap();
    let svc = outcome.of_kind(ResourceKind::Service).find(|r| r.name() == "kafka-service").unwrap();
    assert_eq!(svc.state["spec"]["ports"][0]["port"], 19092);
}

/// The dev stack plus a worker mounting a claim nobody declared.
struct WithDanglingClaim(DevStack);

impl StackBuilder for WithDanglingClaim {
    fn name(&self) -> &str { "dev-broken" }

    fn build(&self, ctx: &mut StackContext) -> Result<(), GraphError> {
        self.0.build(ctx)?;
        let labels = label_map([("app", "worker")]);
        let pod = PodSpec {
            containers: vec![Container { name: "worker".into(), image: Some("busybox".into()), ..Default::default() }],
            volumes: Some(vec![Volume {
                name: "scratch".into(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: "scratch-claim".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };
        ctx.register(Resource::new(
            "worker",
            object_meta("worker", None),
            ResourceSpec::Deployment(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(pod),
                },
                ..Default::default()
            }),
        )?)?;
        Ok(())
    }
}

#[tokio::test]
async fn dangling_claim_fails_before_any_submission() {
    let engine = Engine::new(MockBackend::new());
    let err = engine.run(&WithDanglingClaim(DevStack::default())).await.unwrap_err();
    match err {
        EngineError::Build(GraphError::DanglingReference { from, target, name }) => {
            assert_eq!(from.name, "worker");
            assert_eq!(target, "PersistentVolumeClaim");
            assert_eq!(name, "scratch-claim");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine.backend().requests().is_empty());
}
