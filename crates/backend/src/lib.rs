//! Plinth backends: the resolution contract the engine drives, plus an
//! in-memory mock that echoes inputs back as state.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, PoisonError};

use plinth_core::{ResourceId, ResourceKind};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

/// A proposed resource as submitted to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub kind: ResourceKind,
    pub name: String,
    pub metadata: Json,
    /// Full manifest of the resource (`apiVersion`, `kind`, `metadata`, `spec`/`data`).
    pub inputs: Json,
    /// Identity of an existing object to adopt, if any.
    pub id_hint: Option<String>,
}

impl ResolveRequest {
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(self.kind, self.name.clone())
    }
}

/// Backend answer: assigned identity and resolved attribute state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub id: String,
    pub state: Json,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Capability the engine resolves resources against.
#[async_trait::async_trait]
pub trait ResourceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve one resource into an identity and a state.
    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolved, BackendError>;

    /// Undo a resolution that belongs to a run which failed later on.
    async fn discard(&self, _kind: ResourceKind, _name: &str, _id: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<B: ResourceBackend + ?Sized> ResourceBackend for Arc<B> {
    fn name(&self) -> &str { (**self).name() }

    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolved, BackendError> {
        (**self).resolve(request).await
    }

    async fn discard(&self, kind: ResourceKind, name: &str, id: &str) -> Result<(), BackendError> {
        (**self).discard(kind, name, id).await
    }
}

/// Deterministic, networkless backend.
///
/// The id is the request's id hint or `"{name}_id"`; the state is the inputs,
/// unchanged. Requests and discards are journaled for assertions.
#[derive(Debug, Default)]
pub struct MockBackend {
    failures: FxHashMap<ResourceId, String>,
    requests: Mutex<Vec<ResolveRequest>>,
    discarded: Mutex<Vec<(ResourceId, String)>>,
}

impl MockBackend {
    pub fn new() -> Self { Self::default() }

    /// Reject the resource `kind`/`name` with `message`.
    pub fn failing_on(mut self, kind: ResourceKind, name: &str, message: &str) -> Self {
        self.failures.insert(ResourceId::new(kind, name), message.to_string());
        self
    }

    /// Every request seen so far, in submission order.
    pub fn requests(&self) -> Vec<ResolveRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Resources handed back through [`ResourceBackend::discard`], with their ids.
    pub fn discarded(&self) -> Vec<(ResourceId, String)> {
        self.discarded.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl ResourceBackend for MockBackend {
    fn name(&self) -> &str { "mock" }

    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolved, BackendError> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
        if let Some(msg) = self.failures.get(&request.resource_id()) {
            return Err(BackendError::Rejected(msg.clone()));
        }
        let id = request.id_hint.clone().unwrap_or_else(|| format!("{}_id", request.name));
        debug!(kind = %request.kind, name = %request.name, id = %id, "mock resolved");
        Ok(Resolved { id, state: request.inputs.clone() })
    }

    async fn discard(&self, kind: ResourceKind, name: &str, id: &str) -> Result<(), BackendError> {
        self.discarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((ResourceId::new(kind, name), id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, id_hint: Option<&str>) -> ResolveRequest {
        let inputs = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "labels": { "app": "redis-app" } },
            "spec": { "type": "NodePort", "ports": [ { "port": 6379, "targetPort": 6379 } ] }
        });
        ResolveRequest {
            kind: ResourceKind::Service,
            name: name.to_string(),
            metadata: inputs["metadata"].clone(),
            inputs,
            id_hint: id_hint.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn mock_echoes_inputs_and_derives_id() {
        let mock = MockBackend::new();
        let req = request("redis", None);
        let out = mock.resolve(&req).await.unwrap();
        assert_eq!(out.id, "redis_id");
        assert_eq!(out.state, req.inputs);
        assert_eq!(mock.requests(), vec![req]);
    }

    #[tokio::test]
    async fn mock_prefers_id_hint() {
        let mock = MockBackend::new();
        let out = mock.resolve(&request("redis", Some("existing-uid"))).await.unwrap();
        assert_eq!(out.id, "existing-uid");
    }

    #[tokio::test]
    async fn mock_failure_injection_is_scoped_to_kind_and_name() {
        let mock = MockBackend::new().failing_on(ResourceKind::Service, "redis", "quota exceeded");
        let err = mock.resolve(&request("redis", None)).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected: quota exceeded");
        assert!(mock.resolve(&request("postgres", None)).await.is_ok());
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn arc_forwards_to_inner_backend() {
        let mock = Arc::new(MockBackend::new());
        let shared: Arc<MockBackend> = Arc::clone(&mock);
        shared.discard(ResourceKind::Service, "redis", "redis_id").await.unwrap();
        assert_eq!(shared.name(), "mock");
        assert_eq!(
            mock.discarded(),
            vec![(ResourceId::new(ResourceKind::Service, "redis"), "redis_id".to_string())]
        );
    }
}
