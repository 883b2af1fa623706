//! Plinth engine: builds a stack, validates its graph, resolves every resource
//! against a backend and returns the flattened result.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use futures::future::try_join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use metrics::{counter, histogram};
use plinth_backend::{BackendError, ResolveRequest, Resolved, ResourceBackend};
use plinth_core::{GraphError, OutputError, Resource, ResourceId, ResourceKind};
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use tracing::{debug, error, info, warn};

pub mod harness;
mod stack;
pub mod validate;

pub use stack::{ResourceHandle, Stack, StackBuilder, StackContext};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("stack build failed: {0}")]
    Build(#[from] GraphError),
    #[error("backend {backend} failed to resolve {kind} {name:?}: {source}")]
    BackendResolution {
        backend: String,
        kind: ResourceKind,
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("output {name:?}: {source}")]
    Output {
        name: String,
        #[source]
        source: OutputError,
    },
    #[error("encoding {resource}: {source}")]
    Encode {
        resource: ResourceId,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Plan only: validate and render inputs, never contact the backend.
    pub preview: bool,
}

impl EngineOptions {
    /// Read defaults from the environment (`PLINTH_PREVIEW=1`).
    pub fn from_env() -> Self {
        let preview = std::env::var("PLINTH_PREVIEW")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { preview }
    }
}

/// A resource after an engine run. In preview runs `id` is unset and `state`
/// holds the declared inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub resource: Resource,
    pub id: Option<String>,
    pub state: Json,
}

impl ResolvedResource {
    pub fn kind(&self) -> ResourceKind { self.resource.kind() }
    pub fn name(&self) -> &str { self.resource.name() }

    pub fn metadata(&self) -> Result<ObjectMeta, serde_json::Error> {
        serde_json::from_value(self.state.get("metadata").cloned().unwrap_or(Json::Null))
    }

    pub fn metadata_name(&self) -> Option<&str> {
        self.state.pointer("/metadata/name").and_then(Json::as_str)
    }

    /// Decode the resolved state into a typed object, e.g. a `Deployment`.
    pub fn decode<K: DeserializeOwned>(&self) -> Result<K, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stack: String,
    pub preview: bool,
    /// Flattened resources in declaration order.
    pub resources: Vec<ResolvedResource>,
    pub outputs: BTreeMap<String, Json>,
}

impl RunOutcome {
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResolvedResource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn metadata_names(&self, kind: ResourceKind) -> BTreeSet<String> {
        self.of_kind(kind).filter_map(|r| r.metadata_name().map(str::to_string)).collect()
    }

    pub fn output(&self, name: &str) -> Option<&Json> {
        self.outputs.get(name)
    }

    pub fn manifests(&self) -> impl Iterator<Item = &Json> {
        self.resources.iter().map(|r| &r.state)
    }
}

/// Drives stack builders against a backend. Each run works on a fresh graph.
pub struct Engine<B> {
    backend: B,
    options: EngineOptions,
}

impl<B: ResourceBackend> Engine<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, options: EngineOptions::default() }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(&self) -> &B { &self.backend }
    pub fn options(&self) -> EngineOptions { self.options }

    pub async fn run<S: StackBuilder + ?Sized>(&self, builder: &S) -> Result<RunOutcome, EngineError> {
        let t0 = Instant::now();
        counter!("engine_runs", 1u64);

        let mut ctx = StackContext::new(builder.name());
        let built = builder.build(&mut ctx).and_then(|_| {
            let stack = ctx.finish();
            validate::check(stack.resources()).map(|_| stack)
        });
        let stack = match built {
            Ok(s) => s,
            Err(e) => {
                counter!("engine_build_err", 1u64);
                warn!(stack = %builder.name(), error = %e, "stack build failed");
                return Err(e.into());
            }
        };
        info!(stack = %stack.name(), resources = stack.len(), preview = self.options.preview, "stack built");

        let (name, entries, outputs) = stack.into_parts();
        // Encode everything up front so a bad manifest fails before the first submission.
        let mut requests = Vec::with_capacity(entries.len());
        for entry in &entries {
            requests.push(request_for(&entry.resource)?);
        }

        if self.options.preview {
            let resources = entries
                .into_iter()
                .zip(requests)
                .map(|(entry, req)| ResolvedResource { resource: entry.resource, id: None, state: req.inputs })
                .collect();
            histogram!("engine_run_ms", t0.elapsed().as_secs_f64() * 1000.0);
            return Ok(RunOutcome { stack: name, preview: true, resources, outputs: BTreeMap::new() });
        }

        let mut resolved: Vec<ResolvedResource> = Vec::with_capacity(entries.len());
        for (entry, req) in entries.into_iter().zip(requests) {
            match self.backend.resolve(&req).await {
                Ok(Resolved { id, state }) => {
                    debug!(kind = %req.kind, name = %req.name, id = %id, "resource resolved");
                    counter!("engine_resources_resolved", 1u64);
                    entry.resolver.complete(state.clone());
                    resolved.push(ResolvedResource { resource: entry.resource, id: Some(id), state });
                }
                Err(source) => {
                    counter!("engine_backend_err", 1u64);
                    error!(backend = %self.backend.name(), kind = %req.kind, name = %req.name, error = %source, "resolution failed; aborting run");
                    self.discard(&resolved).await;
                    return Err(EngineError::BackendResolution {
                        backend: self.backend.name().to_string(),
                        kind: req.kind,
                        name: req.name,
                        source,
                    });
                }
            }
        }

        let outputs = match try_join_all(outputs.into_iter().map(|(output, out)| async move {
            match out.resolve().await {
                Ok(v) => Ok((output, v)),
                Err(source) => Err(EngineError::Output { name: output, source }),
            }
        }))
        .await
        {
            Ok(values) => values.into_iter().collect::<BTreeMap<_, _>>(),
            Err(e) => {
                counter!("engine_output_err", 1u64);
                error!(stack = %name, error = %e, "output resolution failed; discarding resources");
                self.discard(&resolved).await;
                return Err(e);
            }
        };

        histogram!("engine_run_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(stack = %name, resources = resolved.len(), outputs = outputs.len(), backend = %self.backend.name(), "stack resolved");
        Ok(RunOutcome { stack: name, preview: false, resources: resolved, outputs })
    }

    /// Hand already-resolved resources back, newest first.
    async fn discard(&self, resolved: &[ResolvedResource]) {
        for r in resolved.iter().rev() {
            let Some(id) = r.id.as_deref() else { continue };
            if let Err(e) = self.backend.discard(r.kind(), r.name(), id).await {
                warn!(kind = %r.kind(), name = %r.name(), error = %e, "discard failed");
            }
        }
    }
}

fn request_for(resource: &Resource) -> Result<ResolveRequest, EngineError> {
    let encode = |source| EngineError::Encode { resource: resource.id(), source };
    let inputs = resource.to_inputs().map_err(encode)?;
    let metadata = serde_json::to_value(resource.metadata()).map_err(encode)?;
    Ok(ResolveRequest {
        kind: resource.kind(),
        name: resource.name().to_string(),
        metadata,
        inputs,
        id_hint: resource.id_hint().map(str::to_string),
    })
}
