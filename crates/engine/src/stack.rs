//! Stack builders and the context they declare resources into.

use std::collections::BTreeMap;

use plinth_core::output::{self, Resolver, Source, StackToken};
use plinth_core::{GraphError, Output, Resource, ResourceId};
use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

/// One logical environment. `build` declares resources and named outputs
/// into the context; it must not perform I/O.
pub trait StackBuilder: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, ctx: &mut StackContext) -> Result<(), GraphError>;
}

pub(crate) struct Entry {
    pub(crate) resource: Resource,
    pub(crate) resolver: Resolver,
}

/// Build context owned by a single engine run.
pub struct StackContext {
    token: StackToken,
    name: String,
    entries: Vec<Entry>,
    index: FxHashSet<ResourceId>,
    outputs: BTreeMap<String, Output<Json>>,
}

impl StackContext {
    pub fn new(name: &str) -> Self {
        Self {
            token: StackToken::new(),
            name: name.to_string(),
            entries: Vec::new(),
            index: FxHashSet::default(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn stack_name(&self) -> &str { &self.name }

    /// Declare a resource. Fails if another resource of the same kind already
    /// uses this name.
    pub fn register(&mut self, resource: Resource) -> Result<ResourceHandle, GraphError> {
        let id = resource.id();
        if !self.index.insert(id.clone()) {
            return Err(GraphError::DuplicateResourceName(id));
        }
        let (resolver, source) = output::channel(self.token.clone(), id.clone());
        let handle = ResourceHandle { id, declared_name: resource.metadata_name().to_string(), source };
        debug!(stack = %self.name, resource = %handle.id, object = %handle.declared_name, "resource registered");
        self.entries.push(Entry { resource, resolver });
        Ok(handle)
    }

    /// Expose `output` under `name` once the stack is resolved.
    pub fn export<T: Serialize + 'static>(&mut self, name: &str, output: Output<T>) -> Result<(), GraphError> {
        if !output.source().stack().same_stack(&self.token) || !self.index.contains(output.resource()) {
            return Err(GraphError::ForeignOutput { output: name.to_string(), resource: output.resource().clone() });
        }
        if self.outputs.contains_key(name) {
            return Err(GraphError::DuplicateOutput(name.to_string()));
        }
        self.outputs.insert(name.to_string(), output.into_json());
        Ok(())
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> + Clone {
        self.entries.iter().map(|e| &e.resource)
    }

    pub fn finish(self) -> Stack {
        Stack { name: self.name, entries: self.entries, outputs: self.outputs }
    }
}

/// Returned by [`StackContext::register`]. The object name is known right
/// away; attribute values are deferred.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    id: ResourceId,
    declared_name: String,
    source: Source,
}

impl ResourceHandle {
    pub fn id(&self) -> &ResourceId { &self.id }
    pub fn declared_name(&self) -> &str { &self.declared_name }

    pub fn output<T: DeserializeOwned + 'static>(&self, pointer: &str) -> Output<T> {
        Output::attribute(self.source.clone(), pointer)
    }

    pub fn metadata_name(&self) -> Output<String> {
        self.output("/metadata/name")
    }
}

/// Frozen result of one builder invocation.
pub struct Stack {
    name: String,
    pub(crate) entries: Vec<Entry>,
    pub(crate) outputs: BTreeMap<String, Output<Json>>,
}

impl Stack {
    pub fn name(&self) -> &str { &self.name }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> + Clone {
        self.entries.iter().map(|e| &e.resource)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Entry>, BTreeMap<String, Output<Json>>) {
        (self.name, self.entries, self.outputs)
    }
}

#[cfg(test)]
mod tests {
    use plinth_core::{label_map, object_meta, ResourceKind, ResourceSpec};

    use super::*;

    fn config_map(key: &str, name: &str) -> Resource {
        Resource::new(key, object_meta(name, None), ResourceSpec::ConfigMap { data: label_map([("k", "v")]) }).unwrap()
    }

    #[test]
    fn duplicate_kind_and_name_is_rejected() {
        let mut ctx = StackContext::new("t");
        ctx.register(config_map("cfg", "a")).unwrap();
        let err = ctx.register(config_map("cfg", "b")).unwrap_err();
        assert_eq!(err, GraphError::DuplicateResourceName(ResourceId::new(ResourceKind::ConfigMap, "cfg")));
        assert_eq!(ctx.resources().count(), 1);
    }

    #[test]
    fn handle_exposes_declared_name_synchronously() {
        let mut ctx = StackContext::new("t");
        let h = ctx.register(config_map("redis_bd", "redis")).unwrap();
        assert_eq!(h.declared_name(), "redis");
        assert_eq!(h.id().name, "redis_bd");
        assert!(h.metadata_name().try_get().is_err());
    }

    #[test]
    fn outputs_from_another_stack_are_rejected() {
        let mut other = StackContext::new("other");
        let foreign = other.register(config_map("cfg", "cfg")).unwrap();

        let mut ctx = StackContext::new("t");
        ctx.register(config_map("cfg", "cfg")).unwrap();
        let err = ctx.export("cfg", foreign.metadata_name()).unwrap_err();
        assert!(matches!(err, GraphError::ForeignOutput { .. }));
    }

    #[test]
    fn same_named_builds_do_not_share_outputs() {
        let mut first = StackContext::new("dev");
        let h = first.register(config_map("cfg", "cfg")).unwrap();

        let mut second = StackContext::new("dev");
        second.register(config_map("cfg", "cfg")).unwrap();
        assert!(matches!(second.export("cfg", h.metadata_name()), Err(GraphError::ForeignOutput { .. })));
        first.export("cfg", h.metadata_name()).unwrap();
    }

    #[test]
    fn output_names_are_unique() {
        let mut ctx = StackContext::new("t");
        let h = ctx.register(config_map("cfg", "cfg")).unwrap();
        ctx.export("cfg", h.metadata_name()).unwrap();
        let err = ctx.export("cfg", h.metadata_name()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateOutput("cfg".into()));
        let stack = ctx.finish();
        assert_eq!(stack.output_names().collect::<Vec<_>>(), vec!["cfg"]);
        assert_eq!(stack.len(), 1);
    }
}
