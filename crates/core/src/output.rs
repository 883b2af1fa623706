//! Deferred resource attributes.
//!
//! Every registered resource owns one resolution slot. The engine holds the
//! write side ([`Resolver`]) and publishes the backend state into it exactly
//! once; any number of [`Output`]s read from the slot. An output whose slot is
//! closed without a value reports [`OutputError::UnresolvedReference`] rather
//! than waiting forever.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::{OutputError, ResourceId};

type Slot = Option<Arc<Value>>;
type Extract<T> = Arc<dyn Fn(&Value) -> Result<T, OutputError> + Send + Sync>;

/// Identity of one stack build. Clones compare equal; tokens from separate
/// builds never do.
#[derive(Debug, Clone, Default)]
pub struct StackToken(Arc<()>);

impl StackToken {
    pub fn new() -> Self { Self::default() }

    pub fn same_stack(&self, other: &StackToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Open a resolution slot for `resource` in the stack identified by `stack`.
pub fn channel(stack: StackToken, resource: ResourceId) -> (Resolver, Source) {
    let (tx, rx) = watch::channel(None);
    (Resolver { resource: resource.clone(), tx }, Source { stack, resource, rx })
}

/// Write side of a resolution slot.
#[derive(Debug)]
pub struct Resolver {
    resource: ResourceId,
    tx: watch::Sender<Slot>,
}

impl Resolver {
    pub fn resource(&self) -> &ResourceId { &self.resource }

    /// Publish the resolved state. Consumes the resolver, so a slot is written
    /// at most once.
    pub fn complete(self, state: Value) {
        self.tx.send_replace(Some(Arc::new(state)));
    }
}

/// Read side of a resolution slot.
#[derive(Debug, Clone)]
pub struct Source {
    stack: StackToken,
    resource: ResourceId,
    rx: watch::Receiver<Slot>,
}

impl Source {
    pub fn stack(&self) -> &StackToken { &self.stack }
    pub fn resource(&self) -> &ResourceId { &self.resource }

    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// A value derived from a resource attribute that is only known once the
/// resource has been resolved by a backend.
pub struct Output<T> {
    source: Source,
    pointer: String,
    extract: Extract<T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self { source: self.source.clone(), pointer: self.pointer.clone(), extract: Arc::clone(&self.extract) }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("resource", &self.source.resource)
            .field("pointer", &self.pointer)
            .field("resolved", &self.source.is_resolved())
            .finish()
    }
}

impl<T: DeserializeOwned + 'static> Output<T> {
    /// Attribute of the resolved state at JSON pointer `pointer`
    /// (e.g. `/metadata/name`).
    pub fn attribute(source: Source, pointer: impl Into<String>) -> Self {
        let pointer = pointer.into();
        let resource = source.resource.clone();
        let at = pointer.clone();
        let extract = move |state: &Value| -> Result<T, OutputError> {
            let v = state.pointer(&at).ok_or_else(|| OutputError::MissingAttribute {
                resource: resource.clone(),
                pointer: at.clone(),
            })?;
            serde_json::from_value(v.clone()).map_err(|e| OutputError::Decode {
                resource: resource.clone(),
                pointer: at.clone(),
                message: e.to_string(),
            })
        };
        Self { source, pointer, extract: Arc::new(extract) }
    }
}

impl<T: 'static> Output<T> {
    pub fn resource(&self) -> &ResourceId { &self.source.resource }
    pub fn pointer(&self) -> &str { &self.pointer }
    pub fn source(&self) -> &Source { &self.source }

    /// Apply `f` to the value once it is resolved. `f` does not run before that.
    pub fn map<U, F>(self, f: F) -> Output<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let inner = self.extract;
        Output {
            source: self.source,
            pointer: self.pointer,
            extract: Arc::new(move |state: &Value| inner(state).map(&f)),
        }
    }

    /// Like [`Output::map`] for fallible transforms.
    pub fn try_map<U, F>(self, f: F) -> Output<U>
    where
        U: 'static,
        F: Fn(T) -> Result<U, OutputError> + Send + Sync + 'static,
    {
        let inner = self.extract;
        Output {
            source: self.source,
            pointer: self.pointer,
            extract: Arc::new(move |state: &Value| inner(state).and_then(&f)),
        }
    }

    /// Erase the value type to JSON, for stack-level outputs.
    pub fn into_json(self) -> Output<Value>
    where
        T: Serialize,
    {
        let resource = self.source.resource.clone();
        let pointer = self.pointer.clone();
        self.try_map(move |v| {
            serde_json::to_value(v).map_err(|e| OutputError::Decode {
                resource: resource.clone(),
                pointer: pointer.clone(),
                message: e.to_string(),
            })
        })
    }

    /// Read the value without waiting. A pending slot is an error.
    pub fn try_get(&self) -> Result<T, OutputError> {
        let state = self.source.rx.borrow().clone();
        self.finish(state)
    }

    /// Wait until the owning resource is resolved and read the value.
    pub async fn resolve(&self) -> Result<T, OutputError> {
        let mut rx = self.source.rx.clone();
        let state = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        self.finish(state)
    }

    fn finish(&self, state: Slot) -> Result<T, OutputError> {
        match state {
            Some(state) => (self.extract)(&state),
            None => Err(OutputError::UnresolvedReference {
                resource: self.source.resource.clone(),
                pointer: self.pointer.clone(),
            }),
        }
    }
}
