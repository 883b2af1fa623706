use crate::{ResourceId, ResourceKind};

/// Defects in a declared resource graph. Raised while a stack is built or
/// validated, always before anything reaches a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("invalid name {name:?} for {kind}: {reason}")]
    InvalidName {
        kind: ResourceKind,
        name: String,
        reason: String,
    },
    #[error("duplicate resource name: {0}")]
    DuplicateResourceName(ResourceId),
    #[error("{kind} object name {name:?} is used by more than one resource")]
    DuplicateObjectName { kind: ResourceKind, name: String },
    #[error("{from} references {target} {name:?} which is not declared in this stack")]
    DanglingReference {
        from: ResourceId,
        target: &'static str,
        name: String,
    },
    #[error("{0}: selector does not match its own pod template labels")]
    SelectorMismatch(ResourceId),
    #[error("{0}: selector matches no deployment in this stack")]
    UnmatchedSelector(ResourceId),
    #[error("output {output:?} points at {resource}, which was declared by another stack")]
    ForeignOutput { output: String, resource: ResourceId },
    #[error("duplicate output name: {0}")]
    DuplicateOutput(String),
}

/// Failures reading a deferred value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("{resource}{pointer} read before the resource was resolved")]
    UnresolvedReference { resource: ResourceId, pointer: String },
    #[error("{resource} has no attribute at {pointer}")]
    MissingAttribute { resource: ResourceId, pointer: String },
    #[error("decoding {resource}{pointer}: {message}")]
    Decode {
        resource: ResourceId,
        pointer: String,
        message: String,
    },
}
