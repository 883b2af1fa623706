//! Test entry points: run a stack against a fresh mock backend, fully
//! resolved (not a preview).

use plinth_backend::MockBackend;

use crate::{Engine, EngineError, EngineOptions, ResolvedResource, RunOutcome, StackBuilder};

/// Run `builder` with the mock backend and return the whole outcome.
pub async fn run_stack_under_test<S: StackBuilder + ?Sized>(builder: &S) -> Result<RunOutcome, EngineError> {
    Engine::new(MockBackend::new())
        .with_options(EngineOptions { preview: false })
        .run(builder)
        .await
}

/// Run the default-configured stack `S` and return its flattened resources.
pub async fn run_stack<S: StackBuilder + Default>() -> Result<Vec<ResolvedResource>, EngineError> {
    Ok(run_stack_under_test(&S::default()).await?.resources)
}
