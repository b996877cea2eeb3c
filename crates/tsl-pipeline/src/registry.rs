//! Step handler trait and the name → handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tsl_types::Result;

use crate::context::Context;
use crate::engine::Pipeline;
use crate::steps;

// ---------------------------------------------------------------------------
// StepHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The step name used in pipeline files (e.g. "load", "select").
    fn step_name(&self) -> &str;

    /// Run the step. Handlers leave `ctx` untouched when they fail.
    async fn execute(&self, pipeline: &Pipeline, ctx: &mut Context, args: &[String]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// StepRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its step name. A later registration for
    /// the same name replaces the earlier one.
    pub fn register(&mut self, handler: impl StepHandler + 'static) {
        let name = handler.step_name().to_string();
        self.handlers.insert(name, Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered step names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

pub fn default_registry() -> StepRegistry {
    let mut reg = StepRegistry::new();
    reg.register(steps::LoadStep);
    reg.register(steps::SetFetchOptionsStep);
    reg.register(steps::SelectStep);
    reg.register(steps::TransformStep);
    reg.register(steps::PublishStep);
    reg.register(steps::GenerateStep);
    reg.register(steps::GenerateIndexStep);
    reg.register(steps::LogStep);
    reg.register(steps::EchoStep);
    reg
}
