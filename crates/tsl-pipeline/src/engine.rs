//! Pipeline engine: parses a pipeline file and runs its steps in order.

use std::path::Path;
use std::sync::Arc;

use serde_yaml::Value;
use tracing::{debug, error, info};
use tsl_types::{Result, TslError};

use crate::context::Context;
use crate::fetch::{Fetcher, HttpFetcher, SignatureVerifier};
use crate::registry::{default_registry, StepRegistry};
use crate::sign::Pkcs11Provider;
use crate::xslt::{StylesheetCache, XsltProcessor, XsltprocProcessor, DEFAULT_WORKERS};

// ---------------------------------------------------------------------------
// Pipe
// ---------------------------------------------------------------------------

/// One pipeline step: a registered step name and its raw arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipe {
    pub method: String,
    pub args: Vec<String>,
}

impl Pipe {
    pub fn new(method: impl Into<String>, args: &[&str]) -> Self {
        Self {
            method: method.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Parse a single `{ name: [args...] }` mapping. A null value means no
    /// arguments; scalar arguments are stringified.
    fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Mapping(map) if map.len() == 1 => map,
            _ => return Err(pipeline_error("pipe must be a map with a single step name")),
        };
        let Some((key, args)) = map.iter().next() else {
            return Err(pipeline_error("pipe must be a map with a single step name"));
        };
        let method = key
            .as_str()
            .ok_or_else(|| pipeline_error("pipe must be a map keyed by a step name"))?
            .to_string();

        let args = match args {
            Value::Null => Vec::new(),
            Value::Sequence(items) => items
                .iter()
                .map(scalar_to_string)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    pipeline_error(format!("pipe arguments for '{method}' must be scalars"))
                })?,
            _ => {
                return Err(pipeline_error(format!(
                    "pipe arguments must be a sequence (step '{method}')"
                )))
            }
        };
        Ok(Self { method, args })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn pipeline_error(message: impl Into<String>) -> TslError {
    TslError::Validation {
        field: Some("pipeline".into()),
        value: None,
        message: message.into(),
    }
}

/// Parse a YAML list of pipes. An empty document is an empty pipeline.
pub fn parse_pipes(yaml: &str) -> Result<Vec<Pipe>> {
    let value: Value = serde_yaml::from_str(yaml)
        .map_err(|e| pipeline_error(format!("failed to parse pipeline YAML: {e}")))?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items.iter().map(Pipe::from_value).collect(),
        _ => Err(pipeline_error("pipeline must be a sequence of steps")),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ordered list of pipes plus the collaborators steps use.
pub struct Pipeline {
    pub pipes: Vec<Pipe>,
    registry: Arc<StepRegistry>,
    fetcher: Arc<dyn Fetcher>,
    xslt: Arc<dyn XsltProcessor>,
    stylesheets: Arc<StylesheetCache>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    pkcs11: Option<Arc<dyn Pkcs11Provider>>,
    transform_workers: usize,
}

impl Pipeline {
    /// A pipeline with the default registry and collaborators.
    pub fn new(pipes: Vec<Pipe>) -> Self {
        PipelineBuilder::new(pipes).build()
    }

    pub fn builder(pipes: Vec<Pipe>) -> PipelineBuilder {
        PipelineBuilder::new(pipes)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(Self::new(parse_pipes(yaml)?))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn xslt(&self) -> &Arc<dyn XsltProcessor> {
        &self.xslt
    }

    pub fn stylesheets(&self) -> &StylesheetCache {
        &self.stylesheets
    }

    pub fn verifier(&self) -> Option<&dyn SignatureVerifier> {
        self.verifier.as_deref()
    }

    pub fn pkcs11(&self) -> Option<&dyn Pkcs11Provider> {
        self.pkcs11.as_deref()
    }

    pub fn transform_workers(&self) -> usize {
        self.transform_workers
    }

    /// Run every pipe in order against `ctx`.
    ///
    /// Stops at the first failure and returns it wrapped in
    /// [`TslError::Step`]. `ctx` then holds the state produced by the last
    /// successful step.
    pub async fn process(&self, ctx: &mut Context) -> Result<()> {
        let total = self.pipes.len();
        for (index, pipe) in self.pipes.iter().enumerate() {
            let step_error = |source: TslError| TslError::Step {
                index,
                name: pipe.method.clone(),
                args: pipe.args.clone(),
                source: Box::new(source),
            };

            let handler = self
                .registry
                .get(&pipe.method)
                .ok_or_else(|| step_error(TslError::StepNotFound(pipe.method.clone())))?;

            info!(step = index, total, name = %pipe.method, "Running pipeline step");
            let last_good = ctx.clone();
            if let Err(e) = handler.execute(self, ctx, &pipe.args).await {
                *ctx = last_good;
                error!(step = index, name = %pipe.method, error = %e, "Pipeline step failed");
                return Err(step_error(e));
            }
            debug!(step = index, name = %pipe.method, "Pipeline step completed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipes", &self.pipes)
            .field("registry", &self.registry)
            .field("transform_workers", &self.transform_workers)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Assembles a [`Pipeline`] with injected collaborators.
pub struct PipelineBuilder {
    pipes: Vec<Pipe>,
    registry: Option<StepRegistry>,
    fetcher: Option<Arc<dyn Fetcher>>,
    xslt: Option<Arc<dyn XsltProcessor>>,
    stylesheets: Option<Arc<StylesheetCache>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    pkcs11: Option<Arc<dyn Pkcs11Provider>>,
    transform_workers: usize,
}

impl PipelineBuilder {
    pub fn new(pipes: Vec<Pipe>) -> Self {
        Self {
            pipes,
            registry: None,
            fetcher: None,
            xslt: None,
            stylesheets: None,
            verifier: None,
            pkcs11: None,
            transform_workers: DEFAULT_WORKERS,
        }
    }

    pub fn registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn xslt(mut self, xslt: Arc<dyn XsltProcessor>) -> Self {
        self.xslt = Some(xslt);
        self
    }

    pub fn stylesheets(mut self, cache: Arc<StylesheetCache>) -> Self {
        self.stylesheets = Some(cache);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn pkcs11(mut self, provider: Arc<dyn Pkcs11Provider>) -> Self {
        self.pkcs11 = Some(provider);
        self
    }

    /// Worker count for `transform`; clamped to at least one.
    pub fn transform_workers(mut self, workers: usize) -> Self {
        self.transform_workers = workers.max(1);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            pipes: self.pipes,
            registry: Arc::new(self.registry.unwrap_or_else(default_registry)),
            fetcher: self.fetcher.unwrap_or_else(|| Arc::new(HttpFetcher::new())),
            xslt: self
                .xslt
                .unwrap_or_else(|| Arc::new(XsltprocProcessor::default())),
            stylesheets: self.stylesheets.unwrap_or_default(),
            verifier: self.verifier,
            pkcs11: self.pkcs11,
            transform_workers: self.transform_workers,
        }
    }
}
