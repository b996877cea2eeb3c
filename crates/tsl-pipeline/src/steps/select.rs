use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use tsl_model::{CertPool, ServicePolicy, StatusLogic, Tsl};
use tsl_types::{split_option, Result, TslError};

use crate::context::Context;
use crate::engine::Pipeline;
use crate::registry::StepHandler;
use crate::tree::TslTree;

/// `select`: build the certificate pool from the loaded documents.
///
/// Filters: `service-type:<substr>` (repeatable, OR'ed), `status:<value>`
/// (repeatable), `status-logic:and|or`, `reference-depth:<N>` and the legacy
/// `include-referenced` flag.
pub struct SelectStep;

/// How far below each root document selection reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceDepth {
    /// Every document the context already holds.
    #[default]
    AsLoaded,
    /// Roots expanded to at most this many levels.
    Levels(usize),
    /// Roots expanded through every resolved reference.
    Unlimited,
}

/// Parsed `select` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub policy: ServicePolicy,
    pub depth: ReferenceDepth,
}

impl Selection {
    /// Parse filter tokens. Bad `reference-depth` or `status-logic` values
    /// are logged and replaced by their defaults.
    pub fn parse(args: &[String]) -> Self {
        let mut service_types = Vec::new();
        let mut statuses = Vec::new();
        let mut status_logic = StatusLogic::default();
        let mut depth = ReferenceDepth::default();

        for arg in args {
            if arg == "include-referenced" {
                depth = ReferenceDepth::Unlimited;
                continue;
            }
            match split_option(arg) {
                Some(("service-type", value)) => service_types.push(value.to_string()),
                Some(("status", value)) => statuses.push(value.to_string()),
                Some(("status-logic", value)) => match value.parse() {
                    Ok(logic) => status_logic = logic,
                    Err(e) => warn!(value = %value, error = %e, "Invalid status-logic, using OR"),
                },
                Some(("reference-depth", value)) => match value.trim().parse::<usize>() {
                    Ok(levels) => depth = ReferenceDepth::Levels(levels),
                    Err(_) => warn!(
                        value = %value,
                        "Invalid reference-depth, using the loaded documents"
                    ),
                },
                _ => warn!(filter = %arg, "Ignoring unknown select filter"),
            }
        }

        let mut policy = ServicePolicy {
            service_types,
            status_logic,
            ..Default::default()
        };
        if !statuses.is_empty() {
            policy.statuses = statuses;
        }
        Self { policy, depth }
    }

    /// Documents to select from. Trees are re-expanded without touching the
    /// context.
    pub fn documents(&self, ctx: &Context) -> Vec<Arc<Tsl>> {
        let limit = match self.depth {
            ReferenceDepth::AsLoaded => return ctx.documents(),
            ReferenceDepth::Levels(levels) => Some(levels),
            ReferenceDepth::Unlimited => None,
        };
        roots(ctx)
            .into_iter()
            .flat_map(|root| TslTree::new(Some(root)).flatten(limit))
            .collect()
    }
}

fn roots(ctx: &Context) -> Vec<Arc<Tsl>> {
    if ctx.trees.iter().any(|t| !t.is_empty()) {
        ctx.trees
            .iter()
            .filter_map(|t| t.root_tsl().cloned())
            .collect()
    } else {
        ctx.documents()
    }
}

/// Apply `selection` to the context's documents.
pub fn select_cert_pool(ctx: &Context, selection: &Selection) -> Result<CertPool> {
    if !ctx.has_documents() {
        return Err(TslError::NoTslsLoaded);
    }
    let mut pool = CertPool::new();
    for tsl in selection.documents(ctx) {
        tsl.collect_certificates(&selection.policy, &mut pool);
    }
    Ok(pool)
}

#[async_trait]
impl StepHandler for SelectStep {
    fn step_name(&self) -> &str {
        "select"
    }

    async fn execute(&self, _pipeline: &Pipeline, ctx: &mut Context, args: &[String]) -> Result<()> {
        let selection = Selection::parse(args);
        let pool = select_cert_pool(ctx, &selection)?;
        info!(
            certificates = pool.len(),
            service_types = ?selection.policy.service_types,
            statuses = ?selection.policy.statuses,
            status_logic = %selection.policy.status_logic,
            depth = ?selection.depth,
            "Selected certificate pool"
        );
        ctx.cert_pool = Some(pool);
        Ok(())
    }
}
