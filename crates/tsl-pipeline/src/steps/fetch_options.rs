use async_trait::async_trait;
use tracing::{debug, info};
use tsl_types::{is_truthy, parse_duration, split_option, Result, TslError};

use crate::context::Context;
use crate::engine::Pipeline;
use crate::fetch::{default_accept, FILTERS_KEY, PREFER_XML_KEY};
use crate::registry::StepHandler;

/// `set-fetch-options`: adjust the fetch policy used by later `load` steps.
///
/// Options are `key:value` tokens; unknown keys are ignored.
pub struct SetFetchOptionsStep;

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl StepHandler for SetFetchOptionsStep {
    fn step_name(&self) -> &str {
        "set-fetch-options"
    }

    async fn execute(&self, _pipeline: &Pipeline, ctx: &mut Context, args: &[String]) -> Result<()> {
        let mut filters = ctx.filters();
        let mut filters_touched = false;
        ctx.ensure_fetch_options();

        for arg in args {
            let Some((key, value)) = split_option(arg) else {
                debug!(option = %arg, "Ignoring fetch option without a value");
                continue;
            };
            match key {
                "user-agent" => ctx.ensure_fetch_options().user_agent = value.to_string(),
                "timeout" => {
                    let timeout = parse_duration(value).map_err(|e| {
                        TslError::validation("timeout", value, format!("invalid timeout: {e}"))
                    })?;
                    ctx.ensure_fetch_options().timeout = timeout;
                }
                "accept" => {
                    let accept = comma_list(value);
                    ctx.ensure_fetch_options().accept = if accept.is_empty() {
                        default_accept()
                    } else {
                        accept
                    };
                }
                "max-depth" => {
                    let depth = value.trim().parse::<i64>().map_err(|_| {
                        TslError::validation("max-depth", value, "max-depth must be an integer")
                    })?;
                    ctx.ensure_fetch_options().max_depth = depth;
                }
                "prefer-xml" => ctx.set(PREFER_XML_KEY, serde_json::json!(is_truthy(value))),
                "filter-territory" => {
                    filters_touched = true;
                    filters.territories = comma_list(value);
                }
                "filter-service-type" => {
                    filters_touched = true;
                    filters.service_types = comma_list(value);
                }
                other => debug!(option = %other, "Ignoring unknown fetch option"),
            }
        }

        if filters_touched {
            ctx.set(FILTERS_KEY, filters.to_value());
        }

        let options = ctx.fetch_options();
        info!(
            user_agent = %options.user_agent,
            timeout = ?options.timeout,
            max_depth = options.max_depth,
            accept = %options.accept.join(", "),
            "Fetch options updated"
        );
        Ok(())
    }
}
