//! `tsl-tool`: run a TSL pipeline file.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tsl_pipeline::{Context, Pipeline};

const AFTER_HELP: &str = "\
Pipeline steps:
  load               Load a TSL and the lists it points to
  set-fetch-options  Configure user agent, timeout, depth and filters
  select             Build a certificate pool from the loaded TSLs
  transform          Apply an XSLT stylesheet
  publish            Write TSLs to a directory, optionally signed
  generate           Generate a TSL from metadata files
  generate_index     Write an HTML index of transformed TSLs
  log                Emit a log message
  echo               Do nothing

Example pipeline.yaml:
  - set-fetch-options:
      - user-agent:TSL-Tool/1.0
      - timeout:60s
  - load:
      - https://ec.europa.eu/tools/lotl/eu-lotl.xml
  - select:
      - reference-depth:2
  - transform:
      - embedded:tsl-to-html.xslt
      - /var/www/html/tsl
      - html
  - generate_index:
      - /var/www/html/tsl
      - \"EU Trust Lists\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "tsl-tool",
    version,
    about = "Batch processor for ETSI TS 119 612 trust status lists",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Path to the pipeline YAML file
    pipeline: PathBuf,

    /// Logging level: debug, info, warn, error. RUST_LOG overrides it.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Logging format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Write the selected certificate pool as PEM to this file
    #[arg(long)]
    output: Option<PathBuf>,
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "fatal" => "error",
        "trace" => "trace",
        _ => {
            eprintln!("Warning: unknown log level '{level}', using 'info'");
            "info"
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(level)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn write_pool(ctx: &Context, path: &Path) -> anyhow::Result<()> {
    let Some(pool) = ctx.cert_pool.as_ref().filter(|p| !p.is_empty()) else {
        warn!(file = %path.display(), "No certificate pool was selected; nothing written");
        return Ok(());
    };
    pool.write_pem(path)
        .with_context(|| format!("failed to write certificate pool to {}", path.display()))?;
    info!(file = %path.display(), certificates = pool.len(), "Wrote certificate pool");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pipeline = %cli.pipeline.display(),
        "Starting tsl-tool"
    );

    let pipeline = Pipeline::from_file(&cli.pipeline)
        .with_context(|| format!("failed to load pipeline {}", cli.pipeline.display()))?;
    info!(steps = pipeline.pipes.len(), "Loaded pipeline");

    let mut ctx = Context::new();
    if let Err(e) = pipeline.process(&mut ctx).await {
        error!(error = %e, kind = ?e.kind(), "Pipeline processing failed");
        return Err(e.into());
    }

    info!(
        tsl_count = ctx.documents().len(),
        trees = ctx.trees.len(),
        cert_pool_exists = ctx.cert_pool.is_some(),
        "Pipeline completed successfully"
    );

    if let Some(output) = &cli.output {
        write_pool(&ctx, output)?;
    }
    Ok(())
}
