use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use tsl_model::Tsl;
use tsl_types::{Result, TslError};

use crate::context::Context;
use crate::engine::Pipeline;
use crate::registry::StepHandler;
use crate::xslt::pool::{collect_outputs, transform_all};

/// `transform <stylesheet> <replace|outdir> [ext]`: apply an XSLT to every
/// loaded document.
///
/// `replace` parses each output back into a TSL and swaps the context's
/// documents for them, keeping each reference tree's shape. Any other
/// second argument is an output directory receiving one `<basename>.<ext>`
/// file per document.
pub struct TransformStep;

/// Where transformed output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutput {
    Replace,
    Directory { path: PathBuf, extension: String },
}

impl TransformOutput {
    fn parse(target: &str, extension: Option<&String>) -> Self {
        if target == "replace" {
            return TransformOutput::Replace;
        }
        let extension = extension
            .map(|e| e.trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "xml".to_string());
        TransformOutput::Directory {
            path: PathBuf::from(target),
            extension,
        }
    }
}

/// Output file stem for the document at `index`: the last segment of its
/// first distribution point without extension, else `tsl-<index>`.
pub fn output_basename(tsl: &Tsl, index: usize) -> String {
    tsl.distribution_points()
        .first()
        .and_then(|uri| uri.trim_end_matches('/').rsplit('/').next())
        .and_then(|file| Path::new(file).file_stem())
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("tsl-{index}"))
}

#[async_trait]
impl StepHandler for TransformStep {
    fn step_name(&self) -> &str {
        "transform"
    }

    async fn execute(&self, pipeline: &Pipeline, ctx: &mut Context, args: &[String]) -> Result<()> {
        let [reference, target, rest @ ..] = args else {
            return Err(TslError::InvalidArguments(
                "missing required arguments: stylesheet and output mode".into(),
            ));
        };
        let output = TransformOutput::parse(target, rest.first());

        let stylesheet = pipeline.stylesheets().load(reference).await?;

        let documents = ctx.documents();
        if documents.is_empty() {
            return Err(TslError::NothingTo("transform".into()));
        }

        let inputs = documents
            .iter()
            .map(|tsl| tsl.to_xml_bytes())
            .collect::<Result<Vec<_>>>()?;
        let results = transform_all(
            Arc::clone(pipeline.xslt()),
            stylesheet,
            reference,
            inputs,
            pipeline.transform_workers(),
        )
        .await;

        match output {
            TransformOutput::Replace => {
                let outputs = collect_outputs(reference, results)?;
                let replaced = documents
                    .iter()
                    .zip(outputs)
                    .enumerate()
                    .map(|(index, (original, bytes))| {
                        Tsl::from_bytes(original.source.clone(), bytes)
                            .map(Arc::new)
                            .map_err(|e| TslError::Transform {
                                stylesheet: reference.clone(),
                                index,
                                message: format!("output is not a TSL: {e}"),
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                info!(stylesheet = %reference, documents = replaced.len(), "Replaced TSLs with transform output");
                ctx.replace_documents(replaced);
                Ok(())
            }
            TransformOutput::Directory { path, extension } => {
                std::fs::create_dir_all(&path)?;
                let total = results.len();
                let mut written = 0;
                let mut failures = Vec::new();
                for (index, (tsl, result)) in documents.iter().zip(results).enumerate() {
                    match result {
                        Ok(bytes) => {
                            let file = path.join(format!("{}.{extension}", output_basename(tsl, index)));
                            std::fs::write(&file, bytes)?;
                            written += 1;
                        }
                        Err(e) => {
                            warn!(index, source = %tsl.source, "No output written for failed transform");
                            failures.push(e);
                        }
                    }
                }
                info!(
                    stylesheet = %reference,
                    dir = %path.display(),
                    written,
                    failed = failures.len(),
                    "Wrote transform output"
                );
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(TslError::TransformBatch {
                        stylesheet: reference.clone(),
                        total,
                        failures,
                    })
                }
            }
        }
    }
}
