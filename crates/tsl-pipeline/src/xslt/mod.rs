//! XSLT support: the processor seam, built-in stylesheets, the stylesheet
//! cache, and the worker pool that fans transforms out over documents.

pub mod cache;
pub mod embedded;
pub mod pool;

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tsl_types::{Result, TslError};

pub use cache::{cache_key, StylesheetCache};
pub use pool::{collect_outputs, transform_all, DEFAULT_WORKERS, MAX_WORKERS};

/// Applies a stylesheet to one document.
#[async_trait]
pub trait XsltProcessor: Send + Sync {
    async fn transform(&self, stylesheet: &[u8], document: &[u8]) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// XsltprocProcessor: runs the libxslt `xsltproc` binary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct XsltprocProcessor {
    pub program: String,
    pub timeout: Duration,
}

impl Default for XsltprocProcessor {
    fn default() -> Self {
        Self {
            program: "xsltproc".into(),
            timeout: Duration::from_secs(120),
        }
    }
}

fn temp_file(contents: &[u8], suffix: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("tsl-xslt-")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

#[async_trait]
impl XsltProcessor for XsltprocProcessor {
    async fn transform(&self, stylesheet: &[u8], document: &[u8]) -> Result<Vec<u8>> {
        let style_file = temp_file(stylesheet, ".xslt")?;
        let doc_file = temp_file(document, ".xml")?;

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("--nonet")
            .arg(style_file.path())
            .arg(doc_file.path());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        // A timed-out transform drops the child; it must not outlive us.
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| TslError::Other(format!("failed to spawn {}: {e}", self.program)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                TslError::Other(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| TslError::Other(format!("{} failed: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TslError::Other(format!(
                "{} exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}
