//! Shared types for the TSL pipeline crates.
//!
//! - `TslError`: unified error taxonomy for loading, selecting, transforming
//!   and publishing trust status lists
//! - `ErrorKind`: coarse classification used by callers and the CLI
//! - [`duration`]: Compound duration strings (`30s`, `1m30s`, `250ms`)
//! - [`args`]: `key:value` step-argument helpers

pub mod args;
pub mod duration;

use std::path::PathBuf;

pub use args::{is_truthy, split_option};
pub use duration::parse_duration;

/// Boxed error used for causes that come from outside the workspace
/// (HTTP clients, XML codecs, crypto backends).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for all TSL subsystems.
#[derive(Debug, thiserror::Error)]
pub enum TslError {
    // === Configuration / validation ===
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("validation error{}", validation_detail(.field, .value, .message))]
    Validation {
        field: Option<String>,
        value: Option<String>,
        message: String,
    },

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    // === Pipeline ===
    #[error("unknown pipeline step '{0}': not found in registry")]
    StepNotFound(String),

    #[error("step {index} ({name}) failed with arguments {args:?}: {source}")]
    Step {
        index: usize,
        name: String,
        args: Vec<String>,
        #[source]
        source: Box<TslError>,
    },

    // === Resolution ===
    #[error("no TSLs loaded")]
    NoTslsLoaded,

    #[error("no TSLs to {0}")]
    NothingTo(String),

    #[error("failed to load TSL from {url}{}", reason_suffix(.reason))]
    Load {
        url: String,
        reason: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("XML error: {0}")]
    Xml(String),

    // === Transformation ===
    #[error("XSLT stylesheet not found: {0}")]
    StylesheetNotFound(String),

    #[error("XSLT transformation failed for TSL {index} using {stylesheet}: {message}")]
    Transform {
        stylesheet: String,
        index: usize,
        message: String,
    },

    #[error("XSLT transformation failed for {} of {total} TSL(s) using {stylesheet}", .failures.len())]
    TransformBatch {
        stylesheet: String,
        total: usize,
        failures: Vec<TslError>,
    },

    // === Publishing / certificates ===
    #[error("failed to publish {count} TSL(s) to {}: {source}", .path.display())]
    Publish {
        path: PathBuf,
        count: usize,
        #[source]
        source: Box<TslError>,
    },

    #[error("failed to {operation} certificate{}: {message}", subject_suffix(.subject))]
    Certificate {
        operation: String,
        subject: Option<String>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("failed to sign TSL: {operation}{}{}", path_suffix(.path), cause_suffix(.source))]
    Signing {
        operation: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("failed to read {what} {}: {source}", .path.display())]
    Read {
        what: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

fn validation_detail(field: &Option<String>, value: &Option<String>, message: &str) -> String {
    match (field, value) {
        (Some(f), Some(v)) => format!(" for {f} (value '{v}'): {message}"),
        (Some(f), None) => format!(" for {f}: {message}"),
        _ => format!(": {message}"),
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
}

fn subject_suffix(subject: &Option<String>) -> String {
    subject.as_ref().map(|s| format!(" for {s}")).unwrap_or_default()
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

fn cause_suffix(source: &Option<BoxError>) -> String {
    source.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
}

/// Coarse classification of a [`TslError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments, missing inputs, invalid paths. Never retried.
    Configuration,
    /// Fetch, parse, or signature failures while resolving documents.
    Resolution,
    /// Missing stylesheets or failed transform executions.
    Transformation,
    /// Output, certificate, or signing failures.
    Publish,
    /// Engine-level failures such as an unknown step.
    Pipeline,
    /// Anything else: IO and codec plumbing.
    Internal,
}

impl TslError {
    /// Build a [`TslError::Load`] carrying only a human-readable reason.
    pub fn load(url: impl Into<String>, reason: impl Into<String>) -> Self {
        TslError::Load {
            url: url.into(),
            reason: Some(reason.into()),
            source: None,
        }
    }

    /// Build a [`TslError::Signing`] with no path or underlying cause.
    pub fn signing(operation: impl Into<String>) -> Self {
        TslError::Signing {
            operation: operation.into(),
            path: None,
            source: None,
        }
    }

    /// Build a [`TslError::Signing`] wrapping `source`, optionally naming the
    /// file involved.
    pub fn signing_failed(
        operation: impl Into<String>,
        path: Option<&std::path::Path>,
        source: impl Into<BoxError>,
    ) -> Self {
        TslError::Signing {
            operation: operation.into(),
            path: path.map(std::path::Path::to_path_buf),
            source: Some(source.into()),
        }
    }

    /// Build a [`TslError::Certificate`] wrapping `source`.
    pub fn certificate(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        TslError::Certificate {
            operation: operation.into(),
            subject: None,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Attach the file or subject a certificate error refers to. Other
    /// errors are returned unchanged.
    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        match self {
            TslError::Certificate {
                operation,
                message,
                source,
                ..
            } => TslError::Certificate {
                operation,
                subject: Some(subject.into()),
                message,
                source,
            },
            other => other,
        }
    }

    /// Build a [`TslError::Validation`] for a named field.
    pub fn validation(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        TslError::Validation {
            field: Some(field.into()),
            value: Some(value.into()),
            message: message.into(),
        }
    }

    /// Classify the error. Step errors take the kind of the failure they wrap.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TslError::InvalidArguments(_)
            | TslError::MissingArgument(_)
            | TslError::Validation { .. }
            | TslError::NotADirectory(_)
            | TslError::Read { .. } => ErrorKind::Configuration,
            TslError::StepNotFound(_) => ErrorKind::Pipeline,
            TslError::Step { source, .. } => source.kind(),
            TslError::NoTslsLoaded
            | TslError::NothingTo(_)
            | TslError::Load { .. }
            | TslError::Xml(_) => ErrorKind::Resolution,
            TslError::StylesheetNotFound(_)
            | TslError::Transform { .. }
            | TslError::TransformBatch { .. } => ErrorKind::Transformation,
            TslError::Publish { .. }
            | TslError::Certificate { .. }
            | TslError::Signing { .. } => ErrorKind::Publish,
            TslError::Io(_) | TslError::Yaml(_) | TslError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Step index and name when this error was raised by the pipeline engine.
    pub fn step(&self) -> Option<(usize, &str)> {
        match self {
            TslError::Step { index, name, .. } => Some((*index, name.as_str())),
            _ => None,
        }
    }

    /// Innermost [`TslError`] behind any step or publish wrappers.
    pub fn root(&self) -> &TslError {
        match self {
            TslError::Step { source, .. } | TslError::Publish { source, .. } => source.root(),
            other => other,
        }
    }
}

/// A convenience alias for `Result<T, TslError>`.
pub type Result<T> = std::result::Result<T, TslError>;
