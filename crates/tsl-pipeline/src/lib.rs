//! TSL pipeline engine, step handlers, and their collaborators.
//!
//! A pipeline is a YAML list of `step: [args...]` records run in order
//! against a [`Context`]. This crate implements the runner and every
//! built-in step: loading reference trees, selecting certificate pools,
//! XSLT transforms over a worker pool, publishing (optionally XML-DSig
//! signed), generating lists from metadata directories, and HTML indexes.

pub mod c14n;
pub mod context;
pub mod engine;
pub mod fetch;
pub mod registry;
pub mod resolve;
pub mod sign;
pub mod steps;
pub mod tree;
pub mod xslt;

pub use context::Context;
pub use engine::{parse_pipes, Pipe, Pipeline, PipelineBuilder};
pub use fetch::{FetchOptions, Fetcher, HttpFetcher, SignatureVerifier, TslFilters};
pub use registry::{default_registry, StepHandler, StepRegistry};
pub use resolve::Resolver;
pub use sign::{FileSigner, Pkcs11Config, Pkcs11Provider, XmlSigner};
pub use tree::{TreeNode, TslTree};
pub use xslt::{StylesheetCache, XsltProcessor, XsltprocProcessor};
