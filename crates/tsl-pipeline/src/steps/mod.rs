//! Built-in pipeline steps.

pub mod fetch_options;
pub mod generate;
pub mod index;
pub mod load;
pub mod publish;
pub mod select;
pub mod transform;

pub use fetch_options::SetFetchOptionsStep;
pub use generate::GenerateStep;
pub use index::GenerateIndexStep;
pub use load::LoadStep;
pub use publish::PublishStep;
pub use select::SelectStep;
pub use transform::TransformStep;

use async_trait::async_trait;
use tsl_types::Result;

use crate::context::Context;
use crate::engine::Pipeline;
use crate::registry::StepHandler;

// ---------------------------------------------------------------------------
// LogStep: emits a message through tracing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Unknown names fall back to `Info`.
    fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// A parsed `log` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogLine {
    /// `args[0]` is the message, optionally prefixed by `level=<lvl> `.
    /// The remaining arguments are `key=value` fields; anything else is
    /// dropped.
    pub fn parse(args: &[String]) -> Option<Self> {
        let (first, rest) = args.split_first()?;
        let (level, message) = match first.strip_prefix("level=") {
            Some(tail) => {
                let (name, message) = tail.split_once(' ').unwrap_or((tail, ""));
                (LogLevel::parse(name), message.trim().to_string())
            }
            None => (LogLevel::Info, first.clone()),
        };
        let fields = rest
            .iter()
            .filter_map(|field| {
                let parsed = field.split_once('=');
                if parsed.is_none() {
                    tracing::debug!(field = %field, "Ignoring log field without '='");
                }
                parsed.map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        Some(Self {
            level,
            message,
            fields,
        })
    }

    fn fields_text(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct LogStep;

#[async_trait]
impl StepHandler for LogStep {
    fn step_name(&self) -> &str {
        "log"
    }

    async fn execute(&self, _pipeline: &Pipeline, _ctx: &mut Context, args: &[String]) -> Result<()> {
        let Some(line) = LogLine::parse(args) else {
            return Ok(());
        };
        let fields = line.fields_text();
        let message = &line.message;
        match line.level {
            LogLevel::Debug => tracing::debug!(target: "tsl_pipeline::log", fields = %fields, "{message}"),
            LogLevel::Info => tracing::info!(target: "tsl_pipeline::log", fields = %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "tsl_pipeline::log", fields = %fields, "{message}"),
            LogLevel::Error => tracing::error!(target: "tsl_pipeline::log", fields = %fields, "{message}"),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EchoStep: accepts and ignores its arguments
// ---------------------------------------------------------------------------

pub struct EchoStep;

#[async_trait]
impl StepHandler for EchoStep {
    fn step_name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, _pipeline: &Pipeline, _ctx: &mut Context, args: &[String]) -> Result<()> {
        tracing::debug!(args = ?args, "echo");
        Ok(())
    }
}

/// Shared by the steps' unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tsl_model::{
        DigitalIdentity, DigitalIdentityList, InternationalNames, SchemeInformation,
        ServiceInformation, TrustServiceProvider, TrustServiceProviderList, TrustStatusList, Tsl,
        TspInformation, TspService, TspServices, UriList, STATUS_GRANTED,
    };
    use tsl_types::{Result, TslError};

    use crate::engine::Pipeline;
    use crate::fetch::{FetchOptions, Fetcher};
    use crate::xslt::XsltProcessor;

    pub const ANCHOR_SE: &str = include_str!("../../tests/fixtures/anchor-se.b64");
    pub const ANCHOR_DK: &str = include_str!("../../tests/fixtures/anchor-dk.b64");
    pub const ANCHOR_FI: &str = include_str!("../../tests/fixtures/anchor-fi.b64");

    pub fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// A one-provider, one-service document.
    pub fn tsl(territory: &str, status: &str, certificate: &str) -> Tsl {
        let service = ServiceInformation {
            service_type: "http://uri.etsi.org/TrstSvc/Svctype/CA/QC".into(),
            name: Some(InternationalNames::english(format!("{territory} CA"))),
            digital_identity: Some(DigitalIdentityList {
                digital_ids: vec![DigitalIdentity {
                    x509_certificate: Some(certificate.to_string()),
                    ..Default::default()
                }],
            }),
            status: status.into(),
            status_starting_time: None,
        };
        let status_list = TrustStatusList {
            scheme_information: Some(SchemeInformation {
                territory: Some(territory.into()),
                sequence_number: Some(1),
                operator_name: Some(InternationalNames::english(format!("{territory} operator"))),
                distribution_points: Some(UriList {
                    uris: vec![format!("https://example.com/{territory}-TL.xml")],
                }),
                ..Default::default()
            }),
            provider_list: Some(TrustServiceProviderList {
                providers: vec![TrustServiceProvider {
                    information: Some(TspInformation {
                        name: Some(InternationalNames::english(format!("{territory} provider"))),
                        ..Default::default()
                    }),
                    services: Some(TspServices {
                        services: vec![TspService {
                            information: Some(service),
                        }],
                    }),
                }],
            }),
            ..Default::default()
        };
        Tsl::new(format!("{territory}.xml"), status_list)
    }

    pub fn granted(territory: &str) -> Arc<Tsl> {
        Arc::new(tsl(territory, STATUS_GRANTED, ANCHOR_SE))
    }

    /// Serves fixed bodies keyed by URL.
    #[derive(Default)]
    pub struct MapFetcher(pub HashMap<String, Vec<u8>>);

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str, _: &FetchOptions, _: &[String]) -> Result<Vec<u8>> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| TslError::load(url, "HTTP 404"))
        }
    }

    /// Wraps each document in `<out>` without running a real XSLT engine.
    pub struct WrapXslt;

    #[async_trait]
    impl XsltProcessor for WrapXslt {
        async fn transform(&self, _stylesheet: &[u8], document: &[u8]) -> Result<Vec<u8>> {
            let mut out = b"<out>".to_vec();
            out.extend_from_slice(document);
            out.extend_from_slice(b"</out>");
            Ok(out)
        }
    }

    pub fn pipeline() -> Pipeline {
        Pipeline::builder(Vec::new())
            .fetcher(Arc::new(MapFetcher::default()))
            .xslt(Arc::new(WrapXslt))
            .build()
    }
}
