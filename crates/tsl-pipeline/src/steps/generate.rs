use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use tsl_model::{
    Certificate, DigitalIdentity, DigitalIdentityList, InternationalNames, LocalizedName,
    NextUpdate, SchemeInformation, ServiceInformation, TrustServiceProvider,
    TrustServiceProviderList, TrustStatusList, Tsl, TspInformation, TspService, TspServices,
    UriList,
};
use tsl_types::{Result, TslError};

use crate::context::Context;
use crate::engine::Pipeline;
use crate::registry::StepHandler;

/// `generate <root>`: build a TSL from a directory of YAML metadata and PEM
/// certificates.
///
/// ```text
/// root/
///   scheme.yaml
///   providers/
///     <provider>/
///       provider.yaml
///       cert1.pem
///       cert1.yaml
/// ```
pub struct GenerateStep;

const SCHEME_FILE: &str = "scheme.yaml";
const PROVIDERS_DIR: &str = "providers";
const PROVIDER_FILE: &str = "provider.yaml";
const TSL_VERSION: u32 = 5;

// ---------------------------------------------------------------------------
// Metadata files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Name {
    pub language: String,
    pub value: String,
}

fn to_names(names: &[Name]) -> InternationalNames {
    InternationalNames {
        names: names
            .iter()
            .map(|n| LocalizedName::new(n.language.as_str(), n.value.as_str()))
            .collect(),
    }
}

/// `scheme.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemeMetadata {
    pub operator_names: Vec<Name>,
    #[serde(rename = "type")]
    pub tsl_type: Option<String>,
    pub territory: Option<String>,
    pub sequence_number: Option<u64>,
    pub scheme_names: Vec<Name>,
    pub distribution_points: Vec<String>,
    /// Days between issue and the advertised next update.
    pub next_update_days: Option<i64>,
}

/// `providers/<p>/provider.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderMetadata {
    pub names: Vec<Name>,
    pub trade_names: Vec<Name>,
}

/// `providers/<p>/<cert>.yaml`, paired with `<cert>.pem`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceMetadata {
    pub service_names: Vec<Name>,
    pub service_type: String,
    pub status: String,
    pub status_starting_time: Option<String>,
}

fn read_file(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| read_error(what, path, source))
}

fn read_error(what: &str, path: &Path, source: std::io::Error) -> TslError {
    TslError::Read {
        what: what.into(),
        path: path.to_path_buf(),
        source,
    }
}

fn parse_yaml<T>(text: &str, path: &Path, what: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    // An empty or comment-only document parses as null.
    if text.lines().all(|l| l.trim().is_empty() || l.trim_start().starts_with('#')) {
        return Ok(T::default());
    }
    serde_yaml::from_str(text).map_err(|e| TslError::Validation {
        field: Some(path.display().to_string()),
        value: None,
        message: format!("failed to parse {what}: {e}"),
    })
}

fn required(field: &str, message: &str) -> TslError {
    TslError::Validation {
        field: Some(field.into()),
        value: None,
        message: message.into(),
    }
}

fn sorted_entries(dir: &Path, what: &str) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(|source| read_error(what, dir, source))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

fn load_scheme(root: &Path, now: DateTime<Utc>) -> Result<SchemeInformation> {
    let path = root.join(SCHEME_FILE);
    let meta: SchemeMetadata = parse_yaml(&read_file(&path, "scheme metadata")?, &path, "scheme metadata")?;
    if meta.operator_names.is_empty() {
        return Err(required(
            "operatorNames",
            "scheme metadata must include at least one operator name",
        ));
    }

    let next_update = meta.next_update_days.map(|days| NextUpdate {
        date_time: Some(format_time(now + Duration::days(days))),
    });
    Ok(SchemeInformation {
        version_identifier: Some(TSL_VERSION),
        sequence_number: Some(meta.sequence_number.unwrap_or(1)),
        tsl_type: meta.tsl_type,
        operator_name: Some(to_names(&meta.operator_names)),
        scheme_name: (!meta.scheme_names.is_empty()).then(|| to_names(&meta.scheme_names)),
        territory: meta.territory,
        issue_date_time: Some(format_time(now)),
        next_update,
        distribution_points: (!meta.distribution_points.is_empty()).then(|| UriList {
            uris: meta.distribution_points,
        }),
        ..Default::default()
    })
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn load_service(pem_path: &Path) -> Result<TspService> {
    let meta_path = pem_path.with_extension("yaml");
    let meta: ServiceMetadata = parse_yaml(
        &read_file(&meta_path, "certificate metadata")?,
        &meta_path,
        "certificate metadata",
    )?;
    if meta.service_names.is_empty() {
        return Err(required(
            "serviceNames",
            "certificate metadata must include at least one service name",
        ));
    }

    let pem = std::fs::read(pem_path).map_err(|source| read_error("certificate", pem_path, source))?;
    let certificate = Certificate::from_pem(&pem)
        .map_err(|e| e.with_subject(pem_path.display().to_string()))?;
    debug!(path = %pem_path.display(), subject = certificate.subject(), "Added service certificate");

    Ok(TspService {
        information: Some(ServiceInformation {
            service_type: meta.service_type,
            name: Some(to_names(&meta.service_names)),
            digital_identity: Some(DigitalIdentityList {
                digital_ids: vec![DigitalIdentity {
                    x509_certificate: Some(certificate.to_base64()),
                    ..Default::default()
                }],
            }),
            status: meta.status,
            status_starting_time: meta.status_starting_time,
        }),
    })
}

fn load_provider(dir: &Path) -> Result<TrustServiceProvider> {
    let path = dir.join(PROVIDER_FILE);
    let meta: ProviderMetadata =
        parse_yaml(&read_file(&path, "provider metadata")?, &path, "provider metadata")?;

    let services = sorted_entries(dir, "provider directory")?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "pem"))
        .map(|p| load_service(&p))
        .collect::<Result<Vec<_>>>()?;

    let names = if meta.names.is_empty() {
        let fallback = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        InternationalNames::english(fallback)
    } else {
        to_names(&meta.names)
    };
    Ok(TrustServiceProvider {
        information: Some(TspInformation {
            name: Some(names),
            trade_name: (!meta.trade_names.is_empty()).then(|| to_names(&meta.trade_names)),
        }),
        services: Some(TspServices { services }),
    })
}

/// Build a trust status list from the directory layout under `root`.
pub fn generate_tsl(root: &Path, now: DateTime<Utc>) -> Result<TrustStatusList> {
    let provider_dirs: Vec<PathBuf> = sorted_entries(&root.join(PROVIDERS_DIR), "providers directory")?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    let scheme = load_scheme(root, now)?;
    let providers = provider_dirs
        .iter()
        .map(|dir| load_provider(dir))
        .collect::<Result<Vec<_>>>()?;

    Ok(TrustStatusList {
        scheme_information: Some(scheme),
        provider_list: Some(TrustServiceProviderList { providers }),
        ..Default::default()
    })
}

#[async_trait]
impl StepHandler for GenerateStep {
    fn step_name(&self) -> &str {
        "generate"
    }

    async fn execute(&self, _pipeline: &Pipeline, ctx: &mut Context, args: &[String]) -> Result<()> {
        let root = args
            .first()
            .ok_or_else(|| TslError::MissingArgument("TSL root directory".into()))?;
        let status_list = generate_tsl(Path::new(root), Utc::now())?;
        let tsl = Tsl::new(root.clone(), status_list);
        info!(
            root = %root,
            providers = tsl.provider_count(),
            services = tsl.service_count(),
            "Generated TSL"
        );
        ctx.add_document(Some(Arc::new(tsl)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tsl_model::ServicePolicy;

    use crate::steps::test_support::{args, pipeline};

    const CERT_PEM: &str = include_str!("../../tests/fixtures/anchor-dk.pem");
    const SCHEME: &str = "operatorNames:\n  - language: en\n    value: \"Test Operator\"\ntype: \"http://test.example.com/tsl-type\"\n";

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn provider(root: &Path, cert: &str) {
        let dir = root.join("providers").join("test_provider");
        write(&dir.join("provider.yaml"), "names:\n  - language: en\n    value: \"Test Provider\"\n");
        write(&dir.join("cert1.pem"), cert);
        write(
            &dir.join("cert1.yaml"),
            "serviceNames:\n  - language: en\n    value: \"Test Service\"\nserviceType: \"http://uri.etsi.org/TrstSvc/Svctype/CA/QC\"\nstatus: \"http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/granted\"\n",
        );
    }

    fn generate_err(root: &Path) -> String {
        generate_tsl(root, Utc::now()).unwrap_err().to_string()
    }

    #[test]
    fn error_cases() {
        assert!(generate_err(Path::new("/nonexistent/directory"))
            .contains("failed to read providers directory"));

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("providers")).unwrap();
        assert!(generate_err(root).contains("failed to read scheme metadata"));

        write(&root.join("scheme.yaml"), "invalid_yaml: [");
        assert!(generate_err(root).contains("failed to parse scheme metadata"));

        write(&root.join("scheme.yaml"), "# Empty file");
        assert!(generate_err(root).contains("scheme metadata must include at least one operator name"));

        write(&root.join("scheme.yaml"), SCHEME);
        write(&root.join("providers/test_provider/provider.yaml"), "invalid_yaml: [");
        assert!(generate_err(root).contains("failed to parse provider metadata"));

        provider(root, "INVALID_CERTIFICATE_DATA");
        assert!(generate_err(root).contains("failed to decode"));

        std::fs::remove_file(root.join("providers/test_provider/cert1.yaml")).unwrap();
        assert!(generate_err(root).contains("failed to read certificate metadata"));

        write(&root.join("providers/test_provider/cert1.yaml"), "serviceType: x\n");
        assert!(generate_err(root)
            .contains("certificate metadata must include at least one service name"));
    }

    #[test]
    fn read_and_certificate_errors_carry_path_and_cause() {
        use std::error::Error as _;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("providers")).unwrap();
        let err = generate_tsl(root, Utc::now()).unwrap_err();
        assert!(matches!(err, TslError::Read { .. }));
        assert!(err.to_string().contains(&root.join("scheme.yaml").display().to_string()));
        assert!(err.source().is_some());

        write(&root.join("scheme.yaml"), SCHEME);
        provider(root, "INVALID_CERTIFICATE_DATA");
        let err = generate_tsl(root, Utc::now()).unwrap_err();
        let pem_path = root.join("providers/test_provider/cert1.pem");
        assert!(matches!(err, TslError::Certificate { .. }));
        assert!(err.to_string().contains(&pem_path.display().to_string()));
        assert!(err.source().is_some());
    }

    #[test]
    fn builds_scheme_and_services() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(
            &root.join("scheme.yaml"),
            &format!("{SCHEME}territory: DK\nsequenceNumber: 7\ndistributionPoints:\n  - https://example.com/dk.xml\nnextUpdateDays: 30\n"),
        );
        provider(root, CERT_PEM);

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let tsl = Tsl::new("gen", generate_tsl(root, now).unwrap());
        assert_eq!(tsl.territory(), Some("DK"));
        assert_eq!(tsl.sequence_number(), Some(7));
        assert_eq!(tsl.tsl_type(), Some("http://test.example.com/tsl-type"));
        assert_eq!(tsl.operator_name("en"), Some("Test Operator"));
        assert_eq!(tsl.issue_date_time(), Some("2024-01-01T12:00:00Z"));
        assert_eq!(tsl.next_update(), Some("2024-01-31T12:00:00Z"));
        assert_eq!(tsl.distribution_points(), ["https://example.com/dk.xml"]);
        assert_eq!(tsl.providers()[0].name("en"), Some("Test Provider"));

        let mut pool = tsl_model::CertPool::new();
        assert_eq!(tsl.collect_certificates(&ServicePolicy::default(), &mut pool), 1);
        assert!(pool.subjects()[0].contains("Second Anchor"));
    }

    #[tokio::test]
    async fn step_adds_generated_document() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("scheme.yaml"), SCHEME);
        provider(tmp.path(), CERT_PEM);

        let mut ctx = Context::new();
        let root = tmp.path().to_string_lossy().into_owned();
        GenerateStep
            .execute(&pipeline(), &mut ctx, &args(&[&root]))
            .await
            .unwrap();
        assert_eq!(ctx.trees.len(), 1);
        assert_eq!(ctx.documents()[0].service_count(), 1);

        let err = GenerateStep.execute(&pipeline(), &mut ctx, &[]).await.unwrap_err();
        assert!(matches!(err, TslError::MissingArgument(_)));
    }
}
