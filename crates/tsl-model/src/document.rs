use std::sync::Arc;

use serde_json::{json, Map, Value};
use tsl_types::Result;
use tracing::warn;

use crate::ast::{ServiceInformation, TrustServiceProvider, TrustStatusList};
use crate::cert::{CertPool, Certificate};
use crate::parser;
use crate::policy::ServicePolicy;


/// A resolved TSL document.
///
/// Immutable once wrapped in an [`Arc`]; `referenced` holds the documents
/// its pointers resolved to and is filled in by the resolver before wrapping.
#[derive(Debug, Clone, Default)]
pub struct Tsl {
    /// URL or path the document was loaded from.
    pub source: String,
    pub status_list: TrustStatusList,
    /// Bytes as fetched, published verbatim so existing signatures survive.
    pub raw: Option<Vec<u8>>,
    /// Whether a signature verifier accepted the enveloped signature.
    pub signed: bool,
    /// Certificate from the signature's KeyInfo.
    pub signer: Option<Certificate>,
    pub referenced: Vec<Arc<Tsl>>,
}

/// A `PointersToOtherTSL` entry flattened into the fields the resolver uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TslPointer {
    pub location: String,
    pub mime_type: Option<String>,
    pub territory: Option<String>,
    pub tsl_type: Option<String>,
}

impl TslPointer {
    /// The advertised MIME type when it names something other than XML,
    /// such as the human-readable PDF rendering of a list.
    pub fn non_xml_mime(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty() && !m.to_ascii_lowercase().contains("xml"))
    }
}

impl Tsl {
    pub fn new(source: impl Into<String>, status_list: TrustStatusList) -> Self {
        Self {
            source: source.into(),
            status_list,
            ..Default::default()
        }
    }

    /// Parse fetched bytes, keeping them for publishing. The KeyInfo
    /// certificate, when present and decodable, becomes the `signer`.
    pub fn from_bytes(source: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let status_list = parser::parse(&bytes)?;
        let signer = status_list
            .signature
            .as_ref()
            .and_then(|s| s.key_info.as_ref())
            .and_then(|k| k.x509_data.as_ref())
            .and_then(|d| d.certificates.first())
            .and_then(|c| Certificate::from_base64(c).ok());
        Ok(Self {
            source: source.into(),
            status_list,
            raw: Some(bytes),
            signed: false,
            signer,
            referenced: Vec::new(),
        })
    }

    pub fn with_referenced(mut self, referenced: Vec<Arc<Tsl>>) -> Self {
        self.referenced = referenced;
        self
    }

    /// Whether the document carries an enveloped `Signature` element.
    pub fn has_signature(&self) -> bool {
        self.status_list.signature.is_some()
    }

    pub fn territory(&self) -> Option<&str> {
        self.status_list
            .scheme_information
            .as_ref()?
            .territory
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn sequence_number(&self) -> Option<u64> {
        self.status_list.scheme_information.as_ref()?.sequence_number
    }

    pub fn tsl_type(&self) -> Option<&str> {
        self.status_list
            .scheme_information
            .as_ref()?
            .tsl_type
            .as_deref()
    }

    pub fn issue_date_time(&self) -> Option<&str> {
        self.status_list
            .scheme_information
            .as_ref()?
            .issue_date_time
            .as_deref()
    }

    pub fn next_update(&self) -> Option<&str> {
        self.status_list
            .scheme_information
            .as_ref()?
            .next_update
            .as_ref()?
            .date_time
            .as_deref()
    }

    /// Scheme operator name in `lang`, falling back to the first name given.
    pub fn operator_name(&self, lang: &str) -> Option<&str> {
        let names = self
            .status_list
            .scheme_information
            .as_ref()?
            .operator_name
            .as_ref()?;
        names
            .find(lang)
            .or_else(|| names.names.first().map(|n| n.value.as_str()))
    }

    pub fn distribution_points(&self) -> &[String] {
        self.status_list
            .scheme_information
            .as_ref()
            .and_then(|s| s.distribution_points.as_ref())
            .map(|d| d.uris.as_slice())
            .unwrap_or(&[])
    }

    /// Pointers to other TSLs, skipping entries without a location.
    pub fn pointers(&self) -> Vec<TslPointer> {
        let Some(pointers) = self
            .status_list
            .scheme_information
            .as_ref()
            .and_then(|s| s.pointers.as_ref())
        else {
            return Vec::new();
        };

        pointers
            .pointers
            .iter()
            .filter(|p| !p.location.trim().is_empty())
            .map(|p| {
                let mut pointer = TslPointer {
                    location: p.location.trim().to_string(),
                    mime_type: None,
                    territory: None,
                    tsl_type: None,
                };
                let others = p
                    .additional_information
                    .iter()
                    .flat_map(|a| a.other.iter());
                for other in others {
                    if pointer.mime_type.is_none() {
                        pointer.mime_type = other.mime_type.clone();
                    }
                    if pointer.territory.is_none() {
                        pointer.territory = other.territory.clone();
                    }
                    if pointer.tsl_type.is_none() {
                        pointer.tsl_type = other.tsl_type.clone();
                    }
                }
                pointer
            })
            .collect()
    }

    pub fn providers(&self) -> &[TrustServiceProvider] {
        self.status_list
            .provider_list
            .as_ref()
            .map(|l| l.providers.as_slice())
            .unwrap_or(&[])
    }

    /// Every (provider, service) pair in document order.
    pub fn services(&self) -> impl Iterator<Item = (&TrustServiceProvider, &ServiceInformation)> {
        self.providers()
            .iter()
            .flat_map(|p| p.service_information().map(move |s| (p, s)))
    }

    pub fn provider_count(&self) -> usize {
        self.providers().len()
    }

    pub fn service_count(&self) -> usize {
        self.services().count()
    }

    /// Short JSON description for logging; empty without scheme information.
    pub fn summary(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if self.status_list.scheme_information.is_none() {
            return map;
        }
        let operator = self.operator_name("en").unwrap_or("unknown");
        let territory = self.territory().unwrap_or("unknown");
        map.insert("scheme_operator_name".into(), json!(operator));
        map.insert("scheme_territory".into(), json!(territory));
        map.insert(
            "num_trust_service_providers".into(),
            json!(self.provider_count()),
        );
        map.insert(
            "summary".into(),
            json!(format!(
                "{territory} TSL by {operator}: {} provider(s), {} service(s)",
                self.provider_count(),
                self.service_count()
            )),
        );
        map
    }

    /// Serialized model, used when no fetched bytes exist.
    pub fn to_xml(&self) -> Result<String> {
        parser::to_xml(&self.status_list)
    }

    /// Bytes to publish: the fetched document when available.
    pub fn to_xml_bytes(&self) -> Result<Vec<u8>> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => Ok(self.to_xml()?.into_bytes()),
        }
    }

    /// Add the certificates of every service `policy` accepts to `pool`.
    /// Undecodable certificates are logged and skipped. Returns the number
    /// of certificates newly added.
    pub fn collect_certificates(&self, policy: &ServicePolicy, pool: &mut CertPool) -> usize {
        let mut added = 0;
        for (provider, service) in self.services().filter(|(_, s)| policy.accepts(s)) {
            for encoded in service.certificates() {
                match Certificate::from_base64(encoded) {
                    Ok(cert) => {
                        if pool.add(cert) {
                            added += 1;
                        }
                    }
                    Err(e) => warn!(
                        source = %self.source,
                        provider = provider.name("en").unwrap_or("unknown"),
                        service_type = %service.service_type,
                        error = %e,
                        "Skipping undecodable certificate"
                    ),
                }
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        DigitalIdentity, DigitalIdentityList, ServiceInformation, TrustServiceProviderList,
        TspService, TspServices,
    };
    use crate::policy::STATUS_GRANTED;

    const SE_TL: &str = include_str!("../testdata/se-tl.xml");

    fn se() -> Tsl {
        Tsl::from_bytes("https://example.com/se-tl.xml", SE_TL.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn accessors_read_scheme_information() {
        let tsl = se();
        assert_eq!(tsl.territory(), Some("SE"));
        assert_eq!(tsl.sequence_number(), Some(42));
        assert_eq!(
            tsl.operator_name("en"),
            Some("Swedish Post and Telecom Authority")
        );
        assert_eq!(tsl.operator_name("sv"), Some("Post- och telestyrelsen"));
        assert_eq!(tsl.operator_name("de"), Some("Post- och telestyrelsen"));
        assert_eq!(
            tsl.distribution_points(),
            &["https://example.com/trust/SE-TL.xml".to_string()]
        );
        assert_eq!(tsl.next_update(), Some("2025-12-15T00:00:00Z"));
        assert_eq!(tsl.provider_count(), 1);
        assert_eq!(tsl.service_count(), 2);
    }

    #[test]
    fn pointers_carry_additional_information() {
        let pointers = se().pointers();
        assert_eq!(pointers.len(), 2);
        assert_eq!(pointers[0].location, "https://example.com/dk-tl.xml");
        assert_eq!(pointers[0].territory.as_deref(), Some("DK"));
        assert_eq!(pointers[0].non_xml_mime(), None);
        assert_eq!(pointers[1].non_xml_mime(), Some("application/pdf"));
    }

    #[test]
    fn signer_comes_from_key_info() {
        let tsl = se();
        assert!(tsl.has_signature());
        assert!(!tsl.signed);
        let signer = tsl.signer.expect("signer certificate");
        assert!(signer.subject().contains("Test Trust Anchor"));
    }

    #[test]
    fn default_policy_collects_granted_only() {
        let mut pool = CertPool::new();
        let added = se().collect_certificates(&ServicePolicy::default(), &mut pool);
        assert_eq!(added, 1);
        assert!(pool.subjects()[0].contains("Test Trust Anchor"));

        let mut all = CertPool::new();
        se().collect_certificates(&ServicePolicy::any(), &mut all);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn bad_certificates_are_skipped() {
        let mut list = TrustStatusList::default();
        list.provider_list = Some(TrustServiceProviderList {
            providers: vec![TrustServiceProvider {
                information: None,
                services: Some(TspServices {
                    services: vec![TspService {
                        information: Some(ServiceInformation {
                            service_type: "CA/QC".into(),
                            status: STATUS_GRANTED.into(),
                            digital_identity: Some(DigitalIdentityList {
                                digital_ids: vec![DigitalIdentity {
                                    x509_certificate: Some("bm90IGEgY2VydA==".into()),
                                    ..Default::default()
                                }],
                            }),
                            ..Default::default()
                        }),
                    }],
                }),
            }],
        });
        let tsl = Tsl::new("memory", list);
        let mut pool = CertPool::new();
        assert_eq!(tsl.collect_certificates(&ServicePolicy::default(), &mut pool), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn summary_reports_counts() {
        let summary = se().summary();
        assert_eq!(summary["scheme_territory"], "SE");
        assert_eq!(summary["num_trust_service_providers"], 1);
        assert!(summary["summary"].as_str().unwrap().contains("2 service(s)"));

        assert!(Tsl::default().summary().is_empty());
    }

    #[test]
    fn publish_bytes_prefer_raw() {
        let tsl = se();
        assert_eq!(tsl.to_xml_bytes().unwrap(), SE_TL.as_bytes());

        let synthetic = Tsl::new("memory", tsl.status_list.clone());
        let xml = String::from_utf8(synthetic.to_xml_bytes().unwrap()).unwrap();
        assert!(xml.contains("<SchemeTerritory>SE</SchemeTerritory>"));
        assert!(!xml.contains("Signature"));
    }
}
