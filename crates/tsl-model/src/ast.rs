//! Serde mapping of the `TrustServiceStatusList` document (ETSI TS 119 612).
//!
//! Only the parts the pipeline reads or writes are mapped; unknown elements
//! are skipped on input. Element names are matched on their local part, so
//! prefixed (`tsl:SchemeTerritory`) and default-namespace documents parse the
//! same way. Field order follows the schema because it drives output order.

use serde::{Deserialize, Serialize};

/// Namespace of the TSL root element.
pub const TSL_NAMESPACE: &str = "http://uri.etsi.org/02231/v2#";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "TrustServiceStatusList")]
pub struct TrustStatusList {
    #[serde(rename = "@xmlns", default, skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    #[serde(rename = "@TSLTag", default, skip_serializing_if = "Option::is_none")]
    pub tsl_tag: Option<String>,
    #[serde(rename = "@Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "SchemeInformation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scheme_information: Option<SchemeInformation>,
    #[serde(
        rename = "TrustServiceProviderList",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_list: Option<TrustServiceProviderList>,
    /// Enveloped `ds:Signature`, read for its KeyInfo only. Never written
    /// back: publishing signs afresh or emits an unsigned document.
    #[serde(rename = "Signature", default, skip_serializing)]
    pub signature: Option<SignatureBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemeInformation {
    #[serde(
        rename = "TSLVersionIdentifier",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub version_identifier: Option<u32>,
    #[serde(
        rename = "TSLSequenceNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence_number: Option<u64>,
    #[serde(rename = "TSLType", default, skip_serializing_if = "Option::is_none")]
    pub tsl_type: Option<String>,
    #[serde(
        rename = "SchemeOperatorName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operator_name: Option<InternationalNames>,
    #[serde(rename = "SchemeName", default, skip_serializing_if = "Option::is_none")]
    pub scheme_name: Option<InternationalNames>,
    #[serde(
        rename = "StatusDeterminationApproach",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub status_determination_approach: Option<String>,
    #[serde(
        rename = "SchemeTerritory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub territory: Option<String>,
    #[serde(
        rename = "HistoricalInformationPeriod",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub historical_information_period: Option<u32>,
    #[serde(
        rename = "PointersToOtherTSL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pointers: Option<PointersToOtherTsl>,
    #[serde(
        rename = "ListIssueDateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub issue_date_time: Option<String>,
    #[serde(rename = "NextUpdate", default, skip_serializing_if = "Option::is_none")]
    pub next_update: Option<NextUpdate>,
    #[serde(
        rename = "DistributionPoints",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub distribution_points: Option<UriList>,
}

/// A list of `Name` elements, each tagged with `xml:lang`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternationalNames {
    #[serde(rename = "Name", default)]
    pub names: Vec<LocalizedName>,
}

impl InternationalNames {
    /// A single English name.
    pub fn english(value: impl Into<String>) -> Self {
        Self {
            names: vec![LocalizedName::new("en", value)],
        }
    }

    /// Name in `lang`, if present.
    pub fn find(&self, lang: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.lang.as_deref() == Some(lang))
            .map(|n| n.value.as_str())
    }

    /// Name in `lang`, else the first name, else `default`.
    pub fn find_or<'a>(&'a self, lang: &str, default: &'a str) -> &'a str {
        self.find(lang)
            .or_else(|| self.names.first().map(|n| n.value.as_str()))
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizedName {
    #[serde(
        rename(serialize = "@xml:lang", deserialize = "@lang"),
        alias = "@xml:lang",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub lang: Option<String>,
    #[serde(rename = "$text", default)]
    pub value: String,
}

impl LocalizedName {
    pub fn new(lang: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            lang: Some(lang.into()),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UriList {
    #[serde(rename = "URI", default)]
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextUpdate {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointersToOtherTsl {
    #[serde(rename = "OtherTSLPointer", default)]
    pub pointers: Vec<OtherTslPointer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtherTslPointer {
    #[serde(
        rename = "ServiceDigitalIdentities",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_digital_identities: Option<ServiceDigitalIdentities>,
    #[serde(rename = "TSLLocation", default)]
    pub location: String,
    #[serde(
        rename = "AdditionalInformation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_information: Option<AdditionalInformation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDigitalIdentities {
    #[serde(rename = "ServiceDigitalIdentity", default)]
    pub identities: Vec<DigitalIdentityList>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInformation {
    #[serde(rename = "OtherInformation", default)]
    pub other: Vec<OtherInformation>,
}

/// One `OtherInformation` entry. Each entry usually carries a single child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtherInformation {
    #[serde(rename = "TSLType", default, skip_serializing_if = "Option::is_none")]
    pub tsl_type: Option<String>,
    #[serde(
        rename = "SchemeOperatorName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operator_name: Option<InternationalNames>,
    #[serde(
        rename = "SchemeTerritory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub territory: Option<String>,
    #[serde(rename = "MimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustServiceProviderList {
    #[serde(rename = "TrustServiceProvider", default)]
    pub providers: Vec<TrustServiceProvider>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustServiceProvider {
    #[serde(
        rename = "TSPInformation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub information: Option<TspInformation>,
    #[serde(rename = "TSPServices", default, skip_serializing_if = "Option::is_none")]
    pub services: Option<TspServices>,
}

impl TrustServiceProvider {
    /// Provider name in `lang`, falling back to the first name.
    pub fn name(&self, lang: &str) -> Option<&str> {
        let names = self.information.as_ref()?.name.as_ref()?;
        names
            .find(lang)
            .or_else(|| names.names.first().map(|n| n.value.as_str()))
    }

    /// Service information blocks of this provider, skipping empty entries.
    pub fn service_information(&self) -> impl Iterator<Item = &ServiceInformation> {
        self.services
            .iter()
            .flat_map(|s| s.services.iter())
            .filter_map(|s| s.information.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TspInformation {
    #[serde(rename = "TSPName", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<InternationalNames>,
    #[serde(
        rename = "TSPTradeName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub trade_name: Option<InternationalNames>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TspServices {
    #[serde(rename = "TSPService", default)]
    pub services: Vec<TspService>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TspService {
    #[serde(
        rename = "ServiceInformation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub information: Option<ServiceInformation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInformation {
    #[serde(rename = "ServiceTypeIdentifier", default)]
    pub service_type: String,
    #[serde(rename = "ServiceName", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<InternationalNames>,
    #[serde(
        rename = "ServiceDigitalIdentity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub digital_identity: Option<DigitalIdentityList>,
    #[serde(rename = "ServiceStatus", default)]
    pub status: String,
    #[serde(
        rename = "StatusStartingTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub status_starting_time: Option<String>,
}

impl ServiceInformation {
    /// Base64 DER certificate values of this service, whitespace-trimmed.
    pub fn certificates(&self) -> impl Iterator<Item = &str> {
        self.digital_identity
            .iter()
            .flat_map(|d| d.digital_ids.iter())
            .filter_map(|id| id.x509_certificate.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitalIdentityList {
    #[serde(rename = "DigitalId", default)]
    pub digital_ids: Vec<DigitalIdentity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitalIdentity {
    #[serde(
        rename = "X509Certificate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub x509_certificate: Option<String>,
    #[serde(
        rename = "X509SubjectName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub x509_subject_name: Option<String>,
    #[serde(rename = "X509SKI", default, skip_serializing_if = "Option::is_none")]
    pub x509_ski: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SignatureBlock {
    #[serde(rename = "KeyInfo", default)]
    pub key_info: Option<KeyInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "X509Data", default)]
    pub x509_data: Option<X509Data>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct X509Data {
    #[serde(rename = "X509Certificate", default)]
    pub certificates: Vec<String>,
}
