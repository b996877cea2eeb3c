//! Enveloped XML-DSig signing of published documents.
//!
//! [`FileSigner`] signs with an RSA key and certificate read from PEM files.
//! Hardware tokens are reached through an injected [`Pkcs11Provider`].

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use tsl_model::Certificate;
use tsl_types::{Result, TslError};

use crate::c14n;

pub const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SHA256_DIGEST: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

const PEM_PRIVATE_KEY_TAG: &str = "PRIVATE KEY";
const PEM_RSA_PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";

/// Key ID used when a PKCS#11 signer is configured without one.
pub const DEFAULT_KEY_ID: &str = "01";

/// Produces a signed copy of an XML document.
pub trait XmlSigner: Send + Sync {
    fn sign(&self, document: &[u8]) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// PKCS#11
// ---------------------------------------------------------------------------

/// Token coordinates for a PKCS#11 signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkcs11Config {
    pub uri: String,
    pub key_label: String,
    pub cert_label: String,
    pub key_id: String,
}

impl Pkcs11Config {
    pub fn new(
        uri: impl Into<String>,
        key_label: impl Into<String>,
        cert_label: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            key_label: key_label.into(),
            cert_label: cert_label.into(),
            key_id: DEFAULT_KEY_ID.into(),
        }
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        if !key_id.is_empty() {
            self.key_id = key_id;
        }
        self
    }
}

/// Signs documents with a key held in a PKCS#11 token.
pub trait Pkcs11Provider: Send + Sync {
    fn sign(&self, config: &Pkcs11Config, document: &[u8]) -> Result<Vec<u8>>;
}

/// Binds a provider to one token configuration.
pub struct Pkcs11Signer<'a> {
    provider: &'a dyn Pkcs11Provider,
    config: Pkcs11Config,
}

impl<'a> Pkcs11Signer<'a> {
    pub fn new(provider: &'a dyn Pkcs11Provider, config: Pkcs11Config) -> Self {
        Self { provider, config }
    }
}

impl XmlSigner for Pkcs11Signer<'_> {
    fn sign(&self, document: &[u8]) -> Result<Vec<u8>> {
        debug!(uri = %self.config.uri, key_label = %self.config.key_label, "Signing with PKCS#11 token");
        self.provider.sign(&self.config, document)
    }
}

// ---------------------------------------------------------------------------
// Signature elements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct AlgorithmElement {
    #[serde(rename = "@Algorithm")]
    algorithm: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct Transforms {
    #[serde(rename = "Transform")]
    transform: Vec<AlgorithmElement>,
}

#[derive(Debug, Clone, Serialize)]
struct Reference {
    #[serde(rename = "@URI")]
    uri: String,
    #[serde(rename = "Transforms")]
    transforms: Transforms,
    #[serde(rename = "DigestMethod")]
    digest_method: AlgorithmElement,
    #[serde(rename = "DigestValue")]
    digest_value: String,
}

/// Canonicalized before signing; the canonical bytes are embedded in the
/// `Signature` verbatim, so the namespace is repeated on the element.
#[derive(Debug, Clone, Serialize)]
struct SignedInfo {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "CanonicalizationMethod")]
    canonicalization_method: AlgorithmElement,
    #[serde(rename = "SignatureMethod")]
    signature_method: AlgorithmElement,
    #[serde(rename = "Reference")]
    reference: Reference,
}

#[derive(Debug, Serialize)]
struct TextElement {
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Serialize)]
struct X509Data {
    #[serde(rename = "X509Certificate")]
    certificate: TextElement,
}

#[derive(Debug, Serialize)]
struct KeyInfo {
    #[serde(rename = "X509Data")]
    x509_data: X509Data,
}

fn serialize<T: Serialize>(root: &str, value: &T) -> Result<String> {
    quick_xml::se::to_string_with_root(root, value)
        .map_err(|e| TslError::signing_failed(format!("failed to serialize {root}"), None, e))
}

// ---------------------------------------------------------------------------
// FileSigner
// ---------------------------------------------------------------------------

/// RSA-SHA256 signer backed by PEM key material.
pub struct FileSigner {
    key_pair: RsaKeyPair,
    certificate: Certificate,
}

impl std::fmt::Debug for FileSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSigner")
            .field("certificate", &self.certificate.subject())
            .finish_non_exhaustive()
    }
}

impl FileSigner {
    /// Build a signer from PEM data. The key may be PKCS#8 (`PRIVATE KEY`)
    /// or PKCS#1 (`RSA PRIVATE KEY`).
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certificate = Certificate::from_pem(cert_pem)?;
        let key_pair = key_pair_from_pem(key_pem, None)?;
        Ok(Self {
            key_pair,
            certificate,
        })
    }

    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        info!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            "Loading signing certificate and key"
        );
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            TslError::signing_failed("failed to read certificate", Some(cert_path), e)
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            TslError::signing_failed("failed to read private key", Some(key_path), e)
        })?;

        let certificate = Certificate::from_pem(&cert_pem)
            .map_err(|e| e.with_subject(cert_path.display().to_string()))?;
        let key_pair = key_pair_from_pem(&key_pem, Some(key_path))?;
        Ok(Self {
            key_pair,
            certificate,
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn signed_info(&self, digest_value: String) -> SignedInfo {
        SignedInfo {
            xmlns: XMLDSIG_NAMESPACE,
            canonicalization_method: AlgorithmElement {
                algorithm: EXCLUSIVE_C14N,
            },
            signature_method: AlgorithmElement {
                algorithm: RSA_SHA256,
            },
            reference: Reference {
                uri: String::new(),
                transforms: Transforms {
                    transform: vec![
                        AlgorithmElement {
                            algorithm: ENVELOPED_SIGNATURE,
                        },
                        AlgorithmElement {
                            algorithm: EXCLUSIVE_C14N,
                        },
                    ],
                },
                digest_method: AlgorithmElement {
                    algorithm: SHA256_DIGEST,
                },
                digest_value,
            },
        }
    }

    fn sign_bytes(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(&RSA_PKCS1_SHA256, &rng, message, &mut signature)
            .map_err(|e| TslError::signing_failed("RSA signing failed", None, e.to_string()))?;
        Ok(signature)
    }
}

impl XmlSigner for FileSigner {
    /// Replace any existing signature with a fresh enveloped one placed as
    /// the last child of the root element.
    ///
    /// The reference digest covers the exclusive canonical form of the
    /// document with its signatures removed, and the signature value covers
    /// the exclusive canonical form of `SignedInfo`.
    fn sign(&self, document: &[u8]) -> Result<Vec<u8>> {
        let unsigned = strip_signatures(document)?;
        let digest = STANDARD.encode(Sha256::digest(c14n::canonicalize(&unsigned)?));

        let signed_info = serialize("SignedInfo", &self.signed_info(digest))?;
        let signed_info = c14n::canonicalize(signed_info.as_bytes())?;
        let signature_value = STANDARD.encode(self.sign_bytes(&signed_info)?);

        let signature_value = serialize(
            "SignatureValue",
            &TextElement {
                value: signature_value,
            },
        )?;
        let key_info = serialize(
            "KeyInfo",
            &KeyInfo {
                x509_data: X509Data {
                    certificate: TextElement {
                        value: self.certificate.to_base64(),
                    },
                },
            },
        )?;

        let mut signature = format!("<Signature xmlns=\"{XMLDSIG_NAMESPACE}\">").into_bytes();
        signature.extend_from_slice(&signed_info);
        signature.extend_from_slice(signature_value.as_bytes());
        signature.extend_from_slice(key_info.as_bytes());
        signature.extend_from_slice(b"</Signature>");

        let signed = insert_before_root_end(&unsigned, &signature)?;
        debug!(
            signer = %self.certificate.subject(),
            size = signed.len(),
            "Signed document"
        );
        Ok(signed)
    }
}

fn key_pair_from_pem(key_pem: &[u8], path: Option<&Path>) -> Result<RsaKeyPair> {
    const OPERATION: &str = "failed to decode private key";
    let block = pem::parse(key_pem).map_err(|e| TslError::signing_failed(OPERATION, path, e))?;
    let parsed = match block.tag() {
        PEM_PRIVATE_KEY_TAG => RsaKeyPair::from_pkcs8(block.contents()),
        PEM_RSA_PRIVATE_KEY_TAG => RsaKeyPair::from_der(block.contents()),
        other => {
            return Err(TslError::signing_failed(
                OPERATION,
                path,
                format!("unsupported PEM block '{other}'"),
            ))
        }
    };
    parsed.map_err(|e| TslError::signing_failed(OPERATION, path, e.to_string()))
}

/// Drop every `Signature` element (any prefix) from `xml`.
pub fn strip_signatures(xml: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut skipping = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| TslError::Xml(e.to_string()))?;
        let keep = match &event {
            Event::Eof => break,
            Event::Start(start) => {
                if skipping > 0 || start.local_name().as_ref() == b"Signature" {
                    skipping += 1;
                }
                skipping == 0
            }
            Event::End(_) if skipping > 0 => {
                skipping -= 1;
                false
            }
            Event::Empty(empty) => {
                skipping == 0 && empty.local_name().as_ref() != b"Signature"
            }
            _ => skipping == 0,
        };
        if keep {
            writer.write_event(event)?;
        }
    }
    Ok(writer.into_inner())
}

fn insert_before_root_end(xml: &[u8], element: &[u8]) -> Result<Vec<u8>> {
    let end = xml
        .windows(2)
        .rposition(|w| w == b"</")
        .ok_or_else(|| TslError::signing("document has no closing root element"))?;
    let mut out = Vec::with_capacity(xml.len() + element.len());
    out.extend_from_slice(&xml[..end]);
    out.extend_from_slice(element);
    out.extend_from_slice(&xml[end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};
    use std::error::Error as _;

    const CERT: &str = include_str!("../tests/fixtures/signer-cert.pem");
    const KEY_PKCS8: &str = include_str!("../tests/fixtures/signer-key.pem");
    const KEY_PKCS1: &str = include_str!("../tests/fixtures/signer-key-pkcs1.pem");

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrustServiceStatusList xmlns="http://uri.etsi.org/02231/v2#"><SchemeInformation><SchemeTerritory>SE</SchemeTerritory></SchemeInformation></TrustServiceStatusList>"#;

    fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
        let from = text.find(start).unwrap();
        let to = text[from..].find(end).unwrap() + from + end.len();
        &text[from..to]
    }

    fn text_of<'a>(text: &'a str, tag: &str) -> &'a str {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        between(text, &open, &close)
            .trim_start_matches(open.as_str())
            .trim_end_matches(close.as_str())
    }

    #[test]
    fn signs_with_pkcs8_key_and_verifies() {
        let signer = FileSigner::from_pem(CERT.as_bytes(), KEY_PKCS8.as_bytes()).unwrap();
        let signed = String::from_utf8(signer.sign(DOC.as_bytes()).unwrap()).unwrap();

        assert!(signed.contains(r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#">"#));
        assert!(signed.ends_with("</Signature></TrustServiceStatusList>"));
        assert!(signed.contains(RSA_SHA256));
        assert!(signed.contains(&signer.certificate().to_base64()));

        let signed_info = between(&signed, "<SignedInfo", "</SignedInfo>");
        let signature = STANDARD.decode(text_of(&signed, "SignatureValue")).unwrap();

        let public_key = UnparsedPublicKey::new(
            &RSA_PKCS1_2048_8192_SHA256,
            signer.key_pair.public().as_ref(),
        );
        public_key
            .verify(signed_info.as_bytes(), &signature)
            .expect("signature verifies");
    }

    #[test]
    fn signed_info_is_embedded_in_canonical_form() {
        let signer = FileSigner::from_pem(CERT.as_bytes(), KEY_PKCS8.as_bytes()).unwrap();
        let signed = String::from_utf8(signer.sign(DOC.as_bytes()).unwrap()).unwrap();

        let signed_info = between(&signed, "<SignedInfo", "</SignedInfo>");
        let canonical = c14n::canonicalize(signed_info.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(canonical).unwrap(), signed_info);
        assert!(signed_info.contains(&format!(
            r#"<CanonicalizationMethod Algorithm="{EXCLUSIVE_C14N}"></CanonicalizationMethod>"#
        )));
        assert!(signed_info.contains(&format!(
            r#"<Transforms><Transform Algorithm="{ENVELOPED_SIGNATURE}"></Transform><Transform Algorithm="{EXCLUSIVE_C14N}"></Transform></Transforms>"#
        )));
    }

    #[test]
    fn digest_covers_the_canonical_enveloped_document() {
        // Declaration, comment, single quotes and an empty element all
        // disappear or normalize under exclusive canonicalization.
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generated -->
<TrustServiceStatusList xmlns="http://uri.etsi.org/02231/v2#" Id='tsl' TSLTag="http://uri.etsi.org/19612/TSLTag"><SchemeInformation><SchemeTerritory>SE</SchemeTerritory><Empty/></SchemeInformation></TrustServiceStatusList>"#;
        let signer = FileSigner::from_pem(CERT.as_bytes(), KEY_PKCS8.as_bytes()).unwrap();
        let signed = signer.sign(doc.as_bytes()).unwrap();

        let enveloped = strip_signatures(&signed).unwrap();
        let canonical = c14n::canonicalize(&enveloped).unwrap();
        let expected = STANDARD.encode(Sha256::digest(&canonical));

        let signed = String::from_utf8(signed).unwrap();
        assert_eq!(text_of(&signed, "DigestValue"), expected);

        let raw = STANDARD.encode(Sha256::digest(doc.as_bytes()));
        assert_ne!(text_of(&signed, "DigestValue"), raw);
    }

    #[test]
    fn accepts_pkcs1_keys() {
        let signer = FileSigner::from_pem(CERT.as_bytes(), KEY_PKCS1.as_bytes()).unwrap();
        assert!(signer.certificate().subject().contains("Test Trust Anchor"));
        assert!(signer.sign(DOC.as_bytes()).is_ok());
    }

    #[test]
    fn resigning_replaces_the_old_signature() {
        let signer = FileSigner::from_pem(CERT.as_bytes(), KEY_PKCS8.as_bytes()).unwrap();
        let once = signer.sign(DOC.as_bytes()).unwrap();
        let twice = String::from_utf8(signer.sign(&once).unwrap()).unwrap();
        assert_eq!(twice.matches("<Signature ").count(), 1);
    }

    #[test]
    fn strips_prefixed_signatures() {
        let xml = br#"<root><a/><ds:Signature xmlns:ds="x"><ds:SignedInfo/><ds:Object><x>1</x></ds:Object></ds:Signature><b>2</b></root>"#;
        let stripped = String::from_utf8(strip_signatures(xml).unwrap()).unwrap();
        assert_eq!(stripped, "<root><a/><b>2</b></root>");
    }

    #[test]
    fn bad_key_material_is_rejected() {
        let err = FileSigner::from_pem(CERT.as_bytes(), b"not a key").unwrap_err();
        assert!(err.to_string().contains("failed to sign TSL"));
        assert!(err.to_string().contains("private key"));
        assert!(matches!(err, TslError::Signing { .. }));
        assert!(err.source().is_some());

        let err = FileSigner::from_pem(KEY_PKCS8.as_bytes(), KEY_PKCS8.as_bytes()).unwrap_err();
        assert!(matches!(err, TslError::Certificate { .. }));
    }

    #[test]
    fn missing_files_fail_to_sign() {
        let err = FileSigner::from_files(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to sign TSL"));
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
        let cause = err.source().expect("io cause");
        assert!(cause.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn unreadable_key_names_the_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, CERT).unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = FileSigner::from_files(&cert, &key).unwrap_err();
        assert!(err.to_string().contains(&key.display().to_string()));
        assert!(err.source().is_some());

        std::fs::write(&cert, "garbage").unwrap();
        let err = FileSigner::from_files(&cert, &key).unwrap_err();
        assert!(matches!(err, TslError::Certificate { .. }));
        assert!(err.to_string().contains(&cert.display().to_string()));
    }

    #[test]
    fn pkcs11_config_defaults_key_id() {
        let config = Pkcs11Config::new("pkcs11:token=t", "key-label", "cert-label");
        assert_eq!(config.key_id, DEFAULT_KEY_ID);
        assert_eq!(config.clone().with_key_id("42").key_id, "42");
        assert_eq!(config.with_key_id("").key_id, "01");
    }
}
