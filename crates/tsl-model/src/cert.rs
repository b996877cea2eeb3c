//! X.509 trust anchors and the pool `select` builds from them.

use std::collections::HashSet;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pem::{EncodeConfig, LineEnding, Pem};
use tsl_types::{Result, TslError};
use x509_parser::prelude::{FromDer, X509Certificate};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// A DER-encoded certificate that has been checked to parse as X.509.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
}

impl Certificate {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        let subject = match X509Certificate::from_der(&der) {
            Ok((_, cert)) => cert.subject().to_string(),
            Err(e) => {
                let message = e.to_string();
                return Err(TslError::certificate("parse", message, e));
            }
        };
        Ok(Self { der, subject })
    }

    /// Decode the base64 text of an `X509Certificate` element. Embedded
    /// whitespace and line breaks are ignored.
    pub fn from_base64(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| TslError::certificate("decode", format!("invalid base64: {e}"), e))?;
        Self::from_der(der)
    }

    /// Decode the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(text: &[u8]) -> Result<Self> {
        let block = ::pem::parse(text)
            .map_err(|e| TslError::certificate("decode", format!("invalid PEM: {e}"), e))?;
        if block.tag() != CERTIFICATE_TAG {
            return Err(TslError::Certificate {
                operation: "decode".into(),
                subject: None,
                message: format!("expected PEM tag {CERTIFICATE_TAG}, got {}", block.tag()),
                source: None,
            });
        }
        Self::from_der(block.contents().to_vec())
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name in RFC 4514 form.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    pub fn to_pem(&self) -> String {
        let block = Pem::new(CERTIFICATE_TAG, self.der.clone());
        ::pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
    }
}

/// An ordered set of trust anchors, deduplicated by DER encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertPool {
    certs: Vec<Certificate>,
    seen: HashSet<Vec<u8>>,
}

impl CertPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate. Returns `false` when an identical one is present.
    pub fn add(&mut self, cert: Certificate) -> bool {
        if !self.seen.insert(cert.der.clone()) {
            return false;
        }
        self.certs.push(cert);
        true
    }

    pub fn contains(&self, cert: &Certificate) -> bool {
        self.seen.contains(&cert.der)
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certs.iter()
    }

    /// Subjects of every certificate, in insertion order.
    pub fn subjects(&self) -> Vec<&str> {
        self.certs.iter().map(Certificate::subject).collect()
    }

    /// Concatenated PEM blocks.
    pub fn to_pem(&self) -> String {
        self.certs.iter().map(Certificate::to_pem).collect()
    }

    pub fn write_pem(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_pem())?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a CertPool {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certs.iter()
    }
}
