//! Trust Status List (ETSI TS 119 612) document model.
//!
//! Parses `TrustServiceStatusList` XML into a typed AST ([`TrustStatusList`]),
//! wraps it as a resolved document ([`Tsl`]) with pointer and service
//! accessors, and turns accepted service entries into a [`CertPool`] under a
//! [`ServicePolicy`].
//!
//! # Example
//! ```
//! let xml = r#"<TrustServiceStatusList xmlns="http://uri.etsi.org/02231/v2#">
//!   <SchemeInformation><SchemeTerritory>SE</SchemeTerritory></SchemeInformation>
//! </TrustServiceStatusList>"#;
//! let tsl = tsl_model::Tsl::from_bytes("se.xml", xml.as_bytes().to_vec()).unwrap();
//! assert_eq!(tsl.territory(), Some("SE"));
//! ```

pub mod ast;
pub mod cert;
mod document;
mod parser;
pub mod policy;

pub use ast::*;
pub use cert::{CertPool, Certificate};
pub use document::{Tsl, TslPointer};
pub use parser::{parse, parse_str, to_xml};
pub use policy::{ServicePolicy, StatusLogic, STATUS_GRANTED, STATUS_WITHDRAWN};

#[cfg(test)]
mod tests {
    use super::*;

    const SE_TL: &str = include_str!("../testdata/se-tl.xml");

    #[test]
    fn parse_prefixed_trust_list() {
        let list = parse_str(SE_TL).unwrap();
        assert_eq!(list.tsl_tag.as_deref(), Some("http://uri.etsi.org/19612/TSLTag"));
        let info = list.scheme_information.as_ref().unwrap();
        assert_eq!(info.version_identifier, Some(5));
        assert_eq!(
            info.operator_name.as_ref().unwrap().find("en"),
            Some("Swedish Post and Telecom Authority")
        );
        assert_eq!(info.pointers.as_ref().unwrap().pointers.len(), 2);
        let providers = &list.provider_list.as_ref().unwrap().providers;
        assert_eq!(providers[0].name("en"), Some("Example Trust AB"));
    }

    #[test]
    fn service_certificates_are_trimmed() {
        let list = parse_str(SE_TL).unwrap();
        let provider = &list.provider_list.unwrap().providers[0];
        let first = provider.service_information().next().unwrap();
        let cert = first.certificates().next().unwrap();
        assert!(cert.starts_with("MII"));
        assert!(!cert.ends_with(char::is_whitespace));
    }

    #[test]
    fn international_names_fallback() {
        let names = InternationalNames::english("Operator");
        assert_eq!(names.find("en"), Some("Operator"));
        assert_eq!(names.find("fr"), None);
        assert_eq!(names.find_or("fr", "unknown"), "Operator");
        assert_eq!(InternationalNames::default().find_or("fr", "unknown"), "unknown");
    }

    #[test]
    fn serialized_names_keep_language_tags() {
        let list = TrustStatusList {
            scheme_information: Some(SchemeInformation {
                operator_name: Some(InternationalNames::english("Operator")),
                territory: Some("SE".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let xml = to_xml(&list).unwrap();
        assert!(xml.contains(r#"<Name xml:lang="en">Operator</Name>"#));

        let back = parse_str(&xml).unwrap();
        let names = back.scheme_information.unwrap().operator_name.unwrap();
        assert_eq!(names.find("en"), Some("Operator"));
    }
}
