use quick_xml::events::Event;
use quick_xml::Reader;
use tsl_types::{Result, TslError};

use crate::ast::{TrustStatusList, TSL_NAMESPACE};

const ROOT_ELEMENT: &[u8] = b"TrustServiceStatusList";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Parse raw bytes into a [`TrustStatusList`].
///
/// The root element must be `TrustServiceStatusList` (any prefix). A leading
/// UTF-8 byte order mark is tolerated.
pub fn parse(bytes: &[u8]) -> Result<TrustStatusList> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| TslError::Xml(format!("document is not valid UTF-8: {e}")))?;
    parse_str(text)
}

/// Parse an XML string into a [`TrustStatusList`].
pub fn parse_str(text: &str) -> Result<TrustStatusList> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    check_root(text)?;
    quick_xml::de::from_str(text).map_err(|e| TslError::Xml(e.to_string()))
}

/// Serialize a [`TrustStatusList`] with the XML declaration and the ETSI
/// namespace on the root element.
pub fn to_xml(list: &TrustStatusList) -> Result<String> {
    let mut list = list.clone();
    list.xmlns = Some(TSL_NAMESPACE.to_string());
    let body = quick_xml::se::to_string(&list).map_err(|e| TslError::Xml(e.to_string()))?;
    Ok(format!("{XML_DECLARATION}\n{body}\n"))
}

fn check_root(text: &str) -> Result<()> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if name.as_ref() == ROOT_ELEMENT {
                    return Ok(());
                }
                return Err(TslError::Xml(format!(
                    "unexpected root element <{}>, expected <TrustServiceStatusList>",
                    String::from_utf8_lossy(e.name().as_ref())
                )));
            }
            Ok(Event::Eof) => return Err(TslError::Xml("document has no root element".into())),
            Ok(_) => {}
            Err(e) => return Err(TslError::Xml(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0"?>
<TrustServiceStatusList xmlns="http://uri.etsi.org/02231/v2#">
  <SchemeInformation>
    <TSLSequenceNumber>7</TSLSequenceNumber>
    <SchemeTerritory>FI</SchemeTerritory>
  </SchemeInformation>
</TrustServiceStatusList>"#;

    #[test]
    fn parses_default_namespace_document() {
        let list = parse_str(MINIMAL).unwrap();
        let info = list.scheme_information.unwrap();
        assert_eq!(info.territory.as_deref(), Some("FI"));
        assert_eq!(info.sequence_number, Some(7));
        assert!(list.provider_list.is_none());
    }

    #[test]
    fn tolerates_byte_order_mark() {
        let with_bom = format!("\u{feff}{MINIMAL}");
        assert!(parse(with_bom.as_bytes()).is_ok());
    }

    #[test]
    fn rejects_wrong_root() {
        let err = parse_str("<html><body/></html>").unwrap_err();
        assert!(matches!(err, TslError::Xml(_)));
        assert!(err.to_string().contains("unexpected root element <html>"));
    }

    #[test]
    fn rejects_empty_and_binary_input() {
        assert!(parse_str("").is_err());
        assert!(parse(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn serializes_with_namespace_and_declaration() {
        let list = parse_str(MINIMAL).unwrap();
        let xml = to_xml(&list).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"xmlns="http://uri.etsi.org/02231/v2#""#));
        assert!(xml.contains("<SchemeTerritory>FI</SchemeTerritory>"));

        let reparsed = parse_str(&xml).unwrap();
        assert_eq!(
            reparsed.scheme_information.unwrap().territory.as_deref(),
            Some("FI")
        );
    }
}
