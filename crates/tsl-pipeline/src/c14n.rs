//! Exclusive XML canonicalization (`xml-exc-c14n#`, comments omitted).
//!
//! Covers what signed trust lists contain: elements, attributes, namespace
//! declarations, text, CDATA and processing instructions. The XML
//! declaration, DOCTYPE and comments are dropped, empty elements are
//! expanded to start/end pairs, attributes are sorted, and a namespace
//! declaration is emitted only on the element that visibly uses it and only
//! when the nearest rendered ancestor does not already bind it.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use tsl_types::{Result, TslError};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Prefix -> namespace URI. The default namespace uses the empty prefix.
type Bindings = BTreeMap<String, String>;

fn xml_error(e: impl std::fmt::Display) -> TslError {
    TslError::Xml(format!("canonicalization failed: {e}"))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(xml_error)
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn prefix_of(name: QName<'_>) -> Result<String> {
    Ok(match name.prefix() {
        Some(prefix) => utf8(prefix.as_ref())?.to_string(),
        None => String::new(),
    })
}

struct Frame {
    /// Bindings declared in the input, in scope for this element.
    in_scope: Bindings,
    /// Bindings already rendered on output ancestors (and this element).
    rendered: Bindings,
}

struct Canonicalizer {
    out: String,
    stack: Vec<Frame>,
    seen_root: bool,
}

impl Canonicalizer {
    fn start(&mut self, element: &BytesStart<'_>) -> Result<()> {
        let (mut in_scope, mut rendered) = match self.stack.last() {
            Some(frame) => (frame.in_scope.clone(), frame.rendered.clone()),
            None => (Bindings::new(), Bindings::new()),
        };

        let mut attributes: Vec<(String, String, String, String)> = Vec::new();
        for attr in element.attributes() {
            let attr = attr.map_err(xml_error)?;
            let key = utf8(attr.key.as_ref())?;
            let value = attr.unescape_value().map_err(xml_error)?.into_owned();
            if key == "xmlns" {
                in_scope.insert(String::new(), value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                in_scope.insert(prefix.to_string(), value);
            } else {
                let prefix = prefix_of(attr.key)?;
                let local = utf8(attr.key.local_name().as_ref())?.to_string();
                attributes.push((prefix, local, key.to_string(), value));
            }
        }

        // Visibly utilized prefixes: the element's own and its attributes'.
        let mut used = vec![prefix_of(element.name())?];
        used.extend(
            attributes
                .iter()
                .map(|(prefix, ..)| prefix.clone())
                .filter(|p| !p.is_empty() && p != "xml"),
        );
        used.sort();
        used.dedup();

        let mut declarations: Vec<(String, String)> = Vec::new();
        for prefix in used {
            let uri = in_scope.get(&prefix).cloned().unwrap_or_default();
            let already = rendered.get(&prefix).cloned().unwrap_or_default();
            if uri == already && (rendered.contains_key(&prefix) || uri.is_empty()) {
                continue;
            }
            rendered.insert(prefix.clone(), uri.clone());
            declarations.push((prefix, uri));
        }

        let namespace_of = |prefix: &str| -> String {
            match prefix {
                "" => String::new(),
                "xml" => XML_NAMESPACE.to_string(),
                p => in_scope.get(p).cloned().unwrap_or_default(),
            }
        };
        attributes.sort_by(|a, b| {
            (namespace_of(&a.0), &a.1).cmp(&(namespace_of(&b.0), &b.1))
        });

        self.out.push('<');
        self.out.push_str(utf8(element.name().as_ref())?);
        for (prefix, uri) in &declarations {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attribute(uri, &mut self.out);
            self.out.push('"');
        }
        for (_, _, qname, value) in &attributes {
            self.out.push(' ');
            self.out.push_str(qname);
            self.out.push_str("=\"");
            escape_attribute(value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        self.stack.push(Frame { in_scope, rendered });
        self.seen_root = true;
        Ok(())
    }
}

/// Canonicalize a whole document (or a standalone fragment with a single
/// top-level element).
pub fn canonicalize(xml: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().expand_empty_elements = true;
    reader.config_mut().trim_text(false);

    let mut c14n = Canonicalizer {
        out: String::with_capacity(xml.len()),
        stack: Vec::new(),
        seen_root: false,
    };

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Eof => break,
            Event::Start(start) => c14n.start(&start)?,
            Event::End(end) => {
                c14n.out.push_str("</");
                c14n.out.push_str(utf8(end.name().as_ref())?);
                c14n.out.push('>');
                c14n.stack.pop();
            }
            Event::Empty(_) => {
                return Err(xml_error("unexpected empty element"));
            }
            Event::Text(text) if !c14n.stack.is_empty() => {
                let text = text.unescape().map_err(xml_error)?;
                escape_text(&text, &mut c14n.out);
            }
            Event::CData(data) if !c14n.stack.is_empty() => {
                escape_text(utf8(&data)?, &mut c14n.out);
            }
            Event::PI(pi) => {
                let body = utf8(&pi)?;
                if c14n.stack.is_empty() && c14n.seen_root {
                    c14n.out.push('\n');
                }
                c14n.out.push_str("<?");
                c14n.out.push_str(body);
                c14n.out.push_str("?>");
                if c14n.stack.is_empty() && !c14n.seen_root {
                    c14n.out.push('\n');
                }
            }
            // Declaration, DOCTYPE, comments, and whitespace outside the root.
            _ => {}
        }
    }
    Ok(c14n.out.into_bytes())
}
