//! Stylesheets compiled into the binary, addressed as `embedded:<name>`.

const PREFIX: &str = "embedded:";

const STYLESHEETS: &[(&str, &[u8])] = &[(
    "tsl-to-html.xslt",
    include_bytes!("stylesheets/tsl-to-html.xslt"),
)];

/// Reference string for a built-in stylesheet.
pub fn path(name: &str) -> String {
    format!("{PREFIX}{name}")
}

pub fn is_embedded_path(reference: &str) -> bool {
    reference.len() > PREFIX.len() && reference.starts_with(PREFIX)
}

/// Name of a built-in reference; other references are returned unchanged.
pub fn extract_name(reference: &str) -> &str {
    reference.strip_prefix(PREFIX).unwrap_or(reference)
}

pub fn get(name: &str) -> Option<&'static [u8]> {
    STYLESHEETS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, bytes)| *bytes)
}

/// Names of every built-in stylesheet.
pub fn list() -> Vec<&'static str> {
    STYLESHEETS.iter().map(|(n, _)| *n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_stylesheet_is_bundled() {
        assert!(list().contains(&"tsl-to-html.xslt"));
        assert!(list().iter().all(|n| n.ends_with(".xslt")));

        let xslt = String::from_utf8(get("tsl-to-html.xslt").unwrap().to_vec()).unwrap();
        assert!(xslt.contains("xsl:stylesheet"));
        assert!(xslt.contains("xsl:template"));
        assert!(xslt.contains("xmlns:tsl"));
        assert!(xslt.contains("TrustServiceStatusList"));
        assert!(xslt.contains("PicoCSS"));
    }

    #[test]
    fn unknown_names_are_absent() {
        assert!(get("nonexistent.xslt").is_none());
        assert!(get("").is_none());
    }

    #[test]
    fn path_and_extract_round_trip() {
        for name in ["tsl-to-html.xslt", "subdir/file.xslt", "a", ""] {
            assert_eq!(extract_name(&path(name)), name);
        }
    }

    #[test]
    fn embedded_path_detection() {
        assert!(is_embedded_path("embedded:tsl-to-html.xslt"));
        assert!(is_embedded_path("embedded:subdir/file.xslt"));
        assert!(!is_embedded_path("/path/to/file.xslt"));
        assert!(!is_embedded_path("./file.xslt"));
        assert!(!is_embedded_path(""));
        assert!(!is_embedded_path("embedded"));
        assert!(!is_embedded_path("embedded:"));
        assert!(!is_embedded_path("http://example.com/file.xslt"));
        assert!(!is_embedded_path("/path/embedded:file.xslt"));
    }

    #[test]
    fn extract_leaves_file_paths_alone() {
        assert_eq!(extract_name("/path/to/file.xslt"), "/path/to/file.xslt");
        assert_eq!(extract_name("./file.xslt"), "./file.xslt");
    }
}
