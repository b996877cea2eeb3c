use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};
use tsl_types::{Result, TslError};

use crate::context::Context;
use crate::engine::Pipeline;
use crate::registry::StepHandler;

/// `generate_index <html-dir> [title]`: write `index.html` linking every
/// TSL page produced by the `tsl-to-html.xslt` transform.
pub struct GenerateIndexStep;

pub const DEFAULT_TITLE: &str = "Trust Status List Index";
const INDEX_FILE: &str = "index.html";
const TITLE_SUFFIX: &str = " - Trust Service Status List";

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<title>\s*(.*?)\s*</title>").expect("valid regex"));
static TERRITORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<strong>Territory:</strong>\s*([^<\s]+)").expect("valid regex")
});
static SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<strong>TSL Sequence #:</strong>\s*([^<|\s]+)").expect("valid regex")
});
static ISSUE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<strong>Issue Date:</strong>\s*([^<|]*?)\s*[|<]").expect("valid regex")
});
static NEXT_UPDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<strong>Next Update:</strong>\s*([^<|]*?)\s*[|<]").expect("valid regex")
});
static TSL_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<strong>TSL Type:</strong>\s*(?:<code>)?\s*([^<\s]+)").expect("valid regex")
});
static SERVICE_CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="service-card""#).expect("valid regex"));

/// Facts scraped from one rendered TSL page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageSummary {
    pub file: String,
    pub title: String,
    pub territory: String,
    pub sequence: String,
    pub issue_date: String,
    pub next_update: String,
    pub tsl_type: String,
    pub services: usize,
}

fn capture(re: &Regex, html: &str) -> String {
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

impl PageSummary {
    /// `None` when the page names no territory.
    pub fn extract(file: &str, html: &str) -> Option<Self> {
        let territory = capture(&TERRITORY, html);
        if territory.is_empty() {
            return None;
        }
        let title = capture(&TITLE, html);
        let title = title.strip_suffix(TITLE_SUFFIX).unwrap_or(&title).to_string();
        Some(Self {
            file: file.to_string(),
            title,
            territory,
            sequence: capture(&SEQUENCE, html),
            issue_date: capture(&ISSUE_DATE, html),
            next_update: capture(&NEXT_UPDATE, html),
            tsl_type: capture(&TSL_TYPE, html),
            services: SERVICE_CARD.find_iter(html).count(),
        })
    }

    /// Last path segment of the TSL type URI.
    fn short_type(&self) -> &str {
        self.tsl_type.rsplit('/').next().unwrap_or(&self.tsl_type)
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Scan `dir` for TSL pages, sorted by territory.
pub fn scan_pages(dir: &Path) -> Result<Vec<PageSummary>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == INDEX_FILE || path.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        let html = std::fs::read_to_string(&path)?;
        match PageSummary::extract(name, &html) {
            Some(page) => pages.push(page),
            None => debug!(file = %name, "Skipping HTML page without a territory"),
        }
    }
    pages.sort_by(|a, b| a.territory.cmp(&b.territory).then_with(|| a.file.cmp(&b.file)));
    Ok(pages)
}

pub fn render_index(title: &str, pages: &[PageSummary]) -> String {
    let title = escape(title);
    let mut html = format!(
        r#"<!DOCTYPE html>
<html lang="en" data-theme="light">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/@picocss/pico@1/css/pico.min.css"/>
    <style>
        .badge {{ display: inline-block; padding: 0.1rem 0.5rem; border-radius: 0.4rem; font-size: 0.8rem; }}
        .badge-country {{ background: #1e88e5; color: #fff; font-weight: bold; }}
    </style>
</head>
<body>
    <main class="container">
        <h1>{title}</h1>
        <p>{count} trust status list(s)</p>
        <table>
            <thead>
                <tr><th>Territory</th><th>List</th><th>Type</th><th>Sequence</th><th>Issued</th><th>Next Update</th><th>Services</th></tr>
            </thead>
            <tbody>
"#,
        count = pages.len()
    );
    for page in pages {
        let _ = writeln!(
            html,
            r#"                <tr><td><span class="badge badge-country">{}</span></td><td><a href="{}">{}</a></td><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>"#,
            escape(&page.territory),
            escape(&page.file),
            escape(if page.title.is_empty() { &page.file } else { &page.title }),
            escape(page.short_type()),
            escape(&page.sequence),
            escape(&page.issue_date),
            escape(&page.next_update),
            page.services,
        );
    }
    html.push_str(
        "            </tbody>\n        </table>\n    </main>\n</body>\n</html>\n",
    );
    html
}

#[async_trait]
impl StepHandler for GenerateIndexStep {
    fn step_name(&self) -> &str {
        "generate_index"
    }

    async fn execute(&self, _pipeline: &Pipeline, _ctx: &mut Context, args: &[String]) -> Result<()> {
        let dir = args
            .first()
            .ok_or_else(|| TslError::MissingArgument("HTML directory".into()))?;
        let title = args.get(1).map(String::as_str).unwrap_or(DEFAULT_TITLE);
        let dir = Path::new(dir);
        if !dir.is_dir() {
            return Err(TslError::InvalidArguments(format!(
                "HTML directory {} does not exist",
                dir.display()
            )));
        }

        let pages = scan_pages(dir)?;
        if pages.is_empty() {
            return Err(TslError::InvalidArguments(format!(
                "no TSL HTML files found in {}",
                dir.display()
            )));
        }
        let path = dir.join(INDEX_FILE);
        std::fs::write(&path, render_index(title, &pages))?;
        info!(path = %path.display(), pages = pages.len(), "Generated TSL index");
        Ok(())
    }
}
