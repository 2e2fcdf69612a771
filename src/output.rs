//! Conversion results: per-page output, document metadata, the converted
//! document and its Markdown export.

use crate::config::PageSeparator;
use crate::converter::InputFormat;
use crate::error::PageError;
use serde::{Deserialize, Serialize};

/// The outcome of converting one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    pub markdown: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub retries: u8,
    /// Set when the page failed; `markdown` is empty in that case.
    pub error: Option<PageError>,
}

impl PageResult {
    /// A page produced without a VLM call (text documents).
    pub fn text(page_num: usize, markdown: String) -> Self {
        Self {
            page_num,
            markdown,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            retries: 0,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Metadata about the source document.
///
/// PDF documents fill the info-dictionary fields; other formats only carry
/// `format` and `page_count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: Option<String>,
}

/// Timing and token totals for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
}

/// A converted document, ready for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertedDocument {
    /// Name the document was submitted under.
    pub name: String,
    pub format: InputFormat,
    pub metadata: DocumentMetadata,
    /// Pages in page order, failed ones included.
    pub pages: Vec<PageResult>,
    pub page_separator: PageSeparator,
    pub include_metadata: bool,
}

impl ConvertedDocument {
    /// Assemble the Markdown for the whole document.
    ///
    /// Failed pages are skipped; separators are only placed between pages
    /// that made it into the output.
    pub fn export_to_markdown(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.include_metadata {
            parts.push(format_yaml_front_matter(&self.name, self.format, &self.metadata));
        }

        for (i, page) in self.pages.iter().filter(|p| p.is_ok()).enumerate() {
            if i > 0 {
                parts.push(self.page_separator.render(page.page_num));
            }
            parts.push(page.markdown.trim_end().to_string());
        }

        let mut markdown = parts.join("");
        markdown.push('\n');
        markdown
    }
}

/// Everything a single `convert` call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub document: ConvertedDocument,
    pub stats: ConversionStats,
}

fn yaml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Format document metadata as YAML front matter.
fn format_yaml_front_matter(name: &str, format: InputFormat, meta: &DocumentMetadata) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("source: {}\n", yaml_quote(name)));
    yaml.push_str(&format!("format: {}\n", format.as_str()));

    let fields = [
        ("title", &meta.title),
        ("author", &meta.author),
        ("subject", &meta.subject),
        ("creator", &meta.creator),
        ("producer", &meta.producer),
    ];
    for (key, value) in fields {
        if let Some(v) = value {
            yaml.push_str(&format!("{}: {}\n", key, yaml_quote(v)));
        }
    }
    yaml.push_str(&format!("pages: {}\n", meta.page_count));
    if let Some(ref v) = meta.pdf_version {
        yaml.push_str(&format!("pdf_version: {}\n", yaml_quote(v)));
    }

    yaml.push_str("---\n\n");
    yaml
}
