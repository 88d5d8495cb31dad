//! Document parsing (C3 ingestion front door). Per the data model (§3),
//! the core performs only UTF-8 text extraction from raw bytes — binary
//! format parsing (PDF, OCR, spreadsheets) is an external collaborator's
//! job per the Non-goals. HTML is the one structured format handled here,
//! since stripping tags is text normalization, not binary decoding.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::types::DocumentFormat;

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub title: String,
    pub metadata: HashMap<String, String>,
    pub format: DocumentFormat,
}

#[derive(Default)]
pub struct DocumentParser;

impl DocumentParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_file(&self, path: &Path) -> Result<ParsedDocument> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt")
            .to_lowercase();

        let format = DocumentFormat::from_extension(&extension);
        // Use file stem (without extension) for a cleaner display title
        let title = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
            .to_string();

        let content = self.extract_text(path, &extension)?;

        let mut metadata = HashMap::new();
        metadata.insert("file_path".to_string(), path.display().to_string());
        metadata.insert("file_extension".to_string(), extension);

        if let Ok(meta) = std::fs::metadata(path) {
            metadata.insert("file_size".to_string(), meta.len().to_string());
        }

        Ok(ParsedDocument {
            content,
            title,
            metadata,
            format,
        })
    }

    /// Read raw bytes and decode as UTF-8 (lossily, for whatever stray
    /// non-UTF-8 bytes a text-ish file may contain). HTML gets its tags
    /// stripped first; every other extension is passed through as-is.
    fn extract_text(&self, path: &Path, extension: &str) -> Result<String> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let raw = String::from_utf8_lossy(&bytes).into_owned();

        Ok(match extension {
            "html" | "htm" => strip_html_tags(&raw),
            _ => raw,
        })
    }

    pub fn parse_content(
        &self,
        content: &str,
        format: DocumentFormat,
        title: &str,
    ) -> ParsedDocument {
        ParsedDocument {
            content: content.to_string(),
            title: title.to_string(),
            metadata: HashMap::new(),
            format,
        }
    }

    /// Decode raw bytes as UTF-8 and apply the same per-format normalization
    /// as [`Self::parse_file`] (HTML tag stripping; everything else
    /// passed through), for callers that receive bytes directly rather than
    /// a path on disk (e.g. `ingest_document` over HTTP upload).
    pub fn decode_bytes(&self, bytes: &[u8], extension: &str) -> Result<String> {
        let raw = std::str::from_utf8(bytes)
            .context("document bytes are not valid UTF-8; decode binary formats upstream")?;
        Ok(match extension {
            "html" | "htm" => strip_html_tags(raw),
            _ => raw.to_string(),
        })
    }
}

/// Strip HTML tags and decode common entities, returning visible text content.
fn strip_html_tags(html: &str) -> String {
    let mut result = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut last_was_whitespace = false;

    let lower = html.to_lowercase();
    let chars: Vec<char> = html.chars().collect();
    let len = chars.len();
    let mut i = 0;

    while i < len {
        if in_script {
            // Skip until </script>
            if i + 9 <= len && &lower[i..i + 9] == "</script>" {
                in_script = false;
                i += 9;
            } else {
                i += 1;
            }
            continue;
        }
        if in_style {
            if i + 8 <= len && &lower[i..i + 8] == "</style>" {
                in_style = false;
                i += 8;
            } else {
                i += 1;
            }
            continue;
        }

        if chars[i] == '<' {
            // Check for <script or <style
            if i + 7 <= len && &lower[i..i + 7] == "<script" {
                in_script = true;
                i += 7;
                continue;
            }
            if i + 6 <= len && &lower[i..i + 6] == "<style" {
                in_style = true;
                i += 6;
                continue;
            }
            in_tag = true;

            // Block elements get a newline
            let tag_lower = &lower[i..];
            let is_block = tag_lower.starts_with("<p")
                || tag_lower.starts_with("<div")
                || tag_lower.starts_with("<br")
                || tag_lower.starts_with("<h1")
                || tag_lower.starts_with("<h2")
                || tag_lower.starts_with("<h3")
                || tag_lower.starts_with("<h4")
                || tag_lower.starts_with("<li")
                || tag_lower.starts_with("<tr")
                || tag_lower.starts_with("</p")
                || tag_lower.starts_with("</div")
                || tag_lower.starts_with("</tr");

            if is_block && !result.is_empty() && !result.ends_with('\n') {
                result.push('\n');
                last_was_whitespace = true;
            }

            // <td> / <th> get a tab separator
            if tag_lower.starts_with("<td") || tag_lower.starts_with("<th") {
                if !result.is_empty() && !result.ends_with('\n') && !result.ends_with('\t') {
                    result.push('\t');
                }
            }

            i += 1;
            continue;
        }

        if chars[i] == '>' && in_tag {
            in_tag = false;
            i += 1;
            continue;
        }

        if !in_tag {
            // Decode HTML entities
            if chars[i] == '&' {
                if i + 4 <= len && &html[i..i + 4] == "&lt;" {
                    result.push('<');
                    i += 4;
                    last_was_whitespace = false;
                    continue;
                }
                if i + 4 <= len && &html[i..i + 4] == "&gt;" {
                    result.push('>');
                    i += 4;
                    last_was_whitespace = false;
                    continue;
                }
                if i + 5 <= len && &html[i..i + 5] == "&amp;" {
                    result.push('&');
                    i += 5;
                    last_was_whitespace = false;
                    continue;
                }
                if i + 6 <= len && &html[i..i + 6] == "&nbsp;" {
                    result.push(' ');
                    i += 6;
                    last_was_whitespace = true;
                    continue;
                }
                if i + 6 <= len && &html[i..i + 6] == "&quot;" {
                    result.push('"');
                    i += 6;
                    last_was_whitespace = false;
                    continue;
                }
            }

            let ch = chars[i];
            if ch.is_whitespace() {
                if !last_was_whitespace && !result.is_empty() {
                    result.push(if ch == '\n' { '\n' } else { ' ' });
                    last_was_whitespace = true;
                }
            } else {
                result.push(ch);
                last_was_whitespace = false;
            }
        }
        i += 1;
    }

    // Clean up excessive blank lines
    let mut cleaned = String::with_capacity(result.len());
    let mut blank_lines = 0;
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_lines += 1;
            if blank_lines <= 1 {
                cleaned.push('\n');
            }
        } else {
            blank_lines = 0;
            if !cleaned.is_empty() && !cleaned.ends_with('\n') {
                cleaned.push('\n');
            }
            cleaned.push_str(trimmed);
        }
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_keeps_text() {
        let html = "<html><body><p>Hello <b>world</b></p></body></html>";
        let text = strip_html_tags(html);
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn decodes_common_entities() {
        let html = "<p>Tom &amp; Jerry &lt;tag&gt;</p>";
        assert_eq!(strip_html_tags(html), "Tom & Jerry <tag>");
    }

    #[test]
    fn parse_content_builds_parsed_document() {
        let parser = DocumentParser::new();
        let doc = parser.parse_content("hello world", DocumentFormat::TXT, "note");
        assert_eq!(doc.title, "note");
        assert_eq!(doc.content, "hello world");
        assert!(doc.metadata.is_empty());
    }
}
