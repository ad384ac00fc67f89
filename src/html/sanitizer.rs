//! Page sanitizer using lol_html for streaming HTML rewriting
//!
//! Unwraps presentation-only tags (`span`, `font` by default) from content
//! pages while leaving the rest of the markup and text where it was.

use std::fs;
use std::io;
use std::path::Path;

use encoding_rs::{Encoding, UTF_8};
use lol_html::{element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use thiserror::Error;

/// Declaration every sanitized page starts with
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Tags unwrapped when nothing else is configured
pub const DEFAULT_DISALLOWED_TAGS: &[&str] = &["span", "font"];

/// Page structure tags unwrapped in full-clean mode
const STRUCTURE_TAGS: &[&str] = &["html", "head", "title"];

/// Elements dropped with their content in full-clean mode
const KILLED_TAGS: &[&str] = &["style", "meta"];

/// `<title/>`, `<script .../>` and the other raw-text/RCDATA elements written
/// self-closing. The HTML tokenizer ignores the `/`, so these must become
/// start/end pairs or the rest of the page is read as their text.
static SELF_CLOSING_RAW_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<(title|script|style|textarea|iframe|noscript|noembed|noframes|xmp)(\s(?:[^>"']|"[^"]*"|'[^']*')*?)?\s*/>"#,
    )
    .unwrap()
});

/// `encoding` pseudo-attribute of a leading XML declaration
static DECLARED_ENCODING: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r#"^\s*<\?xml[^>]*?\sencoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).unwrap()
});

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("Invalid tag name in sanitizer configuration: {0:?}")]
    InvalidTag(String),

    #[error("Page is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("Page is not well-formed: {0}")]
    Malformed(String),

    #[error("HTML rewrite failed: {0}")]
    Rewrite(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How much broken markup a page may contain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Leniency {
    /// Tolerant HTML parsing; malformed markup passes through untouched
    #[default]
    Lenient,
    /// Page must be well-formed XML before it is rewritten
    Strict,
}

/// Sanitizer configuration
#[derive(Debug, Clone)]
pub struct SanitizeConfig {
    /// Tags to unwrap (matched case-insensitively)
    pub disallowed_tags: Vec<String>,
    /// Also drop `style`/`meta`, inline styles and page structure tags
    pub full_clean: bool,
    pub leniency: Leniency,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            disallowed_tags: DEFAULT_DISALLOWED_TAGS.iter().map(|t| t.to_string()).collect(),
            full_clean: false,
            leniency: Leniency::Lenient,
        }
    }
}

/// Rewrites content pages according to a [`SanitizeConfig`]
#[derive(Debug, Clone)]
pub struct Sanitizer {
    unwrap_tags: Vec<String>,
    full_clean: bool,
    leniency: Leniency,
}

impl Sanitizer {
    pub fn new(config: SanitizeConfig) -> Result<Self, SanitizeError> {
        let mut unwrap_tags = Vec::with_capacity(config.disallowed_tags.len());
        for tag in &config.disallowed_tags {
            let tag = tag.trim().to_ascii_lowercase();
            if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(SanitizeError::InvalidTag(tag));
            }
            if !unwrap_tags.contains(&tag) {
                unwrap_tags.push(tag);
            }
        }

        Ok(Self {
            unwrap_tags,
            full_clean: config.full_clean,
            leniency: config.leniency,
        })
    }

    /// Sanitize the page at `path` and write the result back in place.
    ///
    /// The page is rewritten even when nothing was removed.
    pub fn sanitize(&self, path: &Path) -> Result<(), SanitizeError> {
        let bytes = fs::read(path)?;
        let html = decode_page(&bytes)?;
        let cleaned = self.sanitize_html(&html)?;
        fs::write(path, cleaned)?;
        Ok(())
    }

    /// Sanitize a page held in memory
    pub fn sanitize_html(&self, html: &str) -> Result<String, SanitizeError> {
        let html = html.trim_start_matches('\u{feff}');

        if self.leniency == Leniency::Strict {
            check_well_formed(html)?;
        }

        let html = SELF_CLOSING_RAW_TEXT.replace_all(html, "<${1}${2}></${1}>");

        let mut handlers = Vec::new();

        for tag in &self.unwrap_tags {
            handlers.push(element!(tag.as_str(), |el| {
                el.remove_and_keep_content();
                Ok(())
            }));
        }

        if self.full_clean {
            for tag in KILLED_TAGS {
                handlers.push(element!(*tag, |el| {
                    el.remove();
                    Ok(())
                }));
            }
            for tag in STRUCTURE_TAGS {
                handlers.push(element!(*tag, |el| {
                    el.remove_and_keep_content();
                    Ok(())
                }));
            }
            handlers.push(element!("*[style]", |el| {
                el.remove_attribute("style");
                Ok(())
            }));
        }

        let rewritten = rewrite_str(
            &html,
            RewriteStrSettings {
                element_content_handlers: handlers,
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|e| SanitizeError::Rewrite(e.to_string()))?;

        Ok(declare_encoding(&rewritten))
    }
}

/// Decode page bytes by BOM, then by the XML declaration, defaulting to UTF-8
fn decode_page(bytes: &[u8]) -> Result<String, SanitizeError> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => (declared_encoding(bytes)?.unwrap_or(UTF_8), bytes),
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        return Err(SanitizeError::Encoding(format!(
            "invalid {} byte sequence",
            encoding.name()
        )));
    }
    Ok(text.into_owned())
}

fn declared_encoding(bytes: &[u8]) -> Result<Option<&'static Encoding>, SanitizeError> {
    let head = &bytes[..bytes.len().min(1024)];
    let Some(captures) = DECLARED_ENCODING.captures(head) else {
        return Ok(None);
    };
    let label = &captures[1];

    // A declaration readable as ASCII cannot really be UTF-16
    Encoding::for_label(label)
        .map(|encoding| Some(encoding.output_encoding()))
        .ok_or_else(|| {
            SanitizeError::Encoding(format!(
                "unknown declared encoding {:?}",
                String::from_utf8_lossy(label)
            ))
        })
}

/// Put a single UTF-8 XML declaration in front of the page
fn declare_encoding(html: &str) -> String {
    let trimmed = html.trim_start();
    let body = match trimmed.strip_prefix("<?xml") {
        Some(rest) => match rest.find("?>") {
            Some(end) => rest[end + 2..].trim_start_matches(|c| c == '\r' || c == '\n'),
            None => html,
        },
        None => html,
    };
    format!("{}\n{}", XML_DECLARATION, body)
}

/// Reject pages that are not well-formed XML
fn check_well_formed(xml: &str) -> Result<(), SanitizeError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SanitizeError::Malformed(format!(
                    "{} (at byte {})",
                    e,
                    reader.buffer_position()
                )))
            }
        }
    }

    if depth != 0 {
        return Err(SanitizeError::Malformed(format!(
            "{} element(s) left open at end of document",
            depth
        )));
    }

    Ok(())
}
