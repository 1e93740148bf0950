//! Turning stored blobs into plain text before chunking.
//!
//! The core ships [`PlainTextExtractor`], which accepts UTF-8 text formats.
//! Applications can wrap it with extractors for binary formats (PDF, OOXML).

use crate::error::{CoreError, Result};

/// Extracts plain UTF-8 text from an uploaded blob.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String>;
}

/// MIME types [`PlainTextExtractor`] accepts besides `text/*`.
const TEXTUAL_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/x-ndjson",
];

/// Whether `mime_type` is a text format the plain extractor understands.
pub fn is_textual(mime_type: &str) -> bool {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/") || TEXTUAL_MIME_TYPES.contains(&essence.as_str())
}

/// Decodes textual blobs as UTF-8, rejecting everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        if !is_textual(mime_type) {
            return Err(CoreError::InvalidInput(format!(
                "unsupported content-type: {}",
                mime_type
            )));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| CoreError::InvalidInput("document is not valid UTF-8 text".to_string()))?;
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_mime_detection() {
        assert!(is_textual("text/plain"));
        assert!(is_textual("text/markdown; charset=utf-8"));
        assert!(is_textual("application/json"));
        assert!(!is_textual("application/pdf"));
        assert!(!is_textual("image/png"));
    }

    #[test]
    fn strips_bom() {
        let bytes = "\u{feff}hello".as_bytes();
        assert_eq!(PlainTextExtractor.extract(bytes, "text/plain").unwrap(), "hello");
    }

    #[test]
    fn rejects_invalid_utf8_and_binary_types() {
        assert!(PlainTextExtractor.extract(&[0xff, 0xfe, 0x00], "text/plain").is_err());
        assert!(PlainTextExtractor.extract(b"%PDF", "application/pdf").is_err());
    }
}
