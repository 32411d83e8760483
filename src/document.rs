//! Document identity, format sniffing, and load-time metadata

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// Externally supplied document identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub String);

impl DocumentId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Epub,
}

impl DocumentFormat {
    /// MIME hint handed to the decoder.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Epub => "application/epub+zip",
        }
    }

    /// Magic string for `mupdf::Document::from_bytes`.
    #[must_use]
    pub const fn magic(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
        }
    }
}

/// Detect the document format from magic bytes, confirmed by the filename
/// extension when the bytes are ambiguous. ZIP-like bytes default to EPUB.
pub fn sniff_format(bytes: &[u8], filename: Option<&str>) -> Result<DocumentFormat> {
    if bytes.starts_with(b"%PDF") {
        return Ok(DocumentFormat::Pdf);
    }
    if bytes.starts_with(b"PK") {
        // Could be any zip container; trust a .pdf extension over the sniff
        // only when it disagrees outright.
        if let Some(name) = filename {
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".pdf") {
                return Ok(DocumentFormat::Pdf);
            }
        }
        return Ok(DocumentFormat::Epub);
    }
    // Fall back to the extension alone for headerless edge cases.
    if let Some(name) = filename {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            return Ok(DocumentFormat::Pdf);
        }
        if lower.ends_with(".epub") {
            return Ok(DocumentFormat::Epub);
        }
    }
    Err(Error::UnknownFormat)
}

/// Stable hash of document bytes; keys the persistent thumbnail tier.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = md5::compute(bytes);
    format!("{digest:x}")
}

/// A single entry in the table of contents.
#[derive(Clone, Debug, PartialEq)]
pub struct TocEntry {
    /// Display label
    pub label: String,
    /// Target item (page for PDF, chapter for EPUB) when resolvable
    pub item_index: Option<usize>,
    pub children: Vec<TocEntry>,
}

/// Load-time document description, immutable once built.
#[derive(Clone, Debug)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub format: DocumentFormat,
    /// Pages for PDF, spine chapters for EPUB
    pub item_count: usize,
    pub toc: Vec<TocEntry>,
    /// title, author, subject, creation date; absent values permitted
    pub metadata: HashMap<String, String>,
    pub has_text_layer: bool,
}

/// Convert decoder outlines into the TOC tree. Absent outlines are fine.
#[must_use]
pub fn toc_from_outlines(outlines: &[mupdf::Outline]) -> Vec<TocEntry> {
    outlines
        .iter()
        .map(|outline| TocEntry {
            label: if outline.title.is_empty() {
                "Untitled".to_string()
            } else {
                outline.title.clone()
            },
            item_index: outline.dest.map(|d| d.loc.page_number as usize),
            children: toc_from_outlines(&outline.down),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_pdf_magic() {
        assert_eq!(
            sniff_format(b"%PDF-1.7 rest", None).unwrap(),
            DocumentFormat::Pdf
        );
    }

    #[test]
    fn zip_bytes_default_to_epub() {
        assert_eq!(
            sniff_format(b"PK\x03\x04data", None).unwrap(),
            DocumentFormat::Epub
        );
        assert_eq!(
            sniff_format(b"PK\x03\x04data", Some("book.epub")).unwrap(),
            DocumentFormat::Epub
        );
    }

    #[test]
    fn extension_confirms_ambiguous_bytes() {
        assert_eq!(
            sniff_format(b"PK\x03\x04data", Some("weird.PDF")).unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            sniff_format(b"\x00\x00", Some("book.epub")).unwrap(),
            DocumentFormat::Epub
        );
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert!(matches!(
            sniff_format(b"GIF89a", None),
            Err(Error::UnknownFormat)
        ));
    }

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash(b"same bytes");
        let b = content_hash(b"same bytes");
        assert_eq!(a, b);
        assert_ne!(a, content_hash(b"other bytes"));
        assert_eq!(a.len(), 32);
    }
}
