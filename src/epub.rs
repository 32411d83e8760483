//! Direct EPUB structural parse: container, package document, spine, TOC
//!
//! The decoder's text extraction is lossy on EPUB, so chapter content is
//! pulled straight out of the zip archive. Only three kinds of entries are
//! read: `META-INF/container.xml`, the OPF it points at, and the nav/NCX
//! document the OPF declares.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use percent_encoding::percent_decode_str;
use zip::ZipArchive;

use crate::document::TocEntry;
use crate::error::{Error, Result};

/// One `<item>` of the OPF manifest.
#[derive(Clone, Debug)]
pub struct ManifestItem {
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

/// One spine slot: the resolved archive path, or the offending href when
/// sanitisation rejected it. A bad href fails its own chapter request
/// without poisoning the rest of the document.
#[derive(Clone, Debug, PartialEq)]
pub enum SpineTarget {
    Resolved(String),
    Invalid(String),
}

/// Parsed EPUB structure: ordered spine of chapter paths plus the TOC.
#[derive(Clone, Debug)]
pub struct EpubPackage {
    pub opf_path: String,
    /// Spine chapters in reading order
    pub spine: Vec<SpineTarget>,
    pub toc: Vec<TocEntry>,
}

impl EpubPackage {
    /// Parse the archive structure from raw EPUB bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::malformed(format!("zip: {e}")))?;

        let container = read_entry_string(&mut archive, "META-INF/container.xml")?;
        let opf_path = opf_path_from_container(&container)?;
        let opf_base = base_dir(&opf_path);

        let opf = read_entry_string(&mut archive, &opf_path)?;
        let doc = roxmltree::Document::parse(&opf)
            .map_err(|e| Error::malformed(format!("opf: {e}")))?;

        let mut manifest: HashMap<String, ManifestItem> = HashMap::new();
        for node in doc.descendants() {
            if node.tag_name().name() != "item" {
                continue;
            }
            let (Some(id), Some(href), Some(media_type)) = (
                node.attribute("id"),
                node.attribute("href"),
                node.attribute("media-type"),
            ) else {
                continue;
            };
            manifest.insert(
                id.to_string(),
                ManifestItem {
                    href: href.to_string(),
                    media_type: media_type.to_string(),
                    properties: node.attribute("properties").map(str::to_string),
                },
            );
        }

        let mut spine = Vec::new();
        for node in doc.descendants() {
            if node.tag_name().name() != "itemref" {
                continue;
            }
            let Some(item) = node.attribute("idref").and_then(|id| manifest.get(id)) else {
                continue;
            };
            if !is_chapter_media_type(&item.media_type) {
                continue;
            }
            spine.push(match join_entry_path(&opf_base, &item.href) {
                Ok(path) => SpineTarget::Resolved(path),
                Err(_) => SpineTarget::Invalid(item.href.clone()),
            });
        }

        let toc = parse_toc(&mut archive, &manifest, &opf_base, &spine);

        Ok(Self {
            opf_path,
            spine,
            toc,
        })
    }

    #[must_use]
    pub fn chapter_count(&self) -> usize {
        self.spine.len()
    }

    /// Archive path of the spine chapter at `index`.
    pub fn chapter_path(&self, index: usize) -> Result<&str> {
        match self.spine.get(index) {
            Some(SpineTarget::Resolved(path)) => Ok(path),
            Some(SpineTarget::Invalid(href)) => Err(Error::invalid_path(href.clone())),
            None => Err(Error::out_of_bounds(format!(
                "chapter {index} of {}",
                self.spine.len()
            ))),
        }
    }

    /// Extract the exact bytes of the spine chapter at `index`.
    pub fn chapter_bytes(&self, bytes: &[u8], index: usize) -> Result<Vec<u8>> {
        let path = self.chapter_path(index)?;
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::malformed(format!("zip: {e}")))?;
        let mut entry = archive
            .by_name(path)
            .map_err(|e| Error::malformed(format!("zip entry {path}: {e}")))?;
        let mut out = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut out)
            .map_err(|e| Error::malformed(format!("zip entry {path}: {e}")))?;
        Ok(out)
    }
}

/// Validate and normalise an archive path or href.
///
/// Percent-decoding happens first; `..`, absolute paths, and NUL are
/// rejected on both the original and decoded forms, so an encoded traversal
/// cannot hide behind either representation.
pub fn sanitize_entry_path(raw: &str) -> Result<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| Error::invalid_path(raw))?
        .to_string();

    for form in [raw, decoded.as_str()] {
        if form.contains('\0') || form.starts_with('/') || form.starts_with('\\') {
            return Err(Error::invalid_path(raw));
        }
        if form.split(['/', '\\']).any(|seg| seg == "..") {
            return Err(Error::invalid_path(raw));
        }
    }

    // Normalise out "." segments; with ".." rejected above the result can
    // never climb past the archive root.
    let normalized: Vec<&str> = decoded
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();
    if normalized.is_empty() {
        return Err(Error::invalid_path(raw));
    }
    Ok(normalized.join("/"))
}

/// Join a manifest href against the OPF base directory, sanitising both.
fn join_entry_path(base: &str, href: &str) -> Result<String> {
    let href = strip_fragment(href);
    if base.is_empty() {
        sanitize_entry_path(href)
    } else {
        sanitize_entry_path(&format!("{base}/{href}"))
    }
}

fn strip_fragment(href: &str) -> &str {
    href.split('#').next().unwrap_or(href)
}

fn base_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn is_chapter_media_type(media_type: &str) -> bool {
    media_type == "application/xhtml+xml" || media_type == "text/html"
}

fn read_entry_string<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| Error::malformed(format!("zip entry {name}: {e}")))?;
    let mut out = String::new();
    entry
        .read_to_string(&mut out)
        .map_err(|e| Error::malformed(format!("zip entry {name}: {e}")))?;
    Ok(out)
}

fn opf_path_from_container(container: &str) -> Result<String> {
    let doc = roxmltree::Document::parse(container)
        .map_err(|e| Error::malformed(format!("container.xml: {e}")))?;
    for node in doc.descendants() {
        if node.tag_name().name() == "rootfile" {
            if let Some(path) = node.attribute("full-path") {
                return sanitize_entry_path(path);
            }
        }
    }
    Err(Error::malformed("container.xml has no rootfile"))
}

/// TOC per the OPF: EPUB-3 nav when a manifest item is flagged `nav`,
/// EPUB-2 NCX otherwise. A missing or unparsable TOC yields an empty tree.
fn parse_toc(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    manifest: &HashMap<String, ManifestItem>,
    opf_base: &str,
    spine: &[SpineTarget],
) -> Vec<TocEntry> {
    let spine_index: HashMap<&str, usize> = spine
        .iter()
        .enumerate()
        .filter_map(|(i, target)| match target {
            SpineTarget::Resolved(path) => Some((path.as_str(), i)),
            SpineTarget::Invalid(_) => None,
        })
        .collect();

    let nav_item = manifest.values().find(|item| {
        item.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|prop| prop == "nav"))
    });
    if let Some(item) = nav_item {
        if let Some(entries) = load_toc_document(archive, opf_base, &item.href)
            .map(|(content, toc_base)| parse_nav_document(&content, &toc_base, &spine_index))
        {
            return entries;
        }
    }

    let ncx_item = manifest
        .values()
        .find(|item| item.media_type == "application/x-dtbncx+xml");
    if let Some(item) = ncx_item {
        if let Some(entries) = load_toc_document(archive, opf_base, &item.href)
            .map(|(content, toc_base)| parse_ncx_document(&content, &toc_base, &spine_index))
        {
            return entries;
        }
    }

    Vec::new()
}

fn load_toc_document(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    opf_base: &str,
    href: &str,
) -> Option<(String, String)> {
    let path = join_entry_path(opf_base, href).ok()?;
    let content = read_entry_string(archive, &path).ok()?;
    Some((content, base_dir(&path)))
}

fn resolve_target(
    href: &str,
    toc_base: &str,
    spine_index: &HashMap<&str, usize>,
) -> Option<usize> {
    let joined = join_entry_path(toc_base, href).ok()?;
    spine_index.get(joined.as_str()).copied()
}

/// EPUB-3 nav document: the first `<nav>`'s `<ol>` of `<li><a>` entries,
/// nested `<ol>`s forming children.
fn parse_nav_document(
    content: &str,
    toc_base: &str,
    spine_index: &HashMap<&str, usize>,
) -> Vec<TocEntry> {
    let Ok(doc) = roxmltree::Document::parse(content) else {
        return Vec::new();
    };

    let toc_nav = doc.descendants().find(|n| {
        n.tag_name().name() == "nav"
            && n.attributes()
                .find(|a| a.name() == "type")
                .is_none_or(|a| a.value() == "toc")
    });
    let Some(nav) = toc_nav else {
        return Vec::new();
    };
    let Some(list) = nav.children().find(|n| n.tag_name().name() == "ol") else {
        return Vec::new();
    };
    parse_nav_list(&list, toc_base, spine_index)
}

fn parse_nav_list(
    list: &roxmltree::Node<'_, '_>,
    toc_base: &str,
    spine_index: &HashMap<&str, usize>,
) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    for li in list.children().filter(|n| n.tag_name().name() == "li") {
        let Some(anchor) = li.descendants().find(|n| n.tag_name().name() == "a") else {
            continue;
        };
        let label = node_text(&anchor);
        if label.is_empty() {
            continue;
        }
        let item_index = anchor
            .attribute("href")
            .and_then(|href| resolve_target(href, toc_base, spine_index));
        let children = li
            .children()
            .find(|n| n.tag_name().name() == "ol")
            .map(|ol| parse_nav_list(&ol, toc_base, spine_index))
            .unwrap_or_default();
        entries.push(TocEntry {
            label,
            item_index,
            children,
        });
    }
    entries
}

/// EPUB-2 NCX: `<navMap>` of nested `<navPoint>`s.
fn parse_ncx_document(
    content: &str,
    toc_base: &str,
    spine_index: &HashMap<&str, usize>,
) -> Vec<TocEntry> {
    let Ok(doc) = roxmltree::Document::parse(content) else {
        return Vec::new();
    };
    let Some(nav_map) = doc.descendants().find(|n| n.tag_name().name() == "navMap") else {
        return Vec::new();
    };
    nav_map
        .children()
        .filter(|n| n.tag_name().name() == "navPoint")
        .map(|point| parse_nav_point(&point, toc_base, spine_index))
        .collect()
}

fn parse_nav_point(
    point: &roxmltree::Node<'_, '_>,
    toc_base: &str,
    spine_index: &HashMap<&str, usize>,
) -> TocEntry {
    let label = point
        .children()
        .find(|n| n.tag_name().name() == "navLabel")
        .and_then(|l| l.descendants().find(|n| n.tag_name().name() == "text"))
        .map(|t| node_text(&t))
        .unwrap_or_default();
    let item_index = point
        .children()
        .find(|n| n.tag_name().name() == "content")
        .and_then(|c| c.attribute("src"))
        .and_then(|src| resolve_target(src, toc_base, spine_index));
    let children = point
        .children()
        .filter(|n| n.tag_name().name() == "navPoint")
        .map(|child| parse_nav_point(&child, toc_base, spine_index))
        .collect();
    TocEntry {
        label,
        item_index,
        children,
    }
}

fn node_text(node: &roxmltree::Node<'_, '_>) -> String {
    let mut out = String::new();
    for descendant in node.descendants() {
        if let Some(text) = descendant.text() {
            out.push_str(text);
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_epub(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let stored = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
            zip.start_file("mimetype", stored).unwrap();
            zip.write_all(b"application/epub+zip").unwrap();
            let deflated =
                FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            for (name, content) in entries {
                zip.start_file(*name, deflated).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    fn sample_epub(spine_href: &str) -> Vec<u8> {
        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <manifest>
    <item id="ch1" href="{spine_href}" media-type="application/xhtml+xml"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
  </spine>
</package>"#
        );
        let ncx = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Chapter One</text></navLabel>
      <content src="ch1.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;
        build_epub(&[
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", &opf),
            ("OEBPS/toc.ncx", ncx),
            ("OEBPS/ch1.xhtml", "<html><body><p>Hi</p></body></html>"),
        ])
    }

    #[test]
    fn parses_spine_and_ncx_toc() {
        let bytes = sample_epub("ch1.xhtml");
        let package = EpubPackage::parse(&bytes).unwrap();

        assert_eq!(package.opf_path, "OEBPS/content.opf");
        assert_eq!(
            package.spine,
            vec![SpineTarget::Resolved("OEBPS/ch1.xhtml".to_string())]
        );
        assert_eq!(package.toc.len(), 1);
        assert_eq!(package.toc[0].label, "Chapter One");
        assert_eq!(package.toc[0].item_index, Some(0));
    }

    #[test]
    fn chapter_bytes_are_exact() {
        let bytes = sample_epub("ch1.xhtml");
        let package = EpubPackage::parse(&bytes).unwrap();
        let chapter = package.chapter_bytes(&bytes, 0).unwrap();
        assert_eq!(chapter, b"<html><body><p>Hi</p></body></html>");
    }

    #[test]
    fn traversal_spine_href_fails_only_that_chapter() {
        let bytes = sample_epub("../../etc/passwd");
        let package = EpubPackage::parse(&bytes).unwrap();
        let err = package.chapter_bytes(&bytes, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
        assert!(err.to_string().contains("../../etc/passwd"));
    }

    #[test]
    fn sanitize_rejects_both_forms() {
        assert!(sanitize_entry_path("../x").is_err());
        assert!(sanitize_entry_path("a/../../x").is_err());
        assert!(sanitize_entry_path("%2e%2e/x").is_err());
        assert!(sanitize_entry_path("a/%2E%2E/x").is_err());
        assert!(sanitize_entry_path("/abs").is_err());
        assert!(sanitize_entry_path("%2fabs").is_err());
        assert!(sanitize_entry_path("a\0b").is_err());
        assert!(sanitize_entry_path("a%00b").is_err());
    }

    #[test]
    fn sanitize_normalises_dot_segments() {
        assert_eq!(sanitize_entry_path("OEBPS/./ch1.xhtml").unwrap(), "OEBPS/ch1.xhtml");
        assert_eq!(sanitize_entry_path("OEBPS//ch1.xhtml").unwrap(), "OEBPS/ch1.xhtml");
        assert_eq!(
            sanitize_entry_path("OEBPS/text%20one.xhtml").unwrap(),
            "OEBPS/text one.xhtml"
        );
    }

    #[test]
    fn nav_toc_parses_nested_lists() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="c2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;
        let nav = r#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="toc">
    <ol>
      <li><a href="c1.xhtml">First</a>
        <ol><li><a href="c2.xhtml">Second</a></li></ol>
      </li>
    </ol>
  </nav>
</body>
</html>"#;
        let bytes = build_epub(&[
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", opf),
            ("OEBPS/nav.xhtml", nav),
            ("OEBPS/c1.xhtml", "<html/>"),
            ("OEBPS/c2.xhtml", "<html/>"),
        ]);

        let package = EpubPackage::parse(&bytes).unwrap();
        assert_eq!(package.spine.len(), 2);
        assert_eq!(package.toc.len(), 1);
        assert_eq!(package.toc[0].label, "First");
        assert_eq!(package.toc[0].item_index, Some(0));
        assert_eq!(package.toc[0].children.len(), 1);
        assert_eq!(package.toc[0].children[0].label, "Second");
        assert_eq!(package.toc[0].children[0].item_index, Some(1));
    }

    #[test]
    fn missing_toc_yields_empty_tree() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <manifest>
    <item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="c1"/></spine>
</package>"#;
        let bytes = build_epub(&[
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", opf),
            ("OEBPS/c1.xhtml", "<html/>"),
        ]);
        let package = EpubPackage::parse(&bytes).unwrap();
        assert_eq!(package.spine.len(), 1);
        assert!(package.toc.is_empty());
    }
}
