//! Single-document decoder endpoint
//!
//! A `DecoderHost` owns at most one live mupdf document at a time and
//! serves render/text/search requests synchronously. Decoder objects
//! (pages, pixmaps, devices) are scoped to each call so cleanup happens on
//! every exit path, errors included.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use mupdf::{Colorspace, Device, Document, IRect, Matrix, MetadataName, Pixmap, TextPageFlags};
use mupdf::text_page::TextBlockType;

use crate::document::{toc_from_outlines, DocumentFormat, DocumentId, sniff_format};
use crate::epub::EpubPackage;
use crate::error::{Error, Result};
use crate::tile::{RasterFormat, TileCoord};
use crate::worker::request::{
    CharBox, LoadedDocument, Quad, Raster, RasterPayload, RenderTiming, SearchHit, StructuredPage,
    TextItem,
};
use crate::worker::slots::{RasterSlots, SlotRef};

/// Output pixel dimensions are capped at this in either axis.
pub const MAX_RENDER_DIMENSION: f32 = 4096.0;

/// Layout pane for reflowable EPUB content, document units.
const EPUB_LAYOUT_WIDTH: f32 = 800.0;
const EPUB_LAYOUT_HEIGHT: f32 = 600.0;
const EPUB_LAYOUT_EM: f32 = 12.0;

struct LoadedDoc {
    id: DocumentId,
    format: DocumentFormat,
    doc: Document,
    /// EPUB keeps a private copy of the archive for direct chapter reads
    bytes: Option<Arc<Vec<u8>>>,
    epub: Option<EpubPackage>,
}

/// Decoder endpoint holding one document at a time, keyed by id.
pub struct DecoderHost {
    current: Option<LoadedDoc>,
}

impl DecoderHost {
    #[must_use]
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Load `bytes` as the worker's current document, replacing any other.
    pub fn load(
        &mut self,
        id: DocumentId,
        bytes: Arc<Vec<u8>>,
        filename: Option<&str>,
    ) -> Result<LoadedDocument> {
        let format = sniff_format(&bytes, filename)?;
        let mut doc = Document::from_bytes(&bytes, format.magic())?;

        let epub = match format {
            DocumentFormat::Epub => {
                if doc.is_reflowable()? {
                    doc.layout(EPUB_LAYOUT_WIDTH, EPUB_LAYOUT_HEIGHT, EPUB_LAYOUT_EM)?;
                }
                Some(EpubPackage::parse(&bytes)?)
            }
            DocumentFormat::Pdf => None,
        };

        let item_count = match &epub {
            // Items are spine chapters for EPUB, pages for PDF
            Some(package) => package.chapter_count(),
            None => doc.page_count()? as usize,
        };

        let decoder_pages = doc.page_count()? as usize;
        let mut item_sizes = Vec::with_capacity(item_count);
        for item in 0..item_count {
            let page = doc.load_page(item.min(decoder_pages.saturating_sub(1)) as i32)?;
            let bounds = page.bounds()?;
            item_sizes.push((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0));
        }

        let metadata = extract_metadata(&doc);
        let toc = match &epub {
            Some(package) if !package.toc.is_empty() => package.toc.clone(),
            // TOC extraction is optional; absent outlines are fine
            _ => doc
                .outlines()
                .map(|outlines| toc_from_outlines(&outlines))
                .unwrap_or_default(),
        };
        let has_text_layer = match format {
            DocumentFormat::Epub => true,
            DocumentFormat::Pdf => probe_text_layer(&doc),
        };

        self.current = Some(LoadedDoc {
            id,
            format,
            doc,
            bytes: matches!(format, DocumentFormat::Epub).then(|| Arc::clone(&bytes)),
            epub,
        });

        Ok(LoadedDocument {
            item_count,
            item_sizes,
            toc,
            metadata,
            has_text_layer,
        })
    }

    /// Drop the current document when it matches `id`.
    pub fn unload(&mut self, id: &DocumentId) {
        if self.current.as_ref().is_some_and(|d| &d.id == id) {
            self.current = None;
        }
    }

    #[must_use]
    pub fn holds(&self, id: &DocumentId) -> bool {
        self.current.as_ref().is_some_and(|d| &d.id == id)
    }

    fn doc(&self, id: &DocumentId) -> Result<&LoadedDoc> {
        match &self.current {
            Some(loaded) if &loaded.id == id => Ok(loaded),
            _ => Err(Error::NotLoaded { id: id.0.clone() }),
        }
    }

    pub fn item_count(&self, id: &DocumentId) -> Result<usize> {
        let loaded = self.doc(id)?;
        match &loaded.epub {
            Some(package) => Ok(package.chapter_count()),
            None => Ok(loaded.doc.page_count()? as usize),
        }
    }

    pub fn item_dimensions(&self, id: &DocumentId, item: usize) -> Result<(f32, f32)> {
        let loaded = self.doc(id)?;
        let page = load_item_page(loaded, item)?;
        let bounds = page.bounds()?;
        Ok((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }

    /// Render a whole item. Dimensions are capped at 4096 px per axis by
    /// reducing the effective scale proportionally.
    pub fn render_item(&self, id: &DocumentId, item: usize, scale: f32) -> Result<Raster> {
        let loaded = self.doc(id)?;
        let page = load_item_page(loaded, item)?;
        let bounds = page.bounds()?;
        let (width, height) = (bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);

        let mut effective = scale.max(0.01);
        let max_axis = (width * effective).max(height * effective);
        if max_axis > MAX_RENDER_DIMENSION {
            effective *= MAX_RENDER_DIMENSION / max_axis;
        }

        let matrix = Matrix::new_scale(effective, effective);
        // alpha=false renders on an opaque white background
        let pixmap = page.to_pixmap(&matrix, &Colorspace::device_rgb(), false, false)?;
        let rgb = pixmap_to_rgb(&pixmap)?;
        let (w, h) = (pixmap.width(), pixmap.height());
        let bytes = encode_rgb(rgb, w, h, RasterFormat::Png)?;

        Ok(Raster {
            bytes,
            format: RasterFormat::Png,
            width: w,
            height: h,
        })
    }

    /// Render one tile through a pixmap window at the scaled tile rect.
    pub fn render_tile(
        &self,
        id: &DocumentId,
        coord: &TileCoord,
        format: RasterFormat,
        slots: &Arc<RasterSlots>,
        slot: Option<SlotRef>,
    ) -> Result<(RasterPayload, RenderTiming)> {
        let started = Instant::now();
        let loaded = self.doc(id)?;

        let page = load_item_page(loaded, coord.item)?;
        let bounds = page.bounds()?;
        let (page_w, page_h) = (bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);
        let region = coord.region(page_w, page_h).ok_or_else(|| {
            Error::out_of_bounds(format!(
                "tile ({}, {}) at scale {} outside item {}",
                coord.x, coord.y, coord.scale, coord.item
            ))
        })?;
        let (pixel_w, pixel_h) = coord.pixel_dims(&region);
        let page_load = started.elapsed();

        let render_started = Instant::now();
        let origin_x = (coord.x * coord.tile_size) as i32;
        let origin_y = (coord.y * coord.tile_size) as i32;
        let window = IRect {
            x0: origin_x,
            y0: origin_y,
            x1: origin_x + pixel_w as i32,
            y1: origin_y + pixel_h as i32,
        };
        let mut pixmap = Pixmap::new_with_rect(&Colorspace::device_rgb(), window, false)?;
        for sample in pixmap.samples_mut() {
            *sample = 255;
        }
        let device = Device::from_pixmap(&pixmap)?;
        page.run(&device, &Matrix::new_scale(coord.scale, coord.scale))?;
        let render = render_started.elapsed();

        let encode_started = Instant::now();
        let rgb = pixmap_to_rgb(&pixmap)?;
        let (w, h) = (pixmap.width(), pixmap.height());
        let payload = match format {
            RasterFormat::Rgba => {
                let rgba = rgb_to_rgba(&rgb);
                match slot {
                    Some(slot) if slots.write(slot, &rgba) => RasterPayload::Slot {
                        slot,
                        len: rgba.len(),
                        format: RasterFormat::Rgba,
                        width: w,
                        height: h,
                    },
                    _ => RasterPayload::Bytes(Raster {
                        bytes: rgba,
                        format: RasterFormat::Rgba,
                        width: w,
                        height: h,
                    }),
                }
            }
            RasterFormat::Png | RasterFormat::Webp => RasterPayload::Bytes(Raster {
                bytes: encode_rgb(rgb, w, h, format)?,
                format,
                width: w,
                height: h,
            }),
        };
        let encode = encode_started.elapsed();

        let timing = RenderTiming {
            page_load,
            render,
            encode,
            total: started.elapsed(),
        };
        Ok((payload, timing))
    }

    /// Structured text: decoder text runs grouped by visual line.
    pub fn structured_text(&self, id: &DocumentId, item: usize) -> Result<StructuredPage> {
        let loaded = self.doc(id)?;
        let page = load_item_page(loaded, item)?;
        let bounds = page.bounds()?;
        let text_page = page.to_text_page(TextPageFlags::empty())?;

        let mut items = Vec::new();
        for block in text_page.blocks() {
            if block.r#type() != TextBlockType::Text {
                continue;
            }
            for line in block.lines() {
                let line_bounds = line.bounds();
                let mut text = String::new();
                let mut chars = Vec::new();
                let mut font_size = 0.0f32;

                for ch in line.chars() {
                    let Some(c) = ch.char() else { continue };
                    let quad = ch.quad();
                    let x = quad.ul.x.min(quad.ll.x);
                    let y = quad.ul.y.min(quad.ur.y);
                    let w = (quad.ur.x.max(quad.lr.x) - x).max(0.0);
                    let h = (quad.ll.y.max(quad.lr.y) - y).max(0.0);
                    font_size = font_size.max(ch.size());
                    text.push(c);
                    chars.push(CharBox { c, x, y, w, h });
                }

                if text.trim().is_empty() {
                    continue;
                }
                items.push(TextItem {
                    text,
                    x: line_bounds.x0,
                    y: line_bounds.y0,
                    w: line_bounds.x1 - line_bounds.x0,
                    h: line_bounds.y1 - line_bounds.y0,
                    font_size,
                    chars,
                });
            }
        }

        Ok(StructuredPage {
            width: bounds.x1 - bounds.x0,
            height: bounds.y1 - bounds.y0,
            items,
        })
    }

    /// Case-insensitive substring search on one item.
    pub fn search(
        &self,
        id: &DocumentId,
        item: usize,
        query: &str,
        max_hits: usize,
    ) -> Result<Vec<SearchHit>> {
        let loaded = self.doc(id)?;
        let page = load_item_page(loaded, item)?;
        let quads = page.search(query, max_hits.min(u32::MAX as usize) as u32)?;
        Ok(quads
            .into_iter()
            .map(|q| SearchHit {
                quads: vec![Quad {
                    ul: (q.ul.x, q.ul.y),
                    ur: (q.ur.x, q.ur.y),
                    ll: (q.ll.x, q.ll.y),
                    lr: (q.lr.x, q.lr.y),
                }],
            })
            .collect())
    }

    /// Chapter XHTML straight out of the EPUB archive, with a decoder
    /// text fallback; a double failure reports both attempts.
    pub fn epub_chapter(&self, id: &DocumentId, item: usize) -> Result<String> {
        let loaded = self.doc(id)?;
        let (Some(package), Some(bytes)) = (&loaded.epub, &loaded.bytes) else {
            return Err(Error::malformed("not an epub document"));
        };

        let zip_attempt = package.chapter_bytes(bytes, item).and_then(|raw| {
            String::from_utf8(raw)
                .map_err(|_| Error::malformed("chapter bytes are not valid UTF-8"))
        });
        let zip_error = match zip_attempt {
            Ok(xhtml) => return Ok(xhtml),
            // Traversal attempts and bad indices never fall back
            Err(err @ (Error::InvalidPath { .. } | Error::OutOfBounds { .. })) => return Err(err),
            Err(err) => err,
        };

        let path = package
            .chapter_path(item)
            .map(str::to_string)
            .unwrap_or_default();
        match self.fallback_chapter(loaded, item) {
            Ok(xhtml) => Ok(xhtml),
            Err(decoder_error) => Err(Error::malformed(format!(
                "chapter {path:?}: zip extraction failed ({zip_error}); decoder fallback failed ({decoder_error})"
            ))),
        }
    }

    /// Decoder-path chapter rendition: structured text wrapped as XHTML.
    fn fallback_chapter(&self, loaded: &LoadedDoc, item: usize) -> Result<String> {
        let page = load_item_page(loaded, item)?;
        let text = page.to_text_page(mupdf::TextPageFlags::empty())?.to_text()?;
        let mut body = String::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            body.push_str("<p>");
            body.push_str(&xml_escape(line));
            body.push_str("</p>\n");
        }
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><body>\n{body}</body></html>\n"
        ))
    }
}

impl Default for DecoderHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the decoder page backing `item`, bounds-checked against the
/// decoder's own page count.
fn load_item_page(loaded: &LoadedDoc, item: usize) -> Result<mupdf::Page> {
    let pages = loaded.doc.page_count()? as usize;
    if item >= pages && loaded.format == DocumentFormat::Pdf {
        return Err(Error::out_of_bounds(format!("item {item} of {pages}")));
    }
    // Reflowable chapters index decoder pages; clamp for short layouts.
    let index = item.min(pages.saturating_sub(1));
    Ok(loaded.doc.load_page(index as i32)?)
}

fn extract_metadata(doc: &Document) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    let fields = [
        ("title", MetadataName::Title),
        ("author", MetadataName::Author),
        ("subject", MetadataName::Subject),
        ("creation-date", MetadataName::CreationDate),
    ];
    for (key, name) in fields {
        if let Ok(value) = doc.metadata(name) {
            if !value.is_empty() {
                metadata.insert(key.to_string(), value);
            }
        }
    }
    metadata
}

fn probe_text_layer(doc: &Document) -> bool {
    let Ok(page) = doc.load_page(0) else {
        return false;
    };
    let Ok(text_page) = page.to_text_page(TextPageFlags::empty()) else {
        return false;
    };
    text_page
        .blocks()
        .any(|block| block.r#type() == TextBlockType::Text)
}

/// Tightly packed RGB out of a pixmap, stride-aware.
fn pixmap_to_rgb(pixmap: &Pixmap) -> Result<Vec<u8>> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(Error::malformed(format!(
            "unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(Error::malformed("pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..3]);
            }
        }
    }
    Ok(out)
}

fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(px);
        out.push(255);
    }
    out
}

fn encode_rgb(rgb: Vec<u8>, width: u32, height: u32, format: RasterFormat) -> Result<Vec<u8>> {
    let img = image::RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::malformed("raster buffer does not match dimensions"))?;
    let dynamic = DynamicImage::ImageRgb8(img);
    let target = match format {
        RasterFormat::Png => image::ImageFormat::Png,
        RasterFormat::Webp => image::ImageFormat::WebP,
        RasterFormat::Rgba => return Err(Error::malformed("rgba is not an encoded format")),
    };
    let mut out = Vec::new();
    dynamic
        .write_to(&mut Cursor::new(&mut out), target)
        .map_err(|e| Error::malformed(format!("encode: {e}")))?;
    Ok(out)
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_to_rgba_appends_opaque_alpha() {
        let rgba = rgb_to_rgba(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn encode_rejects_rgba_format() {
        let err = encode_rgb(vec![0; 12], 2, 2, RasterFormat::Rgba).unwrap_err();
        assert!(err.to_string().contains("rgba"));
    }

    #[test]
    fn encode_round_trips_png_dimensions() {
        let bytes = encode_rgb(vec![255u8; 4 * 3 * 3], 4, 3, RasterFormat::Png).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn xml_escape_handles_markup() {
        assert_eq!(xml_escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn host_without_document_reports_not_loaded() {
        let host = DecoderHost::new();
        let err = host.item_count(&DocumentId::new("missing")).unwrap_err();
        assert!(matches!(err, Error::NotLoaded { .. }));
    }
}
