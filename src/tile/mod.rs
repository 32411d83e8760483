//! Tile coordinates, cache keys, and bit-exact region math

mod cache;
mod index;
mod store;

pub use cache::{TileCache, DEFAULT_BYTE_BUDGET};
pub use index::{BestTile, FocalPoint, IndexConfig, SpatialTileIndex};
pub use store::{StoredThumbnail, ThumbnailStore};

use std::sync::Arc;

use crate::document::DocumentId;
use crate::geom::Rect;
use crate::scale::quantize_scale;

/// Supported square tile edge lengths in pixels.
pub const TILE_SIZES: [u32; 3] = [128, 256, 512];

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Tile grid position on one item at one scale.
///
/// `scale` is expected to be quantised; constructors that build keys snap it
/// again so a stray arbitrary scale can never mint an unfindable key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileCoord {
    pub item: usize,
    pub x: u32,
    pub y: u32,
    pub scale: f32,
    pub tile_size: u32,
}

impl TileCoord {
    #[must_use]
    pub fn new(item: usize, x: u32, y: u32, scale: f32, tile_size: u32) -> Self {
        Self {
            item,
            x,
            y,
            scale: quantize_scale(scale),
            tile_size,
        }
    }

    /// Document-space region this tile covers, clipped to the page.
    ///
    /// Returns `None` when the unclipped origin lies outside the page,
    /// which callers surface as `out-of-bounds`.
    #[must_use]
    pub fn region(&self, page_width: f32, page_height: f32) -> Option<Rect> {
        let span = self.tile_size as f32 / self.scale;
        let x0 = self.x as f32 * span;
        let y0 = self.y as f32 * span;
        if x0 >= page_width || y0 >= page_height {
            return None;
        }
        Some(Rect::new(
            x0,
            y0,
            (x0 + span).min(page_width),
            (y0 + span).min(page_height),
        ))
    }

    /// Output pixel dimensions for the clipped region: `ceil(extent · scale)`.
    #[must_use]
    pub fn pixel_dims(&self, clipped: &Rect) -> (u32, u32) {
        (
            (clipped.width() * self.scale).ceil() as u32,
            (clipped.height() * self.scale).ceil() as u32,
        )
    }
}

/// Canonical hashable cache key.
///
/// Scale is stored in millionths so float tiers hash and compare exactly.
/// Whole-item renders (thumbnails, full pages) use `x = y = 0, tile_size = 0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub doc: DocumentId,
    pub item: usize,
    pub scale_millionths: u32,
    pub x: u32,
    pub y: u32,
    pub tile_size: u32,
}

impl TileKey {
    #[must_use]
    pub fn for_tile(doc: &DocumentId, coord: &TileCoord) -> Self {
        Self {
            doc: doc.clone(),
            item: coord.item,
            scale_millionths: scale_millionths(coord.scale),
            x: coord.x,
            y: coord.y,
            tile_size: coord.tile_size,
        }
    }

    /// Key for a whole-item render at `scale`.
    #[must_use]
    pub fn for_item(doc: &DocumentId, item: usize, scale: f32) -> Self {
        Self {
            doc: doc.clone(),
            item,
            scale_millionths: scale_millionths(quantize_scale(scale)),
            x: 0,
            y: 0,
            tile_size: 0,
        }
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale_millionths as f32 / 1_000_000.0
    }

    #[must_use]
    pub fn is_whole_item(&self) -> bool {
        self.tile_size == 0
    }
}

fn scale_millionths(scale: f32) -> u32 {
    (scale * 1_000_000.0).round() as u32
}

/// Raster payload encoding of a rendered tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Rgba,
    Webp,
}

/// A rendered tile: the coordinate's key plus its raster payload.
///
/// The cache holds the only owning copy of the bytes; everything else
/// (spatial index, compositor results) refers to tiles by key.
#[derive(Clone, Debug)]
pub struct RenderedTile {
    pub key: TileKey,
    pub bytes: Arc<Vec<u8>>,
    pub format: RasterFormat,
    pub width: u32,
    pub height: u32,
}

impl RenderedTile {
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// Inclusive grid range of tiles at `scale` overlapping `region`.
///
/// The region is clipped to the page first; an empty clip yields no range.
#[must_use]
pub fn grid_range(
    region: &Rect,
    page_width: f32,
    page_height: f32,
    scale: f32,
    tile_size: u32,
) -> Option<(u32, u32, u32, u32)> {
    let clipped = region.intersect(&Rect::from_size(page_width, page_height));
    if clipped.is_empty() {
        return None;
    }
    let span = tile_size as f32 / scale;
    let x0 = (clipped.x0 / span).floor() as u32;
    let y0 = (clipped.y0 / span).floor() as u32;
    // Subtract a hair so a region ending exactly on a tile boundary does not
    // pull in the next (empty) column/row.
    let x1 = ((clipped.x1 / span) - 1e-6).floor().max(0.0) as u32;
    let y1 = ((clipped.y1 / span) - 1e-6).floor().max(0.0) as u32;
    Some((x0, y0, x1, y1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: f32 = 612.0;
    const H: f32 = 792.0;

    #[test]
    fn region_math_is_exact() {
        let coord = TileCoord::new(0, 1, 2, 2.0, 256);
        let region = coord.region(W, H).unwrap();
        assert_eq!(region, Rect::new(128.0, 256.0, 256.0, 384.0));
        assert_eq!(coord.pixel_dims(&region), (256, 256));
    }

    #[test]
    fn edge_tile_clips_and_ceils() {
        // 612 * 1.0 / 256 -> column 2 covers x in [512, 612)
        let coord = TileCoord::new(0, 2, 0, 1.0, 256);
        let region = coord.region(W, H).unwrap();
        assert_eq!(region.x1, W);
        let (pw, ph) = coord.pixel_dims(&region);
        assert_eq!(pw, 100);
        assert_eq!(ph, 256);
    }

    #[test]
    fn out_of_bounds_origin_is_none() {
        assert!(TileCoord::new(0, 3, 0, 1.0, 256).region(W, H).is_none());
        assert!(TileCoord::new(0, 0, 4, 1.0, 256).region(W, H).is_none());
        // Fine at a higher scale, where the grid is denser
        assert!(TileCoord::new(0, 3, 0, 2.0, 256).region(W, H).is_some());
    }

    #[test]
    fn keys_quantise_scale() {
        let doc = DocumentId::new("doc");
        let a = TileKey::for_tile(&doc, &TileCoord::new(0, 1, 1, 1.9, 256));
        let b = TileKey::for_tile(&doc, &TileCoord::new(0, 1, 1, 2.0, 256));
        assert_eq!(a, b);
        assert_eq!(a.scale(), 2.0);
    }

    #[test]
    fn item_key_is_whole_item() {
        let doc = DocumentId::new("doc");
        let key = TileKey::for_item(&doc, 4, 0.5);
        assert!(key.is_whole_item());
        assert_eq!(key.scale(), 0.5);
        assert_ne!(key, TileKey::for_item(&doc, 4, 1.0));
    }

    #[test]
    fn grid_range_covers_region() {
        let region = Rect::new(100.0, 100.0, 400.0, 500.0);
        let (x0, y0, x1, y1) = grid_range(&region, W, H, 1.0, 256).unwrap();
        assert_eq!((x0, y0, x1, y1), (0, 0, 1, 1));

        // Boundary-aligned region does not spill into the next row
        let aligned = Rect::new(0.0, 0.0, 256.0, 256.0);
        assert_eq!(grid_range(&aligned, W, H, 1.0, 256).unwrap(), (0, 0, 0, 0));
    }

    #[test]
    fn grid_range_outside_page_is_none() {
        let region = Rect::new(700.0, 0.0, 800.0, 100.0);
        assert!(grid_range(&region, W, H, 1.0, 256).is_none());
    }
}
