//! Viewport state: camera, item layout, visibility, and tile priorities

use crate::geom::Rect;
use crate::scale::quantize_scale;
use crate::tile::{grid_range, TileCoord};
use crate::worker::Priority;

/// Camera over the document plane: translation in document units plus zoom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

impl Camera {
    #[must_use]
    pub const fn new(x: f32, y: f32, zoom: f32) -> Self {
        Self { x, y, zoom }
    }
}

/// Camera plus the viewport's pixel dimensions and optional focal anchor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub camera: Camera,
    pub width: u32,
    pub height: u32,
    /// Zoom/pan anchor in document-plane coordinates; viewport centre when
    /// absent.
    pub focus: Option<(f32, f32)>,
}

impl ViewportState {
    /// Document-plane rect the viewport shows.
    #[must_use]
    pub fn world_rect(&self) -> Rect {
        let zoom = self.camera.zoom.max(0.01);
        Rect::new(
            self.camera.x,
            self.camera.y,
            self.camera.x + self.width as f32 / zoom,
            self.camera.y + self.height as f32 / zoom,
        )
    }

    /// Scale tier tiles are requested at.
    #[must_use]
    pub fn target_scale(&self) -> f32 {
        quantize_scale(self.camera.zoom)
    }

    /// Focal anchor in document-plane coordinates.
    #[must_use]
    pub fn focal_point(&self) -> (f32, f32) {
        self.focus.unwrap_or_else(|| self.world_rect().center())
    }
}

/// Placement of every item on the document plane.
#[derive(Clone, Debug, Default)]
pub struct ItemLayout {
    /// Document-plane rect per item, in item order
    slots: Vec<Rect>,
}

/// Gap between stacked items, document units.
pub const ITEM_GAP: f32 = 12.0;

impl ItemLayout {
    /// Single-column stack of items for continuous scroll.
    #[must_use]
    pub fn vertical(sizes: &[(f32, f32)]) -> Self {
        let mut slots = Vec::with_capacity(sizes.len());
        let mut y = 0.0f32;
        for &(w, h) in sizes {
            slots.push(Rect::new(0.0, y, w, y + h));
            y += h + ITEM_GAP;
        }
        Self { slots }
    }

    /// Grid of items in `columns` columns, row height per row maximum.
    #[must_use]
    pub fn grid(sizes: &[(f32, f32)], columns: usize) -> Self {
        let columns = columns.max(1);
        let mut slots = Vec::with_capacity(sizes.len());
        let mut y = 0.0f32;
        for row in sizes.chunks(columns) {
            let row_height = row.iter().map(|&(_, h)| h).fold(0.0, f32::max);
            let mut x = 0.0f32;
            for &(w, h) in row {
                slots.push(Rect::new(x, y, x + w, y + h));
                x += w + ITEM_GAP;
            }
            y += row_height + ITEM_GAP;
        }
        Self { slots }
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn slot(&self, item: usize) -> Option<Rect> {
        self.slots.get(item).copied()
    }

    /// Items intersecting the viewport with their visible sub-regions in
    /// item-local coordinates.
    #[must_use]
    pub fn visible_items(&self, viewport: &ViewportState) -> Vec<VisibleItem> {
        let world = viewport.world_rect();
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(item, slot)| {
                let overlap = slot.intersect(&world);
                if overlap.is_empty() {
                    return None;
                }
                Some(VisibleItem {
                    item,
                    region: Rect::new(
                        overlap.x0 - slot.x0,
                        overlap.y0 - slot.y0,
                        overlap.x1 - slot.x0,
                        overlap.y1 - slot.y0,
                    ),
                })
            })
            .collect()
    }

    /// Item under a document-plane point, else the nearest by centre.
    #[must_use]
    pub fn item_at(&self, x: f32, y: f32) -> Option<usize> {
        if let Some((item, _)) = self
            .slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.contains_point(x, y))
        {
            return Some(item);
        }
        self.slots
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.center_distance(x, y).total_cmp(&b.center_distance(x, y))
            })
            .map(|(item, _)| item)
    }
}

/// One visible item and its visible sub-region, item-local coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibleItem {
    pub item: usize,
    pub region: Rect,
}

/// One tile the coordinator wants rendered, with its priority.
#[derive(Clone, Copy, Debug)]
pub struct RequiredTile {
    pub coord: TileCoord,
    pub priority: Priority,
}

/// Tiles at `scale` covering the visible regions plus a one-tile margin,
/// prioritised by Chebyshev grid distance from the focal point.
#[must_use]
pub fn required_tiles(
    visible: &[VisibleItem],
    item_sizes: &[(f32, f32)],
    layout: &ItemLayout,
    viewport: &ViewportState,
    scale: f32,
    tile_size: u32,
    margin_tiles: u32,
) -> Vec<RequiredTile> {
    let (focal_x, focal_y) = viewport.focal_point();
    let focal_item = layout.item_at(focal_x, focal_y);
    let span = tile_size as f32 / scale;
    let margin = margin_tiles as f32 * span;

    let mut tiles = Vec::new();
    for visible_item in visible {
        let Some(&(page_w, page_h)) = item_sizes.get(visible_item.item) else {
            continue;
        };
        let padded = Rect::new(
            visible_item.region.x0 - margin,
            visible_item.region.y0 - margin,
            visible_item.region.x1 + margin,
            visible_item.region.y1 + margin,
        );
        let Some((x0, y0, x1, y1)) = grid_range(&padded, page_w, page_h, scale, tile_size) else {
            continue;
        };

        // Focal tile cell on this item, for grid-distance priorities
        let focal_cell = layout.slot(visible_item.item).map(|slot| {
            let local_x = (focal_x - slot.x0).clamp(0.0, page_w);
            let local_y = (focal_y - slot.y0).clamp(0.0, page_h);
            ((local_x / span) as i64, (local_y / span) as i64)
        });

        for y in y0..=y1 {
            for x in x0..=x1 {
                let priority = match (focal_item == Some(visible_item.item), focal_cell) {
                    (true, Some((fx, fy))) => {
                        let distance = (i64::from(x) - fx).abs().max((i64::from(y) - fy).abs());
                        match distance {
                            0 => Priority::Critical,
                            1 => Priority::High,
                            2 | 3 => Priority::Medium,
                            _ => Priority::Low,
                        }
                    }
                    _ => Priority::Low,
                };
                tiles.push(RequiredTile {
                    coord: TileCoord::new(visible_item.item, x, y, scale, tile_size),
                    priority,
                });
            }
        }
    }
    tiles
}
