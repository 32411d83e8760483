//! Per-page quadtree spatial index over rendered tiles
//!
//! The index stores tile references (keys plus geometry), never raster
//! bytes; the cache owns the single byte copy. Its job is the
//! `best_available` query: cover a viewport region with the most detailed
//! tiles already rendered, at any scale, so the compositor never paints a
//! blank region.

use std::collections::{HashMap, HashSet};

use crate::document::DocumentId;
use crate::geom::{Rect, RegionKey};
use crate::scale::{FALLBACK_MIN_SCALE, FALLBACK_SCAN, OVER_DETAIL_LIMIT};
use crate::tile::TileKey;

#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Per-page tile cap; insertion past it evicts oldest-by-access.
    pub max_tiles_per_page: usize,
    /// Subdivide a leaf holding more than this many tiles.
    pub subdivide_threshold: usize,
    /// Do not subdivide regions smaller than this on either axis.
    pub min_region_size: f32,
    /// Per-page quadtree node budget.
    pub node_budget: usize,
    /// `Some(depth)` switches from adaptive subdivision to a fixed depth.
    pub fixed_depth: Option<u32>,
    /// Tiles at or below this scale are fallback content, evicted last.
    pub fallback_min_scale: f32,
    /// Side of the per-page protected-fallback grid.
    pub fallback_grid: u32,
    /// Stop the fallback scan once this fraction of the region is covered.
    pub coverage_stop: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_tiles_per_page: 400,
            subdivide_threshold: 4,
            min_region_size: 16.0,
            node_budget: 500,
            fixed_depth: None,
            fallback_min_scale: FALLBACK_MIN_SCALE,
            fallback_grid: 4,
            coverage_stop: 0.98,
        }
    }
}

/// One result of a `best_available` query.
#[derive(Clone, Debug)]
pub struct BestTile {
    pub key: TileKey,
    pub region: Rect,
    pub scale: f32,
    /// Stretch factor the compositor applies: `target_scale / tile_scale`.
    pub css_stretch: f32,
}

/// Cross-page eviction candidate, highest priority = evict first.
#[derive(Clone, Debug)]
struct EvictionCandidate {
    key: TileKey,
    priority: f64,
}

/// Viewport centre used to rank eviction candidates.
#[derive(Clone, Debug)]
pub struct FocalPoint {
    pub doc: DocumentId,
    pub item: usize,
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Debug)]
struct IndexedTile {
    key: TileKey,
    region: Rect,
    scale: f32,
    last_access: u64,
}

struct Node {
    bounds: Rect,
    tiles: Vec<IndexedTile>,
    children: Option<Box<[Node; 4]>>,
    depth: u32,
}

impl Node {
    fn leaf(bounds: Rect, depth: u32) -> Self {
        Self {
            bounds,
            tiles: Vec::new(),
            children: None,
            depth,
        }
    }

    fn insert(&mut self, tile: IndexedTile, config: &IndexConfig, node_count: &mut usize) {
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.bounds.contains_rect(&tile.region) {
                    child.insert(tile, config, node_count);
                    return;
                }
            }
            // Straddles children: lives at this node.
            self.tiles.push(tile);
            return;
        }

        self.tiles.push(tile);
        if self.should_subdivide(config, *node_count) {
            self.subdivide(config, node_count);
        }
    }

    fn should_subdivide(&self, config: &IndexConfig, node_count: usize) -> bool {
        if self.tiles.len() <= config.subdivide_threshold {
            return false;
        }
        if node_count + 4 > config.node_budget {
            return false;
        }
        match config.fixed_depth {
            Some(limit) => self.depth < limit,
            None => {
                self.bounds.width() / 2.0 > config.min_region_size
                    && self.bounds.height() / 2.0 > config.min_region_size
            }
        }
    }

    fn subdivide(&mut self, config: &IndexConfig, node_count: &mut usize) {
        let (cx, cy) = self.bounds.center();
        let b = &self.bounds;
        let depth = self.depth + 1;
        let quads = [
            Rect::new(b.x0, b.y0, cx, cy),
            Rect::new(cx, b.y0, b.x1, cy),
            Rect::new(b.x0, cy, cx, b.y1),
            Rect::new(cx, cy, b.x1, b.y1),
        ];
        let mut children = Box::new(quads.map(|q| Node::leaf(q, depth)));
        *node_count += 4;

        let tiles = std::mem::take(&mut self.tiles);
        for tile in tiles {
            let child = children
                .iter_mut()
                .find(|c| c.bounds.contains_rect(&tile.region));
            match child {
                Some(child) => child.insert(tile, config, node_count),
                None => self.tiles.push(tile),
            }
        }
        self.children = Some(children);
    }

    fn for_each_overlapping(&mut self, region: &Rect, f: &mut impl FnMut(&mut IndexedTile)) {
        if !self.bounds.intersects(region) {
            return;
        }
        for tile in &mut self.tiles {
            if tile.region.intersects(region) {
                f(tile);
            }
        }
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                child.for_each_overlapping(region, f);
            }
        }
    }

    fn for_each(&self, f: &mut impl FnMut(&IndexedTile)) {
        for tile in &self.tiles {
            f(tile);
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.for_each(f);
            }
        }
    }

    fn remove(&mut self, key: &TileKey) -> bool {
        if let Some(pos) = self.tiles.iter().position(|t| &t.key == key) {
            self.tiles.swap_remove(pos);
            return true;
        }
        if let Some(children) = self.children.as_mut() {
            return children.iter_mut().any(|c| c.remove(key));
        }
        false
    }
}

struct PageTree {
    root: Node,
    bounds: Rect,
    node_count: usize,
    tile_count: usize,
}

impl PageTree {
    fn new(bounds: Rect) -> Self {
        Self {
            root: Node::leaf(bounds, 0),
            bounds,
            node_count: 1,
            tile_count: 0,
        }
    }
}

/// Spatial index over every live page of every loaded document.
pub struct SpatialTileIndex {
    pages: HashMap<(DocumentId, usize), PageTree>,
    config: IndexConfig,
    access_clock: u64,
}

impl SpatialTileIndex {
    #[must_use]
    pub fn new(config: IndexConfig) -> Self {
        Self {
            pages: HashMap::new(),
            config,
            access_clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.access_clock += 1;
        self.access_clock
    }

    /// Insert a tile reference; returns keys evicted to hold the page cap.
    pub fn insert(
        &mut self,
        item: usize,
        page_size: (f32, f32),
        key: TileKey,
        region: Rect,
    ) -> Vec<TileKey> {
        let now = self.tick();
        let scale = key.scale();
        let page = self
            .pages
            .entry((key.doc.clone(), item))
            .or_insert_with(|| PageTree::new(Rect::from_size(page_size.0, page_size.1)));

        // Re-inserting the same coordinate replaces the old reference.
        if page.root.remove(&key) {
            page.tile_count -= 1;
        }

        page.root.insert(
            IndexedTile {
                key,
                region,
                scale,
                last_access: now,
            },
            &self.config,
            &mut page.node_count,
        );
        page.tile_count += 1;

        let mut evicted = Vec::new();
        while page.tile_count > self.config.max_tiles_per_page {
            let Some(victim) = oldest_tile(&page.root, self.config.fallback_min_scale) else {
                break;
            };
            page.root.remove(&victim);
            page.tile_count -= 1;
            evicted.push(victim);
        }
        if !evicted.is_empty() {
            log::debug!("page tile cap evicted {} tiles", evicted.len());
        }
        evicted
    }

    /// Best already-rendered coverage of `region` at `target_scale`.
    ///
    /// Walks the descending scale list, skips over-detailed scales, marks
    /// each tile's canonical cell covered once, and stops when the covered
    /// area fraction reaches the configured threshold. Conservative: when
    /// coverage is uncertain the scan continues through lower scales.
    pub fn best_available(
        &mut self,
        doc: &DocumentId,
        item: usize,
        region: &Rect,
        target_scale: f32,
    ) -> Vec<BestTile> {
        let now = self.tick();
        let Some(page) = self.pages.get_mut(&(doc.clone(), item)) else {
            return Vec::new();
        };

        let query = region.intersect(&page.bounds);
        let query_area = query.area();
        if query_area <= 0.0 {
            return Vec::new();
        }

        let mut results = Vec::new();
        let mut covered: HashSet<RegionKey> = HashSet::new();
        let mut covered_area = 0.0f32;

        for &scale in &FALLBACK_SCAN {
            if scale > target_scale * OVER_DETAIL_LIMIT {
                continue;
            }
            page.root.for_each_overlapping(&query, &mut |tile| {
                if (tile.scale - scale).abs() > f32::EPSILON {
                    return;
                }
                let cell = RegionKey::from_rect(&tile.region);
                if !covered.insert(cell) {
                    return;
                }
                tile.last_access = now;
                covered_area += tile.region.intersect(&query).area();
                results.push(BestTile {
                    key: tile.key.clone(),
                    region: tile.region,
                    scale: tile.scale,
                    css_stretch: target_scale / tile.scale,
                });
            });
            if covered_area >= self.config.coverage_stop * query_area {
                break;
            }
        }
        results
    }

    /// Rank tiles for cross-page eviction around a focal point.
    ///
    /// Priority is `page_distance · 10000 + spatial_distance`; tiles that
    /// are the sole low-scale cover of their fallback-grid cell are
    /// protected and only surface once no unprotected candidate remains.
    #[must_use]
    pub fn eviction_candidates(&self, focus: &FocalPoint, n: usize) -> Vec<TileKey> {
        let mut unprotected: Vec<EvictionCandidate> = Vec::new();
        let mut protected: Vec<EvictionCandidate> = Vec::new();

        for ((doc, item), page) in &self.pages {
            let page_distance = if doc == &focus.doc {
                focus.item.abs_diff(*item) as f64
            } else {
                1_000.0
            };
            let frozen = protected_cells(page, &self.config);
            page.root.for_each(&mut |tile| {
                let spatial = if doc == &focus.doc && *item == focus.item {
                    f64::from(tile.region.center_distance(focus.x, focus.y))
                } else {
                    f64::from(tile.region.center_distance(0.0, 0.0))
                };
                let candidate = EvictionCandidate {
                    key: tile.key.clone(),
                    priority: page_distance * 10_000.0 + spatial,
                };
                let is_protected = tile.scale <= self.config.fallback_min_scale
                    && frozen
                        .get(&grid_cell(page, &self.config, &tile.region))
                        .is_some_and(|count| *count == 1);
                if is_protected {
                    protected.push(candidate);
                } else {
                    unprotected.push(candidate);
                }
            });
        }

        let by_priority =
            |a: &EvictionCandidate, b: &EvictionCandidate| b.priority.total_cmp(&a.priority);
        unprotected.sort_by(by_priority);
        protected.sort_by(by_priority);

        unprotected
            .into_iter()
            .chain(protected)
            .take(n)
            .map(|c| c.key)
            .collect()
    }

    pub fn remove(&mut self, item: usize, key: &TileKey) -> bool {
        let Some(page) = self.pages.get_mut(&(key.doc.clone(), item)) else {
            return false;
        };
        let removed = page.root.remove(key);
        if removed {
            page.tile_count -= 1;
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, item: usize, key: &TileKey) -> bool {
        let Some(page) = self.pages.get(&(key.doc.clone(), item)) else {
            return false;
        };
        let mut found = false;
        page.root.for_each(&mut |tile| found |= &tile.key == key);
        found
    }

    /// Drop every page of `doc`.
    pub fn remove_document(&mut self, doc: &DocumentId) {
        self.pages.retain(|(d, _), _| d != doc);
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    #[must_use]
    pub fn page_tile_count(&self, doc: &DocumentId, item: usize) -> usize {
        self.pages
            .get(&(doc.clone(), item))
            .map_or(0, |p| p.tile_count)
    }
}

/// Oldest-by-access victim; fallback-scale tiles only once nothing else
/// remains.
fn oldest_tile(root: &Node, fallback_min_scale: f32) -> Option<TileKey> {
    let mut best: Option<(bool, u64, TileKey)> = None;
    root.for_each(&mut |tile| {
        let is_fallback = tile.scale <= fallback_min_scale;
        let rank = (is_fallback, tile.last_access);
        let better = match &best {
            None => true,
            Some((bf, ba, _)) => rank < (*bf, *ba),
        };
        if better {
            best = Some((is_fallback, tile.last_access, tile.key.clone()));
        }
    });
    best.map(|(_, _, key)| key)
}

fn grid_cell(page: &PageTree, config: &IndexConfig, region: &Rect) -> (u32, u32) {
    let f = config.fallback_grid.max(1) as f32;
    let (cx, cy) = region.center();
    let col = ((cx / page.bounds.width().max(1.0)) * f).clamp(0.0, f - 1.0) as u32;
    let row = ((cy / page.bounds.height().max(1.0)) * f).clamp(0.0, f - 1.0) as u32;
    (col, row)
}

fn protected_cells(page: &PageTree, config: &IndexConfig) -> HashMap<(u32, u32), u32> {
    let mut cells = HashMap::new();
    page.root.for_each(&mut |tile| {
        if tile.scale <= config.fallback_min_scale {
            *cells.entry(grid_cell(page, config, &tile.region)).or_insert(0) += 1;
        }
    });
    cells
}
