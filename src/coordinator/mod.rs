//! Render coordinator: viewport state in, rendered tiles out
//!
//! Owns the worker pool, the tile cache, and the spatial index. Each
//! viewport change produces a render sequence; fallback tiles paint
//! immediately from the index while fresh renders stream in, get cached,
//! and overwrite the stretched stand-ins.

mod prefetch;
mod sequence;
mod state;
mod viewport;

pub use prefetch::{spatial_ripple, LinearPrefetcher, MAX_PREFETCH_QUEUE_SIZE};
pub use sequence::{RenderSequence, Retry, RetryPolicy};
pub use state::{Activity, ActivityState, Command, Effect, WATCHDOG_TIMEOUT};
pub use viewport::{
    required_tiles, Camera, ItemLayout, RequiredTile, ViewportState, VisibleItem, ITEM_GAP,
};

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use fast_image_resize as fir;
use log::{debug, warn};

use crate::document::DocumentId;
use crate::error::Error;
use crate::geom::Rect;
use crate::tile::{
    BestTile, FocalPoint, IndexConfig, RasterFormat, RenderedTile, SpatialTileIndex, TileCache,
    TileCoord, TileKey, DEFAULT_TILE_SIZE,
};
use crate::worker::{
    Priority, RasterPayload, RenderTiming, RequestId, SequenceId, SlotGuard, WorkerPool,
    WorkerRequest, WorkerResponse,
};

/// Default linear prefetch radius in items.
pub const DEFAULT_PREFETCH_RADIUS: usize = 3;

/// Shed medium/low dispatches past this many queued-or-prefetching requests.
pub const DEFAULT_SHED_THRESHOLD: usize = 6;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub tile_size: u32,
    pub margin_tiles: u32,
    pub tile_format: RasterFormat,
    pub retry: RetryPolicy,
    pub prefetch_radius: usize,
    pub shed_threshold: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            margin_tiles: 1,
            tile_format: RasterFormat::Png,
            retry: RetryPolicy::default(),
            prefetch_radius: DEFAULT_PREFETCH_RADIUS,
            shed_threshold: DEFAULT_SHED_THRESHOLD,
        }
    }
}

/// A fallback tile to paint right now, stretched by `tile.css_stretch`.
#[derive(Clone, Debug)]
pub struct FallbackPaint {
    pub item: usize,
    pub tile: BestTile,
}

/// Coordinator output events, drained from `pump`.
#[derive(Debug)]
pub enum RenderEvent {
    TileReady {
        doc: DocumentId,
        coord: TileCoord,
        key: TileKey,
        timing: RenderTiming,
    },
    TileFailed {
        doc: DocumentId,
        coord: TileCoord,
        error: Error,
    },
    ItemReady {
        doc: DocumentId,
        item: usize,
        scale: f32,
        key: TileKey,
    },
    ItemFailed {
        doc: DocumentId,
        item: usize,
        error: Error,
    },
    SequenceSettled {
        id: SequenceId,
        complete: bool,
    },
    ForcedIdle,
}

/// A composited viewport frame, tightly packed RGB.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

struct InFlightTile {
    sequence: SequenceId,
    doc: DocumentId,
    coord: TileCoord,
    key: TileKey,
    priority: Priority,
    guard: Option<SlotGuard>,
}

struct InFlightItem {
    doc: DocumentId,
    item: usize,
    scale: f32,
    prefetch: bool,
}

struct PendingRetry {
    due: Instant,
    sequence: SequenceId,
    doc: DocumentId,
    coord: TileCoord,
}

struct SequenceEntry {
    seq: RenderSequence,
    doc: DocumentId,
}

/// The render coordinator; single-threaded by contract, poll-driven.
pub struct RenderCoordinator {
    pool: WorkerPool,
    cache: TileCache,
    index: SpatialTileIndex,
    config: CoordinatorConfig,
    sequences: HashMap<u64, SequenceEntry>,
    current_sequence: Option<SequenceId>,
    next_sequence: u64,
    in_flight_tiles: HashMap<RequestId, InFlightTile>,
    in_flight_items: HashMap<RequestId, InFlightItem>,
    prefetch_in_flight: HashSet<RequestId>,
    retries: Vec<PendingRetry>,
    prefetcher: LinearPrefetcher,
    activity: ActivityState,
    item_sizes: HashMap<DocumentId, Vec<(f32, f32)>>,
    layouts: HashMap<DocumentId, ItemLayout>,
    last_target: Option<(DocumentId, usize, f32)>,
}

impl RenderCoordinator {
    #[must_use]
    pub fn new(
        pool: WorkerPool,
        config: CoordinatorConfig,
        cache_budget: usize,
        index_config: IndexConfig,
    ) -> Self {
        Self {
            pool,
            cache: TileCache::new(cache_budget),
            index: SpatialTileIndex::new(index_config),
            config,
            sequences: HashMap::new(),
            current_sequence: None,
            next_sequence: 1,
            in_flight_tiles: HashMap::new(),
            in_flight_items: HashMap::new(),
            prefetch_in_flight: HashSet::new(),
            retries: Vec::new(),
            prefetcher: LinearPrefetcher::new(),
            activity: ActivityState::new(Instant::now()),
            item_sizes: HashMap::new(),
            layouts: HashMap::new(),
            last_target: None,
        }
    }

    pub fn pool(&mut self) -> &mut WorkerPool {
        &mut self.pool
    }

    pub fn cache(&mut self) -> &mut TileCache {
        &mut self.cache
    }

    pub fn index(&mut self) -> &mut SpatialTileIndex {
        &mut self.index
    }

    #[must_use]
    pub fn activity(&self) -> Activity {
        self.activity.activity()
    }

    /// Register item dimensions (document units) and build the layout.
    pub fn set_item_dimensions(&mut self, doc: &DocumentId, sizes: Vec<(f32, f32)>) {
        self.layouts
            .insert(doc.clone(), ItemLayout::vertical(&sizes));
        self.item_sizes.insert(doc.clone(), sizes);
    }

    /// Switch a document to an N-column grid layout.
    pub fn set_grid_layout(&mut self, doc: &DocumentId, columns: usize) {
        if let Some(sizes) = self.item_sizes.get(doc) {
            self.layouts.insert(doc.clone(), ItemLayout::grid(sizes, columns));
        }
    }

    #[must_use]
    pub fn layout(&self, doc: &DocumentId) -> Option<&ItemLayout> {
        self.layouts.get(doc)
    }

    pub fn gesture_began(&mut self, now: Instant) {
        self.activity.apply(Command::GestureBegan, now);
    }

    pub fn gesture_ended(&mut self, now: Instant) {
        self.activity.apply(Command::GestureEnded, now);
    }

    /// Evaluate a new viewport state.
    ///
    /// Supersedes the previous sequence, dispatches the missing tiles at
    /// focal-distance priorities, and returns the best-available fallback
    /// tiles so the caller can paint immediately — the no-blanks contract.
    pub fn update_viewport(
        &mut self,
        doc: &DocumentId,
        viewport: &ViewportState,
        now: Instant,
    ) -> Vec<FallbackPaint> {
        let Some(sizes) = self.item_sizes.get(doc).cloned() else {
            warn!("viewport update for unknown document {doc}");
            return Vec::new();
        };
        let Some(layout) = self.layouts.get(doc).cloned() else {
            return Vec::new();
        };

        let target = viewport.target_scale();
        let visible = layout.visible_items(viewport);

        // Paint set first: anything already rendered, at any scale.
        let mut fallback = Vec::new();
        for v in &visible {
            for tile in self.index.best_available(doc, v.item, &v.region, target) {
                fallback.push(FallbackPaint {
                    item: v.item,
                    tile,
                });
            }
        }

        // The old sequence is history; its queued low/medium work is dropped
        // before dispatch, in-flight criticals still land in the cache.
        if let Some(current) = self.current_sequence {
            if let Some(entry) = self.sequences.get_mut(&current.0) {
                entry.seq.supersede();
            }
            self.retries.retain(|r| r.sequence != current);
            let stale: Vec<_> = self
                .in_flight_tiles
                .iter()
                .filter(|(_, t)| t.sequence == current && t.priority.is_sheddable())
                .map(|(id, _)| *id)
                .collect();
            for id in self.pool.cancel_queued(&stale) {
                if let Some(dropped) = self.in_flight_tiles.remove(&id) {
                    drop(dropped.guard);
                }
            }
        }

        let required = required_tiles(
            &visible,
            &sizes,
            &layout,
            viewport,
            target,
            self.config.tile_size,
            self.config.margin_tiles,
        );

        let shed = self.pool.queued_len() + self.prefetch_in_flight.len()
            > self.config.shed_threshold;

        let sequence_id = SequenceId(self.next_sequence);
        self.next_sequence += 1;

        let mut requested = Vec::new();
        for tile in required {
            let key = TileKey::for_tile(doc, &tile.coord);
            if self.cache.contains(&key) {
                // Already rendered: make sure the index can serve it.
                self.ensure_indexed(doc, &tile.coord, &key, &sizes);
                continue;
            }
            if shed && tile.priority.is_sheddable() {
                continue;
            }
            requested.push((key, tile.coord, tile.priority));
        }

        let seq = RenderSequence::new(
            sequence_id,
            target,
            requested.iter().map(|(k, c, _)| (k.clone(), *c)),
            self.config.retry,
            now,
        );
        self.sequences.insert(
            sequence_id.0,
            SequenceEntry {
                seq,
                doc: doc.clone(),
            },
        );
        self.current_sequence = Some(sequence_id);

        for (key, coord, priority) in requested {
            self.dispatch_tile(sequence_id, doc, key, coord, priority);
        }

        self.activity.apply(Command::RenderStarted, now);

        // Keep the linear prefetcher aimed at the focal item.
        let (fx, fy) = viewport.focal_point();
        if let Some(item) = layout.item_at(fx, fy) {
            self.prefetcher
                .retarget(item, sizes.len(), self.config.prefetch_radius);
            self.last_target = Some((doc.clone(), item, target));
        }

        fallback
    }

    fn ensure_indexed(
        &mut self,
        doc: &DocumentId,
        coord: &TileCoord,
        key: &TileKey,
        sizes: &[(f32, f32)],
    ) {
        if self.index.contains(coord.item, key) {
            return;
        }
        let Some(&(w, h)) = sizes.get(coord.item) else {
            return;
        };
        if let Some(region) = coord.region(w, h) {
            for evicted in self.index.insert(coord.item, (w, h), key.clone(), region) {
                self.cache.remove(&evicted);
            }
        }
    }

    fn dispatch_tile(
        &mut self,
        sequence: SequenceId,
        doc: &DocumentId,
        key: TileKey,
        coord: TileCoord,
        priority: Priority,
    ) {
        let format = self.config.tile_format;
        let guard = if format == RasterFormat::Rgba {
            self.pool.slots().clone().acquire(coord.tile_size)
        } else {
            None
        };
        let slot = guard.as_ref().map(SlotGuard::slot);

        match self.pool.submit(doc, priority, move |id, doc| {
            WorkerRequest::RenderTile {
                id,
                doc,
                coord,
                format,
                slot,
            }
        }) {
            Ok(id) => {
                self.in_flight_tiles.insert(
                    id,
                    InFlightTile {
                        sequence,
                        doc: doc.clone(),
                        coord,
                        key,
                        priority,
                        guard,
                    },
                );
            }
            Err(err) => {
                debug!("tile dispatch failed: {err}");
                if let Some(entry) = self.sequences.get_mut(&sequence.0) {
                    entry.seq.mark_failed(&key, Instant::now());
                }
            }
        }
    }

    /// Aim the linear prefetcher without a viewport change.
    pub fn prefetch_around(&mut self, doc: &DocumentId, item: usize, scale: f32) {
        let total = self.item_sizes.get(doc).map_or(0, Vec::len);
        if total == 0 {
            return;
        }
        self.prefetcher
            .retarget(item, total, self.config.prefetch_radius);
        self.last_target = Some((doc.clone(), item, crate::scale::quantize_scale(scale)));
    }

    /// Spatial prefetch for grid layouts: a Manhattan ripple around
    /// `center`, closer rings at higher priority.
    pub fn prefetch_grid(
        &mut self,
        doc: &DocumentId,
        center: usize,
        columns: usize,
        radius: usize,
        scale: f32,
    ) {
        let total = self.item_sizes.get(doc).map_or(0, Vec::len);
        let quantized = crate::scale::quantize_scale(scale);
        for (item, priority) in spatial_ripple(center, columns, total, radius) {
            if self.prefetch_in_flight.len() >= MAX_PREFETCH_QUEUE_SIZE {
                break;
            }
            self.request_item_render(doc, item, quantized, priority, true);
        }
    }

    /// Queue a low-priority whole-item render (prefetch, thumbnail upgrade).
    pub fn request_item_render(
        &mut self,
        doc: &DocumentId,
        item: usize,
        scale: f32,
        priority: Priority,
        prefetch: bool,
    ) -> Option<RequestId> {
        let key = TileKey::for_item(doc, item, scale);
        if self.cache.contains(&key) {
            return None;
        }
        let quantized = key.scale();
        match self.pool.submit(doc, priority, move |id, doc| {
            WorkerRequest::RenderItem {
                id,
                doc,
                item,
                scale: quantized,
            }
        }) {
            Ok(id) => {
                self.in_flight_items.insert(
                    id,
                    InFlightItem {
                        doc: doc.clone(),
                        item,
                        scale: quantized,
                        prefetch,
                    },
                );
                if prefetch {
                    self.prefetch_in_flight.insert(id);
                }
                Some(id)
            }
            Err(err) => {
                debug!("item render dispatch failed: {err}");
                None
            }
        }
    }

    /// Drain worker responses and drive sequences, retries, prefetch, and
    /// the watchdog. Call this from the main loop every frame or timer
    /// tick.
    pub fn pump(&mut self, now: Instant) -> Vec<RenderEvent> {
        let mut events = Vec::new();

        for response in self.pool.poll_responses() {
            self.handle_response(response, now, &mut events);
        }

        self.drive_sequences(now, &mut events);
        self.dispatch_due_retries(now);
        self.drive_prefetch();

        for effect in self.activity.apply(Command::WatchdogTick, now) {
            if effect == Effect::ForceIdle {
                warn!("render watchdog fired, forcing idle");
                events.push(RenderEvent::ForcedIdle);
            }
        }
        events
    }

    fn handle_response(
        &mut self,
        response: WorkerResponse,
        now: Instant,
        events: &mut Vec<RenderEvent>,
    ) {
        match response {
            WorkerResponse::Tile {
                id,
                coord,
                payload,
                timing,
            } => {
                let Some(in_flight) = self.in_flight_tiles.remove(&id) else {
                    return;
                };
                let (width, height) = payload.dimensions();
                let (bytes, format) = match payload {
                    RasterPayload::Bytes(raster) => (raster.bytes, raster.format),
                    RasterPayload::Slot {
                        slot, len, format, ..
                    } => {
                        // Copy out before the guard drops and frees the slot.
                        let bytes = self.pool.slots().copy_out(slot, len);
                        (bytes, format)
                    }
                };
                drop(in_flight.guard);

                let tile = RenderedTile {
                    key: in_flight.key.clone(),
                    bytes: Arc::new(bytes),
                    format,
                    width,
                    height,
                };
                self.cache.insert(tile);
                let sizes = self.item_sizes.get(&in_flight.doc).cloned();
                if let Some(sizes) = sizes {
                    self.ensure_indexed(&in_flight.doc, &coord, &in_flight.key, &sizes);
                }

                if let Some(entry) = self.sequences.get_mut(&in_flight.sequence.0) {
                    entry.seq.mark_completed(&in_flight.key, now);
                }
                self.activity.apply(Command::Progress, now);
                events.push(RenderEvent::TileReady {
                    doc: in_flight.doc,
                    coord,
                    key: in_flight.key,
                    timing,
                });
            }

            WorkerResponse::Item { id, raster } => {
                let Some(in_flight) = self.in_flight_items.remove(&id) else {
                    return;
                };
                self.prefetch_in_flight.remove(&id);
                let key = TileKey::for_item(&in_flight.doc, in_flight.item, in_flight.scale);
                self.cache.insert(RenderedTile {
                    key: key.clone(),
                    bytes: Arc::new(raster.bytes),
                    format: raster.format,
                    width: raster.width,
                    height: raster.height,
                });
                events.push(RenderEvent::ItemReady {
                    doc: in_flight.doc,
                    item: in_flight.item,
                    scale: in_flight.scale,
                    key,
                });
            }

            WorkerResponse::Error { id, error } => {
                if let Some(in_flight) = self.in_flight_tiles.remove(&id) {
                    drop(in_flight.guard);
                    if let Some(entry) = self.sequences.get_mut(&in_flight.sequence.0) {
                        entry.seq.mark_failed(&in_flight.key, now);
                    }
                    events.push(RenderEvent::TileFailed {
                        doc: in_flight.doc,
                        coord: in_flight.coord,
                        error,
                    });
                } else if let Some(in_flight) = self.in_flight_items.remove(&id) {
                    self.prefetch_in_flight.remove(&id);
                    events.push(RenderEvent::ItemFailed {
                        doc: in_flight.doc,
                        item: in_flight.item,
                        error,
                    });
                }
            }

            // Loads and synchronous provider traffic pass through untouched.
            _ => {}
        }
    }

    fn drive_sequences(&mut self, now: Instant, events: &mut Vec<RenderEvent>) {
        let mut settled = Vec::new();
        for entry in self.sequences.values_mut() {
            if entry.seq.ready_to_finalize(now) {
                for retry in entry.seq.take_retries(now) {
                    self.retries.push(PendingRetry {
                        due: retry.due,
                        sequence: entry.seq.id,
                        doc: entry.doc.clone(),
                        coord: retry.coord,
                    });
                }
            }
            if entry.seq.is_settled(now) {
                settled.push((entry.seq.id, entry.seq.is_complete()));
            }
        }
        for (id, complete) in settled {
            self.sequences.remove(&id.0);
            self.retries.retain(|r| r.sequence != id);
            if self.current_sequence == Some(id) {
                self.current_sequence = None;
                self.activity.apply(Command::RenderSettled, now);
            }
            events.push(RenderEvent::SequenceSettled { id, complete });
        }
    }

    fn dispatch_due_retries(&mut self, now: Instant) {
        let mut due = Vec::new();
        self.retries.retain(|retry| {
            if retry.due <= now {
                due.push((retry.sequence, retry.doc.clone(), retry.coord));
                false
            } else {
                true
            }
        });
        for (sequence, doc, coord) in due {
            let key = TileKey::for_tile(&doc, &coord);
            // Re-requests ride above the shed threshold
            self.dispatch_tile(sequence, &doc, key, coord, Priority::High);
        }
    }

    fn drive_prefetch(&mut self) {
        if !self.activity.prefetch_allowed() {
            return;
        }
        let Some((doc, _, scale)) = self.last_target.clone() else {
            return;
        };
        while self.prefetch_in_flight.len() < MAX_PREFETCH_QUEUE_SIZE {
            if self.pool.queued_len() > self.config.shed_threshold {
                break;
            }
            let Some(item) = self.prefetcher.pop() else {
                break;
            };
            self.request_item_render(&doc, item, scale, Priority::Low, true);
        }
    }

    /// Relieve memory pressure: evict the `n` best candidates away from the
    /// focal point, index and cache together.
    pub fn evict_for_pressure(&mut self, focus: &FocalPoint, n: usize) -> usize {
        let victims = self.index.eviction_candidates(focus, n);
        let count = victims.len();
        for key in victims {
            self.index.remove(key.item, &key);
            self.cache.remove(&key);
        }
        count
    }

    /// Composite the viewport from best-available tiles into an RGB frame.
    ///
    /// Fallback tiles are stretched into place, so after first paint the
    /// frame never shows blank page regions.
    pub fn compose(&mut self, doc: &DocumentId, viewport: &ViewportState) -> Frame {
        let width = viewport.width.max(1);
        let height = viewport.height.max(1);
        let mut frame = Frame {
            width,
            height,
            pixels: vec![255u8; (width * height * 3) as usize],
        };

        let Some(layout) = self.layouts.get(doc).cloned() else {
            return frame;
        };
        let target = viewport.target_scale();
        let zoom = viewport.camera.zoom.max(0.01);

        for v in layout.visible_items(viewport) {
            let Some(slot) = layout.slot(v.item) else {
                continue;
            };
            let best = self.index.best_available(doc, v.item, &v.region, target);
            for tile in best {
                let Some(rendered) = self.cache.get(&tile.key) else {
                    continue;
                };
                let Some(rgb) = decode_to_rgb(&rendered) else {
                    continue;
                };
                // Tile region -> document plane -> viewport pixels
                let world = Rect::new(
                    slot.x0 + tile.region.x0,
                    slot.y0 + tile.region.y0,
                    slot.x0 + tile.region.x1,
                    slot.y0 + tile.region.y1,
                );
                let dst_x = (world.x0 - viewport.camera.x) * zoom;
                let dst_y = (world.y0 - viewport.camera.y) * zoom;
                let dst_w = (world.width() * zoom).round().max(1.0) as u32;
                let dst_h = (world.height() * zoom).round().max(1.0) as u32;
                blit_scaled(
                    &mut frame,
                    &rgb,
                    rendered.width,
                    rendered.height,
                    dst_x.round() as i64,
                    dst_y.round() as i64,
                    dst_w,
                    dst_h,
                );
            }
        }
        frame
    }

    /// Drop every trace of a document: cache bytes, index pages, worker
    /// copies, and any viewport bookkeeping.
    pub fn unload_document(&mut self, doc: &DocumentId) {
        self.cache.remove_document(doc);
        self.index.remove_document(doc);
        self.pool.unload_document(doc);
        self.item_sizes.remove(doc);
        self.layouts.remove(doc);
        if self
            .last_target
            .as_ref()
            .is_some_and(|(d, _, _)| d == doc)
        {
            self.last_target = None;
            self.prefetcher.clear();
        }
        for entry in self.sequences.values_mut() {
            if &entry.doc == doc {
                entry.seq.supersede();
            }
        }
        self.retries.retain(|r| &r.doc != doc);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.index.clear();
    }
}

fn decode_to_rgb(tile: &RenderedTile) -> Option<Vec<u8>> {
    match tile.format {
        RasterFormat::Rgba => {
            let mut rgb = Vec::with_capacity((tile.width * tile.height * 3) as usize);
            for px in tile.bytes.chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
            Some(rgb)
        }
        RasterFormat::Png | RasterFormat::Webp => image::load_from_memory(&tile.bytes)
            .ok()
            .map(|img| img.to_rgb8().into_raw()),
    }
}

/// Nearest-neighbour stretch of an RGB buffer into the frame, clipped.
#[allow(clippy::too_many_arguments)]
fn blit_scaled(
    frame: &mut Frame,
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dst_x: i64,
    dst_y: i64,
    dst_w: u32,
    dst_h: u32,
) {
    let Some(scaled) = resize_rgb(src, src_w, src_h, dst_w, dst_h) else {
        return;
    };

    for row in 0..dst_h as i64 {
        let fy = dst_y + row;
        if fy < 0 || fy >= i64::from(frame.height) {
            continue;
        }
        let src_row_start = (row * i64::from(dst_w) * 3) as usize;
        for col in 0..dst_w as i64 {
            let fx = dst_x + col;
            if fx < 0 || fx >= i64::from(frame.width) {
                continue;
            }
            let src_idx = src_row_start + (col * 3) as usize;
            let dst_idx = ((fy * i64::from(frame.width) + fx) * 3) as usize;
            frame.pixels[dst_idx..dst_idx + 3].copy_from_slice(&scaled[src_idx..src_idx + 3]);
        }
    }
}

fn resize_rgb(src: &[u8], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Option<Vec<u8>> {
    if src_w == dst_w && src_h == dst_h {
        return Some(src.to_vec());
    }
    let src_w = NonZeroU32::new(src_w)?;
    let src_h = NonZeroU32::new(src_h)?;
    let dst_w = NonZeroU32::new(dst_w)?;
    let dst_h = NonZeroU32::new(dst_h)?;

    let src_image =
        fir::Image::from_vec_u8(src_w, src_h, src.to_vec(), fir::PixelType::U8x3).ok()?;
    let mut dst_image = fir::Image::new(dst_w, dst_h, fir::PixelType::U8x3);
    let mut resizer = fir::Resizer::new(fir::ResizeAlg::Nearest);
    resizer
        .resize(&src_image.view(), &mut dst_image.view_mut())
        .ok()?;
    Some(dst_image.into_vec())
}
