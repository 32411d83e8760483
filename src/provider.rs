//! Public façade: documents in, rendered content out
//!
//! The provider owns the coordinator (and through it the pool, cache, and
//! spatial index) plus the persistent thumbnail store. Synchronous calls
//! block on their own response with a deadline; tile traffic flows through
//! `update_viewport`/`pump`.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::coordinator::{
    CoordinatorConfig, FallbackPaint, Frame, RenderCoordinator, RenderEvent, ViewportState,
};
use crate::document::{content_hash, sniff_format, DocumentId, DocumentInfo};
use crate::error::{Error, Result};
use crate::scale::{quantize_scale, THUMBNAIL_SCALE};
use crate::tile::{
    IndexConfig, RasterFormat, RenderedTile, ThumbnailStore, TileCoord, TileKey,
    DEFAULT_BYTE_BUDGET, TILE_SIZES,
};
use crate::worker::{
    PoolConfig, Priority, RequestId, StructuredPage, SearchHit, WorkerPool, WorkerRequest,
    WorkerResponse,
};

/// Items warmed from the persistent tier on load.
pub const WARM_ITEM_COUNT: usize = 20;

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub pool: PoolConfig,
    pub coordinator: CoordinatorConfig,
    pub index: IndexConfig,
    pub cache_budget: usize,
    /// Deadline for synchronous decoder calls
    pub request_timeout: Duration,
    /// Deadline for the initial document load
    pub load_timeout: Duration,
    pub warm_items: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            coordinator: CoordinatorConfig::default(),
            index: IndexConfig::default(),
            cache_budget: DEFAULT_BYTE_BUDGET,
            request_timeout: Duration::from_secs(10),
            load_timeout: Duration::from_secs(30),
            warm_items: WARM_ITEM_COUNT,
        }
    }
}

/// Result of `render_item_with_fallback`: something to paint right now,
/// possibly with a full-quality upgrade on the way.
pub struct FallbackRender {
    pub initial: Arc<RenderedTile>,
    pub initial_scale: f32,
    pub is_full_quality: bool,
    /// Pending upgrade request; its completion arrives as an `ItemReady`
    /// event from `pump`
    pub upgrade: Option<RequestId>,
}

struct DocumentSession {
    info: DocumentInfo,
    content_hash: String,
    item_sizes: Vec<(f32, f32)>,
}

/// The document provider façade.
pub struct DocumentProvider {
    coordinator: RenderCoordinator,
    store: Option<ThumbnailStore>,
    docs: HashMap<DocumentId, DocumentSession>,
    config: ProviderConfig,
}

impl DocumentProvider {
    /// Provider with the platform-default thumbnail store; store failures
    /// degrade to memory-only operation with a warning.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let store = match ThumbnailStore::in_cache_dir("lectern") {
            Ok(store) => Some(store),
            Err(err) => {
                warn!("thumbnail store unavailable: {err:#}");
                None
            }
        };
        Self::with_store(config, store)
    }

    #[must_use]
    pub fn with_store(config: ProviderConfig, store: Option<ThumbnailStore>) -> Self {
        let pool = WorkerPool::new(config.pool.clone());
        let coordinator = RenderCoordinator::new(
            pool,
            config.coordinator.clone(),
            config.cache_budget,
            config.index.clone(),
        );
        Self {
            coordinator,
            store,
            docs: HashMap::new(),
            config,
        }
    }

    /// Load a document from in-memory bytes and distribute it to every
    /// worker. Blocks until the first worker finishes loading; the rest
    /// warm up in the background.
    pub fn load_document(
        &mut self,
        id: impl Into<String>,
        bytes: Vec<u8>,
        filename: Option<String>,
    ) -> Result<DocumentInfo> {
        let doc = DocumentId::new(id);
        let format = sniff_format(&bytes, filename.as_deref())?;
        let hash = content_hash(&bytes);
        let bytes = Arc::new(bytes);

        let pool = self.coordinator.pool();
        pool.register_document(doc.clone(), Arc::clone(&bytes), filename);
        let load_ids = pool.load_on_all(&doc)?;
        let first = *load_ids.first().ok_or(Error::WorkerDied)?;

        let response = self
            .coordinator
            .pool()
            .recv_until(first, self.config.load_timeout)?;
        let loaded = match response {
            WorkerResponse::Loaded { info, .. } => info,
            WorkerResponse::Error { error, .. } => return Err(error),
            other => {
                return Err(Error::malformed(format!(
                    "unexpected load response: {other:?}"
                )))
            }
        };

        let info = DocumentInfo {
            id: doc.clone(),
            format,
            item_count: loaded.item_count,
            toc: loaded.toc,
            metadata: loaded.metadata,
            has_text_layer: loaded.has_text_layer,
        };
        self.coordinator
            .set_item_dimensions(&doc, loaded.item_sizes.clone());

        self.warm_from_store(&doc, &hash, loaded.item_count);

        info!(
            "loaded {doc}: {} items, format {:?}",
            info.item_count, info.format
        );
        self.docs.insert(
            doc,
            DocumentSession {
                info: info.clone(),
                content_hash: hash,
                item_sizes: loaded.item_sizes,
            },
        );
        Ok(info)
    }

    /// One batch read of the persistent tier into L1, first pages only.
    fn warm_from_store(&mut self, doc: &DocumentId, hash: &str, item_count: usize) {
        let Some(store) = &self.store else { return };
        let pages = item_count.min(self.config.warm_items);
        let warmed = store.warm(hash, pages);
        let count = warmed.len();
        for (page, thumb) in warmed {
            let key = TileKey::for_item(doc, page, THUMBNAIL_SCALE);
            self.coordinator.cache().insert(RenderedTile {
                key,
                bytes: Arc::new(thumb.bytes),
                format: RasterFormat::Webp,
                width: thumb.width,
                height: thumb.height,
            });
        }
        if count > 0 {
            debug!("warmed {count} thumbnails for {doc} from the persistent tier");
        }
    }

    fn session(&self, doc: &DocumentId) -> Result<&DocumentSession> {
        self.docs
            .get(doc)
            .ok_or_else(|| Error::NotLoaded { id: doc.0.clone() })
    }

    #[must_use]
    pub fn document_info(&self, doc: &DocumentId) -> Option<&DocumentInfo> {
        self.docs.get(doc).map(|s| &s.info)
    }

    pub fn item_dimensions(&self, doc: &DocumentId, item: usize) -> Result<(f32, f32)> {
        let session = self.session(doc)?;
        session
            .item_sizes
            .get(item)
            .copied()
            .ok_or_else(|| Error::out_of_bounds(format!("item {item} of {}", session.item_sizes.len())))
    }

    /// Render a whole item at a (quantised) scale, blocking.
    pub fn render_item(
        &mut self,
        doc: &DocumentId,
        item: usize,
        scale: f32,
    ) -> Result<Arc<RenderedTile>> {
        self.session(doc)?;
        let scale = quantize_scale(scale);
        let key = TileKey::for_item(doc, item, scale);
        if let Some(hit) = self.coordinator.cache().get(&key) {
            return Ok(hit);
        }

        let id = self
            .coordinator
            .pool()
            .submit(doc, Priority::High, move |id, doc| {
                WorkerRequest::RenderItem {
                    id,
                    doc,
                    item,
                    scale,
                }
            })?;
        let raster = match self.recv(id)? {
            WorkerResponse::Item { raster, .. } => raster,
            WorkerResponse::Error { error, .. } => return Err(error),
            other => return Err(unexpected(other)),
        };
        let tile = RenderedTile {
            key,
            bytes: Arc::new(raster.bytes),
            format: raster.format,
            width: raster.width,
            height: raster.height,
        };
        Ok(self.coordinator.cache().insert(tile))
    }

    /// Render one tile, blocking; the result lands in the cache and index.
    pub fn render_tile(
        &mut self,
        doc: &DocumentId,
        item: usize,
        tile_x: u32,
        tile_y: u32,
        tile_size: u32,
        scale: f32,
    ) -> Result<Arc<RenderedTile>> {
        let (page_w, page_h) = self.item_dimensions(doc, item)?;
        if !TILE_SIZES.contains(&tile_size) {
            return Err(Error::out_of_bounds(format!("tile size {tile_size}")));
        }
        let coord = TileCoord::new(item, tile_x, tile_y, scale, tile_size);
        let region = coord.region(page_w, page_h).ok_or_else(|| {
            Error::out_of_bounds(format!("tile ({tile_x}, {tile_y}) outside item {item}"))
        })?;

        let key = TileKey::for_tile(doc, &coord);
        if let Some(hit) = self.coordinator.cache().get(&key) {
            return Ok(hit);
        }

        let format = self.config.coordinator.tile_format;
        let id = self
            .coordinator
            .pool()
            .submit(doc, Priority::Critical, move |id, doc| {
                WorkerRequest::RenderTile {
                    id,
                    doc,
                    coord,
                    format,
                    slot: None,
                }
            })?;
        let (payload, _) = match self.recv(id)? {
            WorkerResponse::Tile {
                payload, timing, ..
            } => (payload, timing),
            WorkerResponse::Error { error, .. } => return Err(error),
            other => return Err(unexpected(other)),
        };
        let (width, height) = payload.dimensions();
        let bytes = match payload {
            crate::worker::RasterPayload::Bytes(raster) => raster.bytes,
            crate::worker::RasterPayload::Slot { slot, len, .. } => {
                self.coordinator.pool().slots().copy_out(slot, len)
            }
        };

        let tile = RenderedTile {
            key: key.clone(),
            bytes: Arc::new(bytes),
            format,
            width,
            height,
        };
        let cached = self.coordinator.cache().insert(tile);
        for evicted in self
            .coordinator
            .index()
            .insert(item, (page_w, page_h), key, region)
        {
            self.coordinator.cache().remove(&evicted);
        }
        Ok(cached)
    }

    /// Structured text; decoder failures degrade to an empty page.
    pub fn structured_text(&mut self, doc: &DocumentId, item: usize) -> Result<StructuredPage> {
        self.session(doc)?;
        let id = self
            .coordinator
            .pool()
            .submit(doc, Priority::High, move |id, doc| {
                WorkerRequest::StructuredText { id, doc, item }
            })?;
        match self.recv(id)? {
            WorkerResponse::Text { page, .. } => Ok(page),
            WorkerResponse::Error {
                error: error @ (Error::Decoder(_) | Error::Malformed { .. }),
                ..
            } => {
                debug!("structured text failed on {doc}#{item}: {error}");
                Ok(StructuredPage {
                    width: 0.0,
                    height: 0.0,
                    items: Vec::new(),
                })
            }
            WorkerResponse::Error { error, .. } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    /// Search one item; decoder failures degrade to no hits.
    pub fn search(
        &mut self,
        doc: &DocumentId,
        item: usize,
        query: &str,
        max_hits: usize,
    ) -> Result<Vec<SearchHit>> {
        self.session(doc)?;
        let query = query.to_string();
        let id = self
            .coordinator
            .pool()
            .submit(doc, Priority::High, move |id, doc| WorkerRequest::Search {
                id,
                doc,
                item,
                query,
                max_hits,
            })?;
        match self.recv(id)? {
            WorkerResponse::Search { hits, .. } => Ok(hits),
            WorkerResponse::Error {
                error: error @ (Error::Decoder(_) | Error::Malformed { .. }),
                ..
            } => {
                debug!("search failed on {doc}#{item}: {error}");
                Ok(Vec::new())
            }
            WorkerResponse::Error { error, .. } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    /// Exact chapter XHTML from the EPUB archive.
    pub fn epub_chapter(&mut self, doc: &DocumentId, item: usize) -> Result<String> {
        self.session(doc)?;
        let id = self
            .coordinator
            .pool()
            .submit(doc, Priority::High, move |id, doc| {
                WorkerRequest::EpubChapter { id, doc, item }
            })?;
        match self.recv(id)? {
            WorkerResponse::Chapter { xhtml, .. } => Ok(xhtml),
            WorkerResponse::Error { error, .. } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    /// Thumbnail (scale 0.5): L1, then the persistent tier, then a render.
    pub fn thumbnail(&mut self, doc: &DocumentId, item: usize) -> Result<Arc<RenderedTile>> {
        let hash = self.session(doc)?.content_hash.clone();
        let key = TileKey::for_item(doc, item, THUMBNAIL_SCALE);
        if let Some(hit) = self.coordinator.cache().get(&key) {
            return Ok(hit);
        }

        // L2 probe; a hit fills L1 without re-persisting.
        if let Some(store) = &self.store {
            match store.get(&hash, item) {
                Ok(Some(thumb)) => {
                    let tile = RenderedTile {
                        key,
                        bytes: Arc::new(thumb.bytes),
                        format: RasterFormat::Webp,
                        width: thumb.width,
                        height: thumb.height,
                    };
                    return Ok(self.coordinator.cache().insert(tile));
                }
                Ok(None) => {}
                Err(err) => warn!("thumbnail store read failed: {err:#}"),
            }
        }

        let rendered = self.render_item(doc, item, THUMBNAIL_SCALE)?;
        self.persist_thumbnail(&hash, item, &rendered);
        Ok(rendered)
    }

    /// Mirror a thumbnail into the persistent tier, best effort.
    fn persist_thumbnail(&self, hash: &str, item: usize, tile: &RenderedTile) {
        let Some(store) = &self.store else { return };
        let webp = match to_webp(tile) {
            Some(webp) => webp,
            None => return,
        };
        if let Err(err) = store.put(hash, item, &webp, tile.width, tile.height) {
            // Persistence failures never tear the session
            warn!("thumbnail store write failed: {err:#}");
        }
    }

    /// Never-blank item render: cached full quality, else a thumbnail with
    /// a full-quality upgrade in flight.
    pub fn render_item_with_fallback(
        &mut self,
        doc: &DocumentId,
        item: usize,
        scale: f32,
    ) -> Result<FallbackRender> {
        self.session(doc)?;
        let scale = quantize_scale(scale);
        let full_key = TileKey::for_item(doc, item, scale);
        if let Some(hit) = self.coordinator.cache().get(&full_key) {
            return Ok(FallbackRender {
                initial: hit,
                initial_scale: scale,
                is_full_quality: true,
                upgrade: None,
            });
        }

        let thumb = self.thumbnail(doc, item)?;
        let upgrade = self
            .coordinator
            .request_item_render(doc, item, scale, Priority::High, false);
        Ok(FallbackRender {
            initial: thumb,
            initial_scale: THUMBNAIL_SCALE,
            is_full_quality: false,
            upgrade,
        })
    }

    /// Aim the linear prefetcher at an item.
    pub fn prefetch_around(&mut self, doc: &DocumentId, item: usize, scale: f32) {
        self.coordinator.prefetch_around(doc, item, scale);
    }

    /// Spatial ripple prefetch for grid layouts.
    pub fn prefetch_grid(
        &mut self,
        doc: &DocumentId,
        center: usize,
        columns: usize,
        radius: usize,
        scale: f32,
    ) {
        self.coordinator.prefetch_grid(doc, center, columns, radius, scale);
    }

    /// Evaluate a viewport change; returns the immediate fallback paints.
    pub fn update_viewport(
        &mut self,
        doc: &DocumentId,
        viewport: &ViewportState,
    ) -> Vec<FallbackPaint> {
        self.coordinator
            .update_viewport(doc, viewport, Instant::now())
    }

    /// Drive the pipeline; also mirrors completed thumbnails to disk.
    pub fn pump(&mut self) -> Vec<RenderEvent> {
        let events = self.coordinator.pump(Instant::now());
        for event in &events {
            if let RenderEvent::ItemReady {
                doc, item, scale, key,
            } = event
            {
                if *scale == THUMBNAIL_SCALE {
                    let hash = match self.docs.get(doc) {
                        Some(session) => session.content_hash.clone(),
                        None => continue,
                    };
                    if let Some(tile) = self.coordinator.cache().get(key) {
                        self.persist_thumbnail(&hash, *item, &tile);
                    }
                }
            }
        }
        events
    }

    /// Composite the current best-available content for a viewport.
    pub fn compose(&mut self, doc: &DocumentId, viewport: &ViewportState) -> Frame {
        self.coordinator.compose(doc, viewport)
    }

    pub fn gesture_began(&mut self) {
        self.coordinator.gesture_began(Instant::now());
    }

    pub fn gesture_ended(&mut self) {
        self.coordinator.gesture_ended(Instant::now());
    }

    pub fn coordinator(&mut self) -> &mut RenderCoordinator {
        &mut self.coordinator
    }

    pub fn clear_cache(&mut self) {
        self.coordinator.clear_cache();
    }

    /// Unload one document: cache, index, and every worker copy. Persistent
    /// thumbnails stay for the next session.
    pub fn unload_document(&mut self, doc: &DocumentId) {
        self.coordinator.unload_document(doc);
        self.docs.remove(doc);
    }

    /// Tear the provider down; workers stop after their current request.
    pub fn destroy(mut self) {
        let docs: Vec<DocumentId> = self.docs.keys().cloned().collect();
        for doc in docs {
            self.unload_document(&doc);
        }
        self.coordinator.pool().shutdown();
    }

    /// Wait for one response; transport failures (timeout, dead worker)
    /// surface as errors, worker-level errors come back as the response.
    fn recv(&mut self, id: RequestId) -> Result<WorkerResponse> {
        let timeout = self.config.request_timeout;
        self.coordinator.pool().recv_until(id, timeout)
    }
}

fn unexpected(response: WorkerResponse) -> Error {
    Error::malformed(format!("unexpected worker response: {response:?}"))
}

fn to_webp(tile: &RenderedTile) -> Option<Vec<u8>> {
    let dynamic = match tile.format {
        RasterFormat::Webp => return Some(tile.bytes.as_ref().clone()),
        RasterFormat::Png => image::load_from_memory(&tile.bytes).ok()?,
        RasterFormat::Rgba => {
            let img = image::RgbaImage::from_raw(
                tile.width,
                tile.height,
                tile.bytes.as_ref().clone(),
            )?;
            image::DynamicImage::ImageRgba8(img)
        }
    };
    let mut out = Vec::new();
    dynamic
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::WebP)
        .ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_calls_require_a_loaded_document() {
        let mut provider = DocumentProvider::with_store(
            ProviderConfig {
                pool: PoolConfig {
                    workers: 1,
                    ..PoolConfig::default()
                },
                ..ProviderConfig::default()
            },
            None,
        );
        let doc = DocumentId::new("ghost");
        assert!(matches!(
            provider.render_item(&doc, 0, 1.0),
            Err(Error::NotLoaded { .. })
        ));
        assert!(matches!(
            provider.item_dimensions(&doc, 0),
            Err(Error::NotLoaded { .. })
        ));
        assert!(matches!(
            provider.search(&doc, 0, "x", 10),
            Err(Error::NotLoaded { .. })
        ));
    }

    #[test]
    fn malformed_bytes_fail_load() {
        let mut provider = DocumentProvider::with_store(
            ProviderConfig {
                pool: PoolConfig {
                    workers: 1,
                    ..PoolConfig::default()
                },
                ..ProviderConfig::default()
            },
            None,
        );
        let err = provider
            .load_document("bad", b"%PDF-1.7 truncated garbage".to_vec(), None)
            .unwrap_err();
        assert!(matches!(err, Error::Decoder(_) | Error::Malformed { .. }));

        let err = provider
            .load_document("noformat", b"not a document".to_vec(), None)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFormat));
    }

    #[test]
    fn webp_transcode_accepts_rgba() {
        let tile = RenderedTile {
            key: TileKey::for_item(&DocumentId::new("d"), 0, 0.5),
            bytes: Arc::new(vec![128u8; 2 * 2 * 4]),
            format: RasterFormat::Rgba,
            width: 2,
            height: 2,
        };
        let webp = to_webp(&tile).unwrap();
        let decoded = image::load_from_memory(&webp).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2, 2));
    }
}
