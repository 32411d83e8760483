//! Lectern: tile rendering core for a PDF/EPUB document reader
//!
//! The crate turns viewport state into rendered tiles without ever showing
//! a blank region: a per-page quadtree index answers "best already-rendered
//! content for this region" at any scale while a pool of decoder workers
//! fills in the requested detail. Raster bytes live in a byte-budgeted LRU
//! cache; thumbnails are mirrored to a persistent store for cross-session
//! warm-up.
//!
//! Entry point is [`DocumentProvider`]: load documents from bytes, render
//! items and tiles, extract text, search, and feed it viewport updates
//! while pumping its event loop.

pub mod coordinator;
pub mod document;
pub mod epub;
pub mod error;
pub mod geom;
pub mod provider;
pub mod scale;
pub mod tile;
pub mod worker;

pub use coordinator::{
    Camera, CoordinatorConfig, FallbackPaint, Frame, ItemLayout, RenderCoordinator, RenderEvent,
    ViewportState,
};
pub use document::{DocumentFormat, DocumentId, DocumentInfo, TocEntry};
pub use error::{Error, Result};
pub use provider::{DocumentProvider, FallbackRender, ProviderConfig};
pub use tile::{RasterFormat, RenderedTile, SpatialTileIndex, TileCache, TileCoord, TileKey};
pub use worker::{Priority, WorkerPool};
