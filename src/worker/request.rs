//! Request and response types crossing the worker channel

use std::sync::Arc;
use std::time::Duration;

use crate::document::{DocumentId, TocEntry};
use crate::error::Error;
use crate::tile::{RasterFormat, TileCoord};
use crate::worker::slots::SlotRef;

/// Unique identifier for requests dispatched to the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of one coordinator render sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SequenceId(pub u64);

/// Tile request priority, ordered least to most urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Critical and high requests are never shed or dropped at dispatch.
    #[must_use]
    pub fn is_sheddable(self) -> bool {
        matches!(self, Self::Low | Self::Medium)
    }
}

/// Request sent to a worker thread.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Load a document into this worker's decoder
    Load {
        id: RequestId,
        doc: DocumentId,
        bytes: Arc<Vec<u8>>,
        filename: Option<String>,
    },

    /// Render a whole item (page/chapter) at a scale
    RenderItem {
        id: RequestId,
        doc: DocumentId,
        item: usize,
        scale: f32,
    },

    /// Render one tile; `slot` requests an rgba write into shared memory
    RenderTile {
        id: RequestId,
        doc: DocumentId,
        coord: TileCoord,
        format: RasterFormat,
        slot: Option<SlotRef>,
    },

    /// Structured text with per-character boxes
    StructuredText {
        id: RequestId,
        doc: DocumentId,
        item: usize,
    },

    /// Case-insensitive substring search on one item
    Search {
        id: RequestId,
        doc: DocumentId,
        item: usize,
        query: String,
        max_hits: usize,
    },

    /// Exact chapter bytes out of the EPUB archive
    EpubChapter {
        id: RequestId,
        doc: DocumentId,
        item: usize,
    },

    ItemCount {
        id: RequestId,
        doc: DocumentId,
    },

    ItemDimensions {
        id: RequestId,
        doc: DocumentId,
        item: usize,
    },

    /// Discard the worker's decoder document
    Unload { id: RequestId, doc: DocumentId },

    /// Shutdown the worker thread
    Shutdown,
}

impl WorkerRequest {
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Load { id, .. }
            | Self::RenderItem { id, .. }
            | Self::RenderTile { id, .. }
            | Self::StructuredText { id, .. }
            | Self::Search { id, .. }
            | Self::EpubChapter { id, .. }
            | Self::ItemCount { id, .. }
            | Self::ItemDimensions { id, .. }
            | Self::Unload { id, .. } => Some(*id),
            Self::Shutdown => None,
        }
    }
}

/// Document description produced by a successful load.
#[derive(Clone, Debug)]
pub struct LoadedDocument {
    pub item_count: usize,
    /// Intrinsic width/height per item in document units, decoder order
    pub item_sizes: Vec<(f32, f32)>,
    pub toc: Vec<TocEntry>,
    pub metadata: std::collections::HashMap<String, String>,
    pub has_text_layer: bool,
}

/// Raster bytes plus their pixel dimensions.
#[derive(Clone)]
pub struct Raster {
    pub bytes: Vec<u8>,
    pub format: RasterFormat,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_len", &self.bytes.len())
            .finish()
    }
}

/// Tile raster either inline or parked in a shared slot.
#[derive(Clone, Debug)]
pub enum RasterPayload {
    Bytes(Raster),
    Slot {
        slot: SlotRef,
        len: usize,
        format: RasterFormat,
        width: u32,
        height: u32,
    },
}

impl RasterPayload {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Bytes(raster) => (raster.width, raster.height),
            Self::Slot { width, height, .. } => (*width, *height),
        }
    }
}

/// Per-phase timings of a tile render.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderTiming {
    pub page_load: Duration,
    pub render: Duration,
    pub encode: Duration,
    pub total: Duration,
}

/// One character's box within a text item, document units.
#[derive(Clone, Copy, Debug)]
pub struct CharBox {
    pub c: char,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// One visual line of text with per-character boxes.
#[derive(Clone, Debug)]
pub struct TextItem {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub font_size: f32,
    pub chars: Vec<CharBox>,
}

/// Structured text of one item.
#[derive(Clone, Debug)]
pub struct StructuredPage {
    pub width: f32,
    pub height: f32,
    pub items: Vec<TextItem>,
}

/// Corner coordinates of a search hit rectangle, document units.
#[derive(Clone, Copy, Debug)]
pub struct Quad {
    pub ul: (f32, f32),
    pub ur: (f32, f32),
    pub ll: (f32, f32),
    pub lr: (f32, f32),
}

/// One search hit: a quad per matched glyph run.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub quads: Vec<Quad>,
}

/// Response from a worker thread.
#[derive(Debug)]
pub enum WorkerResponse {
    Loaded {
        id: RequestId,
        doc: DocumentId,
        info: LoadedDocument,
    },
    Item {
        id: RequestId,
        raster: Raster,
    },
    Tile {
        id: RequestId,
        coord: TileCoord,
        payload: RasterPayload,
        timing: RenderTiming,
    },
    Text {
        id: RequestId,
        page: StructuredPage,
    },
    Search {
        id: RequestId,
        hits: Vec<SearchHit>,
    },
    Chapter {
        id: RequestId,
        xhtml: String,
    },
    Count {
        id: RequestId,
        count: usize,
    },
    Dimensions {
        id: RequestId,
        width: f32,
        height: f32,
    },
    Unloaded {
        id: RequestId,
    },
    Error {
        id: RequestId,
        error: Error,
    },
}

impl WorkerResponse {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Loaded { id, .. }
            | Self::Item { id, .. }
            | Self::Tile { id, .. }
            | Self::Text { id, .. }
            | Self::Search { id, .. }
            | Self::Chapter { id, .. }
            | Self::Count { id, .. }
            | Self::Dimensions { id, .. }
            | Self::Unloaded { id }
            | Self::Error { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_least_to_most_urgent() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert!(Priority::Low.is_sheddable());
        assert!(!Priority::Critical.is_sheddable());
    }

    #[test]
    fn request_ids_are_exposed() {
        let req = WorkerRequest::ItemCount {
            id: RequestId::new(7),
            doc: DocumentId::new("d"),
        };
        assert_eq!(req.id(), Some(RequestId::new(7)));
        assert_eq!(WorkerRequest::Shutdown.id(), None);
    }
}
