//! Decoder workers and the pool that routes requests to them

mod decoder;
mod pool;
mod request;
mod slots;
mod worker;

pub use decoder::{DecoderHost, MAX_RENDER_DIMENSION};
pub use pool::{default_worker_count, PoolConfig, WorkerPool, DEFAULT_PENDING_CAP};
pub use request::{
    CharBox, LoadedDocument, Priority, Quad, Raster, RasterPayload, RenderTiming, RequestId,
    SearchHit, SequenceId, StructuredPage, TextItem, WorkerRequest, WorkerResponse,
};
pub use slots::{RasterSlots, SlotGuard, SlotRef, DEFAULT_SLOTS_PER_TIER};
pub use worker::run_worker;
