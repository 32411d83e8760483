//! Render worker thread loop

use std::sync::Arc;

use flume::{Receiver, Sender};
use log::debug;

use crate::worker::decoder::DecoderHost;
use crate::worker::request::{WorkerRequest, WorkerResponse};
use crate::worker::slots::RasterSlots;

/// Worker main: one decoder host, requests served synchronously in order.
///
/// Every request is answered with exactly one typed response; errors cross
/// the channel as values and never kill the thread. The loop ends on
/// `Shutdown` or when the request channel closes.
pub fn run_worker(
    worker_id: usize,
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
    slots: Arc<RasterSlots>,
) {
    debug!("worker {worker_id} started");
    let mut host = DecoderHost::new();

    for request in requests.iter() {
        let response = match request {
            WorkerRequest::Shutdown => break,

            WorkerRequest::Load {
                id,
                doc,
                bytes,
                filename,
            } => match host.load(doc.clone(), bytes, filename.as_deref()) {
                Ok(info) => WorkerResponse::Loaded { id, doc, info },
                Err(error) => WorkerResponse::Error { id, error },
            },

            WorkerRequest::RenderItem {
                id,
                doc,
                item,
                scale,
            } => match host.render_item(&doc, item, scale) {
                Ok(raster) => WorkerResponse::Item { id, raster },
                Err(error) => WorkerResponse::Error { id, error },
            },

            WorkerRequest::RenderTile {
                id,
                doc,
                coord,
                format,
                slot,
            } => match host.render_tile(&doc, &coord, format, &slots, slot) {
                Ok((payload, timing)) => WorkerResponse::Tile {
                    id,
                    coord,
                    payload,
                    timing,
                },
                Err(error) => WorkerResponse::Error { id, error },
            },

            WorkerRequest::StructuredText { id, doc, item } => {
                match host.structured_text(&doc, item) {
                    Ok(page) => WorkerResponse::Text { id, page },
                    Err(error) => WorkerResponse::Error { id, error },
                }
            }

            WorkerRequest::Search {
                id,
                doc,
                item,
                query,
                max_hits,
            } => match host.search(&doc, item, &query, max_hits) {
                Ok(hits) => WorkerResponse::Search { id, hits },
                Err(error) => WorkerResponse::Error { id, error },
            },

            WorkerRequest::EpubChapter { id, doc, item } => match host.epub_chapter(&doc, item) {
                Ok(xhtml) => WorkerResponse::Chapter { id, xhtml },
                Err(error) => WorkerResponse::Error { id, error },
            },

            WorkerRequest::ItemCount { id, doc } => match host.item_count(&doc) {
                Ok(count) => WorkerResponse::Count { id, count },
                Err(error) => WorkerResponse::Error { id, error },
            },

            WorkerRequest::ItemDimensions { id, doc, item } => {
                match host.item_dimensions(&doc, item) {
                    Ok((width, height)) => WorkerResponse::Dimensions { id, width, height },
                    Err(error) => WorkerResponse::Error { id, error },
                }
            }

            WorkerRequest::Unload { id, doc } => {
                host.unload(&doc);
                WorkerResponse::Unloaded { id }
            }
        };

        if responses.send(response).is_err() {
            break;
        }
    }

    debug!("worker {worker_id} stopped");
}
