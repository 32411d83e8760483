//! Provider façade against a real decoder: PDF loading, rendering, tiles,
//! and the two-tier thumbnail path.

mod common;

use std::time::Duration;

use lectern::provider::{DocumentProvider, ProviderConfig};
use lectern::tile::{RasterFormat, ThumbnailStore};
use lectern::worker::PoolConfig;
use lectern::{DocumentFormat, DocumentId, Error};
use tempfile::TempDir;

fn provider_with(workers: usize, store: Option<ThumbnailStore>) -> DocumentProvider {
    DocumentProvider::with_store(
        ProviderConfig {
            pool: PoolConfig {
                workers,
                ..PoolConfig::default()
            },
            request_timeout: Duration::from_secs(30),
            load_timeout: Duration::from_secs(30),
            ..ProviderConfig::default()
        },
        store,
    )
}

#[test]
fn load_reports_item_count_and_dimensions() {
    let mut provider = provider_with(2, None);
    let info = provider
        .load_document("doc", common::minimal_pdf(3), None)
        .unwrap();

    assert_eq!(info.format, DocumentFormat::Pdf);
    assert_eq!(info.item_count, 3);

    let doc = DocumentId::new("doc");
    let (w, h) = provider.item_dimensions(&doc, 0).unwrap();
    assert_eq!((w, h), (612.0, 792.0));
    assert!(matches!(
        provider.item_dimensions(&doc, 3),
        Err(Error::OutOfBounds { .. })
    ));
}

#[test]
fn render_item_caps_and_caches() {
    let mut provider = provider_with(1, None);
    provider
        .load_document("doc", common::minimal_pdf(1), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    let full = provider.render_item(&doc, 0, 1.0).unwrap();
    assert_eq!(full.format, RasterFormat::Png);
    assert_eq!((full.width, full.height), (612, 792));

    // Scale 16 would be 9792px tall; the 4096 cap reduces it proportionally
    let capped = provider.render_item(&doc, 0, 16.0).unwrap();
    assert!(capped.width <= 4096 && capped.height <= 4096);
    assert!(capped.height >= 4090, "cap should reduce, not crush: {}", capped.height);

    // Second call is a cache hit returning the same bytes
    let again = provider.render_item(&doc, 0, 1.0).unwrap();
    assert!(std::sync::Arc::ptr_eq(&full.bytes, &again.bytes));
}

#[test]
fn render_tile_matches_tile_math() {
    let mut provider = provider_with(1, None);
    provider
        .load_document("doc", common::minimal_pdf(1), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    let tile = provider.render_tile(&doc, 0, 0, 0, 256, 1.0).unwrap();
    assert_eq!((tile.width, tile.height), (256, 256));

    // Right-edge column clips: 612 - 512 = 100px wide
    let edge = provider.render_tile(&doc, 0, 2, 0, 256, 1.0).unwrap();
    assert_eq!((edge.width, edge.height), (100, 256));

    // Origin beyond the page is an error, not a blank tile
    assert!(matches!(
        provider.render_tile(&doc, 0, 3, 0, 256, 1.0),
        Err(Error::OutOfBounds { .. })
    ));
    assert!(matches!(
        provider.render_tile(&doc, 0, 0, 0, 64, 1.0),
        Err(Error::OutOfBounds { .. })
    ));
}

#[test]
fn text_and_search_degrade_to_empty_on_blank_pages() {
    let mut provider = provider_with(1, None);
    provider
        .load_document("doc", common::minimal_pdf(1), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    let text = provider.structured_text(&doc, 0).unwrap();
    assert!(text.items.is_empty());

    let hits = provider.search(&doc, 0, "anything", 50).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn thumbnails_persist_and_warm_across_sessions() {
    let dir = TempDir::new().unwrap();
    let bytes = common::minimal_pdf(2);
    let doc = DocumentId::new("doc");

    {
        let store = ThumbnailStore::new(dir.path().to_path_buf()).unwrap();
        let mut provider = provider_with(1, Some(store));
        provider
            .load_document("doc", bytes.clone(), None)
            .unwrap();

        // Fresh render: comes back from the worker as PNG and is mirrored
        let thumb = provider.thumbnail(&doc, 0).unwrap();
        assert_eq!(thumb.format, RasterFormat::Png);
        assert_eq!((thumb.width, thumb.height), (306, 396));
        provider.destroy();
    }

    // Same bytes, new session: the persistent tier answers without a render
    let store = ThumbnailStore::new(dir.path().to_path_buf()).unwrap();
    let mut provider = provider_with(1, Some(store));
    provider.load_document("doc", bytes, None).unwrap();

    let warmed = provider.thumbnail(&doc, 0).unwrap();
    assert_eq!(warmed.format, RasterFormat::Webp);
    assert_eq!((warmed.width, warmed.height), (306, 396));
}

#[test]
fn fallback_render_never_returns_blank() {
    let mut provider = provider_with(1, None);
    provider
        .load_document("doc", common::minimal_pdf(1), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    // Cold: a thumbnail paints first with an upgrade in flight
    let first = provider.render_item_with_fallback(&doc, 0, 2.0).unwrap();
    assert!(!first.is_full_quality);
    assert_eq!(first.initial_scale, 0.5);
    assert!(first.upgrade.is_some());

    // Drain the upgrade, then the same call is full quality immediately
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    loop {
        let events = provider.pump();
        let done = events.iter().any(|e| {
            matches!(e, lectern::RenderEvent::ItemReady { scale, .. } if *scale == 2.0)
        });
        if done || std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let second = provider.render_item_with_fallback(&doc, 0, 2.0).unwrap();
    assert!(second.is_full_quality);
    assert!(second.upgrade.is_none());
}

#[test]
fn unload_forgets_the_document() {
    let mut provider = provider_with(1, None);
    provider
        .load_document("doc", common::minimal_pdf(1), None)
        .unwrap();
    let doc = DocumentId::new("doc");
    provider.render_item(&doc, 0, 1.0).unwrap();

    provider.unload_document(&doc);
    assert!(matches!(
        provider.render_item(&doc, 0, 1.0),
        Err(Error::NotLoaded { .. })
    ));
}
