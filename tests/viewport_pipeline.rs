//! Viewport-to-tiles pipeline: cold open, scale-change fallback, and the
//! no-blank composition contract.

mod common;

use std::time::{Duration, Instant};

use lectern::provider::{DocumentProvider, ProviderConfig};
use lectern::worker::PoolConfig;
use lectern::{Camera, DocumentId, RenderEvent, ViewportState};

fn provider() -> DocumentProvider {
    DocumentProvider::with_store(
        ProviderConfig {
            pool: PoolConfig {
                workers: 2,
                ..PoolConfig::default()
            },
            request_timeout: Duration::from_secs(30),
            load_timeout: Duration::from_secs(30),
            ..ProviderConfig::default()
        },
        None,
    )
}

fn viewport(x: f32, y: f32, zoom: f32) -> ViewportState {
    ViewportState {
        camera: Camera::new(x, y, zoom),
        width: 612,
        height: 792,
        focus: None,
    }
}

/// Pump until a fully-complete sequence settles or the deadline passes.
fn pump_until_settled(provider: &mut DocumentProvider, deadline: Duration) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        for event in provider.pump() {
            if let RenderEvent::SequenceSettled { complete: true, .. } = event {
                return true;
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn cold_open_paints_all_visible_tiles() {
    let mut provider = provider();
    provider
        .load_document("doc", common::minimal_pdf(3), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    let vp = viewport(0.0, 0.0, 1.0);
    let fallback = provider.update_viewport(&doc, &vp);
    assert!(fallback.is_empty(), "nothing rendered before first paint");

    assert!(
        pump_until_settled(&mut provider, Duration::from_secs(30)),
        "first render sequence never completed"
    );

    // Re-evaluating the same viewport now paints entirely from the index
    let fallback = provider.update_viewport(&doc, &vp);
    assert!(!fallback.is_empty());
    assert!(fallback.iter().all(|p| p.tile.css_stretch == 1.0));
}

#[test]
fn scale_change_keeps_old_tiles_as_fallback() {
    let mut provider = provider();
    provider
        .load_document("doc", common::minimal_pdf(1), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    provider.update_viewport(&doc, &viewport(0.0, 0.0, 1.0));
    assert!(pump_until_settled(&mut provider, Duration::from_secs(30)));

    // Zooming must paint immediately from the scale-1 tiles, stretched
    let fallback = provider.update_viewport(&doc, &viewport(0.0, 0.0, 2.0));
    assert!(
        !fallback.is_empty(),
        "scale transition produced a blank frame"
    );
    assert!(fallback.iter().any(|p| p.tile.css_stretch > 1.0));

    // And the freshly composed frame covers the viewport
    let frame = provider.compose(&doc, &viewport(0.0, 0.0, 2.0));
    assert_eq!(frame.pixels.len(), 612 * 792 * 3);
}

#[test]
fn zoom_out_animation_never_blank() {
    let mut provider = provider();
    provider
        .load_document("doc", common::minimal_pdf(1), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    provider.update_viewport(&doc, &viewport(0.0, 0.0, 4.0));
    assert!(pump_until_settled(&mut provider, Duration::from_secs(30)));

    // Walk the zoom down; every step must find some covering content
    for zoom in [3.0f32, 2.0, 1.5, 1.0] {
        let fallback = provider.update_viewport(&doc, &viewport(0.0, 0.0, zoom));
        assert!(!fallback.is_empty(), "blank frame at zoom {zoom}");
        provider.pump();
    }
}

#[test]
fn gesture_suppresses_prefetch_until_it_ends() {
    let mut provider = provider();
    provider
        .load_document("doc", common::minimal_pdf(5), None)
        .unwrap();
    let doc = DocumentId::new("doc");

    provider.gesture_began();
    provider.prefetch_around(&doc, 2, 1.0);
    provider.pump();
    assert_eq!(
        provider.coordinator().activity(),
        lectern::coordinator::Activity::Gesture
    );

    provider.gesture_ended();
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut prefetched = false;
    while Instant::now() < deadline && !prefetched {
        prefetched = provider
            .pump()
            .iter()
            .any(|e| matches!(e, RenderEvent::ItemReady { .. }));
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(prefetched, "prefetch never resumed after gesture end");
}
