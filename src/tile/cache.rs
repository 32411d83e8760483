//! In-memory tile cache (L1): LRU with a byte budget

use std::sync::Arc;

use lru::LruCache;

use crate::document::DocumentId;
use crate::tile::{RenderedTile, TileKey};

/// Default in-memory budget: 100 MiB of raster bytes.
pub const DEFAULT_BYTE_BUDGET: usize = 100 * 1024 * 1024;

/// LRU cache owning the raster bytes for every live tile.
///
/// Insertion evicts oldest entries until the byte budget is met; reads
/// promote. Keys are canonical (`TileKey` quantises scale on construction),
/// so an arbitrary-scale request can never create an unfindable entry.
pub struct TileCache {
    entries: LruCache<TileKey, Arc<RenderedTile>>,
    total_bytes: usize,
    byte_budget: usize,
}

impl TileCache {
    #[must_use]
    pub fn new(byte_budget: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            byte_budget: byte_budget.max(1),
        }
    }

    /// Get a cached tile, promoting it in the LRU order.
    #[must_use]
    pub fn get(&mut self, key: &TileKey) -> Option<Arc<RenderedTile>> {
        self.entries.get(key).cloned()
    }

    /// Check for a key without promoting it.
    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.entries.contains(key)
    }

    /// Insert a tile, evicting oldest entries past the byte budget.
    pub fn insert(&mut self, tile: RenderedTile) -> Arc<RenderedTile> {
        let arc = Arc::new(tile);
        let key = arc.key.clone();
        if let Some(old) = self.entries.put(key, arc.clone()) {
            self.total_bytes -= old.byte_size();
        }
        self.total_bytes += arc.byte_size();

        while self.total_bytes > self.byte_budget {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= evicted.byte_size();
            log::debug!(
                "tile cache evicted {:?} ({} bytes, {} in use)",
                evicted.key,
                evicted.byte_size(),
                self.total_bytes
            );
        }
        arc
    }

    pub fn remove(&mut self, key: &TileKey) -> Option<Arc<RenderedTile>> {
        let removed = self.entries.pop(key);
        if let Some(ref tile) = removed {
            self.total_bytes -= tile.byte_size();
        }
        removed
    }

    /// Drop every entry belonging to `doc`.
    pub fn remove_document(&mut self, doc: &DocumentId) {
        let keys: Vec<TileKey> = self
            .entries
            .iter()
            .filter(|(k, _)| &k.doc == doc)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            self.remove(&key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[must_use]
    pub fn byte_budget(&self) -> usize {
        self.byte_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{RasterFormat, TileCoord};

    fn tile(doc: &str, item: usize, x: u32, bytes: usize) -> RenderedTile {
        let doc = DocumentId::new(doc);
        let coord = TileCoord::new(item, x, 0, 1.0, 256);
        RenderedTile {
            key: TileKey::for_tile(&doc, &coord),
            bytes: Arc::new(vec![0u8; bytes]),
            format: RasterFormat::Png,
            width: 256,
            height: 256,
        }
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let mut cache = TileCache::new(1024);
        let t = tile("d", 0, 0, 100);
        let key = t.key.clone();

        cache.insert(t);
        assert!(cache.contains(&key));
        assert!(cache.get(&key).is_some());

        cache.remove(&key);
        assert!(!cache.contains(&key));
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn byte_budget_never_exceeded() {
        let mut cache = TileCache::new(250);
        for x in 0..10 {
            cache.insert(tile("d", 0, x, 100));
            assert!(cache.total_bytes() <= 250);
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_is_oldest_first_and_reads_promote() {
        let mut cache = TileCache::new(300);
        let a = tile("d", 0, 0, 100);
        let b = tile("d", 0, 1, 100);
        let c = tile("d", 0, 2, 100);
        let key_a = a.key.clone();
        let key_b = b.key.clone();

        cache.insert(a);
        cache.insert(b);
        cache.insert(c);
        // Promote a, then overflow: b is now the oldest
        assert!(cache.get(&key_a).is_some());
        cache.insert(tile("d", 0, 3, 100));

        assert!(cache.contains(&key_a));
        assert!(!cache.contains(&key_b));
    }

    #[test]
    fn reinsert_replaces_byte_count() {
        let mut cache = TileCache::new(1024);
        cache.insert(tile("d", 0, 0, 100));
        cache.insert(tile("d", 0, 0, 300));
        assert_eq!(cache.total_bytes(), 300);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_document_scopes_to_doc() {
        let mut cache = TileCache::new(4096);
        cache.insert(tile("a", 0, 0, 10));
        cache.insert(tile("a", 1, 0, 10));
        cache.insert(tile("b", 0, 0, 10));

        cache.remove_document(&DocumentId::new("a"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 10);
    }
}
