//! Persistent thumbnail store (L2)
//!
//! Thumbnails (scale 0.5) are mirrored to disk keyed by
//! `(content hash, page)` so a re-opened document paints its first pages
//! without touching a worker. Failures here are advisory: callers log and
//! carry on with the in-memory tier.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Sidecar record stored next to each blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ThumbnailMeta {
    width: u32,
    height: u32,
    timestamp: DateTime<Utc>,
}

/// A thumbnail read back from the persistent tier.
#[derive(Clone, Debug)]
pub struct StoredThumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
}

/// Directory-backed key/value store for thumbnail blobs.
#[derive(Clone, Debug)]
pub struct ThumbnailStore {
    root: PathBuf,
}

impl ThumbnailStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("create thumbnail store root {root:?}"))?;
        Ok(Self { root })
    }

    /// Store rooted in the platform cache directory.
    pub fn in_cache_dir(namespace: &str) -> Result<Self> {
        let base = dirs::cache_dir().context("no platform cache directory")?;
        Self::new(base.join(namespace).join("thumbnails"))
    }

    fn blob_path(&self, content_hash: &str, page: usize) -> PathBuf {
        self.root.join(content_hash).join(format!("{page}.webp"))
    }

    fn meta_path(&self, content_hash: &str, page: usize) -> PathBuf {
        self.root.join(content_hash).join(format!("{page}.json"))
    }

    /// Persist one thumbnail blob with its dimensions.
    pub fn put(
        &self,
        content_hash: &str,
        page: usize,
        bytes: &[u8],
        width: u32,
        height: u32,
    ) -> Result<()> {
        let dir = self.root.join(content_hash);
        fs::create_dir_all(&dir).with_context(|| format!("create {dir:?}"))?;

        let blob_path = self.blob_path(content_hash, page);
        fs::write(&blob_path, bytes).with_context(|| format!("write {blob_path:?}"))?;

        let meta = ThumbnailMeta {
            width,
            height,
            timestamp: Utc::now(),
        };
        let meta_path = self.meta_path(content_hash, page);
        let json = serde_json::to_vec(&meta).context("encode thumbnail meta")?;
        fs::write(&meta_path, json).with_context(|| format!("write {meta_path:?}"))?;
        Ok(())
    }

    /// Read one thumbnail back; `Ok(None)` when absent.
    pub fn get(&self, content_hash: &str, page: usize) -> Result<Option<StoredThumbnail>> {
        let blob_path = self.blob_path(content_hash, page);
        if !blob_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&blob_path).with_context(|| format!("read {blob_path:?}"))?;

        let meta_path = self.meta_path(content_hash, page);
        let meta: ThumbnailMeta = serde_json::from_slice(
            &fs::read(&meta_path).with_context(|| format!("read {meta_path:?}"))?,
        )
        .with_context(|| format!("decode {meta_path:?}"))?;

        Ok(Some(StoredThumbnail {
            bytes,
            width: meta.width,
            height: meta.height,
            timestamp: meta.timestamp,
        }))
    }

    /// Batch read for session warm-up; unreadable entries are skipped.
    #[must_use]
    pub fn warm(&self, content_hash: &str, pages: usize) -> Vec<(usize, StoredThumbnail)> {
        (0..pages)
            .into_par_iter()
            .filter_map(|page| {
                self.get(content_hash, page)
                    .ok()
                    .flatten()
                    .map(|thumb| (page, thumb))
            })
            .collect()
    }

    /// Drop every thumbnail stored for `content_hash`.
    pub fn remove_document(&self, content_hash: &str) -> Result<()> {
        let dir = self.root.join(content_hash);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("remove {dir:?}"))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
