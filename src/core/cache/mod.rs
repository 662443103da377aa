//! # Cache Module
//!
//! Content-addressed storage for rasterized page images.
//!
//! ## Validity
//! Every cached document carries a manifest holding the content hash of the
//! source bytes it was rendered from. An entry is served only while that hash
//! matches the hash recomputed from the current input, so editing one byte of
//! a PDF forces regeneration and a stale render is never reused.
//!
//! ## Backends
//! - `DiskCache` - One subdirectory per document with atomic writes
//! - `InMemoryCache` - For testing and ephemeral runs

mod disk;
mod memory;
mod traits;

pub use disk::DiskCache;
pub use memory::InMemoryCache;
pub use traits::CacheBackend;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

/// Minimum file size to hash through a memory map (1MB)
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Longest file-stem prefix kept in a document id
const DOCUMENT_SLUG_LEN: usize = 48;

/// Hash of a document's raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash an in-memory byte slice
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:032x}", xxh3_128(bytes)))
    }

    /// Hash a file's contents, memory-mapping large files
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() >= MMAP_THRESHOLD {
            let file = File::open(path)?;
            // SAFETY: the map is read-only and dropped before returning; the
            // file handle outlives it.
            let mmap = unsafe { Mmap::map(&file) }?;
            Ok(Self::of_bytes(&mmap))
        } else {
            Ok(Self::of_bytes(&std::fs::read(path)?))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable, filesystem-safe name for a source document
///
/// Built from the file stem plus a hash of the full path, so two
/// `report.pdf` files in different folders get separate cache slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn for_path(path: &Path) -> Self {
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let stem = resolved
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let slug: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .take(DOCUMENT_SLUG_LEN)
            .collect();

        let path_hash = xxh3_64(resolved.to_string_lossy().as_bytes());
        Self(format!("{}-{:016x}", slug, path_hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rasterization scale factor, stored in hundredths so it can key a map
///
/// A scale of 1.0 renders at 72 DPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Scale(u32);

impl Scale {
    pub fn from_factor(factor: f32) -> Self {
        let hundredths = (factor * 100.0).round();
        Self(if hundredths.is_finite() && hundredths >= 1.0 {
            hundredths as u32
        } else {
            1
        })
    }

    pub fn factor(self) -> f32 {
        self.0 as f32 / 100.0
    }

    pub fn hundredths(self) -> u32 {
        self.0
    }

    /// Render resolution for rasterizers that take DPI
    pub fn dpi(self) -> u32 {
        ((72 * self.0) as f32 / 100.0).round() as u32
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self(200)
    }
}

impl From<f32> for Scale {
    fn from(factor: f32) -> Self {
        Self::from_factor(factor)
    }
}

impl From<Scale> for f32 {
    fn from(scale: Scale) -> Self {
        scale.factor()
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x", self.factor())
    }
}

/// Identifies one cached page image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Which cache slot (subdirectory) the page lives in
    pub document: DocumentId,
    /// Hash of the source bytes the page was rendered from
    pub source_hash: ContentHash,
    pub scale: Scale,
    /// 1-based page number
    pub page: u32,
}

impl CacheKey {
    pub fn new(document: DocumentId, source_hash: ContentHash, scale: Scale, page: u32) -> Self {
        Self {
            document,
            source_hash,
            scale,
            page,
        }
    }
}

/// Metadata stored alongside a document's cached pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManifest {
    pub source_hash: ContentHash,
    pub page_count: u32,
    pub generated_at: DateTime<Utc>,
    pub scale: Scale,
}

impl CacheManifest {
    pub fn new(source_hash: ContentHash, page_count: u32, scale: Scale) -> Self {
        Self {
            source_hash,
            page_count,
            generated_at: Utc::now(),
            scale,
        }
    }

    /// Whether this manifest describes pages for `key`
    pub fn covers(&self, key: &CacheKey) -> bool {
        self.source_hash == key.source_hash
            && self.scale == key.scale
            && key.page >= 1
            && key.page <= self.page_count
    }
}

/// A cached page image together with its document manifest
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub image: Arc<RgbaImage>,
    pub manifest: CacheManifest,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of cached documents
    pub documents: usize,
    /// Number of cached page images
    pub pages: usize,
    /// Total size of cached data in bytes
    pub total_size_bytes: u64,
    /// Oldest manifest timestamp
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Newest manifest timestamp
    pub newest_entry: Option<DateTime<Utc>>,
}
