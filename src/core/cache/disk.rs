//! Filesystem cache backend for persistent storage.
//!
//! Layout:
//! ```text
//! <root>/<document-id>/manifest.json
//! <root>/<document-id>/page-<scale>-<page>.png
//! ```
//!
//! Every file is written to a temporary file in the same directory and then
//! renamed into place, so a concurrent reader sees either the old file, the
//! new file, or no file - never a partial one.

use super::{
    CacheBackend, CacheEntry, CacheKey, CacheManifest, CacheStats, ContentHash, DocumentId,
};
use crate::error::CacheError;
use chrono::Utc;
use image::{ImageFormat, RgbaImage};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

const LOG_TARGET: &str = "pdf_gate::cache";
const MANIFEST_FILE: &str = "manifest.json";

/// Disk-backed persistent cache
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Open or create a cache rooted at the given directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, document: &DocumentId) -> PathBuf {
        self.root.join(document.as_str())
    }

    fn page_path(&self, key: &CacheKey) -> PathBuf {
        self.document_dir(&key.document)
            .join(format!("page-{}-{}.png", key.scale.hundredths(), key.page))
    }

    fn read_manifest(dir: &Path) -> Result<Option<CacheManifest>, CacheError> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupted {
                path,
                reason: e.to_string(),
            })
    }

    /// Write `target` through a temp file in `dir`, then rename it into place
    fn publish<F>(dir: &Path, target: &Path, write: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut BufWriter<&mut File>) -> Result<(), CacheError>,
    {
        let io_error = |source| CacheError::Io {
            path: target.to_path_buf(),
            source,
        };

        let mut temp = NamedTempFile::new_in(dir).map_err(io_error)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            write(&mut writer)?;
            writer.flush().map_err(io_error)?;
        }
        temp.as_file().sync_all().map_err(io_error)?;
        temp.persist(target).map_err(|e| io_error(e.error))?;
        Ok(())
    }

    fn remove_dir(dir: &Path) -> Result<(), CacheError> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io {
                path: dir.to_path_buf(),
                source,
            }),
        }
    }

    fn document_dirs(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect()
    }

    fn is_page_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("page-") && name.ends_with(".png"))
    }
}

impl CacheBackend for DiskCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let dir = self.document_dir(&key.document);
        let Some(manifest) = Self::read_manifest(&dir)? else {
            return Ok(None);
        };

        if !manifest.covers(key) {
            debug!(
                target: LOG_TARGET,
                document = %key.document,
                page = key.page,
                "stored manifest does not cover key, treating as miss"
            );
            return Ok(None);
        }

        let path = self.page_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let image = image::open(&path)
            .map_err(|e| CacheError::Corrupted {
                path: path.clone(),
                reason: e.to_string(),
            })?
            .to_rgba8();

        if image.width() == 0 || image.height() == 0 {
            return Err(CacheError::Corrupted {
                path,
                reason: "page image is empty".to_string(),
            });
        }

        Ok(Some(CacheEntry {
            key: key.clone(),
            image: Arc::new(image),
            manifest,
        }))
    }

    fn put(
        &self,
        key: &CacheKey,
        image: Arc<RgbaImage>,
        manifest: &CacheManifest,
    ) -> Result<(), CacheError> {
        let dir = self.document_dir(&key.document);

        let stored = match Self::read_manifest(&dir) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(target: LOG_TARGET, document = %key.document, "discarding unreadable manifest: {}", e);
                None
            }
        };
        let matches = stored.as_ref().is_some_and(|m| {
            m.source_hash == manifest.source_hash
                && m.scale == manifest.scale
                && m.page_count == manifest.page_count
        });

        if !matches && dir.exists() {
            debug!(target: LOG_TARGET, document = %key.document, "replacing stale cache directory");
            Self::remove_dir(&dir)?;
        }
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let page_path = self.page_path(key);
        Self::publish(&dir, &page_path, |writer| {
            image
                .write_to(writer, ImageFormat::Png)
                .map_err(|e| CacheError::Serialization(e.to_string()))
        })?;

        if !matches {
            let manifest_path = dir.join(MANIFEST_FILE);
            Self::publish(&dir, &manifest_path, |writer| {
                serde_json::to_writer_pretty(&mut *writer, manifest)
                    .map_err(|e| CacheError::Serialization(e.to_string()))
            })?;
        }

        Ok(())
    }

    fn manifest(&self, document: &DocumentId) -> Result<Option<CacheManifest>, CacheError> {
        Self::read_manifest(&self.document_dir(document))
    }

    fn invalidate_by_source_hash(&self, hash: &ContentHash) -> Result<usize, CacheError> {
        let mut removed = 0;
        for dir in self.document_dirs() {
            if let Ok(Some(manifest)) = Self::read_manifest(&dir) {
                if &manifest.source_hash == hash {
                    Self::remove_dir(&dir)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn invalidate_document(&self, document: &DocumentId) -> Result<(), CacheError> {
        Self::remove_dir(&self.document_dir(document))
    }

    fn prune_older_than(&self, max_age: Duration) -> Result<usize, CacheError> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut removed = 0;

        for dir in self.document_dirs() {
            let expired = match Self::read_manifest(&dir) {
                Ok(Some(manifest)) => now - manifest.generated_at > max_age,
                // A directory without a manifest may still be mid-write
                Ok(None) => false,
                Err(_) => true,
            };
            if expired {
                Self::remove_dir(&dir)?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn clear(&self) -> Result<(), CacheError> {
        for dir in self.document_dirs() {
            Self::remove_dir(&dir)?;
        }
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();

        for dir in self.document_dirs() {
            if let Ok(Some(manifest)) = Self::read_manifest(&dir) {
                stats.documents += 1;
                stats.oldest_entry = Some(match stats.oldest_entry {
                    Some(oldest) => oldest.min(manifest.generated_at),
                    None => manifest.generated_at,
                });
                stats.newest_entry = Some(match stats.newest_entry {
                    Some(newest) => newest.max(manifest.generated_at),
                    None => manifest.generated_at,
                });
            }
        }

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if Self::is_page_file(entry.path()) {
                stats.pages += 1;
            }
            stats.total_size_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::Scale;
    use image::Rgba;
    use tempfile::TempDir;

    fn key(source: &[u8], page: u32) -> CacheKey {
        CacheKey::new(
            DocumentId::for_path(Path::new("/jobs/flyer.pdf")),
            ContentHash::of_bytes(source),
            Scale::from_factor(1.0),
            page,
        )
    }

    fn page_image(shade: u8) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(8, 6, Rgba([shade, 0, 0, 255])))
    }

    #[test]
    fn disk_cache_stores_and_retrieves() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::open(temp_dir.path().join("cache")).unwrap();
        let k = key(b"v1", 1);
        let manifest = CacheManifest::new(k.source_hash.clone(), 1, k.scale);

        cache.put(&k, page_image(200), &manifest).unwrap();
        let entry = cache.get(&k).unwrap().unwrap();

        assert_eq!(entry.image.dimensions(), (8, 6));
        assert_eq!(entry.image.get_pixel(3, 3), &Rgba([200, 0, 0, 255]));
        assert_eq!(entry.manifest.page_count, 1);
    }

    #[test]
    fn mismatched_hash_is_never_served() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::open(temp_dir.path()).unwrap();
        let k = key(b"v1", 1);
        cache
            .put(&k, page_image(1), &CacheManifest::new(k.source_hash.clone(), 1, k.scale))
            .unwrap();

        assert!(cache.get(&key(b"v1-edited", 1)).unwrap().is_none());
    }

    #[test]
    fn corrupted_page_reports_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::open(temp_dir.path()).unwrap();
        let k = key(b"v1", 1);
        cache
            .put(&k, page_image(1), &CacheManifest::new(k.source_hash.clone(), 1, k.scale))
            .unwrap();

        fs::write(cache.page_path(&k), b"not a png").unwrap();

        assert!(matches!(cache.get(&k), Err(CacheError::Corrupted { .. })));
    }

    #[test]
    fn corrupted_manifest_reports_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::open(temp_dir.path()).unwrap();
        let k = key(b"v1", 1);
        cache
            .put(&k, page_image(1), &CacheManifest::new(k.source_hash.clone(), 1, k.scale))
            .unwrap();

        fs::write(cache.document_dir(&k.document).join(MANIFEST_FILE), b"{").unwrap();

        assert!(matches!(cache.get(&k), Err(CacheError::Corrupted { .. })));
    }

    #[test]
    fn new_source_hash_replaces_directory() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::open(temp_dir.path()).unwrap();

        let old = key(b"v1", 2);
        cache
            .put(&old, page_image(1), &CacheManifest::new(old.source_hash.clone(), 2, old.scale))
            .unwrap();

        let new = key(b"v2", 1);
        cache
            .put(&new, page_image(2), &CacheManifest::new(new.source_hash.clone(), 1, new.scale))
            .unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.pages, 1);
        assert_eq!(
            cache.manifest(&new.document).unwrap().unwrap().source_hash,
            new.source_hash
        );
    }

    #[test]
    fn invalidate_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::open(temp_dir.path()).unwrap();
        let k = key(b"v1", 1);
        cache
            .put(&k, page_image(1), &CacheManifest::new(k.source_hash.clone(), 1, k.scale))
            .unwrap();

        assert_eq!(cache.invalidate_by_source_hash(&ContentHash::of_bytes(b"other")).unwrap(), 0);
        assert_eq!(cache.invalidate_by_source_hash(&k.source_hash).unwrap(), 1);
        assert!(cache.get(&k).unwrap().is_none());

        cache
            .put(&k, page_image(1), &CacheManifest::new(k.source_hash.clone(), 1, k.scale))
            .unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().documents, 0);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::open(temp_dir.path()).unwrap();
        let k = key(b"v1", 1);
        cache
            .put(&k, page_image(1), &CacheManifest::new(k.source_hash.clone(), 1, k.scale))
            .unwrap();

        let names: Vec<String> = fs::read_dir(cache.document_dir(&k.document))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names.len(), 2, "unexpected files: {:?}", names);
        assert!(names.contains(&MANIFEST_FILE.to_string()));
    }
}
