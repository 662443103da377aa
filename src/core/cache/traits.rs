//! Cache backend trait definition.

use super::{CacheEntry, CacheKey, CacheManifest, CacheStats, ContentHash, DocumentId, Scale};
use crate::error::CacheError;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;

/// Trait for cache backends
///
/// Implementations are shared by every batch worker and must tolerate
/// concurrent readers and writers.
pub trait CacheBackend: Send + Sync {
    /// Get a cached page if it exists and is still valid
    ///
    /// The entry is only returned if the stored manifest's source hash and
    /// scale match the key. Unreadable entries surface as
    /// [`CacheError::Corrupted`] so the caller can regenerate them.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store a page image
    ///
    /// If the document's stored manifest describes a different source hash
    /// or scale, the document's previous entries are discarded first.
    fn put(
        &self,
        key: &CacheKey,
        image: Arc<RgbaImage>,
        manifest: &CacheManifest,
    ) -> Result<(), CacheError>;

    /// The manifest currently stored for a document, if any
    fn manifest(&self, document: &DocumentId) -> Result<Option<CacheManifest>, CacheError>;

    /// Remove every document whose manifest records `hash`
    ///
    /// Returns the number of documents removed.
    fn invalidate_by_source_hash(&self, hash: &ContentHash) -> Result<usize, CacheError>;

    /// Remove all entries for one document
    fn invalidate_document(&self, document: &DocumentId) -> Result<(), CacheError>;

    /// Remove documents generated longer ago than `max_age`
    ///
    /// Returns the number of documents removed.
    fn prune_older_than(&self, max_age: Duration) -> Result<usize, CacheError>;

    /// Clear all cached entries
    fn clear(&self) -> Result<(), CacheError>;

    /// Get cache statistics
    fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Fetch every page of a document, or `None` if any page is missing
    fn get_document(
        &self,
        document: &DocumentId,
        source_hash: &ContentHash,
        scale: Scale,
    ) -> Result<Option<Vec<CacheEntry>>, CacheError> {
        let manifest = match self.manifest(document)? {
            Some(manifest) => manifest,
            None => return Ok(None),
        };

        if &manifest.source_hash != source_hash || manifest.scale != scale {
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(manifest.page_count as usize);
        for page in 1..=manifest.page_count {
            let key = CacheKey::new(document.clone(), source_hash.clone(), scale, page);
            match self.get(&key)? {
                Some(entry) => entries.push(entry),
                None => return Ok(None),
            }
        }

        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(entries))
    }
}
