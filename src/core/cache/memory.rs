//! In-memory cache backend for testing.

use super::{
    CacheBackend, CacheEntry, CacheKey, CacheManifest, CacheStats, ContentHash, DocumentId,
};
use crate::error::CacheError;
use chrono::Utc;
use image::RgbaImage;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

struct DocumentSlot {
    manifest: CacheManifest,
    pages: BTreeMap<u32, Arc<RgbaImage>>,
}

/// In-memory cache backend
///
/// Useful for testing and scenarios where persistence isn't needed.
/// Page images are shared by `Arc`, so hits are zero-copy.
pub struct InMemoryCache {
    documents: RwLock<HashMap<DocumentId, DocumentSlot>>,
}

impl InMemoryCache {
    /// Create a new in-memory cache
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let documents = self.documents.read().map_err(|_| CacheError::Poisoned)?;

        let Some(slot) = documents.get(&key.document) else {
            return Ok(None);
        };
        if !slot.manifest.covers(key) {
            return Ok(None);
        }

        Ok(slot.pages.get(&key.page).map(|image| CacheEntry {
            key: key.clone(),
            image: Arc::clone(image),
            manifest: slot.manifest.clone(),
        }))
    }

    fn put(
        &self,
        key: &CacheKey,
        image: Arc<RgbaImage>,
        manifest: &CacheManifest,
    ) -> Result<(), CacheError> {
        let mut documents = self.documents.write().map_err(|_| CacheError::Poisoned)?;

        let slot = documents
            .entry(key.document.clone())
            .or_insert_with(|| DocumentSlot {
                manifest: manifest.clone(),
                pages: BTreeMap::new(),
            });

        if slot.manifest.source_hash != manifest.source_hash || slot.manifest.scale != manifest.scale
        {
            slot.pages.clear();
        }
        slot.manifest = manifest.clone();
        slot.pages.insert(key.page, image);
        Ok(())
    }

    fn manifest(&self, document: &DocumentId) -> Result<Option<CacheManifest>, CacheError> {
        let documents = self.documents.read().map_err(|_| CacheError::Poisoned)?;
        Ok(documents.get(document).map(|slot| slot.manifest.clone()))
    }

    fn invalidate_by_source_hash(&self, hash: &ContentHash) -> Result<usize, CacheError> {
        let mut documents = self.documents.write().map_err(|_| CacheError::Poisoned)?;

        let before = documents.len();
        documents.retain(|_, slot| &slot.manifest.source_hash != hash);
        Ok(before - documents.len())
    }

    fn invalidate_document(&self, document: &DocumentId) -> Result<(), CacheError> {
        let mut documents = self.documents.write().map_err(|_| CacheError::Poisoned)?;
        documents.remove(document);
        Ok(())
    }

    fn prune_older_than(&self, max_age: Duration) -> Result<usize, CacheError> {
        let mut documents = self.documents.write().map_err(|_| CacheError::Poisoned)?;

        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let before = documents.len();
        documents.retain(|_, slot| now - slot.manifest.generated_at <= max_age);
        Ok(before - documents.len())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut documents = self.documents.write().map_err(|_| CacheError::Poisoned)?;
        documents.clear();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let documents = self.documents.read().map_err(|_| CacheError::Poisoned)?;

        let pages = documents.values().map(|slot| slot.pages.len()).sum();
        let total_size_bytes = documents
            .values()
            .flat_map(|slot| slot.pages.values())
            .map(|image| image.as_raw().len() as u64)
            .sum();

        Ok(CacheStats {
            documents: documents.len(),
            pages,
            total_size_bytes,
            oldest_entry: documents.values().map(|s| s.manifest.generated_at).min(),
            newest_entry: documents.values().map(|s| s.manifest.generated_at).max(),
        })
    }
}
