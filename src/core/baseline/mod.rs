//! # Baseline Module
//!
//! Read-only approved references that test documents are compared against.
//!
//! A baseline lives in its own directory:
//! ```text
//! <baseline-root>/<id>/manifest.json
//! <baseline-root>/<id>/page-1.png
//! <baseline-root>/<id>/page-2.png
//! ```
//! Baselines are produced elsewhere; this module only loads them and keeps
//! each loaded baseline in memory so every batch item sharing an id shares
//! one copy.

use crate::core::raster::PageImage;
use crate::error::BaselineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Manifest describing a baseline reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineManifest {
    pub page_count: u32,
    /// Dominant colors of the approved document as `#rrggbb`
    #[serde(default)]
    pub dominant_color_summary: Vec<String>,
    /// Per-page flag: did the approved page carry content at its edges
    #[serde(default)]
    pub edge_content_flags: Vec<bool>,
}

/// A loaded baseline
#[derive(Debug)]
pub struct Baseline {
    pub id: String,
    pub manifest: BaselineManifest,
    pub pages: Vec<PageImage>,
}

impl Baseline {
    /// Assemble a baseline from already-decoded pages
    pub fn from_parts(id: impl Into<String>, manifest: BaselineManifest, pages: Vec<PageImage>) -> Self {
        Self {
            id: id.into(),
            manifest,
            pages,
        }
    }

    pub fn page(&self, page: u32) -> Option<&PageImage> {
        self.pages.iter().find(|p| p.page == page)
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Recorded edge-content flag for a 1-based page, if the manifest has one
    pub fn edge_flag(&self, page: u32) -> Option<bool> {
        let index = page.checked_sub(1)? as usize;
        self.manifest.edge_content_flags.get(index).copied()
    }

    /// Parse the manifest's dominant colors, skipping malformed entries
    pub fn dominant_colors(&self) -> Vec<[u8; 3]> {
        self.manifest
            .dominant_color_summary
            .iter()
            .filter_map(|hex| parse_hex_color(hex))
            .collect()
    }
}

/// Parse `#rrggbb` (leading `#` optional)
pub fn parse_hex_color(hex: &str) -> Option<[u8; 3]> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Loads baselines from disk and shares them by id
pub struct BaselineStore {
    root: PathBuf,
    loaded: Mutex<HashMap<String, Arc<Baseline>>>,
}

impl BaselineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register an in-memory baseline under its id
    pub fn insert(&self, baseline: Baseline) -> Arc<Baseline> {
        let baseline = Arc::new(baseline);
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(baseline.id.clone(), Arc::clone(&baseline));
        baseline
    }

    /// Load a baseline by id, reusing an earlier load
    pub fn load(&self, id: &str) -> Result<Arc<Baseline>, BaselineError> {
        if let Some(baseline) = self
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Ok(Arc::clone(baseline));
        }

        let baseline = Arc::new(self.read_from_disk(id)?);
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        // Another worker may have loaded it meanwhile; keep the first copy
        Ok(Arc::clone(
            loaded.entry(id.to_string()).or_insert(baseline),
        ))
    }

    fn read_from_disk(&self, id: &str) -> Result<Baseline, BaselineError> {
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(BaselineError::InvalidId { id: id.to_string() });
        }

        let dir = self.root.join(id);
        let manifest_path = dir.join("manifest.json");
        let bytes = match fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BaselineError::NotFound {
                    id: id.to_string(),
                    path: dir,
                })
            }
            Err(e) => {
                return Err(BaselineError::InvalidManifest {
                    path: manifest_path,
                    reason: e.to_string(),
                })
            }
        };

        let manifest: BaselineManifest =
            serde_json::from_slice(&bytes).map_err(|e| BaselineError::InvalidManifest {
                path: manifest_path.clone(),
                reason: e.to_string(),
            })?;

        if manifest.page_count == 0 {
            return Err(BaselineError::InvalidManifest {
                path: manifest_path,
                reason: "pageCount must be at least 1".to_string(),
            });
        }

        let pages = (1..=manifest.page_count)
            .map(|page| {
                let path = dir.join(format!("page-{}.png", page));
                let image = image::open(&path).map_err(|e| BaselineError::PageUnreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                Ok(PageImage {
                    page,
                    image: Arc::new(image.to_rgba8()),
                })
            })
            .collect::<Result<Vec<_>, BaselineError>>()?;

        debug!(target: "pdf_gate::diff", baseline = id, pages = pages.len(), "loaded baseline");
        Ok(Baseline::from_parts(id, manifest, pages))
    }
}
