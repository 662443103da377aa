//! # Raster Module
//!
//! Turns a PDF into page images through a pluggable [`PageRenderer`].
//!
//! The [`Rasterizer`] wraps the renderer with:
//! - a cache lookup keyed by the document's content hash and scale
//! - bounded retry of transient failures, each attempt under a timeout
//! - in-flight deduplication, so one document rendered concurrently by two
//!   workers is rendered once and both receive the same pages

mod inflight;
mod pdftoppm;

pub use inflight::{InFlight, Participation, WaitExpired};
pub use pdftoppm::PdftoppmRenderer;

use crate::core::cache::{CacheBackend, CacheKey, CacheManifest, ContentHash, DocumentId, Scale};
use crate::core::timeout::{call_with_timeout, CallError, Deadline};
use crate::error::{InfraKind, InfrastructureError, RenderError, Stage};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "pdf_gate::raster";

/// External page rasterization capability
pub trait PageRenderer: Send + Sync {
    /// Render every page of `path` at `scale`, in page order
    fn render(&self, path: &Path, scale: Scale) -> Result<Vec<RgbaImage>, RenderError>;
}

/// One rendered page
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number
    pub page: u32,
    pub image: Arc<RgbaImage>,
}

/// All pages of one document at one scale
#[derive(Debug)]
pub struct RasterizedDocument {
    pub document: DocumentId,
    pub source_hash: ContentHash,
    pub scale: Scale,
    pub pages: Vec<PageImage>,
}

impl RasterizedDocument {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn page(&self, page: u32) -> Option<&PageImage> {
        self.pages.iter().find(|p| p.page == page)
    }
}

/// Where a rasterization result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RasterSource {
    Cache,
    Rendered,
    /// Another caller rendered (or loaded) the document concurrently
    Joined,
}

#[derive(Debug, Clone)]
pub struct RasterOutput {
    pub document: Arc<RasterizedDocument>,
    pub source: RasterSource,
}

/// Retry and timeout settings for the renderer
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Timeout for a single attempt
    pub timeout: Duration,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            timeout: Duration::from_secs(120),
            backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RasterKey {
    document: DocumentId,
    source_hash: ContentHash,
    scale: Scale,
}

type Shared = Result<(Arc<RasterizedDocument>, RasterSource), InfrastructureError>;

/// Cached, deduplicated, retrying front end to a [`PageRenderer`]
pub struct Rasterizer {
    renderer: Arc<dyn PageRenderer>,
    cache: Arc<dyn CacheBackend>,
    in_flight: InFlight<RasterKey, Shared>,
    policy: RetryPolicy,
}

impl Rasterizer {
    pub fn new(renderer: Arc<dyn PageRenderer>, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            renderer,
            cache,
            in_flight: InFlight::new(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    /// Rasterize every page of `path` at `scale`
    ///
    /// Never returns an empty page list as success.
    pub fn rasterize(
        &self,
        path: &Path,
        scale: Scale,
        deadline: Deadline,
    ) -> Result<RasterOutput, InfrastructureError> {
        if !path.is_file() {
            return Err(RenderError::MissingInput {
                path: path.to_path_buf(),
            }
            .into_infrastructure());
        }

        let source_hash = ContentHash::of_file(path).map_err(|e| {
            InfrastructureError::new(
                Stage::Rasterization,
                InfraKind::InvalidInput,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        let key = RasterKey {
            document: DocumentId::for_path(path),
            source_hash,
            scale,
        };

        let started = Instant::now();
        let (shared, participation) = self
            .in_flight
            .run(key.clone(), deadline, || self.load_or_render(path, &key, deadline))
            .map_err(|expired| RenderError::Timeout { after: expired.waited }.into_infrastructure())?;

        let (document, source) = match (shared, participation) {
            (Ok((document, source)), Participation::Led) => (document, source),
            (Ok((document, _)), Participation::Joined) => {
                debug!(target: LOG_TARGET, document = %key.document, "joined in-flight rasterization");
                (document, RasterSource::Joined)
            }
            // The leader ran out of its own time; this caller may have more
            (Err(e), Participation::Joined) if e.kind == InfraKind::Timeout => {
                if deadline.is_expired() {
                    return Err(RenderError::Timeout {
                        after: started.elapsed(),
                    }
                    .into_infrastructure());
                }
                debug!(target: LOG_TARGET, document = %key.document, "in-flight rasterization timed out, retrying as leader");
                self.load_or_render(path, &key, deadline)?
            }
            (Err(e), _) => return Err(e),
        };

        Ok(RasterOutput { document, source })
    }

    fn load_or_render(&self, path: &Path, key: &RasterKey, deadline: Deadline) -> Shared {
        match self
            .cache
            .get_document(&key.document, &key.source_hash, key.scale)
        {
            Ok(Some(entries)) => {
                debug!(target: LOG_TARGET, document = %key.document, pages = entries.len(), "cache hit");
                let pages = entries
                    .into_iter()
                    .map(|entry| PageImage {
                        page: entry.key.page,
                        image: entry.image,
                    })
                    .collect();
                return Ok((self.assemble(key, pages), RasterSource::Cache));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(target: LOG_TARGET, document = %key.document, "cached render unusable, regenerating: {}", e);
                if let Err(e) = self.cache.invalidate_document(&key.document) {
                    warn!(target: LOG_TARGET, document = %key.document, "failed to drop corrupted entry: {}", e);
                }
            }
        }

        let images = self
            .render_with_retry(path, key.scale, deadline)
            .map_err(RenderError::into_infrastructure)?;

        let pages: Vec<PageImage> = images
            .into_iter()
            .zip(1u32..)
            .map(|(image, page)| PageImage {
                page,
                image: Arc::new(image),
            })
            .collect();

        let manifest = CacheManifest::new(key.source_hash.clone(), pages.len() as u32, key.scale);
        for page in &pages {
            let cache_key = CacheKey::new(
                key.document.clone(),
                key.source_hash.clone(),
                key.scale,
                page.page,
            );
            if let Err(e) = self.cache.put(&cache_key, Arc::clone(&page.image), &manifest) {
                warn!(target: LOG_TARGET, document = %key.document, "failed to cache rendered pages: {}", e);
                break;
            }
        }

        info!(target: LOG_TARGET, document = %key.document, pages = pages.len(), scale = %key.scale, "rendered document");
        Ok((self.assemble(key, pages), RasterSource::Rendered))
    }

    fn assemble(&self, key: &RasterKey, pages: Vec<PageImage>) -> Arc<RasterizedDocument> {
        Arc::new(RasterizedDocument {
            document: key.document.clone(),
            source_hash: key.source_hash.clone(),
            scale: key.scale,
            pages,
        })
    }

    fn render_with_retry(
        &self,
        path: &Path,
        scale: Scale,
        deadline: Deadline,
    ) -> Result<Vec<RgbaImage>, RenderError> {
        let attempts = self.policy.attempts.max(1);
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if deadline.is_expired() {
                return Err(RenderError::Timeout {
                    after: started.elapsed(),
                });
            }

            let result = self.render_once(path.to_path_buf(), scale, deadline.clamp(self.policy.timeout));
            match result {
                Ok(images) if images.is_empty() => {
                    return Err(RenderError::EmptyDocument {
                        path: path.to_path_buf(),
                    })
                }
                Ok(images) => {
                    if let Some(blank) = images.iter().position(|i| i.width() == 0 || i.height() == 0) {
                        return Err(RenderError::Unsupported {
                            path: path.to_path_buf(),
                            reason: format!("page {} rendered with zero size", blank + 1),
                        });
                    }
                    return Ok(images);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        target: LOG_TARGET,
                        path = %path.display(),
                        attempt,
                        "transient rasterizer failure, retrying: {}",
                        e
                    );
                    thread::sleep(deadline.clamp(self.policy.backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn render_once(
        &self,
        path: PathBuf,
        scale: Scale,
        timeout: Duration,
    ) -> Result<Vec<RgbaImage>, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        match call_with_timeout(timeout, move || renderer.render(&path, scale)) {
            Ok(result) => result,
            Err(CallError::TimedOut(after)) => Err(RenderError::Timeout { after }),
            Err(CallError::Panicked) => Err(RenderError::Unsupported {
                path: PathBuf::new(),
                reason: "rasterizer panicked".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::InMemoryCache;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Renders `pages` solid pages, failing transiently `failures` times first
    struct ScriptedRenderer {
        pages: usize,
        failures: Mutex<usize>,
        calls: AtomicUsize,
    }

    impl ScriptedRenderer {
        fn new(pages: usize, failures: usize) -> Self {
            Self {
                pages,
                failures: Mutex::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PageRenderer for ScriptedRenderer {
        fn render(&self, _path: &Path, _scale: Scale) -> Result<Vec<RgbaImage>, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(RenderError::Transient("renderer busy".into()));
            }
            Ok((0..self.pages)
                .map(|_| RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])))
                .collect())
        }
    }

    fn document(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.7 test").unwrap();
        path
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn second_call_is_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let path = document(&dir);
        let renderer = Arc::new(ScriptedRenderer::new(2, 0));
        let rasterizer = Rasterizer::new(renderer.clone(), Arc::new(InMemoryCache::new()))
            .with_policy(quick_policy());

        let first = rasterizer.rasterize(&path, Scale::default(), Deadline::none()).unwrap();
        let second = rasterizer.rasterize(&path, Scale::default(), Deadline::none()).unwrap();

        assert_eq!(first.source, RasterSource::Rendered);
        assert_eq!(second.source, RasterSource::Cache);
        assert_eq!(second.document.page_count(), 2);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let path = document(&dir);
        let renderer = Arc::new(ScriptedRenderer::new(1, 1));
        let rasterizer = Rasterizer::new(renderer.clone(), Arc::new(InMemoryCache::new()))
            .with_policy(quick_policy());

        let output = rasterizer.rasterize(&path, Scale::default(), Deadline::none()).unwrap();

        assert_eq!(output.document.page_count(), 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn persistent_failure_is_an_infrastructure_error() {
        let dir = TempDir::new().unwrap();
        let path = document(&dir);
        let rasterizer = Rasterizer::new(
            Arc::new(ScriptedRenderer::new(1, 5)),
            Arc::new(InMemoryCache::new()),
        )
        .with_policy(quick_policy());

        let err = rasterizer
            .rasterize(&path, Scale::default(), Deadline::none())
            .unwrap_err();

        assert_eq!(err.stage, Stage::Rasterization);
        assert_eq!(err.kind, InfraKind::Unavailable);
    }

    #[test]
    fn zero_pages_is_never_success() {
        let dir = TempDir::new().unwrap();
        let path = document(&dir);
        let rasterizer = Rasterizer::new(
            Arc::new(ScriptedRenderer::new(0, 0)),
            Arc::new(InMemoryCache::new()),
        );

        let err = rasterizer
            .rasterize(&path, Scale::default(), Deadline::none())
            .unwrap_err();

        assert_eq!(err.kind, InfraKind::InvalidInput);
    }

    #[test]
    fn missing_document_is_invalid_input() {
        let rasterizer = Rasterizer::new(
            Arc::new(ScriptedRenderer::new(1, 0)),
            Arc::new(InMemoryCache::new()),
        );

        let err = rasterizer
            .rasterize(Path::new("/nope/missing.pdf"), Scale::default(), Deadline::none())
            .unwrap_err();

        assert_eq!(err.stage, Stage::Rasterization);
        assert_eq!(err.kind, InfraKind::InvalidInput);
    }

    #[test]
    fn slow_renderer_times_out() {
        struct Stalled;
        impl PageRenderer for Stalled {
            fn render(&self, _: &Path, _: Scale) -> Result<Vec<RgbaImage>, RenderError> {
                thread::sleep(Duration::from_millis(500));
                Ok(vec![RgbaImage::new(1, 1)])
            }
        }

        let dir = TempDir::new().unwrap();
        let path = document(&dir);
        let rasterizer = Rasterizer::new(Arc::new(Stalled), Arc::new(InMemoryCache::new()))
            .with_policy(RetryPolicy {
                attempts: 1,
                timeout: Duration::from_millis(20),
                backoff: Duration::ZERO,
            });

        let err = rasterizer
            .rasterize(&path, Scale::default(), Deadline::none())
            .unwrap_err();

        assert_eq!(err.kind, InfraKind::Timeout);
    }

    struct Slow {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Slow {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PageRenderer for Slow {
        fn render(&self, _: &Path, _: Scale) -> Result<Vec<RgbaImage>, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(vec![RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]))])
        }
    }

    #[test]
    fn waiting_caller_stops_at_its_own_deadline() {
        let dir = TempDir::new().unwrap();
        let path = document(&dir);
        let renderer = Slow::new(Duration::from_millis(400));
        let rasterizer = Rasterizer::new(renderer.clone(), Arc::new(InMemoryCache::new()))
            .with_policy(quick_policy());

        let (leader, (joiner, waited)) = thread::scope(|s| {
            let leader = s.spawn(|| rasterizer.rasterize(&path, Scale::default(), Deadline::none()));
            thread::sleep(Duration::from_millis(50));
            let joiner = s.spawn(|| {
                let started = Instant::now();
                let result = rasterizer.rasterize(
                    &path,
                    Scale::default(),
                    Deadline::after(Duration::from_millis(50)),
                );
                (result, started.elapsed())
            });
            (leader.join().unwrap(), joiner.join().unwrap())
        });

        assert_eq!(leader.unwrap().source, RasterSource::Rendered);
        assert_eq!(joiner.unwrap_err().kind, InfraKind::Timeout);
        assert!(waited < Duration::from_millis(300), "{:?}", waited);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn leader_timeout_is_retried_by_a_caller_with_time_left() {
        let dir = TempDir::new().unwrap();
        let path = document(&dir);
        let renderer = Slow::new(Duration::from_millis(300));
        let rasterizer = Rasterizer::new(renderer.clone(), Arc::new(InMemoryCache::new()))
            .with_policy(RetryPolicy {
                attempts: 1,
                timeout: Duration::from_secs(5),
                backoff: Duration::ZERO,
            });

        let (leader, joiner) = thread::scope(|s| {
            let leader = s.spawn(|| {
                rasterizer.rasterize(&path, Scale::default(), Deadline::after(Duration::from_millis(100)))
            });
            thread::sleep(Duration::from_millis(30));
            let joiner = s.spawn(|| {
                rasterizer.rasterize(&path, Scale::default(), Deadline::after(Duration::from_secs(5)))
            });
            (leader.join().unwrap(), joiner.join().unwrap())
        });

        assert_eq!(leader.unwrap_err().kind, InfraKind::Timeout);
        let joiner = joiner.unwrap();
        assert_eq!(joiner.source, RasterSource::Rendered);
        assert_eq!(joiner.document.page_count(), 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }
}
