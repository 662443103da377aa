//! Bounded worker pool running item pipelines.

use super::{BatchItem, BatchReport};
use crate::config::ValidatorConfig;
use crate::core::pipeline::{ItemOutcome, ItemPipeline, ItemRequest};
use crate::core::timeout::Deadline;
use crate::error::{InfraKind, InfrastructureError, Stage};
use crate::events::{null_sender, BatchEvent, Event, EventSender};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const LOG_TARGET: &str = "pdf_gate::batch";

/// Token for stopping a batch between items
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub item_timeout: Duration,
    pub batch_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from_config(&ValidatorConfig::default())
    }
}

impl BatchConfig {
    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            item_timeout: config.item_timeout(),
            batch_timeout: config.batch_timeout(),
        }
    }
}

enum Progress {
    Started(usize),
    Finished(usize, Box<ItemOutcome>),
}

/// Runs many items through one shared [`ItemPipeline`]
///
/// At most `concurrency` items run at once. A failing item never stops the
/// others. Cancelling (or hitting the batch timeout) lets running items
/// finish and ends every item still queued as a scheduler failure.
pub struct BatchScheduler {
    pipeline: Arc<ItemPipeline>,
    config: BatchConfig,
}

impl BatchScheduler {
    pub fn new(pipeline: ItemPipeline) -> Self {
        let config = BatchConfig::from_config(pipeline.config());
        Self {
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pipeline(&self) -> &ItemPipeline {
        &self.pipeline
    }

    pub fn run(&self, requests: Vec<ItemRequest>) -> BatchReport {
        self.run_with(requests, &CancellationToken::new(), &null_sender())
    }

    pub fn run_with(
        &self,
        requests: Vec<ItemRequest>,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut items: Vec<BatchItem> = requests
            .into_iter()
            .enumerate()
            .map(|(seq, mut request)| {
                if request.id.trim().is_empty() {
                    request.id = format!("item-{}", seq + 1);
                }
                BatchItem::new(seq, request)
            })
            .collect();

        let workers = self.config.concurrency.max(1).min(items.len().max(1));
        info!(target: LOG_TARGET, %run_id, items = items.len(), workers, "batch started");
        events.send(Event::Batch(BatchEvent::Started {
            run_id,
            total_items: items.len(),
        }));

        let (job_tx, job_rx) = unbounded::<(usize, ItemRequest)>();
        for item in &items {
            // The receiver lives until the end of this function
            let _ = job_tx.send((item.seq, item.request().clone()));
        }
        drop(job_tx);

        let (progress_tx, progress_rx) = unbounded::<Progress>();
        let (stop_tx, stop_rx) = bounded::<()>(0);

        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let progress_tx = progress_tx.clone();
                let pipeline = &self.pipeline;
                let item_timeout = self.config.item_timeout;
                scope.spawn(move || {
                    while !cancel.is_cancelled() {
                        let Ok((seq, request)) = job_rx.recv() else {
                            break;
                        };
                        debug!(target: LOG_TARGET, worker, item = %request.id, "item dispatched");
                        let _ = progress_tx.send(Progress::Started(seq));
                        let outcome =
                            run_guarded(pipeline, &request, Deadline::after(item_timeout), events);
                        let _ = progress_tx.send(Progress::Finished(seq, Box::new(outcome)));
                    }
                });
            }
            drop(progress_tx);

            if let Some(limit) = self.config.batch_timeout {
                let stop_rx = stop_rx.clone();
                scope.spawn(move || {
                    if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(limit) {
                        warn!(target: LOG_TARGET, %run_id, "batch timeout reached, draining stops");
                        cancel.cancel();
                    }
                });
            }

            for progress in progress_rx.iter() {
                let transition = match progress {
                    Progress::Started(seq) => items[seq].start(),
                    Progress::Finished(seq, outcome) => items[seq].finish(*outcome),
                };
                if let Err(e) = transition {
                    error!(target: LOG_TARGET, "{}", e);
                }
            }
            drop(stop_tx);
        });

        let undispatched = self.settle(&mut items);
        if undispatched > 0 {
            events.send(Event::Batch(BatchEvent::Aborted {
                reason: format!("{} item(s) were not dispatched", undispatched),
            }));
        }

        let report = BatchReport::new(run_id, items, started.elapsed());
        let summary = report.summary();
        info!(
            target: LOG_TARGET,
            %run_id,
            passed = summary.passed,
            failed = summary.failed,
            infra_errors = summary.infra_errors,
            duration_ms = summary.duration_ms,
            exit_code = summary.exit_code,
            "batch finished"
        );
        events.send(Event::Batch(BatchEvent::Completed { summary }));
        report
    }

    /// Give every item a terminal state; returns how many never ran
    fn settle(&self, items: &mut [BatchItem]) -> usize {
        let mut undispatched = 0;
        for item in items.iter_mut().filter(|item| !item.state().is_terminal()) {
            let tier = self.pipeline.requested_tier(item.request());
            let error = if item.state() == super::ItemState::Queued {
                undispatched += 1;
                InfrastructureError::cancelled(
                    Stage::Scheduler,
                    "batch aborted before the item was dispatched",
                )
            } else {
                InfrastructureError::new(
                    Stage::Scheduler,
                    InfraKind::Internal,
                    "worker exited without reporting the item",
                )
            };
            let outcome = ItemOutcome::infrastructure_failure(item.request(), tier, error);
            if let Err(e) = item.finish(outcome) {
                error!(target: LOG_TARGET, "{}", e);
            }
        }
        undispatched
    }
}

/// Run one item, turning a panic into an infrastructure error
fn run_guarded(
    pipeline: &ItemPipeline,
    request: &ItemRequest,
    deadline: Deadline,
    events: &EventSender,
) -> ItemOutcome {
    panic::catch_unwind(AssertUnwindSafe(|| {
        pipeline.run_with_events(request, deadline, events)
    }))
    .unwrap_or_else(|_| {
        error!(target: LOG_TARGET, item = %request.id, "item pipeline panicked");
        ItemOutcome::infrastructure_failure(
            request,
            pipeline.requested_tier(request),
            InfrastructureError::new(Stage::Scheduler, InfraKind::Internal, "item pipeline panicked"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::{AnalysisInput, Analyzer, Tier, TierOutcome};
    use crate::core::baseline::{Baseline, BaselineManifest, BaselineStore};
    use crate::core::batch::ItemState;
    use crate::core::cache::Scale;
    use crate::core::gate::GateStatus;
    use crate::core::raster::{PageImage, PageRenderer};
    use crate::error::{AnalysisError, RenderError};
    use crate::events::EventChannel;
    use image::{Rgba, RgbaImage};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Solid;

    impl PageRenderer for Solid {
        fn render(&self, _: &Path, _: Scale) -> Result<Vec<RgbaImage>, RenderError> {
            Ok(vec![RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]))])
        }
    }

    /// Sleeps, then scores perfectly
    struct Slow(Duration);

    impl Analyzer for Slow {
        fn tier(&self) -> Tier {
            Tier::Heuristic
        }
        fn name(&self) -> &str {
            "slow"
        }
        fn analyze(&self, _: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
            thread::sleep(self.0);
            TierOutcome::new(100.0, 1.0, Vec::new())
        }
    }

    struct Panicking;

    impl Analyzer for Panicking {
        fn tier(&self) -> Tier {
            Tier::Heuristic
        }
        fn name(&self) -> &str {
            "panicking"
        }
        fn analyze(&self, _: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
            panic!("analyzer bug")
        }
    }

    fn scheduler(analyzer: Arc<dyn Analyzer>, concurrency: usize) -> BatchScheduler {
        let store = BaselineStore::new("/nonexistent-baselines");
        store.insert(Baseline::from_parts(
            "base",
            BaselineManifest {
                page_count: 1,
                ..BaselineManifest::default()
            },
            vec![PageImage {
                page: 1,
                image: Arc::new(RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]))),
            }],
        ));
        let pipeline = ItemPipeline::builder()
            .config(ValidatorConfig {
                concurrency,
                ..ValidatorConfig::default()
            })
            .renderer(Arc::new(Solid))
            .baselines(Arc::new(store))
            .analyzer(analyzer)
            .build()
            .unwrap();
        BatchScheduler::new(pipeline)
    }

    fn documents(dir: &TempDir, count: usize) -> Vec<ItemRequest> {
        (0..count)
            .map(|i| {
                let path: PathBuf = dir.path().join(format!("doc-{}.pdf", i));
                std::fs::write(&path, format!("%PDF-1.7 doc {}", i)).unwrap();
                ItemRequest::new("", path, "base")
            })
            .collect()
    }

    #[test]
    fn every_item_reaches_a_terminal_state_in_order() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(Arc::new(Slow(Duration::from_millis(5))), 3);

        let report = scheduler.run(documents(&dir, 7));

        assert_eq!(report.items.len(), 7);
        for (i, record) in report.items.iter().enumerate() {
            assert_eq!(record.outcome.id, format!("item-{}", i + 1));
            assert_eq!(record.state, ItemState::Completed);
            assert_eq!(record.outcome.status, GateStatus::Pass);
        }
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn panicking_item_is_contained() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(Arc::new(Panicking), 2);

        let report = scheduler.run(documents(&dir, 3));

        assert_eq!(report.items.len(), 3);
        assert!(report.items.iter().all(|r| r.state == ItemState::Failed));
        assert_eq!(report.exit_code(), 3);
    }

    #[test]
    fn cancelled_batch_fails_undispatched_items() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(Arc::new(Slow(Duration::ZERO)), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (sender, receiver) = EventChannel::new();

        let report = scheduler.run_with(documents(&dir, 4), &cancel, &sender);

        assert_eq!(report.items.len(), 4);
        for record in &report.items {
            let error = record.outcome.error.as_ref().unwrap();
            assert_eq!(error.stage, Stage::Scheduler);
            assert_eq!(error.kind, InfraKind::Cancelled);
        }
        assert!(receiver
            .drain()
            .iter()
            .any(|e| matches!(e, Event::Batch(BatchEvent::Aborted { .. }))));
    }

    #[test]
    fn batch_timeout_stops_draining_but_lets_running_items_finish() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(Arc::new(Slow(Duration::from_millis(150))), 1).with_config(
            BatchConfig {
                concurrency: 1,
                item_timeout: Duration::from_secs(30),
                batch_timeout: Some(Duration::from_millis(50)),
            },
        );

        let report = scheduler.run(documents(&dir, 3));

        assert_eq!(report.items[0].outcome.status, GateStatus::Pass);
        assert_eq!(report.items[2].state, ItemState::Failed);
        assert_eq!(
            report.items[2].outcome.error.as_ref().map(|e| e.kind),
            Some(InfraKind::Cancelled)
        );
    }

    #[test]
    fn item_timeout_fails_only_that_item() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(Arc::new(Slow(Duration::from_millis(300))), 2).with_config(
            BatchConfig {
                concurrency: 2,
                item_timeout: Duration::from_millis(100),
                batch_timeout: None,
            },
        );

        let report = scheduler.run(documents(&dir, 2));

        assert_eq!(report.items.len(), 2);
        for record in &report.items {
            assert_eq!(record.outcome.status, GateStatus::InfraError);
            assert_eq!(record.outcome.error.as_ref().map(|e| e.kind), Some(InfraKind::Timeout));
        }
    }

    #[test]
    fn empty_batch_produces_empty_report() {
        let scheduler = scheduler(Arc::new(Slow(Duration::ZERO)), 2);

        let report = scheduler.run(Vec::new());

        assert!(report.items.is_empty());
        assert_eq!(report.exit_code(), 0);
    }
}
