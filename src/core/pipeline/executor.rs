//! Single-item pipeline execution.

use super::{ItemContext, ItemLog};
use crate::config::ValidatorConfig;
use crate::core::analysis::{
    AnalysisInput, AnalysisResult, Analyzer, AnalyzerRegistry, EnsembleAnalyzer, EnsembleResult,
    EnsembleScorer, ExtractionAnalyzer, FeatureWeights, HeuristicAnalyzer, Issue,
    PdftotextExtractor, TextExtractor, Tier, TierOrchestrator, VisionBackend, MIN_BACKENDS,
};
use crate::core::baseline::BaselineStore;
use crate::core::cache::{CacheBackend, InMemoryCache};
use crate::core::diff::{DiffEngine, DiffResult};
use crate::core::gate::{self, GateDecision, GateStatus};
use crate::core::raster::{PageRenderer, PdftoppmRenderer, RasterSource, Rasterizer};
use crate::core::timeout::Deadline;
use crate::error::{BaselineError, ConfigError, InfraKind, InfrastructureError, Stage};
use crate::events::{null_sender, Event, EventSender, ItemEvent};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "pdf_gate::gate";

/// One document to validate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest {
    /// Report id; the scheduler numbers items that leave it empty
    #[serde(default)]
    pub id: String,
    pub document_path: PathBuf,
    pub baseline_reference_id: String,
    /// Overrides the configured tier
    #[serde(default, alias = "tierConfig", skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Overrides the configured pass threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl ItemRequest {
    pub fn new(
        id: impl Into<String>,
        document_path: impl Into<PathBuf>,
        baseline_reference_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            document_path: document_path.into(),
            baseline_reference_id: baseline_reference_id.into(),
            tier: None,
            threshold: None,
        }
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Everything known about an item once its pipeline has finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub id: String,
    pub path: PathBuf,
    pub status: GateStatus,
    pub overall_score: f64,
    pub reasons: Vec<String>,
    pub per_page_diff: Vec<DiffResult>,
    pub requested_tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_tier: Option<Tier>,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ensemble: Option<EnsembleResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raster_source: Option<RasterSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InfrastructureError>,
    pub duration_ms: u64,
    pub log: ItemLog,
}

impl ItemOutcome {
    fn pending(request: &ItemRequest, requested_tier: Tier) -> Self {
        Self {
            id: request.id.clone(),
            path: request.document_path.clone(),
            status: GateStatus::InfraError,
            overall_score: 0.0,
            reasons: Vec::new(),
            per_page_diff: Vec::new(),
            requested_tier,
            analysis_tier: None,
            fallback_used: false,
            fallback_reason: None,
            confidence: None,
            issues: Vec::new(),
            ensemble: None,
            raster_source: None,
            error: None,
            duration_ms: 0,
            log: ItemLog::default(),
        }
    }

    /// An item that never ran its pipeline
    pub fn infrastructure_failure(
        request: &ItemRequest,
        requested_tier: Tier,
        error: InfrastructureError,
    ) -> Self {
        let mut outcome = Self::pending(request, requested_tier);
        outcome.apply_decision(GateDecision::infrastructure(error.to_string()));
        outcome.error = Some(error);
        outcome
    }

    fn apply_decision(&mut self, decision: GateDecision) {
        self.status = decision.status;
        self.overall_score = decision.overall_score;
        self.reasons = decision.reasons;
    }

    fn apply_analysis(&mut self, analysis: &AnalysisResult) {
        self.analysis_tier = Some(analysis.tier);
        self.fallback_used = analysis.fallback_used;
        self.fallback_reason = analysis.fallback_reason.clone();
        self.confidence = Some(analysis.confidence);
        self.issues = analysis.issues.clone();
        self.ensemble = analysis.ensemble.clone();
    }
}

/// Builder for an [`ItemPipeline`]
pub struct ItemPipelineBuilder {
    config: ValidatorConfig,
    cache: Option<Arc<dyn CacheBackend>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    baselines: Option<Arc<BaselineStore>>,
    extractor: Option<Arc<dyn TextExtractor>>,
    backends: Vec<Arc<dyn VisionBackend>>,
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl ItemPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
            cache: None,
            renderer: None,
            baselines: None,
            extractor: None,
            backends: Vec::new(),
            analyzers: Vec::new(),
        }
    }

    pub fn config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the cache backend (in-memory by default)
    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the page renderer (`pdftoppm` by default)
    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Share a baseline store (one rooted at `baselineDir` by default)
    pub fn baselines(mut self, baselines: Arc<BaselineStore>) -> Self {
        self.baselines = Some(baselines);
        self
    }

    /// Text extractor for the extraction tier (`pdftotext` by default)
    pub fn text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Add a vision backend; the ensemble tier exists once two are added
    pub fn vision_backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Register an analyzer, replacing the built-in one for its tier
    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn build(self) -> Result<ItemPipeline, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(PdftotextExtractor::default()));
        let mut registry = AnalyzerRegistry::new()
            .with(Arc::new(HeuristicAnalyzer::new()))
            .with(Arc::new(ExtractionAnalyzer::new(extractor)?));
        if self.backends.len() >= MIN_BACKENDS {
            let scorer = EnsembleScorer::new(self.backends, config.ensemble.clone());
            registry.register(Arc::new(EnsembleAnalyzer::new(scorer)));
        } else if !self.backends.is_empty() {
            warn!(
                target: LOG_TARGET,
                backends = self.backends.len(),
                required = MIN_BACKENDS,
                "too few vision backends, ensemble tier left unconfigured"
            );
        }
        for analyzer in self.analyzers {
            registry.register(analyzer);
        }
        debug!(target: LOG_TARGET, analyzers = ?registry, "analysis tiers configured");

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()));
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(PdftoppmRenderer::default()));
        let baselines = self
            .baselines
            .unwrap_or_else(|| Arc::new(BaselineStore::new(config.baseline_dir.clone())));

        Ok(ItemPipeline {
            rasterizer: Rasterizer::new(renderer, cache).with_policy(config.retry_policy()),
            baselines,
            diff: DiffEngine::new(config.diff_config()),
            orchestrator: TierOrchestrator::new(registry, config.analysis_timeout()),
            weights: config.effective_weights(),
            config,
        })
    }
}

impl Default for ItemPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one document through rasterize, diff, analyze and gate
///
/// Stages run strictly in order for an item. Every step is recorded in the
/// item's [`ItemContext`], which is returned inside the [`ItemOutcome`].
/// Infrastructure errors end the item with `INFRA_ERROR` and never panic or
/// propagate.
pub struct ItemPipeline {
    config: ValidatorConfig,
    rasterizer: Rasterizer,
    baselines: Arc<BaselineStore>,
    diff: DiffEngine,
    orchestrator: TierOrchestrator,
    weights: FeatureWeights,
}

impl ItemPipeline {
    pub fn builder() -> ItemPipelineBuilder {
        ItemPipelineBuilder::new()
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn rasterizer(&self) -> &Rasterizer {
        &self.rasterizer
    }

    pub fn baselines(&self) -> &Arc<BaselineStore> {
        &self.baselines
    }

    pub fn requested_tier(&self, request: &ItemRequest) -> Tier {
        request.tier.unwrap_or(self.config.tier)
    }

    /// Run under the configured item timeout, without events
    pub fn run(&self, request: &ItemRequest) -> ItemOutcome {
        self.run_with_events(request, Deadline::after(self.config.item_timeout()), &null_sender())
    }

    pub fn run_with_events(
        &self,
        request: &ItemRequest,
        deadline: Deadline,
        events: &EventSender,
    ) -> ItemOutcome {
        let started = Instant::now();
        let requested_tier = self.requested_tier(request);
        let mut ctx = ItemContext::new(request.id.clone(), deadline);
        let mut outcome = ItemOutcome::pending(request, requested_tier);

        events.send(Event::Item(ItemEvent::Started {
            id: request.id.clone(),
            path: request.document_path.clone(),
        }));

        match self.execute(request, requested_tier, &mut ctx, &mut outcome, events) {
            Ok(decision) => outcome.apply_decision(decision),
            Err(error) => {
                warn!(target: LOG_TARGET, item = %request.id, "infrastructure error: {}", error);
                outcome.apply_decision(GateDecision::infrastructure(error.to_string()));
                outcome.error = Some(error);
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome.log = ctx.into_log();

        info!(
            target: LOG_TARGET,
            item = %outcome.id,
            status = %outcome.status,
            score = outcome.overall_score,
            duration_ms = outcome.duration_ms,
            "item finished"
        );
        events.send(Event::Item(ItemEvent::Finished {
            id: outcome.id.clone(),
            status: outcome.status,
            overall_score: outcome.overall_score,
            duration_ms: outcome.duration_ms,
        }));
        outcome
    }

    fn execute(
        &self,
        request: &ItemRequest,
        requested_tier: Tier,
        ctx: &mut ItemContext,
        outcome: &mut ItemOutcome,
        events: &EventSender,
    ) -> Result<GateDecision, InfrastructureError> {
        let deadline = ctx.deadline;

        let started = self.before(Stage::Rasterization, ctx)?;
        let raster = self
            .rasterizer
            .rasterize(&request.document_path, self.config.scale(), deadline);
        let raster = checkpoint(ctx, events, Stage::Rasterization, started, raster, |r| {
            format!("{} page(s) from {:?}", r.document.page_count(), r.source)
        })?;
        outcome.raster_source = Some(raster.source);
        events.send(Event::Item(ItemEvent::Rasterized {
            id: request.id.clone(),
            pages: raster.document.page_count(),
            source: raster.source,
        }));

        let started = self.before(Stage::Baseline, ctx)?;
        let baseline = self
            .baselines
            .load(&request.baseline_reference_id)
            .map_err(BaselineError::into_infrastructure);
        let baseline = checkpoint(ctx, events, Stage::Baseline, started, baseline, |b| {
            format!("baseline {} with {} page(s)", b.id, b.page_count())
        })?;

        let started = self.before(Stage::Diff, ctx)?;
        let diffs = self.diff.compare_document(&raster.document.pages, &baseline);
        let diffs = checkpoint(ctx, events, Stage::Diff, started, diffs, |d| {
            let worst = d.iter().map(|r| r.classification).max();
            format!("{} page(s), worst {}", d.len(), worst.map(|c| c.to_string()).unwrap_or_default())
        })?;
        outcome.per_page_diff = diffs.clone();

        let started = self.before(Stage::Analysis, ctx)?;
        let input = AnalysisInput {
            source: request.document_path.clone(),
            document: Arc::clone(&raster.document),
            baseline,
            diffs: Arc::new(diffs),
            weights: self.weights.clone(),
            deadline,
        };
        let analysis = self.orchestrator.run(requested_tier, &input, ctx);
        let analysis = checkpoint(ctx, events, Stage::Analysis, started, analysis, |a| {
            format!("{} tier scored {:.1}", a.tier, a.score)
        })?;
        outcome.apply_analysis(&analysis);
        events.send(Event::Item(ItemEvent::Analyzed {
            id: request.id.clone(),
            tier: analysis.tier,
            fallback_used: analysis.fallback_used,
        }));

        let started = Instant::now();
        let policy = self.config.gate_policy(request.threshold);
        let decision = gate::evaluate(&analysis, &input.diffs, &policy);
        let decision = checkpoint(ctx, events, Stage::Gate, started, Ok(decision), |d| {
            format!("{} at {:.1}", d.status, d.overall_score)
        })?;
        Ok(decision)
    }

    /// Refuse to start a stage once the item's deadline has passed
    fn before(&self, stage: Stage, ctx: &mut ItemContext) -> Result<Instant, InfrastructureError> {
        let now = Instant::now();
        if ctx.deadline.is_expired() {
            let error = InfrastructureError::new(
                stage,
                InfraKind::Timeout,
                format!("item deadline passed before {} started", stage),
            );
            ctx.record(stage, false, error.to_string(), now);
            return Err(error);
        }
        Ok(now)
    }
}

/// Record a finished stage in the context and announce it
fn checkpoint<T>(
    ctx: &mut ItemContext,
    events: &EventSender,
    stage: Stage,
    started: Instant,
    result: Result<T, InfrastructureError>,
    detail: impl FnOnce(&T) -> String,
) -> Result<T, InfrastructureError> {
    let (ok, text) = match &result {
        Ok(value) => (true, detail(value)),
        Err(error) => (false, error.to_string()),
    };
    ctx.record(stage, ok, text, started);
    events.send(Event::Item(ItemEvent::Stage {
        id: ctx.item_id.clone(),
        stage,
        ok,
    }));
    result
}
