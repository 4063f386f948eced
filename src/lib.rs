//! # planweave
//!
//! planweave generates structured, source-traceable crisis-management
//! action plans (markdown checklists) from an ingested corpus of
//! policy/protocol documents. The core is a staged, quality-gated
//! pipeline:
//!
//! 1. **Orchestrator** - problem statement from the user request
//! 2. **Injector** - special-protocols bypass lane expansion
//! 3. **Analyzer** - query refinement and candidate-node filtering
//! 4. **Phase3** - graph traversal and per-subject consolidation
//! 5. **Extractor** - atomic actions and tables from node content
//! 6. **Selector** - relevance filtering (bypass lane preserved)
//! 7. **Deduplicator** - merge equivalent actions with provenance
//! 8. **Timing** - well-formed trigger | time-window pairs
//! 9. **Assigner** - specific accountable actors
//! 10. **Formatter** - actor-grouped markdown plan
//!
//! A terminal **Supervisor** scores the plan on seven criteria and either
//! approves, self-repairs, or routes rework back to a prior stage with
//! targeted feedback, bounded by a rerun budget.
//!
//! Retrieval runs over a dual knowledge store (hierarchy graph with
//! summary embeddings + content-chunk vectors) with keyword, semantic,
//! hybrid (RRF), graph-expanded, and context-window modes, diversified
//! with MMR.

pub mod agents;
pub mod cli;
pub mod ingest;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod retrieval;
pub mod store;
pub mod utils;

use crate::agents::prompts::PromptLibrary;
use crate::agents::runtime::AgentRuntime;
use crate::cli::config::Settings;
use crate::ingest::pipeline::{CorpusReport, Ingestor};
use crate::llm::cost::{CostSummary, CostTracker};
use crate::llm::embedder::CachingEmbedder;
use crate::llm::provider::Embedder;
use crate::llm::registry::{AgentRegistry, ProviderFactory, default_provider_factory};
use crate::llm::tokenizer::{TiktokenTokenizer, Tokenizer};
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, StageErrorEntry, UserConfig};
use crate::pipeline::supervisor::SupervisorReport;
use crate::pipeline::{PlanStatus, run_pipeline};
use crate::retrieval::engine::{DocumentFilter, RetrievalEngine};
use crate::store::KnowledgeStore;
use crate::utils::error::PlanweaveError;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Initialize logging based on verbosity level.
/// This should be called once at application startup.
///
/// # Arguments
/// * `verbose` - Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE)
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // try_init() so tests and repeated library use do not panic
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .try_init();
}

/// What a finished generation hands back to the caller.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub status: PlanStatus,
    pub plan: String,
    pub report: Option<SupervisorReport>,
    pub errors: Vec<StageErrorEntry>,
    pub cost: CostSummary,
    pub duration: Duration,
}

/// The assembled system: knowledge store, backends, and configuration.
///
/// Construct once, then run `ingest_directory` to populate the store and
/// `generate` per request. The agent registry is process-wide and applies
/// updates on the next call.
pub struct Planweave {
    settings: Settings,
    store: KnowledgeStore,
    embedder: Arc<dyn Embedder>,
    registry: Arc<AgentRegistry>,
    factory: ProviderFactory,
    prompts: PromptLibrary,
}

impl Planweave {
    /// Build against the default provider factory.
    pub fn new(
        settings: Settings,
        store: KnowledgeStore,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, PlanweaveError> {
        Self::with_factory(settings, store, embedder, default_provider_factory())
    }

    /// Build with a custom provider factory (tests inject scripted stubs).
    pub fn with_factory(
        settings: Settings,
        store: KnowledgeStore,
        embedder: Arc<dyn Embedder>,
        factory: ProviderFactory,
    ) -> Result<Self, PlanweaveError> {
        // Dimension mismatch is fatal before any work happens
        if embedder.dimension() != store.vectors.dimension() {
            return Err(PlanweaveError::DimensionMismatch {
                expected: store.vectors.dimension(),
                actual: embedder.dimension(),
            });
        }

        let registry = Arc::new(settings.agent_registry());
        let embedder: Arc<dyn Embedder> = Arc::new(CachingEmbedder::new(embedder));

        Ok(Self {
            settings,
            store,
            embedder,
            registry,
            factory,
            prompts: PromptLibrary::defaults(),
        })
    }

    /// Swap the prompt library (templates are injected at this boundary).
    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Ingest every markdown document under `dir`.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        doc_type: &str,
    ) -> Result<CorpusReport, PlanweaveError> {
        let runtime = self.runtime(Arc::new(Mutex::new(self.cost_tracker()?)));
        let summarizer = Arc::new(runtime.handle("summarizer")?.client);

        let ingestor = Ingestor::new(
            self.store.clone(),
            Arc::clone(&self.embedder),
            summarizer,
            self.tokenizer()?,
            self.settings.chunk_config()?,
            self.settings.ingestion.rule_document_names.clone(),
        )?;

        Ok(ingestor.ingest_directory(dir, doc_type).await)
    }

    /// Run one full generation. Always yields an approved plan, a plan
    /// with warnings, or a structured error naming the failing stage.
    pub async fn generate(&self, user_config: UserConfig) -> Result<GenerationOutcome> {
        let started = Instant::now();

        // Fatal preconditions surface before the first stage runs
        let pipeline_config = self.settings.pipeline_config();
        if self
            .store
            .graph
            .document(&pipeline_config.assigner_reference_document)
            .is_none()
        {
            return Err(PlanweaveError::Config(format!(
                "organizational reference document '{}' is not in the knowledge store",
                pipeline_config.assigner_reference_document
            ))
            .into());
        }

        let cost = Arc::new(Mutex::new(self.cost_tracker()?));
        let runtime = self.runtime(Arc::clone(&cost));

        let filter = DocumentFilter {
            documents: user_config.documents_to_query.clone(),
            always_include: user_config.guideline_documents.clone(),
        };

        let ctx = StageContext {
            store: self.store.clone(),
            retrieval: RetrievalEngine::new(
                self.store.clone(),
                Arc::clone(&self.embedder),
                self.settings.retrieval_config(),
            ),
            runtime,
            prompts: self.prompts.clone(),
            config: pipeline_config,
            tokenizer: self.tokenizer()?,
            filter,
        };

        let mut state = PipelineState::new(user_config);
        let outcome = run_pipeline(&mut state, &ctx)
            .await
            .context("Pipeline execution failed")?;

        let plan = state
            .final_plan
            .clone()
            .ok_or_else(|| PlanweaveError::StageFailed {
                stage: "formatter".to_string(),
                message: "pipeline terminated without a plan".to_string(),
            })?;

        let cost_summary = cost
            .lock()
            .map(|tracker| tracker.summary())
            .unwrap_or_else(|_| CostTracker::from_pricing(free_pricing()).summary());

        tracing::info!(
            status = ?outcome.status,
            cost = cost_summary.total_cost,
            tokens = cost_summary.total_tokens(),
            duration_s = started.elapsed().as_secs_f64(),
            "Generation complete"
        );

        Ok(GenerationOutcome {
            status: outcome.status,
            plan,
            report: outcome.report,
            errors: state.errors,
            cost: cost_summary,
            duration: started.elapsed(),
        })
    }

    fn runtime(&self, cost: Arc<Mutex<CostTracker>>) -> AgentRuntime {
        AgentRuntime::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.factory),
            self.settings.retry_config(),
            cost,
        )
        .with_workers(self.settings.general.workers)
    }

    fn cost_tracker(&self) -> Result<CostTracker, PlanweaveError> {
        let defaults = self.registry.resolve("default");
        let pricing = (self.factory)(&defaults)
            .map(|provider| provider.pricing())
            .unwrap_or_else(|_| free_pricing());
        Ok(CostTracker::from_pricing(pricing))
    }

    fn tokenizer(&self) -> Result<Arc<dyn Tokenizer>, PlanweaveError> {
        let defaults = self.registry.resolve("default");
        Ok(Arc::new(TiktokenTokenizer::from_model_name(&defaults.model)?))
    }
}

fn free_pricing() -> crate::llm::provider::Pricing {
    crate::llm::provider::Pricing {
        input_per_1k: 0.0,
        output_per_1k: 0.0,
    }
}
