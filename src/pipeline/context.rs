//! Shared services and tuning knobs handed to every stage.

use crate::agents::prompts::PromptLibrary;
use crate::agents::runtime::AgentRuntime;
use crate::llm::tokenizer::Tokenizer;
use crate::retrieval::engine::{DocumentFilter, RetrievalEngine};
use crate::store::KnowledgeStore;
use std::sync::Arc;

/// Stage-level tuning knobs; defaults mirror the configuration surface.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub top_k_results: usize,
    pub quality_threshold: f64,
    pub supervisor_approve_threshold: f64,
    pub supervisor_repair_lower: f64,
    /// Supervisor-initiated reruns allowed before the best draft ships.
    pub max_validator_retries: u32,
    pub max_retries: u32,
    pub analyzer_phase2_batch_threshold: usize,
    pub analyzer_phase2_batch_size: usize,
    pub selector_batch_size: usize,
    pub deduplicator_batch_size: usize,
    pub assigner_batch_size: usize,
    pub assigner_batch_threshold: usize,
    pub phase3_score_threshold: f64,
    pub phase3_min_nodes_per_subject: usize,
    /// Off by default: Phase3 is pure graph expansion with score 1.0.
    pub phase3_llm_scoring: bool,
    /// Headings longer than this are segmented before extraction.
    pub extractor_segment_tokens: usize,
    /// Tighten the table-keep rule from OR to AND.
    pub selector_strict_tables: bool,
    /// Document holding the organizational role reference for Assigner.
    pub assigner_reference_document: String,
    pub generic_actor_terms: Vec<String>,
    pub vague_timing_terms: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k_results: 10,
            quality_threshold: 0.7,
            supervisor_approve_threshold: 0.8,
            supervisor_repair_lower: 0.6,
            max_validator_retries: 3,
            max_retries: 3,
            analyzer_phase2_batch_threshold: 50,
            analyzer_phase2_batch_size: 20,
            selector_batch_size: 15,
            deduplicator_batch_size: 15,
            assigner_batch_size: 15,
            assigner_batch_threshold: 30,
            phase3_score_threshold: 0.5,
            phase3_min_nodes_per_subject: 3,
            phase3_llm_scoring: false,
            extractor_segment_tokens: 2000,
            selector_strict_tables: false,
            assigner_reference_document: "organizational-structure".to_string(),
            generic_actor_terms: default_generic_actor_terms(),
            vague_timing_terms: default_vague_timing_terms(),
        }
    }
}

/// Actor assignments Assigner must reject.
pub fn default_generic_actor_terms() -> Vec<String> {
    [
        "staff",
        "team",
        "personnel",
        "everyone",
        "all",
        "people",
        "workers",
        "employees",
        "members",
        "group",
        "department",
        "unit",
        "others",
        "relevant staff",
        "relevant personnel",
        "appropriate staff",
        "responsible person",
        "designated person",
        "someone",
        "anybody",
        "management",
        "the organization",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Timing phrases that fail the well-formedness check.
pub fn default_vague_timing_terms() -> Vec<String> {
    [
        "immediately",
        "as soon as possible",
        "asap",
        "urgently",
        "promptly",
        "quickly",
        "soon",
        "when possible",
        "when needed",
        "as needed",
        "ongoing",
        "regularly",
        "periodically",
        "in a timely manner",
        "without delay",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Everything a stage needs besides the state itself.
pub struct StageContext {
    pub store: KnowledgeStore,
    pub retrieval: RetrievalEngine,
    pub runtime: AgentRuntime,
    pub prompts: PromptLibrary,
    pub config: PipelineConfig,
    pub tokenizer: Arc<dyn Tokenizer>,
    /// Built from the request's whitelist + guideline documents.
    pub filter: DocumentFilter,
}
