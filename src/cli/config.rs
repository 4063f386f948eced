//! Configuration management using the `config` crate for hierarchical
//! discovery and merging.
//!
//! ## Configuration Sources (in precedence order, highest to lowest):
//! 1. **CLI flags** - Highest precedence (applied by the command handlers)
//! 2. **Environment variables** - via the `PLANWEAVE_` prefix
//! 3. **Config files** - lowest precedence
//!
//! ## Config File Discovery (in merge order, later overrides earlier):
//! 1. `~/.config/planweave/config.toml` (user config directory)
//! 2. `./planweave.toml` in the current directory
//! 3. Explicit `--config` path (if provided and exists - overrides all above)

use crate::agents::runtime::DEFAULT_WORKERS;
use crate::ingest::chunker::ChunkConfig;
use crate::llm::client::RetryConfig;
use crate::llm::registry::{AgentRegistry, AgentSettings};
use crate::pipeline::context::{
    PipelineConfig, default_generic_actor_terms, default_vague_timing_terms,
};
use crate::retrieval::engine::RetrievalConfig;
use crate::utils::error::PlanweaveError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure loaded from config files.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub phase3: Phase3Config,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub terms: TermsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Per-agent backend blocks; `agents.default` seeds the registry
    /// defaults, named blocks override per agent.
    #[serde(default)]
    pub agents: HashMap<String, AgentSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default = "default_top_k")]
    pub top_k_results: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_base_seconds: f64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            top_k_results: default_top_k(),
            max_retries: default_max_retries(),
            retry_delay_base_seconds: default_retry_delay(),
            workers: default_workers(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".planweave/store")
}

fn default_top_k() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_approve_threshold")]
    pub supervisor_approve_threshold: f64,
    #[serde(default = "default_repair_lower")]
    pub supervisor_repair_lower: f64,
    #[serde(default = "default_max_validator_retries")]
    pub max_validator_retries: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            supervisor_approve_threshold: default_approve_threshold(),
            supervisor_repair_lower: default_repair_lower(),
            max_validator_retries: default_max_validator_retries(),
        }
    }
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_approve_threshold() -> f64 {
    0.8
}

fn default_repair_lower() -> f64 {
    0.6
}

fn default_max_validator_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_p2_threshold")]
    pub analyzer_phase2_batch_threshold: usize,
    #[serde(default = "default_p2_batch_size")]
    pub analyzer_phase2_batch_size: usize,
    #[serde(default = "default_small_batch")]
    pub selector_batch_size: usize,
    #[serde(default = "default_small_batch")]
    pub deduplicator_batch_size: usize,
    #[serde(default = "default_small_batch")]
    pub assigner_batch_size: usize,
    #[serde(default = "default_assigner_threshold")]
    pub assigner_batch_threshold: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            analyzer_phase2_batch_threshold: default_p2_threshold(),
            analyzer_phase2_batch_size: default_p2_batch_size(),
            selector_batch_size: default_small_batch(),
            deduplicator_batch_size: default_small_batch(),
            assigner_batch_size: default_small_batch(),
            assigner_batch_threshold: default_assigner_threshold(),
        }
    }
}

fn default_p2_threshold() -> usize {
    50
}

fn default_p2_batch_size() -> usize {
    20
}

fn default_small_batch() -> usize {
    15
}

fn default_assigner_threshold() -> usize {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase3Config {
    #[serde(default = "default_phase3_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_min_nodes")]
    pub min_nodes_per_subject: usize,
    #[serde(default)]
    pub llm_scoring: bool,
}

impl Default for Phase3Config {
    fn default() -> Self {
        Self {
            score_threshold: default_phase3_threshold(),
            min_nodes_per_subject: default_min_nodes(),
            llm_scoring: false,
        }
    }
}

fn default_phase3_threshold() -> f64 {
    0.5
}

fn default_min_nodes() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_true")]
    pub use_rrf: bool,
    #[serde(default = "default_true")]
    pub use_mmr: bool,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_expansion_depth")]
    pub graph_expansion_depth: usize,
    #[serde(default = "default_expansion_boost")]
    pub graph_expansion_boost: f32,
    #[serde(default = "default_true")]
    pub context_window: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            use_rrf: true,
            use_mmr: true,
            mmr_lambda: default_mmr_lambda(),
            graph_expansion_depth: default_expansion_depth(),
            graph_expansion_boost: default_expansion_boost(),
            context_window: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mmr_lambda() -> f32 {
    0.7
}

fn default_expansion_depth() -> usize {
    1
}

fn default_expansion_boost() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Substring matchers for tagging `is_rule` documents.
    #[serde(default = "default_rule_names")]
    pub rule_document_names: Vec<String>,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    /// Document holding the organizational role reference for Assigner.
    #[serde(default = "default_reference_document")]
    pub assigner_reference_document: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            rule_document_names: default_rule_names(),
            doc_type: default_doc_type(),
            assigner_reference_document: default_reference_document(),
        }
    }
}

fn default_rule_names() -> Vec<String> {
    vec!["guideline".to_string(), "rule".to_string(), "standard".to_string()]
}

fn default_doc_type() -> String {
    "protocol".to_string()
}

fn default_reference_document() -> String {
    "organizational-structure".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelectorConfig {
    /// Tighten the table-keep rule from score-OR-reference to AND.
    #[serde(default)]
    pub strict_tables: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TermsConfig {
    #[serde(default)]
    pub generic_actor_terms: Vec<String>,
    #[serde(default)]
    pub vague_timing_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            api_base: None,
            api_key: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    1536
}

fn discover_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // User config (lowest precedence)
    if let Some(user_config) = dirs::config_dir()
        .map(|dir| dir.join("planweave").join("config.toml"))
        .filter(|path| path.exists())
    {
        paths.push(user_config);
    }

    // Current directory config
    let current_dir_config = PathBuf::from("planweave.toml");
    if current_dir_config.exists() {
        paths.push(current_dir_config);
    }

    // Explicit --config path (highest precedence)
    if let Some(explicit) = explicit_path
        && explicit.exists()
    {
        paths.push(explicit.to_path_buf());
    }

    paths
}

/// Load configuration from discovered config files and environment variables.
pub fn load(explicit_path: Option<&Path>) -> Result<Settings> {
    let mut builder = config::Config::builder();

    for config_path in discover_config_paths(explicit_path) {
        builder = builder.add_source(config::File::from(config_path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLANWEAVE")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build().context("Failed to build configuration")?;

    settings
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

impl Settings {
    /// Pipeline knobs assembled from the relevant sections.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            top_k_results: self.general.top_k_results,
            quality_threshold: self.quality.quality_threshold,
            supervisor_approve_threshold: self.quality.supervisor_approve_threshold,
            supervisor_repair_lower: self.quality.supervisor_repair_lower,
            max_validator_retries: self.quality.max_validator_retries,
            max_retries: self.general.max_retries,
            analyzer_phase2_batch_threshold: self.batching.analyzer_phase2_batch_threshold,
            analyzer_phase2_batch_size: self.batching.analyzer_phase2_batch_size,
            selector_batch_size: self.batching.selector_batch_size,
            deduplicator_batch_size: self.batching.deduplicator_batch_size,
            assigner_batch_size: self.batching.assigner_batch_size,
            assigner_batch_threshold: self.batching.assigner_batch_threshold,
            phase3_score_threshold: self.phase3.score_threshold,
            phase3_min_nodes_per_subject: self.phase3.min_nodes_per_subject,
            phase3_llm_scoring: self.phase3.llm_scoring,
            extractor_segment_tokens: 2000,
            selector_strict_tables: self.selector.strict_tables,
            assigner_reference_document: self.ingestion.assigner_reference_document.clone(),
            generic_actor_terms: if self.terms.generic_actor_terms.is_empty() {
                default_generic_actor_terms()
            } else {
                self.terms.generic_actor_terms.clone()
            },
            vague_timing_terms: if self.terms.vague_timing_terms.is_empty() {
                default_vague_timing_terms()
            } else {
                self.terms.vague_timing_terms.clone()
            },
        }
    }

    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            top_k: self.general.top_k_results,
            use_rrf: self.rag.use_rrf,
            use_mmr: self.rag.use_mmr,
            mmr_lambda: self.rag.mmr_lambda,
            rrf_k: crate::retrieval::fusion::RRF_K,
            graph_expansion_depth: self.rag.graph_expansion_depth,
            graph_expansion_boost: self.rag.graph_expansion_boost,
            context_window: self.rag.context_window,
        }
    }

    pub fn chunk_config(&self) -> Result<ChunkConfig, PlanweaveError> {
        ChunkConfig::new(self.chunking.chunk_size, self.chunking.chunk_overlap)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.general.max_retries,
            base_delay: Duration::from_secs_f64(self.general.retry_delay_base_seconds.max(0.0)),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Build the call-time agent registry: `agents.default` seeds the
    /// defaults, named blocks override per agent.
    pub fn agent_registry(&self) -> AgentRegistry {
        let defaults = self
            .agents
            .get("default")
            .cloned()
            .unwrap_or_default();

        let overrides: HashMap<String, AgentSettings> = self
            .agents
            .iter()
            .filter(|(name, _)| name.as_str() != "default")
            .map(|(name, settings)| (name.clone(), settings.clone()))
            .collect();

        AgentRegistry::with_overrides(defaults, overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_configuration_surface() {
        let settings = Settings::default();
        let pipeline = settings.pipeline_config();

        assert_eq!(pipeline.max_retries, 3);
        assert_eq!(pipeline.quality_threshold, 0.7);
        assert_eq!(pipeline.supervisor_approve_threshold, 0.8);
        assert_eq!(pipeline.supervisor_repair_lower, 0.6);
        assert_eq!(pipeline.analyzer_phase2_batch_threshold, 50);
        assert_eq!(pipeline.analyzer_phase2_batch_size, 20);
        assert_eq!(pipeline.selector_batch_size, 15);
        assert_eq!(pipeline.assigner_batch_threshold, 30);
        assert_eq!(pipeline.phase3_score_threshold, 0.5);
        assert_eq!(pipeline.phase3_min_nodes_per_subject, 3);
        assert!(pipeline.generic_actor_terms.len() >= 20);
        assert!(pipeline.vague_timing_terms.len() >= 10);

        let rag = settings.retrieval_config();
        assert!(rag.use_rrf);
        assert!(rag.use_mmr);
        assert_eq!(rag.mmr_lambda, 0.7);
        assert_eq!(rag.graph_expansion_depth, 1);
        assert_eq!(rag.graph_expansion_boost, 0.3);
    }

    #[test]
    fn test_agent_registry_from_blocks() {
        let mut settings = Settings::default();
        settings.agents.insert(
            "default".to_string(),
            AgentSettings {
                provider: "ollama".to_string(),
                model: "llama3.1:8b".to_string(),
                temperature: 0.1,
                api_base: None,
                api_key: None,
                max_tokens: None,
            },
        );
        settings.agents.insert(
            "supervisor".to_string(),
            AgentSettings {
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                temperature: 0.0,
                api_base: None,
                api_key: None,
                max_tokens: None,
            },
        );

        let registry = settings.agent_registry();
        assert_eq!(registry.resolve("selector").provider, "ollama");
        assert_eq!(registry.resolve("supervisor").model, "gpt-4o");
    }

    #[test]
    fn test_chunk_config_validation() {
        let mut settings = Settings::default();
        assert!(settings.chunk_config().is_ok());

        settings.chunking.chunk_overlap = settings.chunking.chunk_size;
        assert!(settings.chunk_config().is_err());
    }

    #[test]
    fn test_retry_config_from_settings() {
        let settings = Settings::default();
        let retry = settings.retry_config();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.base_delay, Duration::from_secs(1));
    }
}
