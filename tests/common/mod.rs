//! Common test utilities and fixtures for integration tests.
//!
//! No test here talks to a network: chat backends are scripted stubs
//! routed by prompt markers, and embeddings are a deterministic hash of
//! the input text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use planweave::cli::config::Settings;
use planweave::llm::provider::{
    ChatProvider, CompletionOptions, CompletionResponse, Embedder, Message, Pricing,
};
use planweave::llm::registry::ProviderFactory;
use planweave::pipeline::state::{Level, Phase, Subject, UserConfig};
use planweave::store::KnowledgeStore;
use planweave::utils::error::PlanweaveError;
use planweave::Planweave;
use regex::Regex;
use std::sync::Arc;
use tempfile::TempDir;

pub const DIM: usize = 16;

/// Deterministic embedding: accumulate byte values per slot, normalized.
/// Same text always embeds identically, different texts usually differ.
pub fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut embedding = vec![0.0_f32; dimensions];
    for (i, byte) in text.bytes().enumerate() {
        embedding[i % dimensions] += byte as f32 / 255.0;
    }
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut embedding {
            *x /= norm;
        }
    }
    embedding
}

pub struct HashEmbedder {
    pub dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { dimension: DIM }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanweaveError> {
        Ok(hash_embedding(text, self.dimension))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PlanweaveError> {
        Ok(texts
            .iter()
            .map(|t| hash_embedding(t, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        "hash-test-embedder"
    }
}

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"- id: ([A-Za-z0-9_\-]+)").unwrap());

/// Ids listed as `- id: X |` in a prompt.
pub fn ids_in_prompt(prompt: &str) -> Vec<String> {
    ID_RE
        .captures_iter(prompt)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Override hook: first matching rule wins, otherwise the default router
/// answers.
pub type PromptRule = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A scripted chat backend that answers by recognizing prompt markers
/// from the pipeline's stage prompts.
pub struct ScriptedProvider {
    rules: Vec<PromptRule>,
    /// Every prompt seen, for post-hoc assertions.
    pub seen: std::sync::Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_rule(mut self, rule: PromptRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// True when any recorded prompt contains both markers.
    pub fn saw_prompt_with(&self, markers: &[&str]) -> bool {
        self.seen
            .lock()
            .map(|prompts| {
                prompts
                    .iter()
                    .any(|p| markers.iter().all(|marker| p.contains(marker)))
            })
            .unwrap_or(false)
    }

    fn default_answer(prompt: &str) -> String {
        if prompt.contains("Summarize this section") {
            return "Covers activation triggers, actor duties, and reporting lines for this \
                    section."
                .to_string();
        }

        if prompt.contains("Write the problem statement") {
            return "The center must mount an immediate response to war-driven mass casualty \
                    conditions: triage, surge capacity, and command handoffs."
                .to_string();
        }

        if prompt.contains("refined retrieval queries") {
            return r#"{"queries": ["casualty triage and surge capacity", "incident command activation", "staff mobilization and recall"]}"#
                .to_string();
        }

        if prompt.contains("Select the candidate sections") {
            let ids = ids_in_prompt(prompt);
            return format!(
                r#"{{"selected_node_ids": [{}]}}"#,
                ids.iter()
                    .map(|id| format!("\"{}\"", id))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if prompt.contains("Score each section's relevance") {
            let ids = ids_in_prompt(prompt);
            return format!(
                r#"{{"scores": [{}]}}"#,
                ids.iter()
                    .map(|id| format!(r#"{{"node_id": "{}", "score": 0.9}}"#, id))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if prompt.contains("Extract every atomic action") {
            // Two actions per segment, anchored to the printed line numbers
            let first_line = prompt
                .lines()
                .find_map(|line| line.trim().split(" | ").next()?.trim().parse::<usize>().ok())
                .unwrap_or(1);
            return format!(
                r#"{{"actions": [
                    {{"action_text": "Activate the triage protocol", "who": "", "when": "", "priority_level": "immediate", "start_line": {}, "end_line": {}}},
                    {{"action_text": "Notify the incident commander of casualty counts", "who": "", "when": "", "priority_level": "short-term", "start_line": {}, "end_line": {}}}
                ], "tables": []}}"#,
                first_line,
                first_line,
                first_line,
                first_line
            );
        }

        if prompt.contains("Score each item's relevance") {
            let ids = ids_in_prompt(prompt);
            return format!(
                r#"{{"scores": [{}]}}"#,
                ids.iter()
                    .map(|id| {
                        format!(
                            r#"{{"id": "{}", "score": 9, "rationale": "directly actionable"}}"#,
                            id
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if prompt.contains("Group actions that state the same step") {
            return r#"{"groups": []}"#.to_string();
        }

        if prompt.contains("give a trigger") {
            let ids = ids_in_prompt(prompt);
            return format!(
                r#"{{"timings": [{}]}}"#,
                ids.iter()
                    .map(|id| {
                        format!(
                            r#"{{"id": "{}", "trigger": "Upon declaration of mass-casualty incident", "time_window": "within 15 minutes"}}"#,
                            id
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if prompt.contains("Assign each action") {
            let ids = ids_in_prompt(prompt);
            return format!(
                r#"{{"assignments": [{}]}}"#,
                ids.iter()
                    .map(|id| {
                        format!(
                            r#"{{"id": "{}", "who": "Emergency Operations Center Director"}}"#,
                            id
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if prompt.contains("Score each criterion") {
            return r#"{"criteria": {"structural_completeness": 0.9, "action_traceability": 0.9, "logical_sequencing": 0.9, "guideline_compliance": 0.9, "formatting_quality": 0.9, "actionability": 0.9, "metadata_completeness": 0.9}, "defects": [], "feedback": ""}"#
                .to_string();
        }

        if prompt.contains("Return the repaired markdown") {
            return "# repaired plan".to_string();
        }

        "ok".to_string()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<CompletionResponse, PlanweaveError> {
        let prompt: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if let Ok(mut seen) = self.seen.lock() {
            seen.push(prompt.clone());
        }

        for rule in &self.rules {
            if let Some(answer) = rule(&prompt) {
                return Ok(CompletionResponse::new(answer, 50, 25));
            }
        }

        Ok(CompletionResponse::new(Self::default_answer(&prompt), 50, 25))
    }

    fn model(&self) -> &str {
        "scripted-test-model"
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        }
    }
}

/// Factory that hands every agent the same scripted provider.
pub fn scripted_factory(provider: Arc<ScriptedProvider>) -> ProviderFactory {
    Arc::new(move |_settings| Ok(Arc::clone(&provider) as Arc<dyn ChatProvider>))
}

pub const EVAC_DOC: &str = "\
# Evacuation Protocol
Activation criteria and scope for evacuating clinical wards under fire.

## Immediate Actions
Sound the alarm and begin horizontal evacuation of the affected ward.

### Floor Wardens
Floor wardens sweep every room and report clear status to the incident commander.

## Assembly and Accounting
Gather evacuees at assembly point B and reconcile the headcount against the census.
";

pub const SURGE_DOC: &str = "\
# Mass Casualty Surge Protocol
Surge operations for war-driven mass casualty influx at the center level.

## Triage Operations
Stand up the triage area at the emergency entrance and classify arrivals by severity.

## Capacity Expansion
Convert recovery areas to surge beds and recall off-duty clinical staff.

## Special Hazards Annex
Procedures for blast and chemical contamination casualties.

### Decontamination Line
Erect the decontamination line before contaminated casualties enter the building.
";

pub const ORG_DOC: &str = "\
# Organizational Structure
Roles and reporting lines for crisis operations at the center level.

## Command Roles
The Emergency Operations Center Director commands all crisis operations. The Triage
Nurse Lead runs casualty classification. The Security Chief controls access and flow.

## Support Roles
The Logistics Officer manages supplies and transport. The Communications Officer
handles notifications and external reporting.
";

/// Settings tuned for tests: tiny store, low top-k, org doc wired in.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.embedding_dimension = DIM;
    settings.general.top_k_results = 5;
    // No backoff sleeps in tests
    settings.general.retry_delay_base_seconds = 0.0;
    settings.ingestion.assigner_reference_document = "organizational-structure".to_string();
    settings
}

/// A corpus on disk plus an ingested, scripted `Planweave` system.
pub struct TestSystem {
    pub system: Planweave,
    #[allow(dead_code)]
    pub corpus_dir: TempDir,
}

/// Build the standard three-document fixture and ingest it.
pub async fn ingested_system(provider: Arc<ScriptedProvider>) -> TestSystem {
    ingested_system_with(provider, test_settings()).await
}

/// Like [`ingested_system`] but with caller-tuned settings.
pub async fn ingested_system_with(
    provider: Arc<ScriptedProvider>,
    settings: Settings,
) -> TestSystem {
    let corpus_dir = tempfile::tempdir().expect("Failed to create temp corpus dir");
    std::fs::write(corpus_dir.path().join("evacuation-protocol.md"), EVAC_DOC).unwrap();
    std::fs::write(corpus_dir.path().join("surge-protocol.md"), SURGE_DOC).unwrap();
    std::fs::write(corpus_dir.path().join("organizational-structure.md"), ORG_DOC).unwrap();

    let system = Planweave::with_factory(
        settings,
        KnowledgeStore::new(DIM),
        Arc::new(HashEmbedder::new()),
        scripted_factory(provider),
    )
    .expect("Failed to build test system");

    let report = system
        .ingest_directory(corpus_dir.path(), "protocol")
        .await
        .expect("Ingestion failed");
    assert!(report.failures.is_empty(), "fixture ingestion had failures");

    TestSystem { system, corpus_dir }
}

/// The standard generation request used across end-to-end tests.
pub fn war_response_request() -> UserConfig {
    UserConfig {
        name: "Center War Response Checklist".to_string(),
        timing: Some("within 24h".to_string()),
        level: Level::Center,
        phase: Phase::Response,
        subject: Subject::War,
        special_protocols_node_ids: Vec::new(),
        documents_to_query: Vec::new(),
        guideline_documents: Vec::new(),
    }
}
