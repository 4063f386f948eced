// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! The state object threaded through the generation pipeline.
//!
//! `PipelineState` is per-generation and unshared: exactly one stage
//! mutates it at a time. Stages write only their contract fields and pass
//! everything else through. The supervisor may move `current_stage`
//! backwards; every other transition is forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Organizational level a plan is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Ministry,
    University,
    Center,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ministry => write!(f, "ministry"),
            Self::University => write!(f, "university"),
            Self::Center => write!(f, "center"),
        }
    }
}

impl std::str::FromStr for Level {
    type Err = crate::utils::error::PlanweaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ministry" => Ok(Self::Ministry),
            "university" => Ok(Self::University),
            "center" => Ok(Self::Center),
            other => Err(crate::utils::error::PlanweaveError::invalid_level(other)),
        }
    }
}

/// Crisis phase the plan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Preparedness,
    Response,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preparedness => write!(f, "preparedness"),
            Self::Response => write!(f, "response"),
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::utils::error::PlanweaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preparedness" => Ok(Self::Preparedness),
            "response" => Ok(Self::Response),
            other => Err(crate::utils::error::PlanweaveError::ValidationError {
                message: format!("Invalid phase: '{}'", other),
                suggestion: "Valid phases are: preparedness, response".to_string(),
            }),
        }
    }
}

/// Crisis subject the plan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    War,
    Sanction,
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::War => write!(f, "war"),
            Self::Sanction => write!(f, "sanction"),
        }
    }
}

impl std::str::FromStr for Subject {
    type Err = crate::utils::error::PlanweaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "war" => Ok(Self::War),
            "sanction" => Ok(Self::Sanction),
            other => Err(crate::utils::error::PlanweaveError::ValidationError {
                message: format!("Invalid subject: '{}'", other),
                suggestion: "Valid subjects are: war, sanction".to_string(),
            }),
        }
    }
}

/// The user's generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    /// Optional textual timing guidance (e.g., "within 24h").
    pub timing: Option<String>,
    pub level: Level,
    pub phase: Phase,
    pub subject: Subject,
    #[serde(default)]
    pub special_protocols_node_ids: Vec<String>,
    /// Document whitelist; empty means the whole corpus.
    #[serde(default)]
    pub documents_to_query: Vec<String>,
    /// Guideline documents that bypass the whitelist.
    #[serde(default)]
    pub guideline_documents: Vec<String>,
}

impl UserConfig {
    /// The `{level}_{phase}_{subject}` key used to select contextual
    /// prompt variants.
    pub fn prompt_key(&self) -> String {
        format!("{}_{}_{}", self.level, self.phase, self.subject)
    }
}

/// Citation back to the source graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub document: String,
    /// 1-indexed inclusive line range in the source document.
    pub line_range: (usize, usize),
    pub node_id: String,
    pub node_title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityLevel {
    #[serde(rename = "immediate")]
    Immediate,
    #[serde(rename = "short-term")]
    ShortTerm,
    #[serde(rename = "long-term")]
    LongTerm,
}

impl PriorityLevel {
    /// Sort weight; lower is sooner.
    pub fn weight(self) -> u8 {
        match self {
            Self::Immediate => 0,
            Self::ShortTerm => 1,
            Self::LongTerm => 2,
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::ShortTerm => write!(f, "short-term"),
            Self::LongTerm => write!(f, "long-term"),
        }
    }
}

/// A single atomic, implementable step with actor, timing, and citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub action_text: String,
    pub who: String,
    /// `"<trigger> | <time_window>"` once Timing has run.
    pub when: String,
    pub priority_level: PriorityLevel,
    pub reference: Reference,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub relevance_score: Option<f32>,
    #[serde(default)]
    pub relevance_rationale: Option<String>,
    #[serde(default)]
    pub timing_flagged: bool,
    #[serde(default)]
    pub actor_flagged: bool,
    #[serde(default)]
    pub merged_from: Vec<String>,
    /// Actions from the special-protocols bypass lane survive Selector
    /// unconditionally.
    #[serde(default)]
    pub from_special_protocol: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Checklist,
    ActionTable,
    DecisionMatrix,
    Other,
}

/// Structured rows lifted from source content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub table_title: String,
    pub table_type: TableType,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub markdown_content: String,
    pub reference: Reference,
    /// Ids of actions derived from this table's rows.
    #[serde(default)]
    pub extracted_actions: Vec<String>,
}

/// Nodes selected for one subject (one refined query).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectNodes {
    pub subject: String,
    pub nodes: Vec<String>,
}

/// The fixed stage set, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Orchestrator,
    Injector,
    Analyzer,
    Phase3,
    Extractor,
    Selector,
    Deduplicator,
    Timing,
    Assigner,
    Formatter,
    Supervisor,
}

impl Stage {
    pub const ORDER: [Stage; 11] = [
        Stage::Orchestrator,
        Stage::Injector,
        Stage::Analyzer,
        Stage::Phase3,
        Stage::Extractor,
        Stage::Selector,
        Stage::Deduplicator,
        Stage::Timing,
        Stage::Assigner,
        Stage::Formatter,
        Stage::Supervisor,
    ];

    /// The stage after this one, `None` after Supervisor.
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// Resolve a supervisor-reported agent name to its stage.
    pub fn from_agent_name(name: &str) -> Option<Stage> {
        match name.to_lowercase().as_str() {
            "orchestrator" => Some(Stage::Orchestrator),
            "injector" | "special_protocols" => Some(Stage::Injector),
            "analyzer" => Some(Stage::Analyzer),
            "phase3" => Some(Stage::Phase3),
            "extractor" => Some(Stage::Extractor),
            "selector" => Some(Stage::Selector),
            "deduplicator" => Some(Stage::Deduplicator),
            "timing" => Some(Stage::Timing),
            "assigner" => Some(Stage::Assigner),
            "formatter" => Some(Stage::Formatter),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Orchestrator => "orchestrator",
            Stage::Injector => "injector",
            Stage::Analyzer => "analyzer",
            Stage::Phase3 => "phase3",
            Stage::Extractor => "extractor",
            Stage::Selector => "selector",
            Stage::Deduplicator => "deduplicator",
            Stage::Timing => "timing",
            Stage::Assigner => "assigner",
            Stage::Formatter => "formatter",
            Stage::Supervisor => "supervisor",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A structured error entry recorded against the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageErrorEntry {
    pub stage: String,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// The single mutable object passed through all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub user_config: UserConfig,
    #[serde(default)]
    pub problem_statement: String,
    #[serde(default)]
    pub refined_queries: Vec<String>,
    #[serde(default)]
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub subject_nodes: Vec<SubjectNodes>,
    /// Expanded special-protocol node ids (inputs plus all descendants).
    #[serde(default)]
    pub special_protocols_nodes: Vec<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub tables: Vec<Table>,
    /// Per-stage retry counts.
    #[serde(default)]
    pub retry_count: HashMap<String, u32>,
    /// Supervisor overall scores, in review order.
    #[serde(default)]
    pub quality_scores: Vec<f64>,
    #[serde(default)]
    pub errors: Vec<StageErrorEntry>,
    pub current_stage: Stage,
    #[serde(default)]
    pub final_plan: Option<String>,
    /// Supervisor-initiated reruns so far.
    #[serde(default)]
    pub validator_retry_count: u32,
    /// Feedback attached by the supervisor, keyed by stage name. A stage
    /// consumes its entry on its next run.
    #[serde(default)]
    pub targeted_feedback: HashMap<String, String>,
}

impl PipelineState {
    pub fn new(user_config: UserConfig) -> Self {
        Self {
            user_config,
            problem_statement: String::new(),
            refined_queries: Vec::new(),
            node_ids: Vec::new(),
            subject_nodes: Vec::new(),
            special_protocols_nodes: Vec::new(),
            actions: Vec::new(),
            tables: Vec::new(),
            retry_count: HashMap::new(),
            quality_scores: Vec::new(),
            errors: Vec::new(),
            current_stage: Stage::Orchestrator,
            final_plan: None,
            validator_retry_count: 0,
            targeted_feedback: HashMap::new(),
        }
    }

    /// Record a structured error against a stage.
    pub fn record_error(&mut self, stage: Stage, kind: &str, message: impl Into<String>) {
        self.errors.push(StageErrorEntry {
            stage: stage.name().to_string(),
            kind: kind.to_string(),
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Take (and clear) the targeted feedback for a stage, if any.
    pub fn take_feedback(&mut self, stage: Stage) -> Option<String> {
        self.targeted_feedback.remove(stage.name())
    }

    /// Increment and return a stage's retry counter.
    pub fn bump_retry(&mut self, stage: Stage) -> u32 {
        let counter = self.retry_count.entry(stage.name().to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}
