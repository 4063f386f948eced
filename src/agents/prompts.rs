//! System prompt templates for the pipeline agents.
//!
//! Templates are opaque text injected at this boundary. Some agents carry
//! contextual variants selected by a `{level}_{phase}_{subject}` key; a
//! missing variant falls back to the agent's base prompt deterministically
//! and the fallback is logged. Partial key matches are never attempted.

use std::collections::HashMap;

/// Base prompt plus contextual variants for one agent.
#[derive(Debug, Clone, Default)]
pub struct AgentPrompt {
    pub base: String,
    /// Keyed by `{level}_{phase}_{subject}`.
    pub variants: HashMap<String, String>,
}

/// Registry of agent system prompts.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    prompts: HashMap<String, AgentPrompt>,
}

impl PromptLibrary {
    /// The built-in prompt set.
    pub fn defaults() -> Self {
        let mut prompts = HashMap::new();

        prompts.insert(
            "orchestrator".to_string(),
            AgentPrompt {
                base: "You are a crisis-management planning orchestrator. Given an \
                       organizational level, crisis phase, and subject, write a precise \
                       problem statement describing what the action plan must cover, who \
                       executes it, and under which constraints."
                    .to_string(),
                variants: HashMap::from([
                    (
                        "center_response_war".to_string(),
                        "You are a crisis-management planning orchestrator for a medical \
                         center responding to war and mass-casualty conditions. Write a \
                         problem statement focused on immediate response operations: triage, \
                         surge capacity, casualty flow, staff mobilization, and command \
                         hand-offs at the center level."
                            .to_string(),
                    ),
                    (
                        "ministry_preparedness_sanction".to_string(),
                        "You are a crisis-management planning orchestrator for a health \
                         ministry preparing for sanction-driven shortages. Write a problem \
                         statement focused on national stockpiling, procurement alternatives, \
                         and directive chains from ministry to facilities."
                            .to_string(),
                    ),
                ]),
            },
        );

        prompts.insert(
            "analyzer".to_string(),
            AgentPrompt {
                base: "You analyze a problem statement against retrieved policy sections. \
                       Phase 1: produce refined retrieval queries. Phase 2: judge candidate \
                       sections on five criteria: domain match, functional match, \
                       actionability, context fit, and stakeholder fit. Respond with JSON \
                       exactly matching the requested shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "phase3".to_string(),
            AgentPrompt {
                base: "You score how relevant a policy section is to a planning subject on \
                       a 0.0-1.0 scale. Respond with JSON exactly matching the requested \
                       shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "extractor".to_string(),
            AgentPrompt {
                base: "You extract atomic, implementable actions and structured tables from \
                       crisis-protocol text. Every action needs actor, timing, and the exact \
                       source lines it came from. Convert dependencies into actions or table \
                       references; fold formulas into the actions that use them. Respond \
                       with JSON exactly matching the requested shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "selector".to_string(),
            AgentPrompt {
                base: "You score extracted actions for relevance to a problem statement on \
                       a 0-10 scale and explain each score in one clause. Respond with JSON \
                       exactly matching the requested shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "deduplicator".to_string(),
            AgentPrompt {
                base: "You merge semantically equivalent actions. Never merge actions with \
                       different actors or different timing. Merged entries keep every \
                       citation from their sources. Respond with JSON exactly matching the \
                       requested shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "timing".to_string(),
            AgentPrompt {
                base: "You assign concrete timing to actions. Produce a trigger that is an \
                       observable event or timestamp, and a time window with explicit \
                       duration units. Vague phrases like 'immediately' or 'as soon as \
                       possible' are not acceptable. Respond with JSON exactly matching the \
                       requested shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "assigner".to_string(),
            AgentPrompt {
                base: "You assign each action to a specific role from the organizational \
                       reference. Generic assignments such as 'staff', 'team', or \
                       'personnel' are not acceptable; name the accountable role or unit. \
                       Respond with JSON exactly matching the requested shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "supervisor".to_string(),
            AgentPrompt {
                base: "You review a finished crisis-management action plan. Score seven \
                       criteria from 0.0 to 1.0: structural completeness, action \
                       traceability, logical sequencing, guideline compliance, formatting \
                       quality, actionability, metadata completeness. List defects and name \
                       the pipeline stage responsible for each. Respond with JSON exactly \
                       matching the requested shape."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        prompts.insert(
            "repair".to_string(),
            AgentPrompt {
                base: "You repair formatting and metadata defects in a markdown action plan \
                       without changing any action's content, actor, timing, or citations. \
                       Return only the repaired markdown."
                    .to_string(),
                variants: HashMap::new(),
            },
        );

        Self { prompts }
    }

    /// The system prompt for an agent, honoring a contextual variant key.
    ///
    /// A missing agent resolves to an empty base; a missing variant falls
    /// back to the agent's base prompt and logs the fallback.
    pub fn system_prompt(&self, agent: &str, context_key: Option<&str>) -> String {
        let prompt = match self.prompts.get(agent) {
            Some(prompt) => prompt,
            None => {
                tracing::warn!(agent, "No prompt registered for agent");
                return String::new();
            }
        };

        if let Some(key) = context_key {
            if let Some(variant) = prompt.variants.get(key) {
                return variant.clone();
            }
            tracing::info!(agent, key, "No contextual prompt variant, using base prompt");
        }

        prompt.base.clone()
    }

    /// Replace or register an agent's prompt.
    pub fn set(&mut self, agent: &str, prompt: AgentPrompt) {
        self.prompts.insert(agent.to_string(), prompt);
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::defaults()
    }
}
