//! Bottom-up heading summarization.
//!
//! Leaves are summarized first; every internal heading's prompt includes
//! the already-generated summaries of its direct children, so parent
//! summaries are always conditioned on child summaries.

use crate::llm::client::LlmClient;
use crate::llm::provider::{CompletionOptions, Message};
use crate::store::HeadingNode;
use crate::utils::error::PlanweaveError;
use std::collections::HashMap;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize sections of crisis-management policy \
documents. Write a dense 2-4 sentence summary capturing the section's obligations, actors, \
triggers, and time constraints. Do not add information that is not in the section.";

/// Per-heading content cap fed to the summarizer; anything longer is
/// truncated at a line boundary.
const MAX_CONTENT_CHARS: usize = 12_000;

/// Generate summaries for all headings of one document, strictly bottom-up.
///
/// Returns the summaries keyed by heading id. Headings are mutated by the
/// caller; this function only computes.
pub async fn summarize_tree(
    client: &LlmClient,
    headings: &[HeadingNode],
) -> Result<HashMap<String, String>, PlanweaveError> {
    // Children of each heading, for context augmentation
    let mut children: HashMap<&str, Vec<&HeadingNode>> = HashMap::new();
    for heading in headings {
        if let Some(parent) = &heading.parent_id {
            children.entry(parent.as_str()).or_default().push(heading);
        }
    }

    // Deepest levels first guarantees child summaries exist before the
    // parent's prompt is assembled
    let mut order: Vec<&HeadingNode> = headings.iter().collect();
    order.sort_by(|a, b| b.level.cmp(&a.level));

    let mut summaries: HashMap<String, String> = HashMap::new();

    for heading in order {
        let child_summaries: Vec<String> = children
            .get(heading.id.as_str())
            .map(|kids| {
                kids.iter()
                    .filter_map(|kid| {
                        summaries
                            .get(&kid.id)
                            .map(|s| format!("- {}: {}", kid.title, s))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let prompt = build_summary_prompt(heading, &child_summaries);
        let messages = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(prompt),
        ];

        let response = client
            .complete(
                &format!("summary_{}", heading.id),
                &messages,
                &CompletionOptions {
                    max_tokens: Some(300),
                    temperature: Some(0.1),
                },
            )
            .await?;

        summaries.insert(heading.id.clone(), response.content.trim().to_string());
    }

    Ok(summaries)
}

fn build_summary_prompt(heading: &HeadingNode, child_summaries: &[String]) -> String {
    let content = truncate_at_line(&heading.content, MAX_CONTENT_CHARS);

    let mut prompt = format!(
        "Section: {} (level {})\n\n<section_content>\n{}\n</section_content>\n",
        heading.title, heading.level, content
    );

    if !child_summaries.is_empty() {
        prompt.push_str("\n<subsection_summaries>\n");
        prompt.push_str(&child_summaries.join("\n"));
        prompt.push_str("\n</subsection_summaries>\n");
    }

    prompt.push_str("\nSummarize this section.");
    prompt
}

fn truncate_at_line(content: &str, max_chars: usize) -> &str {
    if content.len() <= max_chars {
        return content;
    }
    let mut boundary = max_chars;
    while boundary > 0 && !content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let cut = content[..boundary].rfind('\n').unwrap_or(boundary);
    &content[..cut]
}
