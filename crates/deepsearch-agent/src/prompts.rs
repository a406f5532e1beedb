use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which research step a prompt belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptKind {
    QueryWriter,
    Reflection,
    Answer,
}

/// A prompt template with `{placeholder}` variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecializedPrompt {
    pub kind: PromptKind,
    pub description: String,
    pub template: String,
}

/// Registry of the prompts used by each research step
pub struct PromptRegistry {
    prompts: HashMap<PromptKind, SpecializedPrompt>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            prompts: HashMap::new(),
        };
        registry.initialize_prompts();
        registry
    }

    fn initialize_prompts(&mut self) {
        let prompts = vec![
            SpecializedPrompt {
                kind: PromptKind::QueryWriter,
                description: "Write diverse, non-overlapping web search queries for a research topic".to_string(),
                template: r#"Your goal is to generate sophisticated and diverse web search queries for an automated web research tool.

Research topic: {topic}

Instructions:
- Return exactly {count} queries. Each query should focus on one specific aspect of the topic.
- Queries must not overlap: never return two queries that would retrieve the same pages.
- Prefer queries that surface the most current information.
- Do not repeat any of these already-used queries:
{exclude}

What has been learned so far:
{prior_context}

Respond with JSON only, matching:
{{
  "queries": [
    {{ "query": "search query", "rationale": "why this query helps answer the topic" }}
  ]
}}"#
                .to_string(),
            },
            SpecializedPrompt {
                kind: PromptKind::Reflection,
                description: "Judge whether gathered summaries answer the topic and propose follow-up queries".to_string(),
                template: r#"You are an expert research assistant analyzing summaries about "{topic}".

Instructions:
- Identify knowledge gaps or areas that need deeper exploration and generate follow-up queries (at most {max_follow_ups}).
- If the provided summaries are sufficient to answer the topic, do not generate follow-up queries.
- If there is a knowledge gap, each follow-up query must be self-contained and include the context needed for a web search.
- Focus on technical details, implementation specifics or emerging trends that weren't fully covered.

Summaries:
{summaries}

Respond with JSON only, matching:
{{
  "is_sufficient": true,
  "knowledge_gap": "what is missing, empty if sufficient",
  "follow_up_queries": ["specific follow-up query"]
}}"#
                .to_string(),
            },
            SpecializedPrompt {
                kind: PromptKind::Answer,
                description: "Write the final cited answer from all research summaries".to_string(),
                template: r#"Generate a high-quality answer to the user's question based on the provided research summaries.

Question: {topic}

Instructions:
- Use only the information in the summaries below.
- Cite sources inline with their bracketed ids, e.g. [1] or [2, 5], directly after the claim they support.
- Only use ids from the source lists below. {citation_rule}
- Do not add a bibliography; sources are listed separately.

Summaries:
{summaries}"#
                .to_string(),
            },
        ];

        for prompt in prompts {
            self.prompts.insert(prompt.kind, prompt);
        }
    }

    pub fn get_prompt(&self, kind: PromptKind) -> Option<&SpecializedPrompt> {
        self.prompts.get(&kind)
    }

    /// Render a template, substituting each `{name}` with its value and
    /// collapsing the `{{`/`}}` escapes used for literal braces.
    ///
    /// Only the template is scanned; substituted values are copied verbatim.
    pub fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> Option<String> {
        let template = self.get_prompt(kind)?.template.as_str();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") || tail.starts_with("}}") {
                out.push_str(&tail[..1]);
                rest = &tail[2..];
            } else if let Some((value, len)) = placeholder(tail, vars) {
                out.push_str(value);
                rest = &tail[len..];
            } else {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        Some(out)
    }
}

/// Resolve a `{name}` at the start of `tail` to its value and the length
/// of the placeholder.
fn placeholder<'a>(tail: &str, vars: &[(&str, &'a str)]) -> Option<(&'a str, usize)> {
    let end = tail.find('}')?;
    let name = tail.get(1..end)?;
    vars.iter()
        .find(|(var, _)| *var == name)
        .map(|(_, value)| (*value, end + 1))
}
