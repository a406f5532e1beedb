use crate::prompts::{PromptKind, PromptRegistry};
use anyhow::Context;
use deepsearch_common::{FinalAnswer, ResearchResult, Result};
use deepsearch_llm::{LLMProvider, ModelTier};
use deepsearch_sources::{render_citations, SourceRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Merges every round's summaries into one cited answer.
pub struct AnswerSynthesizer {
    llm: Arc<dyn LLMProvider>,
    prompts: Arc<PromptRegistry>,
    strict_citations: bool,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LLMProvider>, prompts: Arc<PromptRegistry>) -> Self {
        Self {
            llm,
            prompts,
            strict_citations: false,
        }
    }

    /// Fail with `CitationIntegrity` on references to unknown sources
    /// instead of dropping them. Meant for tests.
    pub fn with_strict_citations(mut self, strict: bool) -> Self {
        self.strict_citations = strict;
        self
    }

    /// A failed model call yields an empty answer rather than an error.
    pub async fn synthesize(
        &self,
        topic: &str,
        results: &[ResearchResult],
        registry: &SourceRegistry,
        tier: ModelTier,
    ) -> Result<FinalAnswer> {
        let prompt = self.build_prompt(topic, results, registry)?;

        let response = match self.llm.generate(tier, &prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Answer synthesis failed, returning no answer: {:#}", e);
                return Ok(FinalAnswer::default());
            }
        };

        let mut render = render_citations(response.content.trim(), registry);
        if self.strict_citations {
            render = render.into_strict()?;
        }

        info!(
            "📝 Answer ready: {} chars citing {} of {} sources",
            render.text.len(),
            render.sources.len(),
            registry.len()
        );

        Ok(FinalAnswer {
            text: render.text,
            sources: render.sources,
        })
    }

    fn build_prompt(
        &self,
        topic: &str,
        results: &[ResearchResult],
        registry: &SourceRegistry,
    ) -> Result<String> {
        let summaries = annotate_summaries(results, registry);
        let citation_rule = if registry.is_empty() {
            "No sources were found, so do not use any citation markers."
        } else {
            "Never invent an id that is not listed."
        };

        let prompt = self
            .prompts
            .render(
                PromptKind::Answer,
                &[
                    ("topic", topic),
                    ("summaries", &summaries),
                    ("citation_rule", citation_rule),
                ],
            )
            .context("answer prompt not found")?;
        Ok(prompt)
    }
}

/// Each non-empty summary followed by the registry ids of its own sources.
fn annotate_summaries(results: &[ResearchResult], registry: &SourceRegistry) -> String {
    let blocks: Vec<String> = results
        .iter()
        .filter(|r| !r.summary.trim().is_empty())
        .map(|r| {
            let mut block = format!("--- {}\n{}", r.query.query, r.summary.trim());

            let mut listed = Vec::new();
            for citation in &r.citations {
                if let Some(record) = registry.lookup_url(&citation.url) {
                    if !listed.contains(&record.short_id) {
                        listed.push(record.short_id);
                        block.push_str(&format!(
                            "\n{} {} ({})",
                            record.label(),
                            record.title,
                            record.url
                        ));
                    }
                }
            }
            if listed.is_empty() {
                block.push_str("\n(no sources)");
            }
            block
        })
        .collect();

    if blocks.is_empty() {
        "(no findings: every search came back empty)".to_string()
    } else {
        blocks.join("\n\n")
    }
}
