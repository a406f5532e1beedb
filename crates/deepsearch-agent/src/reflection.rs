use crate::prompts::{PromptKind, PromptRegistry};
use anyhow::{Context, Result};
use deepsearch_common::{Query, ResearchError, ResearchResult};
use deepsearch_llm::{strip_json_fences, LLMProvider, ModelTier};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_MAX_FOLLOW_UPS: usize = 5;

/// Why a verdict came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// The model's own judgment.
    Model,
    /// The loop budget is spent; the model was not consulted.
    BudgetExhausted,
    /// The model claimed insufficiency but proposed nothing to search.
    StallGuard,
    /// The model call failed or its answer was unparsable.
    ModelFailure,
}

#[derive(Debug, Clone)]
pub struct ReflectionVerdict {
    pub is_sufficient: bool,
    pub knowledge_gap: String,
    /// Non-empty exactly when `is_sufficient` is false.
    pub follow_up_queries: Vec<Query>,
    pub source: VerdictSource,
}

impl ReflectionVerdict {
    fn sufficient(source: VerdictSource) -> Self {
        Self {
            is_sufficient: true,
            knowledge_gap: String::new(),
            follow_up_queries: Vec::new(),
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    is_sufficient: bool,
    #[serde(default)]
    knowledge_gap: String,
    #[serde(default)]
    follow_up_queries: Vec<String>,
}

/// Decides whether research can stop, and what to search next if not.
pub struct ReflectionEvaluator {
    llm: Arc<dyn LLMProvider>,
    prompts: Arc<PromptRegistry>,
    max_follow_ups: usize,
}

impl ReflectionEvaluator {
    pub fn new(llm: Arc<dyn LLMProvider>, prompts: Arc<PromptRegistry>) -> Self {
        Self {
            llm,
            prompts,
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
        }
    }

    pub fn with_max_follow_ups(mut self, max: usize) -> Self {
        self.max_follow_ups = max.max(1);
        self
    }

    /// Never fails: the loop budget, a stalled verdict and a failed model
    /// call all resolve to "sufficient".
    pub async fn evaluate(
        &self,
        topic: &str,
        results: &[ResearchResult],
        tier: ModelTier,
        loop_count: usize,
        max_loops: usize,
    ) -> ReflectionVerdict {
        if loop_count >= max_loops {
            info!(
                "🛑 Research budget reached ({}/{} rounds), proceeding to answer",
                loop_count, max_loops
            );
            return ReflectionVerdict::sufficient(VerdictSource::BudgetExhausted);
        }

        let raw = match self.ask_model(topic, results, tier).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Reflection failed, treating research as sufficient: {:#}", e);
                return ReflectionVerdict::sufficient(VerdictSource::ModelFailure);
            }
        };

        if raw.is_sufficient {
            info!("✅ Reflection: research is sufficient");
            return ReflectionVerdict::sufficient(VerdictSource::Model);
        }

        let rationale = if raw.knowledge_gap.trim().is_empty() {
            "Follow-up on an identified knowledge gap".to_string()
        } else {
            raw.knowledge_gap.trim().to_string()
        };
        let follow_up_queries: Vec<Query> = raw
            .follow_up_queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .take(self.max_follow_ups)
            .map(|q| Query::new(q, rationale.clone()))
            .collect();

        if follow_up_queries.is_empty() {
            warn!("{}; forcing sufficiency", ResearchError::ReflectionStallGuard);
            return ReflectionVerdict::sufficient(VerdictSource::StallGuard);
        }

        info!(
            "🔁 Reflection: knowledge gap '{}', {} follow-up queries",
            rationale,
            follow_up_queries.len()
        );
        ReflectionVerdict {
            is_sufficient: false,
            knowledge_gap: rationale,
            follow_up_queries,
            source: VerdictSource::Model,
        }
    }

    async fn ask_model(
        &self,
        topic: &str,
        results: &[ResearchResult],
        tier: ModelTier,
    ) -> Result<RawVerdict> {
        let max_follow_ups = self.max_follow_ups.to_string();
        let summaries = format_summaries(results);
        let prompt = self
            .prompts
            .render(
                PromptKind::Reflection,
                &[
                    ("topic", topic),
                    ("max_follow_ups", &max_follow_ups),
                    ("summaries", &summaries),
                ],
            )
            .context("reflection prompt not found")?;

        let response = self
            .llm
            .generate(tier, &prompt)
            .await
            .context("Reflection LLM call failed")?;

        serde_json::from_str(strip_json_fences(&response.content))
            .context("Failed to parse reflection verdict JSON")
    }
}

fn format_summaries(results: &[ResearchResult]) -> String {
    let blocks: Vec<String> = results
        .iter()
        .filter(|r| !r.summary.trim().is_empty())
        .map(|r| format!("--- {}\n{}", r.query.query, r.summary.trim()))
        .collect();

    if blocks.is_empty() {
        "(no findings: every search so far came back empty)".to_string()
    } else {
        blocks.join("\n\n")
    }
}
