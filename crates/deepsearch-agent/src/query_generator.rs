use crate::prompts::{PromptKind, PromptRegistry};
use anyhow::{Context, Result};
use deepsearch_common::Query;
use deepsearch_llm::{strip_json_fences, LLMProvider, ModelTier};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Model calls allowed per batch before settling for fewer queries.
const MAX_ATTEMPTS: usize = 3;

/// LLM-backed writer of diverse search queries.
pub struct QueryGenerator {
    llm: Arc<dyn LLMProvider>,
    prompts: Arc<PromptRegistry>,
    max_attempts: usize,
}

impl QueryGenerator {
    pub fn new(llm: Arc<dyn LLMProvider>, prompts: Arc<PromptRegistry>) -> Self {
        Self {
            llm,
            prompts,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Produce up to `count` queries whose strings are unique (case-insensitive,
    /// trimmed) within the batch and against `exclude`.
    ///
    /// Normally one model call. If duplicates or a failed call leave the batch
    /// short, the missing queries are requested again, up to the attempt bound;
    /// after that the batch proceeds short. Never fails: if nothing usable came
    /// back, the topic itself becomes the only query.
    pub async fn generate(
        &self,
        topic: &str,
        count: usize,
        tier: ModelTier,
        prior_context: Option<&str>,
        exclude: &[Query],
    ) -> Vec<Query> {
        let mut seen: HashSet<String> = exclude.iter().map(Query::dedup_key).collect();
        let mut accepted: Vec<Query> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let missing = count.saturating_sub(accepted.len());
            if missing == 0 {
                break;
            }

            let batch = {
                let used: Vec<&Query> = exclude.iter().chain(accepted.iter()).collect();
                self.request_batch(topic, missing, tier, prior_context, &used)
                    .await
            };
            match batch {
                Ok(candidates) => {
                    let offered = candidates.len();
                    let added = accept_unique(&mut accepted, &mut seen, candidates, count);
                    debug!(
                        "Query batch attempt {}/{}: {} offered, {} accepted",
                        attempt, self.max_attempts, offered, added
                    );
                }
                Err(e) => {
                    warn!(
                        "Query generation attempt {}/{} failed: {:#}",
                        attempt, self.max_attempts, e
                    );
                }
            }
        }

        if accepted.is_empty() && count > 0 {
            let fallback = Query::new(topic.trim(), "Fallback: searching the topic directly");
            if seen.insert(fallback.dedup_key()) {
                warn!("No usable queries generated, falling back to the topic itself");
                accepted.push(fallback);
            }
        } else if accepted.len() < count {
            warn!(
                "Proceeding with {} of {} requested queries",
                accepted.len(),
                count
            );
        }

        info!("📋 Generated {} search queries", accepted.len());
        accepted
    }

    /// Prepare the next round from the reflection's follow-up queries.
    ///
    /// The proposals go through the same uniqueness filter, also against every
    /// query already executed this session. Proposals lost to duplicates are
    /// replaced by freshly generated queries so the round still carries
    /// `proposals.len()` queries when the model cooperates.
    pub async fn follow_up(
        &self,
        topic: &str,
        proposals: Vec<Query>,
        tier: ModelTier,
        prior_context: Option<&str>,
        executed: &[Query],
    ) -> Vec<Query> {
        let requested = proposals.len();
        let mut seen: HashSet<String> = executed.iter().map(Query::dedup_key).collect();
        let mut accepted = Vec::new();
        accept_unique(&mut accepted, &mut seen, proposals, requested);

        let missing = requested - accepted.len();
        if missing > 0 {
            debug!(
                "{} of {} follow-up proposals repeat earlier queries, regenerating",
                missing, requested
            );
            let used: Vec<Query> = executed.iter().chain(accepted.iter()).cloned().collect();
            let extra = self
                .generate(topic, missing, tier, prior_context, &used)
                .await;
            accepted.extend(extra);
        }

        accepted
    }

    async fn request_batch(
        &self,
        topic: &str,
        count: usize,
        tier: ModelTier,
        prior_context: Option<&str>,
        used: &[&Query],
    ) -> Result<Vec<Query>> {
        let exclude = if used.is_empty() {
            "(none)".to_string()
        } else {
            used.iter()
                .map(|q| format!("- {}", q.query))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let count_str = count.to_string();
        let prompt = self
            .prompts
            .render(
                PromptKind::QueryWriter,
                &[
                    ("topic", topic),
                    ("count", &count_str),
                    ("exclude", &exclude),
                    ("prior_context", prior_context.unwrap_or("(nothing yet)")),
                ],
            )
            .context("query writer prompt not found")?;

        let response = self
            .llm
            .generate(tier, &prompt)
            .await
            .context("Query generator LLM call failed")?;

        parse_batch(&response.content, topic)
    }
}

/// Accept candidates whose dedup key is unseen, until `limit` are held.
/// Returns how many were added.
fn accept_unique(
    accepted: &mut Vec<Query>,
    seen: &mut HashSet<String>,
    candidates: Vec<Query>,
    limit: usize,
) -> usize {
    let before = accepted.len();
    for candidate in candidates {
        if accepted.len() >= limit {
            break;
        }
        if candidate.query.trim().is_empty() {
            continue;
        }
        if seen.insert(candidate.dedup_key()) {
            accepted.push(Query::new(candidate.query.trim(), candidate.rationale));
        }
    }
    accepted.len() - before
}

/// Parse a query batch. Accepts `{"queries": [{query, rationale}]}`,
/// `{"query": ["..."], "rationale": "..."}` and bare arrays.
fn parse_batch(raw: &str, topic: &str) -> Result<Vec<Query>> {
    let json: Value =
        serde_json::from_str(strip_json_fences(raw)).context("Failed to parse query batch JSON")?;

    let shared_rationale = json["rationale"].as_str().unwrap_or_default();
    let items = json["queries"]
        .as_array()
        .or_else(|| json["query"].as_array())
        .or_else(|| json.as_array())
        .context("Query batch JSON has no query list")?;

    let default_rationale = |own: &str| {
        if !own.trim().is_empty() {
            own.trim().to_string()
        } else if !shared_rationale.trim().is_empty() {
            shared_rationale.trim().to_string()
        } else {
            format!("Explores an aspect of: {}", topic)
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(q) => Some(Query::new(q.as_str(), default_rationale(""))),
            Value::Object(obj) => {
                let query = obj.get("query").and_then(Value::as_str)?;
                let rationale = obj.get("rationale").and_then(Value::as_str).unwrap_or("");
                Some(Query::new(query, default_rationale(rationale)))
            }
            _ => None,
        })
        .filter(|q| !q.query.trim().is_empty())
        .collect())
}
