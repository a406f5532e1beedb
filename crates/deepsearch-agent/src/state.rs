use crate::effort::{EffortLevel, EffortProfile};
use crate::researcher::RoundOutcome;
use deepsearch_common::{Query, ResearchError, ResearchResult, Result};
use deepsearch_sources::SourceRegistry;
use serde::{Deserialize, Serialize};

/// Longest excerpt of each summary handed to the query writer on follow-up rounds.
const PRIOR_CONTEXT_EXCERPT: usize = 400;

/// Immutable input of one research invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub topic: String,
    pub effort: EffortLevel,
    #[serde(default)]
    pub initial_query_count: Option<usize>,
    #[serde(default)]
    pub max_loops: Option<usize>,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>, effort: EffortLevel) -> Self {
        Self {
            topic: topic.into(),
            effort,
            initial_query_count: None,
            max_loops: None,
        }
    }

    pub fn with_overrides(
        mut self,
        initial_query_count: Option<usize>,
        max_loops: Option<usize>,
    ) -> Self {
        self.initial_query_count = initial_query_count;
        self.max_loops = max_loops;
        self
    }

    /// Validate the request and resolve its profile.
    pub fn profile(&self) -> Result<EffortProfile> {
        if self.topic.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "research topic must not be empty".to_string(),
            ));
        }
        EffortProfile::resolve(self.effort).with_overrides(self.initial_query_count, self.max_loops)
    }
}

/// Mutable aggregate threaded through the loop. One per request, never shared.
#[derive(Debug, Default)]
pub struct ResearchState {
    pub all_results: Vec<ResearchResult>,
    pub registry: SourceRegistry,
    pub loop_count: usize,
    pub pending_queries: Vec<Query>,
    pub executed_queries: Vec<Query>,
    /// Messages of every query that degraded to an empty result.
    pub failures: Vec<String>,
}

impl ResearchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a completed round, in submission order, and count it.
    pub fn fold_round(&mut self, outcome: RoundOutcome) {
        for result in outcome.results {
            self.registry.register(&result.citations);
            self.all_results.push(result);
        }
        self.failures
            .extend(outcome.failures.iter().map(ToString::to_string));
        self.executed_queries
            .extend(std::mem::take(&mut self.pending_queries));
        self.loop_count += 1;
    }

    /// Digest of what has been learned so far, for follow-up query writing.
    pub fn prior_context(&self) -> Option<String> {
        let lines: Vec<String> = self
            .all_results
            .iter()
            .filter(|r| !r.summary.trim().is_empty())
            .map(|r| {
                let excerpt: String = r.summary.trim().chars().take(PRIOR_CONTEXT_EXCERPT).collect();
                format!("- {}: {}", r.query.query, excerpt)
            })
            .collect();

        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}
