use deepsearch_common::{Query, ResearchError, ResearchResult, Result};
use deepsearch_llm::SearchProvider;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_RESEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Results of one research round, in submission order
#[derive(Debug, Default)]
pub struct RoundOutcome {
    pub results: Vec<ResearchResult>,
    /// Queries that failed or timed out and were recorded as empty results.
    pub failures: Vec<ResearchError>,
}

/// Runs queries against the grounded-search capability.
pub struct WebResearcher {
    search: Arc<dyn SearchProvider>,
    timeout: Duration,
}

impl WebResearcher {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self {
            search,
            timeout: DEFAULT_RESEARCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Research one query. A failure or timeout degrades to an empty result
    /// and is handed back alongside it instead of being raised.
    pub async fn research_one(&self, query: Query) -> (ResearchResult, Option<ResearchError>) {
        let start = Instant::now();

        match tokio::time::timeout(self.timeout, self.search.search(&query.query)).await {
            Ok(Ok(answer)) => {
                debug!(
                    "🔍 '{}' answered with {} citations in {:?}",
                    query.query,
                    answer.citations.len(),
                    start.elapsed()
                );
                let result = ResearchResult {
                    query,
                    summary: answer.text,
                    citations: answer.citations,
                };
                (result, None)
            }
            Ok(Err(e)) => {
                let failure = ResearchError::PartialResearchFailure {
                    query: query.query.clone(),
                    reason: format!("{:#}", e),
                };
                (ResearchResult::empty(query), Some(failure))
            }
            Err(_) => {
                let failure = ResearchError::PartialResearchFailure {
                    query: query.query.clone(),
                    reason: format!("timed out after {:?}", self.timeout),
                };
                (ResearchResult::empty(query), Some(failure))
            }
        }
    }

    /// Research every query concurrently.
    ///
    /// Results come back in the order the queries were given, regardless of
    /// completion order. Cancellation abandons all in-flight calls.
    pub async fn research_batch(
        &self,
        queries: &[Query],
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome> {
        info!("🌐 Researching {} queries concurrently", queries.len());
        let start = Instant::now();

        let calls = join_all(queries.iter().cloned().map(|q| self.research_one(q)));

        let completed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Research round cancelled with {} calls in flight", queries.len());
                return Err(ResearchError::RequestCancelled);
            }
            completed = calls => completed,
        };

        let mut outcome = RoundOutcome::default();
        for (result, failure) in completed {
            if let Some(failure) = failure {
                warn!("{}", failure);
                outcome.failures.push(failure);
            }
            outcome.results.push(result);
        }

        info!(
            "   Round finished in {:?}: {} succeeded, {} failed",
            start.elapsed(),
            outcome.results.len() - outcome.failures.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }
}
