use crate::effort::EffortProfile;
use crate::prompts::PromptRegistry;
use crate::query_generator::QueryGenerator;
use crate::reflection::ReflectionEvaluator;
use crate::researcher::WebResearcher;
use crate::state::{ResearchRequest, ResearchState};
use crate::synthesizer::AnswerSynthesizer;
use deepsearch_common::{FinalAnswer, Query, ResearchError, Result};
use deepsearch_llm::{LLMProvider, SearchProvider};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where the loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Generating,
    Researching,
    Reflecting,
    Synthesizing,
    Done,
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct ResearchReport {
    pub answer: FinalAnswer,
    pub loop_count: usize,
    /// Queries executed per round, in submission order.
    pub rounds: Vec<Vec<Query>>,
    pub failures: Vec<String>,
    pub phases: Vec<Phase>,
    pub profile: EffortProfile,
}

/// Drives generate → research → reflect rounds until the research is judged
/// sufficient or the loop budget is spent, then synthesizes the answer.
pub struct ResearchAgent {
    generator: QueryGenerator,
    researcher: WebResearcher,
    reflector: ReflectionEvaluator,
    synthesizer: AnswerSynthesizer,
}

impl ResearchAgent {
    pub fn new(llm: Arc<dyn LLMProvider>, search: Arc<dyn SearchProvider>) -> Self {
        let prompts = Arc::new(PromptRegistry::new());
        Self {
            generator: QueryGenerator::new(llm.clone(), prompts.clone()),
            researcher: WebResearcher::new(search),
            reflector: ReflectionEvaluator::new(llm.clone(), prompts.clone()),
            synthesizer: AnswerSynthesizer::new(llm, prompts),
        }
    }

    pub fn with_research_timeout(mut self, timeout: Duration) -> Self {
        self.researcher = self.researcher.with_timeout(timeout);
        self
    }

    pub fn with_strict_citations(mut self, strict: bool) -> Self {
        self.synthesizer = self.synthesizer.with_strict_citations(strict);
        self
    }

    /// Run one research request to completion.
    ///
    /// Only `InvalidConfiguration` (raised before any model or search call)
    /// and `RequestCancelled` escape; every other failure is absorbed into
    /// the report.
    pub async fn run(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport> {
        let profile = request.profile()?;
        let topic = request.topic.trim();
        let start = Instant::now();

        let mut state = ResearchState::new();
        let mut phase = Phase::Init;
        let mut phases = Vec::new();
        let mut rounds: Vec<Vec<Query>> = Vec::new();
        let mut follow_ups: Vec<Query> = Vec::new();
        let mut answer = FinalAnswer::default();

        loop {
            if phase != Phase::Done && cancel.is_cancelled() {
                info!("Research cancelled during {:?}", phase);
                return Err(ResearchError::RequestCancelled);
            }
            phases.push(phase);
            debug!("Phase {:?} (round {})", phase, state.loop_count);

            match phase {
                Phase::Init => {
                    info!(
                        "🚀 Researching '{}' at {} effort: {} initial queries, up to {} rounds",
                        topic, request.effort, profile.initial_query_count, profile.max_loops
                    );
                    phase = Phase::Generating;
                }
                Phase::Generating => {
                    let prior = state.prior_context();
                    let queries = if state.loop_count == 0 {
                        cancellable(
                            cancel,
                            self.generator.generate(
                                topic,
                                profile.initial_query_count,
                                profile.query_model,
                                None,
                                &[],
                            ),
                        )
                        .await?
                    } else {
                        cancellable(
                            cancel,
                            self.generator.follow_up(
                                topic,
                                std::mem::take(&mut follow_ups),
                                profile.query_model,
                                prior.as_deref(),
                                &state.executed_queries,
                            ),
                        )
                        .await?
                    };
                    state.pending_queries = queries;
                    phase = Phase::Researching;
                }
                Phase::Researching => {
                    info!(
                        "🔄 Round {}/{}: {} queries",
                        state.loop_count + 1,
                        profile.max_loops,
                        state.pending_queries.len()
                    );
                    let outcome = self
                        .researcher
                        .research_batch(&state.pending_queries, cancel)
                        .await?;
                    rounds.push(state.pending_queries.clone());
                    state.fold_round(outcome);
                    phase = Phase::Reflecting;
                }
                Phase::Reflecting => {
                    let verdict = cancellable(
                        cancel,
                        self.reflector.evaluate(
                            topic,
                            &state.all_results,
                            profile.reflection_model,
                            state.loop_count,
                            profile.max_loops,
                        ),
                    )
                    .await?;

                    if verdict.is_sufficient {
                        phase = Phase::Synthesizing;
                    } else {
                        follow_ups = verdict.follow_up_queries;
                        phase = Phase::Generating;
                    }
                }
                Phase::Synthesizing => {
                    answer = cancellable(
                        cancel,
                        self.synthesizer.synthesize(
                            topic,
                            &state.all_results,
                            &state.registry,
                            profile.answer_model,
                        ),
                    )
                    .await??;
                    phase = Phase::Done;
                }
                Phase::Done => break,
            }
        }

        info!(
            "🏁 Research finished in {:?}: {} rounds, {} sources registered, {} cited, {} failed queries",
            start.elapsed(),
            state.loop_count,
            state.registry.len(),
            answer.sources.len(),
            state.failures.len()
        );

        Ok(ResearchReport {
            answer,
            loop_count: state.loop_count,
            rounds,
            failures: state.failures,
            phases,
            profile,
        })
    }
}

/// Race a step against cancellation; cancellation wins ties.
async fn cancellable<F: Future>(cancel: &CancellationToken, step: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResearchError::RequestCancelled),
        output = step => Ok(output),
    }
}
