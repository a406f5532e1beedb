//! The iterative research loop: query writing, concurrent grounded search,
//! reflection and cited answer synthesis.

pub mod controller;
pub mod effort;
pub mod prompts;
pub mod query_generator;
pub mod reflection;
pub mod researcher;
pub mod state;
pub mod synthesizer;

#[cfg(test)]
mod testing;

pub use controller::{Phase, ResearchAgent, ResearchReport};
pub use effort::{EffortLevel, EffortProfile};
pub use prompts::{PromptKind, PromptRegistry, SpecializedPrompt};
pub use query_generator::QueryGenerator;
pub use reflection::{ReflectionEvaluator, ReflectionVerdict, VerdictSource};
pub use researcher::{RoundOutcome, WebResearcher, DEFAULT_RESEARCH_TIMEOUT};
pub use state::{ResearchRequest, ResearchState};
pub use synthesizer::AnswerSynthesizer;
