//! Scripted capabilities for exercising the research loop without a network.

use crate::prompts::PromptKind;
use anyhow::Result;
use async_trait::async_trait;
use deepsearch_common::Citation;
use deepsearch_llm::{GroundedAnswer, LLMProvider, LLMResponse, Message, ModelTier, SearchProvider};
use std::sync::Mutex;
use std::time::Duration;

type LlmScript = Box<dyn Fn(PromptKind, &str) -> Result<String> + Send + Sync>;
type SearchScript = Box<dyn Fn(&str) -> Result<GroundedAnswer> + Send + Sync>;
type DelayScript = Box<dyn Fn(&str) -> Duration + Send + Sync>;

/// Identify which step produced a prompt from its fixed opening line.
pub fn classify(prompt: &str) -> PromptKind {
    if prompt.starts_with("Your goal is to generate") {
        PromptKind::QueryWriter
    } else if prompt.starts_with("You are an expert research assistant") {
        PromptKind::Reflection
    } else {
        PromptKind::Answer
    }
}

pub struct ScriptedLlm {
    script: LlmScript,
    pub calls: Mutex<Vec<(PromptKind, ModelTier, String)>>,
}

impl ScriptedLlm {
    pub fn new(script: impl Fn(PromptKind, &str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls_of(&self, kind: PromptKind) -> Vec<(ModelTier, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, tier, prompt)| (*tier, prompt.clone()))
            .collect()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn generate(&self, tier: ModelTier, prompt: &str) -> Result<LLMResponse> {
        let kind = classify(prompt);
        self.calls
            .lock()
            .unwrap()
            .push((kind, tier, prompt.to_string()));
        (self.script)(kind, prompt).map(LLMResponse::text)
    }

    async fn generate_with_context(
        &self,
        tier: ModelTier,
        messages: Vec<Message>,
    ) -> Result<LLMResponse> {
        let joined = messages
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n\n");
        self.generate(tier, &joined).await
    }
}

pub struct ScriptedSearch {
    script: SearchScript,
    delay: DelayScript,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new(script: impl Fn(&str) -> Result<GroundedAnswer> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: Box::new(|_| Duration::ZERO),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Search that answers every query with one citation derived from the query text.
    pub fn echo() -> Self {
        Self::new(|query| {
            Ok(GroundedAnswer {
                text: format!("Findings about {query}"),
                citations: vec![Citation::new(
                    format!("https://example.com/{}", query.replace(' ', "-")),
                    query.to_string(),
                )],
            })
        })
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delays(move |_| delay)
    }

    pub fn with_delays(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<GroundedAnswer> {
        self.queries.lock().unwrap().push(query.to_string());
        let delay = (self.delay)(query);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.script)(query)
    }
}

/// JSON for a query batch the way the query writer is asked to answer.
pub fn query_batch(queries: &[&str]) -> String {
    let items: Vec<_> = queries
        .iter()
        .map(|q| serde_json::json!({ "query": q, "rationale": format!("covers {q}") }))
        .collect();
    serde_json::json!({ "queries": items }).to_string()
}

pub fn verdict(is_sufficient: bool, follow_ups: &[&str]) -> String {
    serde_json::json!({
        "is_sufficient": is_sufficient,
        "knowledge_gap": if is_sufficient { "" } else { "missing details" },
        "follow_up_queries": follow_ups,
    })
    .to_string()
}
