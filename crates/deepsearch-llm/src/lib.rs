//! Language-model and grounded-search capabilities.
//!
//! The research agent only talks to the two traits defined here:
//! [`LLMProvider`] for plain text generation and [`SearchProvider`] for
//! search-backed summaries with citations. Model choice is expressed as a
//! [`ModelTier`] and only turned into a provider-specific model name by the
//! backend through its [`ModelCatalog`].

pub mod gemini;
pub mod models;

pub use gemini::GeminiClient;
pub use models::{ModelCatalog, ModelTier};

use anyhow::Result;
use async_trait::async_trait;
use deepsearch_common::Citation;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backend configuration shared by all providers
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub api_key: String,
    pub catalog: ModelCatalog,
    pub temperature: f32,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            catalog: ModelCatalog::default(),
            temperature: 1.0,
            max_retries: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl LLMResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            usage: None,
        }
    }
}

/// Summary text backed by the sources the search returned
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Text-generation capability: given a prompt and a model tier, return text.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, tier: ModelTier, prompt: &str) -> Result<LLMResponse>;

    async fn generate_with_context(
        &self,
        tier: ModelTier,
        messages: Vec<Message>,
    ) -> Result<LLMResponse>;
}

/// Grounded-search capability: run one query, return a summary plus citations.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<GroundedAnswer>;
}

/// Strip the markdown code fences models like to wrap JSON in.
pub fn strip_json_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
