use anyhow::{Context, Result};
use clap::Args;
use deepsearch_agent::ResearchAgent;
use deepsearch_llm::{GeminiClient, LLMConfig, ModelCatalog};
use std::sync::Arc;
use std::time::Duration;

/// Backend and budget settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ResearchConfig {
    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used for query writing, reflection and grounded search.
    #[arg(long, env = "DEEPSEARCH_FAST_MODEL", default_value = "gemini-2.5-flash-preview-05-20")]
    pub fast_model: String,

    /// Model used for answers at low and medium effort.
    #[arg(long, env = "DEEPSEARCH_STRONG_MODEL", default_value = "gemini-2.5-pro-preview-05-06")]
    pub strong_model: String,

    /// Model used for answers at high effort.
    #[arg(
        long,
        env = "DEEPSEARCH_STRONG_HIGH_MODEL",
        default_value = "gemini-2.5-pro-preview-05-06"
    )]
    pub strong_high_model: String,

    /// Per-query deadline for a grounded search call, in seconds.
    #[arg(long, env = "DEEPSEARCH_RESEARCH_TIMEOUT_SECS", default_value_t = 60)]
    pub research_timeout_secs: u64,
}

impl ResearchConfig {
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog {
            fast: self.fast_model.clone(),
            strong: self.strong_model.clone(),
            strong_high: self.strong_high_model.clone(),
        }
    }

    pub fn research_timeout(&self) -> Duration {
        Duration::from_secs(self.research_timeout_secs.max(1))
    }

    pub fn llm_config(&self) -> Result<LLMConfig> {
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .context("GEMINI_API_KEY is not set")?;

        Ok(LLMConfig {
            api_key,
            catalog: self.catalog(),
            ..Default::default()
        })
    }

    /// Build the research agent on the Gemini backend, which serves both
    /// text generation and grounded search.
    pub fn build_agent(&self) -> Result<ResearchAgent> {
        let client = Arc::new(GeminiClient::new(self.llm_config()?)?);
        Ok(ResearchAgent::new(client.clone(), client).with_research_timeout(self.research_timeout()))
    }
}
