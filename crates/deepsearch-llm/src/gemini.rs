use crate::{
    GroundedAnswer, LLMConfig, LLMProvider, LLMResponse, Message, ModelCatalog, ModelTier, Role,
    SearchProvider, Usage,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use deepsearch_common::Citation;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiClient {
    api_key: String,
    api_base: String,
    catalog: ModelCatalog,
    temperature: f32,
    client: reqwest::Client,
    max_retries: u32,
    base_delay: Duration,
}

/// Failure of a single HTTP attempt, split by whether a retry can help.
enum CallError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl GeminiClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("Gemini API key is required");
        }

        Ok(Self {
            api_key: config.api_key,
            api_base: API_BASE.to_string(),
            catalog: config.catalog,
            temperature: config.temperature,
            client: reqwest::Client::new(),
            max_retries: config.max_retries,
            base_delay: config.base_delay,
        })
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable not set")?;

        Self::new(LLMConfig {
            api_key,
            ..Default::default()
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn generate_jitter(&self) -> Duration {
        Duration::from_millis(rand::rng().random_range(0..1000))
    }

    /// Exponential backoff: base_delay * 2^(attempt-1)
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    async fn call_api(&self, model: &str, request_body: &Value) -> Result<Value> {
        // Key goes in a header, never in the URL.
        let url = format!("{}/{}:generateContent", self.api_base, model);

        debug!("Calling Gemini API with model: {}", model);

        let mut attempt = 0;

        loop {
            let start_time = Instant::now();

            match self.perform_api_call(&url, request_body).await {
                Ok(response) => {
                    info!(
                        "Gemini API call successful on attempt {} (took {:?})",
                        attempt + 1,
                        start_time.elapsed()
                    );
                    return Ok(response);
                }
                Err(CallError::Fatal(e)) => {
                    error!("Gemini API call failed with non-retryable error: {}", e);
                    return Err(e);
                }
                Err(CallError::Retryable(e)) => {
                    attempt += 1;
                    warn!("Gemini API call failed on attempt {}: {}", attempt, e);

                    if attempt > self.max_retries {
                        error!("All {} retry attempts failed for Gemini API", self.max_retries);
                        return Err(e);
                    }

                    let jitter = self.generate_jitter();
                    let total_delay = self.backoff_delay(attempt) + jitter;

                    warn!(
                        "Retrying in {:?} (attempt {}/{}, jitter: {:?})",
                        total_delay, attempt, self.max_retries, jitter
                    );
                    sleep(total_delay).await;
                }
            }
        }
    }

    async fn perform_api_call(
        &self,
        url: &str,
        request_body: &Value,
    ) -> std::result::Result<Value, CallError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request_body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send request to Gemini API")
            .map_err(CallError::Retryable)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("Gemini API error ({}): {}", status, error_text);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                CallError::Retryable(err)
            } else {
                CallError::Fatal(err)
            });
        }

        response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to parse Gemini API response")
            .map_err(CallError::Fatal)
    }

    fn contents_from_messages(messages: Vec<Message>) -> (Option<String>, Vec<Value>) {
        let mut system = Vec::new();
        let mut contents = Vec::new();

        for message in messages {
            let role = match message.role {
                Role::System => {
                    system.push(message.content);
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "model",
            };

            contents.push(json!({
                "role": role,
                "parts": [{ "text": message.content }]
            }));
        }

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, contents)
    }

    fn build_request(&self, messages: Vec<Message>, grounded: bool) -> Value {
        let (system, contents) = Self::contents_from_messages(messages);

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.temperature,
                "topK": 40,
                "topP": 0.95,
            }
        });

        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if grounded {
            body["tools"] = json!([{ "google_search": {} }]);
        }

        body
    }
}

/// Concatenate the text parts of the first candidate.
pub(crate) fn extract_text(response: &Value) -> Result<String> {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .context("Failed to extract text from Gemini response")?;

    Ok(parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join(""))
}

/// Web grounding chunks of the first candidate, in the order returned.
pub(crate) fn extract_citations(response: &Value) -> Vec<Citation> {
    let Some(chunks) = response["candidates"][0]["groundingMetadata"]["groundingChunks"].as_array()
    else {
        return Vec::new();
    };

    chunks
        .iter()
        .filter_map(|chunk| {
            let web = &chunk["web"];
            let url = web["uri"].as_str()?;
            let title = web["title"].as_str().unwrap_or(url);
            Some(Citation::new(url, title))
        })
        .collect()
}

pub(crate) fn extract_usage(response: &Value) -> Option<Usage> {
    let meta = response["usageMetadata"].as_object()?;
    let count = |key: &str| meta.get(key).and_then(Value::as_u64).unwrap_or(0) as usize;
    Some(Usage {
        prompt_tokens: count("promptTokenCount"),
        completion_tokens: count("candidatesTokenCount"),
        total_tokens: count("totalTokenCount"),
    })
}

fn search_instruction(query: &str) -> String {
    format!(
        "Conduct targeted Google Searches to gather the most recent, credible information on \
\"{}\" and synthesize it into a verifiable text artifact.\n\n\
Instructions:\n\
- Consolidate key findings while meticulously tracking the source(s) for each specific piece of information.\n\
- Only include information found in the search results, don't make up any information.\n\
- The output should be a well-written summary based on your search findings.",
        query
    )
}

#[async_trait]
impl LLMProvider for GeminiClient {
    async fn generate(&self, tier: ModelTier, prompt: &str) -> Result<LLMResponse> {
        self.generate_with_context(tier, vec![Message::user(prompt)])
            .await
    }

    async fn generate_with_context(
        &self,
        tier: ModelTier,
        messages: Vec<Message>,
    ) -> Result<LLMResponse> {
        let model = self.catalog.resolve(tier);
        info!("Generating response with Gemini ({} tier: {})", tier, model);

        let body = self.build_request(messages, false);
        let response = self.call_api(model, &body).await?;

        Ok(LLMResponse {
            content: extract_text(&response)?,
            finish_reason: response["candidates"][0]["finishReason"]
                .as_str()
                .map(str::to_string),
            usage: extract_usage(&response),
        })
    }
}

#[async_trait]
impl SearchProvider for GeminiClient {
    async fn search(&self, query: &str) -> Result<GroundedAnswer> {
        let model = self.catalog.resolve(ModelTier::Fast);
        info!("Grounded search with Gemini ({}): '{}'", model, query);

        let body = self.build_request(vec![Message::user(search_instruction(query))], true);
        let response = self.call_api(model, &body).await?;

        Ok(GroundedAnswer {
            text: extract_text(&response)?,
            citations: extract_citations(&response),
        })
    }
}
