use async_trait::async_trait;
use deepsearch_agent::{EffortLevel, ResearchAgent, ResearchRequest};
use deepsearch_common::{FinalAnswer, ResearchError, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const DEEP_SEARCH_TOOL: &str = "deep_search";
const NO_ANSWER: &str = "No answer generated.";

/// A named operation callable over the tool protocol.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the accepted arguments.
    fn input_schema(&self) -> Value;
    async fn call(&self, arguments: Value, cancel: CancellationToken) -> Result<Value>;
}

/// Explicit name → tool mapping, populated at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions in name order, as `(name, description, schema)`.
    pub fn definitions(&self) -> Vec<(String, String, Value)> {
        self.tools
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string(), t.input_schema()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct DeepSearchArgs {
    query: String,
    #[serde(default = "default_effort")]
    effort: String,
    #[serde(default)]
    initial_search_query_count: Option<usize>,
    #[serde(default)]
    max_research_loops: Option<usize>,
}

fn default_effort() -> String {
    "low".to_string()
}

/// The research loop exposed as a tool.
pub struct DeepSearchTool {
    agent: Arc<ResearchAgent>,
}

impl DeepSearchTool {
    pub fn new(agent: Arc<ResearchAgent>) -> Self {
        Self { agent }
    }

    /// Decode wire arguments. Malformed input is a configuration error.
    pub fn parse_request(arguments: Value) -> Result<ResearchRequest> {
        let args: DeepSearchArgs = serde_json::from_value(arguments).map_err(|e| {
            ResearchError::InvalidConfiguration(format!("invalid deep_search arguments: {}", e))
        })?;
        let effort: EffortLevel = args.effort.parse()?;

        Ok(ResearchRequest::new(args.query, effort)
            .with_overrides(args.initial_search_query_count, args.max_research_loops))
    }
}

#[async_trait]
impl Tool for DeepSearchTool {
    fn name(&self) -> &str {
        DEEP_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Perform a deep search on a given query using an iterative web research agent. \
         Returns an answer with inline [n] citations and the list of sources it cites."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The research question or topic to investigate"
                },
                "effort": {
                    "type": "string",
                    "enum": ["low", "medium", "high"],
                    "default": "low",
                    "description": "Search effort"
                },
                "initial_search_query_count": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Override the number of queries in the first round"
                },
                "max_research_loops": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Override the maximum number of research rounds"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value, cancel: CancellationToken) -> Result<Value> {
        let request = Self::parse_request(arguments)?;
        let span = info_span!(
            "deep_search",
            request_id = %Uuid::new_v4(),
            effort = %request.effort
        );

        let report = self.agent.run(&request, &cancel).instrument(span).await?;
        info!(
            "deep_search done after {} rounds with {} sources",
            report.loop_count,
            report.answer.sources.len()
        );
        Ok(answer_payload(&report.answer))
    }
}

/// Wire shape of a finished answer: `{answer, sources: [{id, label, title, url}]}`.
pub fn answer_payload(answer: &FinalAnswer) -> Value {
    let text = if answer.is_empty() {
        NO_ANSWER
    } else {
        answer.text.as_str()
    };
    let sources: Vec<Value> = answer
        .sources
        .iter()
        .map(|s| {
            json!({
                "id": s.short_id,
                "label": s.label(),
                "title": s.title,
                "url": s.url,
            })
        })
        .collect();

    json!({ "answer": text, "sources": sources })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use deepsearch_common::{Citation, SourceRecord};
    use deepsearch_llm::{GroundedAnswer, LLMProvider, LLMResponse, Message, ModelTier, SearchProvider};

    /// Writes one query per batch and answers citing the first source.
    pub(crate) struct CannedLlm;

    #[async_trait]
    impl LLMProvider for CannedLlm {
        async fn generate(&self, _tier: ModelTier, prompt: &str) -> anyhow::Result<LLMResponse> {
            if prompt.starts_with("Your goal is to generate") {
                Ok(LLMResponse::text(
                    r#"{"queries": [{"query": "canned query", "rationale": "r"}]}"#,
                ))
            } else if prompt.starts_with("You are an expert research assistant") {
                Ok(LLMResponse::text(r#"{"is_sufficient": true}"#))
            } else {
                Ok(LLMResponse::text("Canned answer [1]."))
            }
        }

        async fn generate_with_context(
            &self,
            tier: ModelTier,
            messages: Vec<Message>,
        ) -> anyhow::Result<LLMResponse> {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.generate(tier, &prompt).await
        }
    }

    pub(crate) struct CannedSearch;

    #[async_trait]
    impl SearchProvider for CannedSearch {
        async fn search(&self, query: &str) -> anyhow::Result<GroundedAnswer> {
            Ok(GroundedAnswer {
                text: format!("Findings about {query}"),
                citations: vec![Citation::new("https://example.com/canned", "Canned source")],
            })
        }
    }

    pub(crate) fn canned_registry() -> ToolRegistry {
        let agent = Arc::new(ResearchAgent::new(Arc::new(CannedLlm), Arc::new(CannedSearch)));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DeepSearchTool::new(agent)));
        registry
    }

    #[test]
    fn test_parse_request_defaults_to_low() {
        let request = DeepSearchTool::parse_request(json!({"query": "What is X?"})).unwrap();
        assert_eq!(request.effort, EffortLevel::Low);
        assert!(request.initial_query_count.is_none());

        let request = DeepSearchTool::parse_request(json!({
            "query": "q",
            "effort": "high",
            "max_research_loops": 2
        }))
        .unwrap();
        assert_eq!(request.effort, EffortLevel::High);
        assert_eq!(request.max_loops, Some(2));
    }

    #[test]
    fn test_parse_request_rejects_bad_input() {
        for args in [
            json!({"effort": "low"}),
            json!({"query": "q", "effort": "extreme"}),
            json!({"query": "q", "effort": "High"}),
            json!({"query": "q", "initial_search_query_count": -1}),
        ] {
            assert!(matches!(
                DeepSearchTool::parse_request(args),
                Err(ResearchError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_empty_answer_payload() {
        let payload = answer_payload(&FinalAnswer::default());
        assert_eq!(payload["answer"], NO_ANSWER);
        assert_eq!(payload["sources"], json!([]));
    }

    #[test]
    fn test_payload_sources_carry_labels() {
        let answer = FinalAnswer {
            text: "Fact [2].".into(),
            sources: vec![SourceRecord {
                url: "https://a.example".into(),
                title: "A".into(),
                short_id: 2,
            }],
        };
        let payload = answer_payload(&answer);
        assert_eq!(
            payload["sources"][0],
            json!({"id": 2, "label": "[2]", "title": "A", "url": "https://a.example"})
        );
    }

    #[tokio::test]
    async fn test_registry_runs_deep_search() {
        let registry = canned_registry();
        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].0, DEEP_SEARCH_TOOL);
        assert_eq!(definitions[0].2["required"], json!(["query"]));

        let tool = registry.get(DEEP_SEARCH_TOOL).unwrap();
        let payload = tool
            .call(json!({"query": "What is X?"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload["answer"], "Canned answer [1].");
        assert_eq!(payload["sources"][0]["url"], "https://example.com/canned");
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let tool = canned_registry().get(DEEP_SEARCH_TOOL).unwrap();
        let err = tool
            .call(json!({"query": "  "}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ResearchError::InvalidConfiguration(_)));
    }
}
