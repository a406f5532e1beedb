use serde::{Deserialize, Serialize};

/// A single search query plus the reason it was chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub query: String,
    #[serde(default)]
    pub rationale: String,
}

impl Query {
    pub fn new(query: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            rationale: rationale.into(),
        }
    }

    /// Key used for duplicate detection: trimmed and lowercased.
    pub fn dedup_key(&self) -> String {
        self.query.trim().to_lowercase()
    }
}

/// Raw source reference returned by a grounded search call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

impl Citation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Output of one web-research execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub query: Query,
    pub summary: String,
    pub citations: Vec<Citation>,
}

impl ResearchResult {
    /// Degraded result recorded for a failed or timed-out query.
    pub fn empty(query: Query) -> Self {
        Self {
            query,
            summary: String::new(),
            citations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.citations.is_empty()
    }
}

/// Compact per-session identifier for a source.
pub type ShortId = u32;

/// Canonical, deduplicated source entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub short_id: ShortId,
}

impl SourceRecord {
    /// Inline citation marker for this source, e.g. `[3]`.
    pub fn label(&self) -> String {
        format!("[{}]", self.short_id)
    }
}

/// Terminal artifact of a research request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    /// Sources actually cited in `text`, in first-reference order.
    pub sources: Vec<SourceRecord>,
}

impl FinalAnswer {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Error taxonomy for research requests
#[derive(thiserror::Error, Debug)]
pub enum ResearchError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Research failed for query '{query}': {reason}")]
    PartialResearchFailure { query: String, reason: String },

    #[error("Reflection reported insufficient research without follow-up queries")]
    ReflectionStallGuard,

    #[error("Answer cites unknown source ids: {0:?}")]
    CitationIntegrity(Vec<ShortId>),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl ResearchError {
    /// Only these kinds ever reach the caller; everything else is absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResearchError::InvalidConfiguration(_) | ResearchError::RequestCancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, ResearchError>;
