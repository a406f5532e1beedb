use deepsearch_common::{ResearchError, Result};
use deepsearch_llm::ModelTier;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Caller-chosen dial trading cost for thoroughness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    Low,
    Medium,
    High,
}

impl FromStr for EffortLevel {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(EffortLevel::Low),
            "medium" => Ok(EffortLevel::Medium),
            "high" => Ok(EffortLevel::High),
            other => Err(ResearchError::InvalidConfiguration(format!(
                "unknown effort level '{}', expected low, medium or high",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EffortLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EffortLevel::Low => "low",
            EffortLevel::Medium => "medium",
            EffortLevel::High => "high",
        })
    }
}

/// Loop budget and model assignment resolved from an [`EffortLevel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffortProfile {
    pub initial_query_count: usize,
    pub max_loops: usize,
    pub query_model: ModelTier,
    pub reflection_model: ModelTier,
    pub answer_model: ModelTier,
}

impl EffortProfile {
    pub fn resolve(level: EffortLevel) -> Self {
        let (initial_query_count, max_loops, answer_model) = match level {
            EffortLevel::Low => (1, 1, ModelTier::Strong),
            EffortLevel::Medium => (3, 2, ModelTier::Strong),
            EffortLevel::High => (5, 3, ModelTier::StrongHigh),
        };

        Self {
            initial_query_count,
            max_loops,
            query_model: ModelTier::Fast,
            reflection_model: ModelTier::Fast,
            answer_model,
        }
    }

    /// Resolve from the wire representation; unknown levels are rejected, never defaulted.
    pub fn resolve_str(level: &str) -> Result<Self> {
        Ok(Self::resolve(level.parse()?))
    }

    /// Apply explicit budget overrides. Each must be at least 1.
    pub fn with_overrides(
        mut self,
        initial_query_count: Option<usize>,
        max_loops: Option<usize>,
    ) -> Result<Self> {
        if let Some(count) = initial_query_count {
            if count == 0 {
                return Err(ResearchError::InvalidConfiguration(
                    "initial_search_query_count must be at least 1".to_string(),
                ));
            }
            self.initial_query_count = count;
        }
        if let Some(loops) = max_loops {
            if loops == 0 {
                return Err(ResearchError::InvalidConfiguration(
                    "max_research_loops must be at least 1".to_string(),
                ));
            }
            self.max_loops = loops;
        }
        Ok(self)
    }
}
