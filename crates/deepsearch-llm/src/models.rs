use serde::{Deserialize, Serialize};

/// Capability tier a research step asks for. Backends map tiers to concrete
/// model names so the agent never deals in provider naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheap model for routine steps (query generation, reflection, search).
    Fast,
    /// Stronger model for final synthesis.
    Strong,
    /// Highest-capability variant, used for synthesis at high effort.
    StrongHigh,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelTier::Fast => "fast",
            ModelTier::Strong => "strong",
            ModelTier::StrongHigh => "strong_high",
        };
        f.write_str(name)
    }
}

/// Concrete model names per tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub fast: String,
    pub strong: String,
    pub strong_high: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            fast: "gemini-2.5-flash-preview-05-20".to_string(),
            strong: "gemini-2.5-pro-preview-05-06".to_string(),
            strong_high: "gemini-2.5-pro-preview-05-06".to_string(),
        }
    }
}

impl ModelCatalog {
    pub fn resolve(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Strong => &self.strong,
            ModelTier::StrongHigh => &self.strong_high,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_resolves_each_tier() {
        let catalog = ModelCatalog {
            fast: "f".into(),
            strong: "s".into(),
            strong_high: "sh".into(),
        };
        assert_eq!(catalog.resolve(ModelTier::Fast), "f");
        assert_eq!(catalog.resolve(ModelTier::Strong), "s");
        assert_eq!(catalog.resolve(ModelTier::StrongHigh), "sh");
    }

    #[test]
    fn test_tier_serde_names() {
        let json = serde_json::to_string(&ModelTier::StrongHigh).unwrap();
        assert_eq!(json, "\"strong_high\"");
        assert_eq!(ModelTier::Fast.to_string(), "fast");
    }
}
