use serde::Deserialize;

/// Model tiers available for generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Fast, cheap model for smoke runs and CI.
    Speed,
    /// Good reasoning at medium cost.
    Balanced,
    /// Best reasoning, used by default for test case work.
    Smart,
}

impl ModelTier {
    pub fn id(&self) -> &'static str {
        match self {
            ModelTier::Speed => "openai/gpt-4o-mini",
            ModelTier::Balanced => "anthropic/claude-sonnet-4.5",
            ModelTier::Smart => "openai/gpt-4",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "speed" => Some(ModelTier::Speed),
            "balanced" => Some(ModelTier::Balanced),
            "smart" => Some(ModelTier::Smart),
            _ => None,
        }
    }

    /// Advisory USD rate per 1K tokens. A simple linear table per model
    /// family; never billing-accurate and never allowed to change a
    /// success/failure outcome.
    pub fn cost_per_1k_tokens(&self) -> f64 {
        match self {
            ModelTier::Speed => 0.002,
            ModelTier::Balanced => 0.01,
            ModelTier::Smart => 0.03,
        }
    }

    pub fn estimate_cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * self.cost_per_1k_tokens()
    }
}

/// API usage metadata from the chat completions response.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parse_round_trip() {
        assert_eq!(ModelTier::parse("smart"), Some(ModelTier::Smart));
        assert_eq!(ModelTier::parse("speed"), Some(ModelTier::Speed));
        assert_eq!(ModelTier::parse("turbo"), None);
    }

    #[test]
    fn cost_table_is_linear_in_tokens() {
        assert_eq!(ModelTier::Smart.estimate_cost(1000), 0.03);
        assert_eq!(ModelTier::Speed.estimate_cost(2000), 0.004);
        assert_eq!(ModelTier::Smart.estimate_cost(0), 0.0);
    }

    #[test]
    fn usage_defaults_missing_fields_to_zero() {
        let usage: Usage = serde_json::from_str(r#"{"total_tokens": 150}"#).unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.total_tokens, 150);
    }
}
