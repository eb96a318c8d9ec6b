use conduit_protocol::{ModelTier, Provider};
use serde::{Deserialize, Serialize};

/// Fallback when neither the tier nor the global setting names a limit
pub const DEFAULT_MAX_TOKENS: u32 = 8000;

/// Main conduit configuration
///
/// Configuration is loaded from (in priority order):
/// 1. `conduit.jsonc` - JSON with comments
/// 2. `conduit.json` - Standard JSON
/// 3. `conduit.yml` / `conduit.yaml` - YAML format
///
/// Also checks hidden variants (`.conduit.*`) and `~/.config/conduit/` for global config.
///
/// # Example
///
/// ```yaml
/// primary_provider: openrouter
/// large_model_name: anthropic/claude-3.7-sonnet
/// large_model_base_url: https://openrouter.ai/api/v1
/// large_model_api_keys:
///   - ${OPENROUTER_KEY}
/// small_model_name: openai/gpt-4o-mini
/// stream: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Provider used for every query; `anthropic` selects the native path
    #[serde(default)]
    pub primary_provider: Provider,

    #[serde(default)]
    pub large_model_name: Option<String>,

    #[serde(default)]
    pub small_model_name: Option<String>,

    #[serde(default)]
    pub large_model_base_url: Option<String>,

    #[serde(default)]
    pub small_model_base_url: Option<String>,

    /// Ordered credentials for the large tier; failed ones are skipped
    #[serde(default)]
    pub large_model_api_keys: Vec<String>,

    #[serde(default)]
    pub small_model_api_keys: Vec<String>,

    #[serde(default)]
    pub large_model_max_tokens: Option<u32>,

    #[serde(default)]
    pub small_model_max_tokens: Option<u32>,

    /// Global limit used when a tier has none
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Passed through as `reasoning_effort` on OpenAI-compatible large queries
    #[serde(default)]
    pub large_model_reasoning_effort: Option<String>,

    /// Stream OpenAI-compatible responses (default: true)
    #[serde(default = "default_stream")]
    pub stream: Option<bool>,

    /// Default Vertex region when no environment override applies
    #[serde(default)]
    pub vertex_region: Option<String>,
}

fn default_stream() -> Option<bool> {
    Some(true)
}

impl GlobalConfig {
    pub fn model_name(&self, tier: ModelTier) -> Option<&str> {
        match tier {
            ModelTier::Small => self.small_model_name.as_deref(),
            ModelTier::Large => self.large_model_name.as_deref(),
        }
    }

    pub fn base_url(&self, tier: ModelTier) -> Option<&str> {
        match tier {
            ModelTier::Small => self.small_model_base_url.as_deref(),
            ModelTier::Large => self.large_model_base_url.as_deref(),
        }
    }

    pub fn api_keys(&self, tier: ModelTier) -> &[String] {
        match tier {
            ModelTier::Small => &self.small_model_api_keys,
            ModelTier::Large => &self.large_model_api_keys,
        }
    }

    /// Tier limit, then the global limit, then [`DEFAULT_MAX_TOKENS`]
    pub fn max_tokens_for(&self, tier: ModelTier) -> u32 {
        let tier_limit = match tier {
            ModelTier::Small => self.small_model_max_tokens,
            ModelTier::Large => self.large_model_max_tokens,
        };
        tier_limit.or(self.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream.unwrap_or(true)
    }

    /// Base URL for a tier, falling back to the provider default
    pub fn resolved_base_url(&self, tier: ModelTier) -> Option<String> {
        self.base_url(tier)
            .map(str::to_string)
            .or_else(|| self.primary_provider.default_base_url().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: GlobalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.primary_provider, Provider::Anthropic);
        assert!(config.stream_enabled());
        assert_eq!(config.max_tokens_for(ModelTier::Large), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_max_tokens_resolution_order() {
        let mut config = GlobalConfig {
            max_tokens: Some(4000),
            small_model_max_tokens: Some(1024),
            ..Default::default()
        };
        assert_eq!(config.max_tokens_for(ModelTier::Small), 1024);
        assert_eq!(config.max_tokens_for(ModelTier::Large), 4000);

        config.max_tokens = None;
        assert_eq!(config.max_tokens_for(ModelTier::Large), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tier_accessors() {
        let config = GlobalConfig {
            primary_provider: Provider::OpenAI,
            large_model_name: Some("gpt-4o".to_string()),
            small_model_base_url: Some("http://localhost:9999/v1".to_string()),
            large_model_api_keys: vec!["k1".to_string(), "k2".to_string()],
            ..Default::default()
        };
        assert_eq!(config.model_name(ModelTier::Large), Some("gpt-4o"));
        assert_eq!(config.model_name(ModelTier::Small), None);
        assert_eq!(config.api_keys(ModelTier::Large).len(), 2);
        assert!(config.api_keys(ModelTier::Small).is_empty());
        assert_eq!(
            config.resolved_base_url(ModelTier::Small).as_deref(),
            Some("http://localhost:9999/v1")
        );
        assert_eq!(
            config.resolved_base_url(ModelTier::Large).as_deref(),
            Some("https://api.openai.com/v1")
        );
    }
}
