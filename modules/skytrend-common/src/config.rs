use anyhow::{Context, Result};

pub const DEFAULT_BLUESKY_HOST: &str = "https://bsky.social";

/// Application configuration loaded from environment variables.
/// Contains only secrets and env-specific values; streams, pools, models,
/// sketch parameters and prompts live in the TOML FileConfig.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database (absent means the in-process memory backend)
    pub database_url: Option<String>,

    // AI / LLM
    pub openai_api_key: Option<String>,
    pub llm_base_url: Option<String>,

    // Zero-shot inference endpoint
    pub nli_url: Option<String>,

    // Bluesky
    pub bluesky_identifier: Option<String>,
    pub bluesky_password: Option<String>,
    pub bluesky_host: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            database_url: get("DATABASE_URL"),
            openai_api_key: get("OPENAI_API_KEY"),
            llm_base_url: get("LLM_BASE_URL"),
            nli_url: get("NLI_URL"),
            bluesky_identifier: get("BLUESKY_IDENTIFIER"),
            bluesky_password: get("BLUESKY_PASSWORD"),
            bluesky_host: get("BLUESKY_HOST")
                .unwrap_or_else(|| DEFAULT_BLUESKY_HOST.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        // A custom base URL (Ollama and friends) does not need a key.
        if config.openai_api_key.is_none() && config.llm_base_url.is_none() {
            anyhow::bail!("OPENAI_API_KEY must be set unless LLM_BASE_URL points at a keyless provider");
        }

        Ok(config)
    }

    pub fn api_key(&self) -> &str {
        self.openai_api_key.as_deref().unwrap_or_default()
    }

    pub fn require_nli_url(&self) -> Result<&str> {
        self.nli_url.as_deref().context("NLI_URL must be set to run the filter stage")
    }

    pub fn require_bluesky(&self) -> Result<(&str, &str)> {
        let identifier = self
            .bluesky_identifier
            .as_deref()
            .context("BLUESKY_IDENTIFIER must be set to run the bot")?;
        let password = self
            .bluesky_password
            .as_deref()
            .context("BLUESKY_PASSWORD must be set to run the bot")?;
        Ok((identifier, password))
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview_opt(&self.database_url));
        tracing::info!("  OPENAI_API_KEY: {}", preview_opt(&self.openai_api_key));
        tracing::info!("  LLM_BASE_URL: {}", self.llm_base_url.as_deref().unwrap_or("<not set>"));
        tracing::info!("  NLI_URL: {}", self.nli_url.as_deref().unwrap_or("<not set>"));
        tracing::info!("  BLUESKY_IDENTIFIER: {}", preview_opt(&self.bluesky_identifier));
        tracing::info!("  BLUESKY_PASSWORD: {}", preview_opt(&self.bluesky_password));
        tracing::info!("  BLUESKY_HOST: {}", self.bluesky_host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn minimal_env_uses_memory_backend() {
        let config = AppConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.api_key(), "sk-test");
        assert_eq!(config.bluesky_host, DEFAULT_BLUESKY_HOST);
    }

    #[test]
    fn key_or_base_url_required() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
        let config =
            AppConfig::from_lookup(lookup(&[("LLM_BASE_URL", "http://localhost:11434/v1")])).unwrap();
        assert_eq!(config.api_key(), "");
    }

    #[test]
    fn blank_values_are_unset() {
        let config = AppConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk"),
            ("DATABASE_URL", "  "),
            ("BLUESKY_HOST", "https://example.social/"),
        ]))
        .unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.bluesky_host, "https://example.social");
        assert!(config.require_bluesky().is_err());
        assert!(config.require_nli_url().is_err());
    }
}
