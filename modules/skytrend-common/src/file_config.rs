use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::prompts::TopicDomain;

pub const DEFAULT_CONFIG_PATH: &str = "config/skytrend.toml";

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, DB URL, credentials) stay as env vars.
/// Every section is optional; missing keys take the production defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub streams: StreamsConfig,
    pub pools: PoolsConfig,
    pub filter: FilterConfig,
    pub models: ModelsConfig,
    pub sketches: SketchesConfig,
    pub firehose: FirehoseConfig,
    pub bot: BotConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StreamsConfig {
    pub raw: String,
    pub filtered: String,
    pub max_len: u64,
    pub batch_size: usize,
    pub idle_poll_ms: u64,
    pub claim_idle_secs: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            raw: "raw".into(),
            filtered: "filtered".into(),
            max_len: 1_000_000,
            batch_size: 5,
            idle_poll_ms: 500,
            claim_idle_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoolsConfig {
    pub filter: usize,
    pub embed: usize,
    pub topics: usize,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self { filter: 4, embed: 4, topics: 4 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterConfig {
    pub labels: Vec<String>,
    pub hypothesis_template: String,
    pub multi_label: bool,
    pub threshold: f64,
    pub inference_concurrency: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            labels: vec!["Politics".into()],
            hypothesis_template: "This example is {}.".into(),
            multi_label: true,
            threshold: 0.90,
            inference_concurrency: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelsConfig {
    pub chat: String,
    pub topics: String,
    pub document_embedding: String,
    pub document_dimensions: usize,
    pub query_embedding: String,
    pub query_dimensions: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: "gpt-4o-mini".into(),
            topics: "gpt-4o-mini".into(),
            document_embedding: "text-embedding-3-small".into(),
            document_dimensions: 384,
            query_embedding: "text-embedding-3-large".into(),
            query_dimensions: 3072,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    #[default]
    Topk,
    Cms,
    Both,
}

impl Aggregator {
    pub fn uses_topk(&self) -> bool {
        matches!(self, Aggregator::Topk | Aggregator::Both)
    }

    pub fn uses_cms(&self) -> bool {
        matches!(self, Aggregator::Cms | Aggregator::Both)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SketchesConfig {
    pub bloom_capacity: u64,
    pub bloom_error_rate: f64,
    pub topk_k: usize,
    pub topk_width: usize,
    pub topk_depth: usize,
    pub topk_decay: f64,
    pub cms_width: usize,
    pub cms_depth: usize,
    pub aggregator: Aggregator,
}

impl Default for SketchesConfig {
    fn default() -> Self {
        Self {
            bloom_capacity: 1_000_000,
            bloom_error_rate: 0.01,
            topk_k: 15,
            topk_width: 3000,
            topk_depth: 10,
            topk_decay: 0.9,
            cms_width: 3000,
            cms_depth: 10,
            aggregator: Aggregator::Topk,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FirehoseConfig {
    pub url: String,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            url: "wss://jetstream2.us-east.bsky.network/subscribe?wantedCollections=app.bsky.feed.post"
                .into(),
            backoff_initial_secs: 2,
            backoff_max_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BotConfig {
    pub interval_secs: u64,
    pub mentions_limit: usize,
    pub lookback_hours: i64,
    pub max_chunk_chars: usize,
    pub cache_max_distance: f64,
    /// Handle searched for and stripped from mentions. Defaults to the login identifier.
    pub handle: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            mentions_limit: 15,
            lookback_hours: 1,
            max_chunk_chars: 300,
            cache_max_distance: 0.2,
            handle: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PromptsConfig {
    pub topic_domain: TopicDomain,
}

impl FileConfig {
    pub fn validate(&self) -> Result<()> {
        if self.streams.batch_size == 0 {
            anyhow::bail!("streams.batch_size must be at least 1");
        }
        if self.streams.max_len == 0 {
            anyhow::bail!("streams.max_len must be at least 1");
        }
        if self.filter.labels.is_empty() {
            anyhow::bail!("filter.labels must name at least one candidate label");
        }
        if !self.filter.hypothesis_template.contains("{}") {
            anyhow::bail!("filter.hypothesis_template must contain a {{}} placeholder");
        }
        if !(0.0..=1.0).contains(&self.filter.threshold) {
            anyhow::bail!("filter.threshold must be within [0, 1]");
        }
        if !(0.0..1.0).contains(&self.sketches.bloom_error_rate) || self.sketches.bloom_error_rate == 0.0 {
            anyhow::bail!("sketches.bloom_error_rate must be within (0, 1)");
        }
        if self.bot.max_chunk_chars == 0 {
            anyhow::bail!("bot.max_chunk_chars must be at least 1");
        }
        Ok(())
    }
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<FileConfig> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(FileConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.streams.max_len, 1_000_000);
        assert_eq!(config.streams.batch_size, 5);
        assert_eq!(config.pools.filter, 4);
        assert_eq!(config.filter.labels, vec!["Politics".to_string()]);
        assert_eq!(config.filter.threshold, 0.90);
        assert_eq!(config.models.document_dimensions, 384);
        assert_eq!(config.models.query_dimensions, 3072);
        assert_eq!(config.sketches.topk_k, 15);
        assert_eq!(config.bot.max_chunk_chars, 300);
        assert_eq!(config.prompts.topic_domain, TopicDomain::Ai);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [filter]
            labels = ["AI"]

            [sketches]
            aggregator = "both"

            [prompts]
            topic_domain = "politics"
            "#,
        )
        .unwrap();
        assert_eq!(config.filter.labels, vec!["AI".to_string()]);
        assert_eq!(config.filter.hypothesis_template, "This example is {}.");
        assert!(config.sketches.aggregator.uses_topk());
        assert!(config.sketches.aggregator.uses_cms());
        assert_eq!(config.prompts.topic_domain, TopicDomain::Politics);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("[streams]\nmaxlen = 5\n").is_err());
        assert!(toml::from_str::<FileConfig>("[server]\nport = 1\n").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = FileConfig::default();
        config.filter.labels.clear();
        assert!(config.validate().is_err());

        let mut config = FileConfig::default();
        config.filter.hypothesis_template = "no placeholder".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bot]\ninterval_secs = 10").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.bot.interval_secs, 10);
        assert_eq!(config.bot.mentions_limit, 15);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config_or_default(Path::new("/nonexistent/skytrend.toml")).unwrap();
        assert_eq!(config.streams.raw, "raw");
    }

    #[test]
    fn shipped_config_parses() {
        let config: FileConfig =
            toml::from_str(include_str!("../../../config/skytrend.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.bot.max_chunk_chars, 300);
        assert_eq!(config.sketches.aggregator, Aggregator::Topk);
        assert_eq!(config.prompts.topic_domain, TopicDomain::Ai);
    }
}
