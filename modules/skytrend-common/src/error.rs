use thiserror::Error;

/// Failures decoding skytrend's own data: stream entries, firehose
/// messages and config values. I/O boundaries return `anyhow::Result`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SkytrendError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Operation, Route, TopicDomain};

    #[test]
    fn decoding_failures_map_to_their_variant() {
        assert_eq!(
            "upsert".parse::<Operation>(),
            Err(SkytrendError::Parse("unknown operation 'upsert'".into()))
        );
        assert!(matches!("weather".parse::<Route>(), Err(SkytrendError::Parse(_))));
        assert_eq!(
            "sports".parse::<TopicDomain>().unwrap_err().to_string(),
            "Configuration error: unknown topic domain 'sports'"
        );
    }
}
