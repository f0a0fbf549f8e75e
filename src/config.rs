use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::cli::Cli;
use crate::stream::StreamMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("namespace must be specified (--namespace or TARGET_NAMESPACE)")]
    MissingNamespace,
    #[error("remote URL must be specified (--remote-url or REMOTE_URL)")]
    MissingRemoteUrl,
    #[error("invalid remote URL '{url}': {reason}")]
    InvalidRemoteUrl { url: String, reason: String },
    #[error("invalid container regex '{pattern}': {source}")]
    InvalidContainerRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("mode 'since' requires --since-seconds")]
    MissingSinceSeconds,
    #[error("since seconds must be positive, got {0}")]
    NonPositiveSince(i64),
}

/// Validated agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub remote_url: String,
    pub selector: Option<String>,
    pub container_filter: Option<Regex>,
    pub mode: StreamMode,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let namespace = non_empty(&cli.namespace).ok_or(ConfigError::MissingNamespace)?;
        let remote_url = non_empty(&cli.remote_url).ok_or(ConfigError::MissingRemoteUrl)?;
        validate_url(remote_url)?;

        let container_filter = non_empty(&cli.container_regex)
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidContainerRegex {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()?;

        Ok(Self {
            namespace: namespace.to_string(),
            remote_url: remote_url.to_string(),
            selector: non_empty(&cli.selector).map(str::to_string),
            container_filter,
            mode: parse_mode(&cli.mode, cli.since_seconds)?,
        })
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRemoteUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

/// Unknown modes fall back to full history.
pub fn parse_mode(mode: &str, since_seconds: Option<i64>) -> Result<StreamMode, ConfigError> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "" | "all" => Ok(StreamMode::All),
        "real" => Ok(StreamMode::FromNow),
        "since" => StreamMode::since_secs(since_seconds.ok_or(ConfigError::MissingSinceSeconds)?),
        other => {
            warn!("Unsupported stream mode '{}', streaming full history", other);
            Ok(StreamMode::All)
        }
    }
}
