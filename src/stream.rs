use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::time::Duration;

use crate::config::ConfigError;
use crate::types::ContainerIdentity;

/// Lines read from one container's log stream, newline already stripped.
pub type LineStream = BoxStream<'static, std::io::Result<String>>;

/// How much history a session asks for each time it opens a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Full history, then follow.
    #[default]
    All,
    /// Only lines produced after the stream is opened.
    FromNow,
    /// Look back this far, then follow.
    Since(Duration),
}

impl StreamMode {
    pub fn since_secs(seconds: i64) -> Result<Self, ConfigError> {
        if seconds <= 0 {
            return Err(ConfigError::NonPositiveSince(seconds));
        }
        Ok(StreamMode::Since(Duration::from_secs(seconds as u64)))
    }

    /// Builds the options for a stream opened right now.
    pub fn options(&self, container: &str) -> StreamOptions {
        let mut options = StreamOptions {
            container: container.to_string(),
            follow: true,
            since_time: None,
            since_seconds: None,
        };
        match self {
            StreamMode::All => {}
            StreamMode::FromNow => options.since_time = Some(Utc::now()),
            StreamMode::Since(window) => options.since_seconds = Some(window.as_secs() as i64),
        }
        options
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub container: String,
    pub follow: bool,
    pub since_time: Option<DateTime<Utc>>,
    pub since_seconds: Option<i64>,
}

/// Opens log streams for containers.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn open(
        &self,
        target: &ContainerIdentity,
        options: &StreamOptions,
    ) -> anyhow::Result<LineStream>;
}
