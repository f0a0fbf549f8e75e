use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::throttle::ErrorThrottle;

/// Upper bound on a single delivery, connect through response.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for formatted log lines.
///
/// Delivery is best effort: implementations swallow their own failures so a
/// slow or unreachable destination never fails the caller.
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn deliver(&self, line: String);
}

/// POSTs every line as its own request body to a remote collector.
pub struct HttpSink {
    url: String,
    client: reqwest::Client,
    errors: ErrorThrottle,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            errors: ErrorThrottle::default(),
        })
    }

    fn report(&self, message: std::fmt::Arguments<'_>) {
        if self.errors.should_report() {
            warn!("Failed to deliver log line to {}: {}", self.url, message);
        }
    }
}

#[async_trait]
impl LineSink for HttpSink {
    async fn deliver(&self, line: String) {
        let response = match self.client.post(&self.url).body(line).send().await {
            Ok(response) => response,
            Err(e) => {
                self.report(format_args!("{}", e));
                return;
            }
        };

        let status = response.status();
        // Drain the body so the connection goes back to the pool.
        let drained = response.bytes().await;
        if !status.is_success() {
            self.report(format_args!("collector responded with {}", status));
        } else if let Err(e) = drained {
            self.report(format_args!("{}", e));
        }
    }
}
