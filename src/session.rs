//! One log-forwarding task per container.
//!
//! A session cycles through `Opening → Reading → Backoff → Opening` until its
//! cancellation token fires. A stream ending (container restart, API server
//! dropping the connection) is routine and only leads to a reopen; errors are
//! logged through a per-session [`ErrorThrottle`].

use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::LineSink;
use crate::stream::{LineStream, LogSource, StreamMode};
use crate::throttle::ErrorThrottle;
use crate::types::ContainerIdentity;

/// Wait after a failed attempt to open the stream.
pub const OPEN_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Wait after an open stream ends, cleanly or not.
pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Everything a session needs to run.
#[derive(Clone)]
pub struct SessionParams {
    pub identity: ContainerIdentity,
    pub mode: StreamMode,
    pub source: Arc<dyn LogSource>,
    pub sink: Arc<dyn LineSink>,
}

/// Handle to a running session task.
pub struct Session {
    identity: ContainerIdentity,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    /// Spawns the session's run loop on the current runtime.
    pub fn start(params: SessionParams) -> Self {
        let cancel = CancellationToken::new();
        let identity = params.identity.clone();
        let streamer = Streamer {
            params,
            cancel: cancel.clone(),
            errors: ErrorThrottle::default(),
        };
        info!("Starting log session for {}", identity);
        let task = tokio::spawn(streamer.run());
        Self {
            identity,
            cancel,
            task,
        }
    }

    /// Signals the run loop to exit. Nothing is forwarded after it observes
    /// the signal; a delivery already in flight is allowed to finish.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stopping log session for {}", self.identity);
            self.cancel.cancel();
        }
    }

    /// Stops the session and waits for its task to exit.
    pub async fn join(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!("Log session for {} ended abnormally: {}", self.identity, e);
        }
    }
}

enum State {
    Opening,
    Reading(LineStream),
    Backoff(Duration),
    Stopped,
}

struct Streamer {
    params: SessionParams,
    cancel: CancellationToken,
    errors: ErrorThrottle,
}

impl Streamer {
    async fn run(self) {
        let mut state = State::Opening;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            state = match state {
                State::Opening => self.open().await,
                State::Reading(stream) => self.read(stream).await,
                State::Backoff(delay) => self.backoff(delay).await,
                State::Stopped => break,
            };
        }
        debug!("Log session for {} stopped", self.params.identity);
    }

    async fn open(&self) -> State {
        let identity = &self.params.identity;
        let options = self.params.mode.options(&identity.container);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => State::Stopped,
            opened = self.params.source.open(identity, &options) => match opened {
                Ok(stream) => {
                    debug!("Opened log stream for {}", identity);
                    State::Reading(stream)
                }
                Err(e) => {
                    self.report(format_args!("log stream error for {}: {:#}", identity, e));
                    State::Backoff(OPEN_RETRY_DELAY)
                }
            },
        }
    }

    async fn read(&self, mut stream: LineStream) -> State {
        let identity = &self.params.identity;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return State::Stopped,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(line)) => {
                    self.params.sink.deliver(identity.format_line(&line)).await;
                }
                Some(Err(e)) => {
                    self.report(format_args!("read error for {}: {}", identity, e));
                    return State::Backoff(REOPEN_DELAY);
                }
                None => {
                    debug!("Log stream for {} ended, reopening", identity);
                    return State::Backoff(REOPEN_DELAY);
                }
            }
        }
    }

    async fn backoff(&self, delay: Duration) -> State {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => State::Stopped,
            _ = tokio::time::sleep(delay) => State::Opening,
        }
    }

    fn report(&self, message: std::fmt::Arguments<'_>) {
        if self.errors.should_report() {
            warn!("{}", message);
        }
    }
}
