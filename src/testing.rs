//! In-memory stand-ins for the log source and the collector.

use async_trait::async_trait;
use futures::stream::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::sink::LineSink;
use crate::stream::{LineStream, LogSource, StreamOptions};
use crate::types::ContainerIdentity;

pub type LineSender = mpsc::Sender<std::io::Result<String>>;

/// Hands out pre-queued streams in order; fails every open once the queue is empty.
#[derive(Default)]
pub struct ScriptedSource {
    pub opens: AtomicUsize,
    streams: Mutex<VecDeque<LineStream>>,
    requests: Mutex<Vec<(ContainerIdentity, StreamOptions)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a stream for the next successful open and returns its feeding end.
    pub fn push_open(&self) -> LineSender {
        let (tx, rx) = mpsc::channel(16);
        self.streams
            .lock()
            .unwrap()
            .push_back(ReceiverStream::new(rx).boxed());
        tx
    }

    pub fn requests(&self) -> Vec<(ContainerIdentity, StreamOptions)> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_opens(&self, count: usize) {
        while self.opens.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn open(
        &self,
        target: &ContainerIdentity,
        options: &StreamOptions,
    ) -> anyhow::Result<LineStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((target.clone(), options.clone()));
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("container not found"))
    }
}

/// Collects every delivered line.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, count: usize) {
        while self.lines.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl LineSink for RecordingSink {
    async fn deliver(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

/// Counts `WARN` events emitted on the current thread.
struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Installs a thread-local subscriber counting warnings until the guard drops.
///
/// Only sees tasks polled on this thread, so use it with the current-thread runtime.
pub fn count_warnings() -> (Arc<AtomicUsize>, DefaultGuard) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(count.clone()));
    (count, tracing::subscriber::set_default(subscriber))
}
