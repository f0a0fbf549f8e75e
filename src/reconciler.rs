use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::registry::Registry;
use crate::session::{Session, SessionParams};
use crate::sink::LineSink;
use crate::stream::{LogSource, StreamMode};
use crate::types::{ContainerIdentity, PodEvent};

/// Turns pod membership events into session starts and stops.
pub struct Reconciler {
    namespace: String,
    filter: Option<Regex>,
    mode: StreamMode,
    registry: Arc<Registry>,
    source: Arc<dyn LogSource>,
    sink: Arc<dyn LineSink>,
}

impl Reconciler {
    pub fn new(
        namespace: impl Into<String>,
        filter: Option<Regex>,
        mode: StreamMode,
        registry: Arc<Registry>,
        source: Arc<dyn LogSource>,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            filter,
            mode,
            registry,
            source,
            sink,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn apply(&self, event: PodEvent) {
        match event {
            PodEvent::Observed { pod, containers } => self.pod_observed(&pod, &containers).await,
            PodEvent::Removed { pod, containers } => self.pod_removed(&pod, &containers).await,
            PodEvent::Resynced { pods } => self.resync(&pods).await,
        }
    }

    fn matches(&self, container: &str) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.is_match(container))
    }

    fn identity(&self, pod: &str, container: &str) -> ContainerIdentity {
        ContainerIdentity::new(self.namespace.as_str(), pod, container)
    }

    /// Ensures a session for every matching container of `pod`.
    pub async fn pod_observed(&self, pod: &str, containers: &[String]) {
        for container in containers {
            if !self.matches(container) {
                debug!("Skipping {}/{}: name does not match filter", pod, container);
                continue;
            }
            let identity = self.identity(pod, container);
            let params = SessionParams {
                identity: identity.clone(),
                mode: self.mode,
                source: self.source.clone(),
                sink: self.sink.clone(),
            };
            self.registry
                .ensure(identity, move || Session::start(params))
                .await;
        }
    }

    /// Stops the session of every container of `pod`.
    ///
    /// The filter is deliberately not consulted: anything that was started
    /// must stay stoppable.
    pub async fn pod_removed(&self, pod: &str, containers: &[String]) {
        for container in containers {
            self.registry.remove(&self.identity(pod, container)).await;
        }
    }

    /// Stops sessions for pods that vanished while the watch was not looking.
    pub async fn resync(&self, live_pods: &HashSet<String>) {
        let stale = self
            .registry
            .retain_pods(|pod| live_pods.contains(pod))
            .await;
        if !stale.is_empty() {
            info!("Resync stopped {} sessions of vanished pods", stale.len());
        }
    }
}
