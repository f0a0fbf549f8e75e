use async_trait::async_trait;
use futures::io::{AsyncBufRead, AsyncBufReadExt};
use futures::stream::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{Config as WatcherConfig, Event, watcher};
use kube::{Api, Client, ResourceExt, api::LogParams, config};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::reconciler::Reconciler;
use crate::stream::{LineStream, LogSource, StreamOptions};
use crate::types::{ContainerIdentity, PodEvent};

/// Lines buffered between the API connection and the session reading them.
const LINE_BUFFER: usize = 256;

/// Builds a client from the in-cluster environment, falling back to kubeconfig.
pub async fn initialize_client() -> anyhow::Result<Client> {
    let config = config::Config::infer()
        .await
        .map_err(|e| anyhow::anyhow!("Cannot load cluster configuration: {}", e))?;
    let client = Client::try_from(config)?;
    Ok(client)
}

/// Opens container log streams through the pods/log subresource.
#[derive(Clone)]
pub struct KubeLogSource {
    client: Client,
}

impl KubeLogSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn open(
        &self,
        target: &ContainerIdentity,
        options: &StreamOptions,
    ) -> anyhow::Result<LineStream> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let pod = target.pod.clone();
        let params = log_params(options);
        let (opened_tx, opened_rx) = oneshot::channel();
        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);

        // The log stream borrows the Api, so it is pumped from a task that
        // owns both. The pump exits as soon as the reader is dropped.
        tokio::spawn(async move {
            let mut lines = match api.log_stream(&pod, &params).await {
                Ok(stream) => {
                    let _ = opened_tx.send(Ok(()));
                    Box::pin(lossy_lines(stream))
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = line_tx.closed() => break,
                    line = lines.next() => match line {
                        Some(line) => {
                            if line_tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        opened_rx.await??;
        Ok(ReceiverStream::new(line_rx).boxed())
    }
}

/// Splits a log body into lines without rejecting bytes that are not UTF-8.
///
/// A trailing `\r` is stripped with the newline and invalid sequences are
/// replaced, so one bad byte never turns into a read error. The stream ends
/// after the first I/O error.
pub fn lossy_lines<R>(reader: R) -> impl Stream<Item = std::io::Result<String>>
where
    R: AsyncBufRead + Unpin,
{
    futures::stream::unfold(Some((reader, Vec::new())), |state| async move {
        let Some((mut reader, mut buf)) = state else {
            return None;
        };
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), Some((reader, buf))))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

pub fn log_params(options: &StreamOptions) -> LogParams {
    LogParams {
        container: Some(options.container.clone()),
        follow: options.follow,
        since_seconds: options.since_seconds,
        since_time: options.since_time,
        ..Default::default()
    }
}

/// Init containers first, then regular containers.
pub fn pod_containers(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.init_containers
                .iter()
                .flatten()
                .chain(&spec.containers)
                .map(|c| c.name.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Maps raw watcher events onto membership changes.
///
/// Between `Init` and `InitDone` the watcher replays the full pod list; the
/// names seen there form the authoritative live set reported on `InitDone`.
#[derive(Debug, Default)]
pub struct PodEventTranslator {
    relisting: Option<HashSet<String>>,
}

impl PodEventTranslator {
    pub fn translate(&mut self, event: Event<Pod>) -> Option<PodEvent> {
        match event {
            Event::Init => {
                self.relisting = Some(HashSet::new());
                None
            }
            Event::InitApply(pod) => {
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(pod.name_any());
                }
                Some(observed(&pod))
            }
            Event::InitDone => self
                .relisting
                .take()
                .map(|pods| PodEvent::Resynced { pods }),
            Event::Apply(pod) => Some(observed(&pod)),
            Event::Delete(pod) => Some(PodEvent::Removed {
                pod: pod.name_any(),
                containers: pod_containers(&pod),
            }),
        }
    }
}

fn observed(pod: &Pod) -> PodEvent {
    PodEvent::Observed {
        pod: pod.name_any(),
        containers: pod_containers(pod),
    }
}

/// Watches pods in `namespace` and feeds every change to the reconciler.
///
/// Watch errors are retried with kube's default backoff; this only returns
/// if the underlying stream ends.
pub async fn watch_pods(
    client: Client,
    namespace: &str,
    selector: Option<&str>,
    reconciler: Arc<Reconciler>,
) {
    let pods_api: Api<Pod> = Api::namespaced(client, namespace);
    let mut cfg = WatcherConfig::default();
    if let Some(selector) = selector {
        cfg = cfg.labels(selector);
    }

    let mut stream = watcher(pods_api, cfg).default_backoff().boxed();
    let mut translator = PodEventTranslator::default();
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                match &event {
                    Event::Init => info!("Initializing pod watcher for namespace: {}", namespace),
                    Event::InitDone => info!(
                        "Pod watcher initialization complete for namespace: {}",
                        namespace
                    ),
                    Event::Delete(pod) => info!("POD DELETED: {}", pod.name_any()),
                    Event::Apply(_) | Event::InitApply(_) => {}
                }
                if let Some(pod_event) = translator.translate(event) {
                    debug!("Applying {:?}", pod_event);
                    reconciler.apply(pod_event).await;
                }
            }
            Err(e) => warn!("Pod watcher error in namespace {}: {}", namespace, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::io::Cursor;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn pod(name: &str, init: &[&str], containers: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                init_containers: if init.is_empty() {
                    None
                } else {
                    Some(init.iter().map(|n| container(n)).collect())
                },
                containers: containers.iter().map(|n| container(n)).collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_containers_lists_init_containers_first() {
        let pod = pod("web-1", &["init-a"], &["app", "sidecar-x"]);
        assert_eq!(pod_containers(&pod), vec!["init-a", "app", "sidecar-x"]);
    }

    #[test]
    fn pod_without_spec_has_no_containers() {
        assert!(pod_containers(&Pod::default()).is_empty());
    }

    #[test]
    fn apply_and_delete_become_observed_and_removed() {
        let mut translator = PodEventTranslator::default();
        assert_eq!(
            translator.translate(Event::Apply(pod("web-1", &[], &["nginx"]))),
            Some(PodEvent::Observed {
                pod: "web-1".to_string(),
                containers: vec!["nginx".to_string()],
            })
        );
        assert_eq!(
            translator.translate(Event::Delete(pod("web-1", &[], &["nginx"]))),
            Some(PodEvent::Removed {
                pod: "web-1".to_string(),
                containers: vec!["nginx".to_string()],
            })
        );
    }

    #[test]
    fn relist_reports_live_pods_on_init_done() {
        let mut translator = PodEventTranslator::default();
        assert_eq!(translator.translate(Event::Init), None);
        translator.translate(Event::InitApply(pod("a", &[], &["x"])));
        translator.translate(Event::InitApply(pod("b", &[], &["x"])));

        assert_eq!(
            translator.translate(Event::InitDone),
            Some(PodEvent::Resynced {
                pods: HashSet::from(["a".to_string(), "b".to_string()]),
            })
        );
        // A second InitDone without a fresh Init carries nothing.
        assert_eq!(translator.translate(Event::InitDone), None);
    }

    #[test]
    fn log_params_follow_stream_options() {
        let params = log_params(&StreamOptions {
            container: "nginx".to_string(),
            follow: true,
            since_time: None,
            since_seconds: Some(10),
        });
        assert_eq!(params.container.as_deref(), Some("nginx"));
        assert!(params.follow);
        assert_eq!(params.since_seconds, Some(10));
    }

    #[test]
    fn since_time_is_passed_through_without_look_back() {
        let now = Utc::now();
        let params = log_params(&StreamOptions {
            container: "nginx".to_string(),
            follow: true,
            since_time: Some(now),
            since_seconds: None,
        });
        assert_eq!(params.since_time, Some(now));
        assert_eq!(params.since_seconds, None);
        assert_eq!(params.tail_lines, None);
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_forwarded_not_failed() {
        let lines: Vec<_> = lossy_lines(Cursor::new(b"a\n\xffbin\nb\n".to_vec()))
            .collect()
            .await;
        let lines: Vec<String> = lines.into_iter().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "\u{FFFD}bin", "b"]);
    }

    #[tokio::test]
    async fn lines_drop_carriage_return_and_keep_unterminated_tail() {
        let lines: Vec<String> = lossy_lines(Cursor::new(b"one\r\ntwo\n\nlast".to_vec()))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["one", "two", "", "last"]);
    }
}
