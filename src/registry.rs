//! Authoritative map of running sessions.
//!
//! Every check-then-act sequence runs under the one lock, so overlapping add
//! and remove notifications can never leave two sessions for one container or
//! a session nobody can stop.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::session::Session;
use crate::types::ContainerIdentity;

#[derive(Default)]
pub struct Registry {
    sessions: Mutex<HashMap<ContainerIdentity, Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session for `identity` unless one is already running.
    ///
    /// `factory` is only invoked when no session exists. Returns whether a new
    /// session was started.
    pub async fn ensure<F>(&self, identity: ContainerIdentity, factory: F) -> bool
    where
        F: FnOnce() -> Session,
    {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&identity) {
            return false;
        }
        sessions.insert(identity, factory());
        true
    }

    /// Stops and forgets the session for `identity`. Returns whether one existed.
    pub async fn remove(&self, identity: &ContainerIdentity) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.remove(identity) {
            Some(session) => {
                session.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every session whose pod fails `keep`.
    pub async fn retain_pods<P>(&self, mut keep: P) -> Vec<ContainerIdentity>
    where
        P: FnMut(&str) -> bool,
    {
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<ContainerIdentity> = sessions
            .keys()
            .filter(|id| !keep(&id.pod))
            .cloned()
            .collect();
        for identity in &stale {
            if let Some(session) = sessions.remove(identity) {
                session.stop();
            }
        }
        stale
    }

    #[cfg(test)]
    pub async fn contains(&self, identity: &ContainerIdentity) -> bool {
        self.sessions.lock().await.contains_key(identity)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Sorted identities of all live sessions.
    #[cfg(test)]
    pub async fn identities(&self) -> Vec<ContainerIdentity> {
        let mut ids: Vec<_> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Stops every session and waits for their tasks to exit.
    pub async fn shutdown(&self) {
        let drained: Vec<Session> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        debug!("Shutting down {} log sessions", drained.len());
        for session in &drained {
            session.stop();
        }
        futures::future::join_all(drained.into_iter().map(Session::join)).await;
    }
}
