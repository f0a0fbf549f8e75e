use std::collections::HashSet;
use std::fmt;

/// Identifies one container's log stream inside the watched namespace.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ContainerIdentity {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ContainerIdentity {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }

    /// Formats a raw log line the way the collector expects it.
    pub fn format_line(&self, line: &str) -> String {
        format!("{}/{} {}\n", self.pod, self.container, line)
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.container)
    }
}

/// Membership change derived from the pod watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    /// Pod is present; `containers` lists init containers followed by regular ones.
    Observed { pod: String, containers: Vec<String> },
    Removed { pod: String, containers: Vec<String> },
    /// A full list completed; only these pods still exist.
    Resynced { pods: HashSet<String> },
}
