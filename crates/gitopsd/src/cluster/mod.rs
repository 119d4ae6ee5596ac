//! The control-plane side of the sync.
//!
//! The reconciler talks to the cluster through the [`ClusterClient`] trait:
//! typed get/create/update/delete on dynamic objects, kind discovery and a
//! per-kind watch feeding identity queues. The production implementation
//! in the `kube` submodule wraps the Kubernetes API; the in-memory
//! [`fake::FakeCluster`] backs tests.

pub mod fake;
pub mod kube;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::object::{Identity, Object};

/// Verbs a kind must serve before it is reconciled.
pub const REQUIRED_VERBS: [&str; 5] = ["watch", "list", "get", "update", "delete"];

/// One watchable resource kind as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSpec {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name, e.g. `deployments`.
    pub plural: String,
    pub namespaced: bool,
    /// Verbs the server reports for the kind.
    pub verbs: Vec<String>,
}

impl KindSpec {
    /// Whether the kind serves every listed verb.
    pub fn supports(&self, verbs: &[&str]) -> bool {
        verbs
            .iter()
            .all(|verb| self.verbs.iter().any(|have| have == verb))
    }

    /// Routing key shared with loaded manifests: group plus lowercased
    /// kind. Version is deliberately absent, matching identity semantics.
    pub fn route(&self) -> (String, String) {
        (self.group.clone(), self.kind.to_lowercase())
    }
}

/// Typed access to live cluster objects.
///
/// `NotFound` is a value here, not an error: `get` returns `None` and
/// `delete` succeeds when the object is already gone. Transport failures
/// surface as [`crate::error::SyncError::Cluster`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Kinds the server can serve, with their verbs. Callers filter with
    /// [`KindSpec::supports`].
    async fn list_kinds(&self) -> Result<Vec<KindSpec>>;

    async fn get(&self, identity: &Identity) -> Result<Option<Object>>;

    async fn create(&self, object: &Object) -> Result<()>;

    async fn update(&self, object: &Object) -> Result<()>;

    /// Deletes the object; already absent is success.
    async fn delete(&self, identity: &Identity) -> Result<()>;

    /// Streams the identity of every observed object of `kind` into `tx`
    /// until `shutdown` fires. Includes the initial listing, so a fresh
    /// watch re-enqueues every existing object once.
    async fn watch(
        &self,
        kind: &KindSpec,
        tx: mpsc::Sender<Identity>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_spec(verbs: &[&str]) -> KindSpec {
        KindSpec {
            group: "extensions".to_string(),
            version: "v1beta1".to_string(),
            kind: "Deployment".to_string(),
            plural: "deployments".to_string(),
            namespaced: true,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_supports_requires_every_verb() {
        let full = kind_spec(&["watch", "list", "get", "update", "delete", "patch"]);
        assert!(full.supports(&REQUIRED_VERBS));

        let read_only = kind_spec(&["watch", "list", "get"]);
        assert!(!read_only.supports(&REQUIRED_VERBS));

        let none = kind_spec(&[]);
        assert!(!none.supports(&REQUIRED_VERBS));
    }

    #[test]
    fn test_route_ignores_version_and_case() {
        let spec = kind_spec(&["watch"]);
        assert_eq!(
            spec.route(),
            ("extensions".to_string(), "deployment".to_string())
        );
    }
}
