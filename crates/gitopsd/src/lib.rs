//! Bidirectional GitOps reconciler.
//!
//! Keeps the manifests of a git repository and the live objects of a
//! Kubernetes cluster continuously consistent. An ordered rule set decides,
//! per object, which side is authoritative: `syncTo: git` mirrors cluster
//! changes into manifests, `syncTo: kubernetes` restores cluster objects
//! from manifests. Rules can narrow their reach by API group, resource
//! name, label selector and JSON-pointer path filters.

pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;
pub mod manifest;
pub mod object;
pub mod patch;
pub mod reconciler;
pub mod registry;
pub mod repo;
pub mod selector;
pub mod workspace;

pub use cluster::fake::FakeCluster;
pub use cluster::kube::KubeClusterClient;
pub use cluster::{ClusterClient, KindSpec, REQUIRED_VERBS};
pub use config::{Config, Rule, SyncTo};
pub use error::{Result, SyncError};
pub use manifest::ManifestFile;
pub use object::{Identity, Object};
pub use reconciler::Reconciler;
pub use registry::Controller;
pub use repo::{Located, Repository};
pub use selector::Selector;
pub use workspace::Workspace;
