//! Reconciler configuration and rule matching.
//!
//! A [`Config`] names the repository to track plus an ordered list of
//! [`Rule`]s. Each rule is a matcher (API groups, resource names, label
//! selector, path filters) and a sync direction; the first rule whose
//! matcher accepts an object decides which side is authoritative for it.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::object::Object;
use crate::patch;
use crate::selector::Selector;

/// Which side of the sync is the write target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTo {
    /// The repository is authoritative; changes flow into the cluster.
    Kubernetes,
    /// The cluster is authoritative; changes flow into the repository.
    Git,
}

impl fmt::Display for SyncTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTo::Kubernetes => write!(f, "kubernetes"),
            SyncTo::Git => write!(f, "git"),
        }
    }
}

/// Decides whether an object should be synced, and in which direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// API groups to match. Empty matches every group.
    #[serde(default)]
    pub api_groups: Vec<String>,

    /// Resource names to match, compared after lowercasing and
    /// singularizing. Empty matches every resource.
    #[serde(default)]
    pub resources: Vec<String>,

    /// Label selector. Empty matches any labels.
    #[serde(default)]
    pub labels: String,

    /// JSON-pointer prefixes changes are restricted to (e.g.
    /// `/metadata/annotations`). Empty admits every path.
    #[serde(default)]
    pub filters: Vec<String>,

    /// The sync direction this rule applies.
    pub sync_to: SyncTo,
}

impl Rule {
    /// Resource names lowercased and singularized for comparison against
    /// object kinds.
    pub fn normalized_resources(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|resource| singularize(&resource.to_lowercase()))
            .collect()
    }

    /// Checks the rule against both projections of an object.
    ///
    /// With `type_only` the decision uses only the resource and group
    /// lists. The full check adds:
    /// - the filter check: when both projections exist and the rule has
    ///   filters, some diff operation must fall under some filter (a
    ///   missing projection means create or delete, which always passes);
    /// - the label check: the consulted projection depends on the
    ///   direction: the repository side for `syncTo: kubernetes`, the
    ///   cluster side for `syncTo: git`. A missing projection fails.
    ///
    /// A selector that fails to parse makes the rule non-matching.
    pub fn matches(
        &self,
        cluster_state: Option<&Object>,
        repo_state: Option<&Object>,
        type_only: bool,
    ) -> bool {
        let Some(subject) = cluster_state.or(repo_state) else {
            return false;
        };

        let kind = subject.kind().to_lowercase();
        if !contains_or_empty(&self.normalized_resources(), &kind) {
            return false;
        }
        if !contains_or_empty(&self.api_groups, subject.group()) {
            return false;
        }

        if type_only {
            return true;
        }

        if let (Some(cluster), Some(repo)) = (cluster_state, repo_state) {
            if !self.filters.is_empty() {
                let diff = patch::diff(repo.value(), cluster.value());
                if !patch::any_operation_matches(&diff, &self.filters) {
                    return false;
                }
            }
        }

        if !self.labels.is_empty() {
            let selector = match Selector::parse(&self.labels) {
                Ok(selector) => selector,
                Err(e) => {
                    log::warn!("skipping rule with bad selector: {e}");
                    return false;
                }
            };
            let labeled = match self.sync_to {
                SyncTo::Kubernetes => repo_state,
                SyncTo::Git => cluster_state,
            };
            match labeled {
                Some(object) => {
                    if !selector.matches(&object.labels()) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        true
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// URL of the git repository to clone. Empty means an empty in-memory
    /// repository with no remote.
    #[serde(default)]
    pub git_url: String,

    /// Subdirectory of the repository treated as the manifest root.
    #[serde(default = "default_git_path")]
    pub git_path: String,

    /// Branch to track.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Seconds between repository resyncs.
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Rules in priority order; the first match wins.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_git_path() -> String {
    ".".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_sync_interval() -> u64 {
    30
}

impl Config {
    /// Loads the configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Returns the first rule matching the object, or `None`.
    pub fn rule_for(
        &self,
        cluster_state: Option<&Object>,
        repo_state: Option<&Object>,
        type_only: bool,
    ) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(cluster_state, repo_state, type_only))
    }
}

fn contains_or_empty(list: &[String], key: &str) -> bool {
    list.is_empty() || list.iter().any(|item| item == key)
}

/// Reduces a lowercased English resource plural to its singular form,
/// covering the plural shapes Kubernetes resource names use.
fn singularize(resource: &str) -> String {
    if let Some(stem) = resource.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["ses", "xes", "zes", "ches", "shes"] {
        if resource.ends_with(suffix) {
            return resource[..resource.len() - 2].to_string();
        }
    }
    if resource.ends_with('s') && !resource.ends_with("ss") {
        return resource[..resource.len() - 1].to_string();
    }
    resource.to_string()
}
