//! The reconcile step.
//!
//! One call to [`Reconciler::reconcile`] settles one identity: both
//! projections are re-read, a rule decides which side is authoritative,
//! and the other side is brought into agreement. Steps are independent;
//! there is no cross-identity state, so racing inputs only cost an extra
//! pass.

use std::sync::Arc;

use crate::cluster::ClusterClient;
use crate::codec;
use crate::config::{Config, Rule, SyncTo};
use crate::error::Result;
use crate::object::{Identity, Object};
use crate::patch;
use crate::repo::{Located, Repository};

pub struct Reconciler {
    cluster: Arc<dyn ClusterClient>,
    repo: Arc<Repository>,
    config: Arc<Config>,
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        repo: Arc<Repository>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            cluster,
            repo,
            config,
        }
    }

    /// Brings both projections of `identity` into agreement.
    ///
    /// The flow:
    /// 1. fetch the cluster projection (`NotFound` is a value);
    /// 2. fetch the repository projection;
    /// 3. nothing anywhere: done;
    /// 4. select the first rule by identity (a rule still applies when one
    ///    side is absent);
    /// 5. no rule: done;
    /// 6. both present and no difference: converged;
    /// 7. the selected rule must also pass the full match (filters,
    ///    labels) or the step skips;
    /// 8. dispatch on the rule's direction.
    pub async fn reconcile(&self, identity: &Identity) -> Result<()> {
        let fetched = self.cluster.get(identity).await?;
        let repo_state = self.repo.find(identity).await?;

        // Server-populated metadata never appears in manifests, so it is
        // diffed and matched in canonical form too; otherwise uid and
        // friends would read as perpetual drift. The live resourceVersion
        // is kept aside for updates.
        let live_resource_version = fetched.as_ref().and_then(Object::resource_version);
        let cluster_state = fetched.map(|mut object| {
            codec::strip_server_metadata(&mut object);
            object
        });

        if cluster_state.is_none() && repo_state.is_none() {
            return Ok(());
        }

        let repo_object = repo_state.as_ref().map(|located| &located.object);
        let Some(rule) = self
            .config
            .rule_for(cluster_state.as_ref(), repo_object, true)
        else {
            return Ok(());
        };

        if let (Some(cluster), Some(repo)) = (cluster_state.as_ref(), repo_object) {
            if patch::diff(cluster.value(), repo.value()).0.is_empty() {
                return Ok(());
            }
        }

        if !rule.matches(cluster_state.as_ref(), repo_object, false) {
            return Ok(());
        }

        log::info!(
            "syncing kind={} name={} namespace={} syncTo={}",
            identity.kind,
            identity.name,
            identity.namespace,
            rule.sync_to
        );

        match rule.sync_to {
            SyncTo::Git => {
                self.sync_to_repository(cluster_state.as_ref(), repo_state.as_ref(), rule)
                    .await
            }
            SyncTo::Kubernetes => {
                self.sync_to_cluster(
                    cluster_state.as_ref(),
                    repo_state.as_ref(),
                    rule,
                    live_resource_version,
                )
                .await
            }
        }
    }

    /// The cluster is authoritative: mirror it into the repository.
    async fn sync_to_repository(
        &self,
        cluster_state: Option<&Object>,
        repo_state: Option<&Located>,
        rule: &Rule,
    ) -> Result<()> {
        match cluster_state {
            None => {
                let Some(located) = repo_state else {
                    return Ok(());
                };
                log::info!("removing {} from repository", located.object.identity());
                self.repo.delete(located).await
            }
            Some(cluster) => {
                let desired = match repo_state {
                    // Updates move only the filtered changes onto the
                    // repository copy; creations take the object whole.
                    Some(located) => {
                        patch::patch_object(&located.object, cluster, &rule.filters)?
                    }
                    None => cluster.clone(),
                };
                self.repo.upsert(&desired).await
            }
        }
    }

    /// The repository is authoritative: mirror it into the cluster.
    async fn sync_to_cluster(
        &self,
        cluster_state: Option<&Object>,
        repo_state: Option<&Located>,
        rule: &Rule,
        live_resource_version: Option<String>,
    ) -> Result<()> {
        match (cluster_state, repo_state) {
            (None, None) => Ok(()),
            (Some(cluster), None) => {
                let identity = cluster.identity();
                log::info!("deleting {identity} not in repository");
                self.cluster.delete(&identity).await
            }
            (None, Some(located)) => {
                log::info!("recreating {} from repository", located.object.identity());
                self.cluster.create(&located.object).await
            }
            (Some(cluster), Some(located)) => {
                log::info!("restoring {} to repository state", cluster.identity());
                let mut desired = patch::patch_object(cluster, &located.object, &rule.filters)?;
                desired.set_resource_version(live_resource_version);
                self.cluster.update(&desired).await
            }
        }
    }
}
