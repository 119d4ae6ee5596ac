//! Kubernetes-backed cluster client.
//!
//! Objects are handled dynamically: discovery resolves every servable kind
//! into an [`ApiResource`], and all reads and writes go through
//! `Api<DynamicObject>` so the process never needs compiled-in schemas.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::runtime::watcher;
use kube::Client;
use tokio::sync::{broadcast, mpsc};

use super::{ClusterClient, KindSpec};
use crate::error::{Result, SyncError};
use crate::object::{Identity, Object};

/// A [`ClusterClient`] over a live API server.
pub struct KubeClusterClient {
    client: Client,
    /// Discovery results keyed by `(group, lowercased kind)`, so identities
    /// can be resolved back to plural + scope without re-running discovery.
    kinds: RwLock<HashMap<(String, String), KindSpec>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kinds: RwLock::new(HashMap::new()),
        }
    }

    fn resolve(&self, identity: &Identity) -> (ApiResource, bool) {
        let route = (identity.group.clone(), identity.kind.to_lowercase());
        let cached = self
            .kinds
            .read()
            .expect("kind cache lock")
            .get(&route)
            .cloned();
        match cached {
            Some(spec) => {
                let gvk = GroupVersionKind::gvk(&spec.group, &spec.version, &spec.kind);
                (
                    ApiResource::from_gvk_with_plural(&gvk, &spec.plural),
                    spec.namespaced,
                )
            }
            None => {
                // Discovery has not seen the kind; fall back to the naive
                // plural guess and infer scope from the identity.
                let gvk =
                    GroupVersionKind::gvk(&identity.group, &identity.version, &identity.kind);
                (
                    ApiResource::from_gvk(&gvk),
                    !identity.namespace.is_empty(),
                )
            }
        }
    }

    fn api(&self, resource: &ApiResource, namespaced: bool, namespace: &str) -> Api<DynamicObject> {
        if namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, resource)
        } else {
            Api::all_with(self.client.clone(), resource)
        }
    }

    fn api_for(&self, identity: &Identity) -> Api<DynamicObject> {
        let (resource, namespaced) = self.resolve(identity);
        self.api(&resource, namespaced, &identity.namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_kinds(&self) -> Result<Vec<KindSpec>> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(cluster_err)?;

        let mut specs = Vec::new();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                let spec = KindSpec {
                    group: resource.group.clone(),
                    version: resource.version.clone(),
                    kind: resource.kind.clone(),
                    plural: resource.plural.clone(),
                    namespaced: capabilities.scope == Scope::Namespaced,
                    verbs: capabilities.operations.clone(),
                };
                specs.push(spec);
            }
        }

        let mut cache = self.kinds.write().expect("kind cache lock");
        cache.clear();
        for spec in &specs {
            cache.insert(spec.route(), spec.clone());
        }

        Ok(specs)
    }

    async fn get(&self, identity: &Identity) -> Result<Option<Object>> {
        let api = self.api_for(identity);
        let fetched = api.get_opt(&identity.name).await.map_err(cluster_err)?;
        match fetched {
            Some(dynamic) => Ok(Some(to_object(&dynamic)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, object: &Object) -> Result<()> {
        let api = self.api_for(&object.identity());
        let dynamic = to_dynamic(object)?;
        api.create(&PostParams::default(), &dynamic)
            .await
            .map_err(cluster_err)?;
        Ok(())
    }

    async fn update(&self, object: &Object) -> Result<()> {
        let identity = object.identity();
        let api = self.api_for(&identity);
        let dynamic = to_dynamic(object)?;
        api.replace(&identity.name, &PostParams::default(), &dynamic)
            .await
            .map_err(cluster_err)?;
        Ok(())
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        let api = self.api_for(identity);
        match api.delete(&identity.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(cluster_err(e)),
        }
    }

    async fn watch(
        &self,
        kind: &KindSpec,
        tx: mpsc::Sender<Identity>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &kind.plural);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let events = watcher(api, watcher::Config::default());
        pin_mut!(events);

        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                event = events.next() => match event {
                    None => return Ok(()),
                    Some(Ok(event)) => {
                        for dynamic in event_objects(event) {
                            let Some(identity) = observed_identity(&dynamic, kind) else {
                                continue;
                            };
                            if tx.send(identity).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    // The watcher re-establishes itself; log and keep
                    // draining.
                    Some(Err(e)) => log::warn!("watch {} failed: {e}", kind.kind),
                },
            }
        }
    }
}

fn event_objects(event: watcher::Event<DynamicObject>) -> Vec<DynamicObject> {
    match event {
        watcher::Event::Apply(dynamic)
        | watcher::Event::Delete(dynamic)
        | watcher::Event::InitApply(dynamic) => vec![dynamic],
        watcher::Event::Init | watcher::Event::InitDone => Vec::new(),
    }
}

/// Identity of a watched object. The kind spec supplies group and version;
/// unnamed objects (which the server should never send) are skipped.
fn observed_identity(dynamic: &DynamicObject, kind: &KindSpec) -> Option<Identity> {
    let name = dynamic.metadata.name.clone()?;
    let namespace = dynamic.metadata.namespace.clone().unwrap_or_default();
    Some(Identity::new(
        kind.group.clone(),
        kind.version.clone(),
        kind.kind.clone(),
        namespace,
        name,
    ))
}

fn to_object(dynamic: &DynamicObject) -> Result<Object> {
    let value = serde_json::to_value(dynamic).map_err(cluster_err)?;
    Object::from_value(value)
}

fn to_dynamic(object: &Object) -> Result<DynamicObject> {
    serde_json::from_value(object.value().clone()).map_err(cluster_err)
}

fn cluster_err(error: impl std::fmt::Display) -> SyncError {
    SyncError::Cluster(error.to_string())
}
