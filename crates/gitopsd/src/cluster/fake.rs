//! In-memory cluster for tests and offline runs.
//!
//! Mirrors the behavior the reconciler relies on: identity-keyed storage,
//! `None` for missing objects, delete-of-missing as success, and a watch
//! that replays the current state before streaming subsequent mutations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{ClusterClient, KindSpec};
use crate::error::Result;
use crate::object::{Identity, Object};

/// Storage key with identity-matching semantics (version dropped, kind
/// lowercased).
fn key(identity: &Identity) -> (String, String, String, String) {
    (
        identity.group.clone(),
        identity.kind.to_lowercase(),
        identity.namespace.clone(),
        identity.name.clone(),
    )
}

/// A deterministic in-memory control plane.
pub struct FakeCluster {
    kinds: Vec<KindSpec>,
    objects: Mutex<HashMap<(String, String, String, String), Object>>,
    events: broadcast::Sender<Identity>,
}

impl FakeCluster {
    pub fn new(kinds: Vec<KindSpec>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            kinds,
            objects: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Seeds an object without going through `create`, as initial state.
    pub fn seed(&self, object: Object) {
        let identity = object.identity();
        self.objects
            .lock()
            .expect("fake cluster lock")
            .insert(key(&identity), object);
    }

    /// Current state of an identity, for assertions.
    pub fn state(&self, identity: &Identity) -> Option<Object> {
        self.objects
            .lock()
            .expect("fake cluster lock")
            .get(&key(identity))
            .cloned()
    }

    fn emit(&self, identity: Identity) {
        // Nobody watching is fine.
        let _ = self.events.send(identity);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_kinds(&self) -> Result<Vec<KindSpec>> {
        Ok(self.kinds.clone())
    }

    async fn get(&self, identity: &Identity) -> Result<Option<Object>> {
        Ok(self.state(identity))
    }

    async fn create(&self, object: &Object) -> Result<()> {
        let identity = object.identity();
        self.objects
            .lock()
            .expect("fake cluster lock")
            .insert(key(&identity), object.clone());
        self.emit(identity);
        Ok(())
    }

    async fn update(&self, object: &Object) -> Result<()> {
        self.create(object).await
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        self.objects
            .lock()
            .expect("fake cluster lock")
            .remove(&key(identity));
        self.emit(identity.clone());
        Ok(())
    }

    async fn watch(
        &self,
        kind: &KindSpec,
        tx: mpsc::Sender<Identity>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let route = kind.route();
        let mut events = self.events.subscribe();

        let initial: Vec<Identity> = {
            let objects = self.objects.lock().expect("fake cluster lock");
            objects
                .values()
                .map(|object| object.identity())
                .filter(|identity| (identity.group.clone(), identity.kind.to_lowercase()) == route)
                .collect()
        };
        for identity in initial {
            if tx.send(identity).await.is_err() {
                return Ok(());
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                event = events.recv() => match event {
                    Ok(identity) => {
                        let matches =
                            (identity.group.clone(), identity.kind.to_lowercase()) == route;
                        if matches && tx.send(identity).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("fake watch lagged, dropped {missed} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}
