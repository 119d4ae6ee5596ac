//! Kind registry and event fan-out.
//!
//! On start the controller discovers every kind the server can fully
//! serve, then runs three kinds of tasks until shutdown:
//! - a watcher per kind, streaming observed identities into that kind's
//!   queue;
//! - a worker per kind, draining the queue one reconcile at a time so
//!   events for one identity are handled in arrival order;
//! - one periodic repository sync that pulls the remote and re-enqueues
//!   the identity of every loaded manifest, which is how external pushes
//!   reach the cluster.
//!
//! Workers share nothing but the repository, whose own lock serializes
//! them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::cluster::{ClusterClient, KindSpec, REQUIRED_VERBS};
use crate::config::Config;
use crate::error::Result;
use crate::object::Identity;
use crate::reconciler::Reconciler;
use crate::repo::Repository;

/// Queue capacity per kind.
const QUEUE_DEPTH: usize = 256;

/// Pause before re-enqueueing an identity after a transient failure.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Runs the whole reconciliation plant.
pub struct Controller {
    cluster: Arc<dyn ClusterClient>,
    repo: Arc<Repository>,
    config: Arc<Config>,
    shutdown: broadcast::Sender<()>,
}

impl Controller {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        repo: Arc<Repository>,
        config: Arc<Config>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            cluster,
            repo,
            config,
            shutdown,
        }
    }

    /// Handle for requesting shutdown from the outside (signal handler,
    /// tests).
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Discovers kinds, spawns watchers and workers, and runs until the
    /// shutdown channel fires. Discovery failure is fatal; everything after
    /// that only logs.
    pub async fn run(&self) -> Result<()> {
        let kinds = self.cluster.list_kinds().await?;
        let reconciler = Arc::new(Reconciler::new(
            self.cluster.clone(),
            self.repo.clone(),
            self.config.clone(),
        ));

        let mut routes: HashMap<(String, String), mpsc::Sender<Identity>> = HashMap::new();
        let mut tasks = Vec::new();

        for kind in kinds {
            if !kind.supports(&REQUIRED_VERBS) {
                continue;
            }
            log::info!(
                "starting controller kind={} name=git:{}/{}:{}",
                kind.kind,
                kind.group,
                kind.version,
                kind.kind
            );

            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            routes.insert(kind.route(), tx.clone());

            tasks.push(tokio::spawn(watch_kind(
                self.cluster.clone(),
                kind.clone(),
                tx.clone(),
                self.shutdown.subscribe(),
            )));
            tasks.push(tokio::spawn(worker(
                reconciler.clone(),
                kind,
                rx,
                tx,
                self.shutdown.subscribe(),
            )));
        }

        tasks.push(tokio::spawn(repo_sync(
            self.repo.clone(),
            routes,
            Duration::from_secs(self.config.sync_interval),
            self.shutdown.subscribe(),
        )));

        let mut shutdown = self.shutdown.subscribe();
        let _ = shutdown.recv().await;
        log::info!("shutting down workers");
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Streams watch events for one kind into its queue until shutdown.
async fn watch_kind(
    cluster: Arc<dyn ClusterClient>,
    kind: KindSpec,
    tx: mpsc::Sender<Identity>,
    shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = cluster.watch(&kind, tx, shutdown).await {
        log::error!("watch for {} ended: {e}", kind.kind);
    }
}

/// Drains one kind's queue, one reconcile at a time.
///
/// Transient failures re-enqueue the identity after a delay; `try_send`
/// drops the retry when the queue is full, which is safe because both the
/// watch and the periodic resync re-deliver.
async fn worker(
    reconciler: Arc<Reconciler>,
    kind: KindSpec,
    mut rx: mpsc::Receiver<Identity>,
    tx: mpsc::Sender<Identity>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let identity = tokio::select! {
            _ = shutdown.recv() => return,
            received = rx.recv() => match received {
                Some(identity) => identity,
                None => return,
            },
        };

        match reconciler.reconcile(&identity).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                log::warn!("reconcile {identity} will retry: {e}");
                let retry_tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(RETRY_DELAY).await;
                    if retry_tx.try_send(identity).is_err() {
                        log::debug!("retry queue full, waiting for next event");
                    }
                });
            }
            Err(e) => {
                log::error!("reconcile {identity} failed for kind {}: {e}", kind.kind);
            }
        }
    }
}

/// Pulls the repository on an interval and re-enqueues every manifest's
/// identity into its kind's queue.
async fn repo_sync(
    repo: Arc<Repository>,
    routes: HashMap<(String, String), mpsc::Sender<Identity>>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick would race startup; watchers already replay
    // existing cluster objects.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                log::info!("resyncing");
                if let Err(e) = sync_once(&repo, &routes).await {
                    log::warn!("repository sync failed: {e}");
                }
            }
        }
    }
}

async fn sync_once(
    repo: &Repository,
    routes: &HashMap<(String, String), mpsc::Sender<Identity>>,
) -> Result<()> {
    repo.pull().await?;
    for located in repo.load_all().await? {
        let identity = located.object.identity();
        let route = (identity.group.clone(), identity.kind.to_lowercase());
        let Some(tx) = routes.get(&route) else {
            log::debug!("no watcher for {identity}, skipping");
            continue;
        };
        if tx.send(identity).await.is_err() {
            return Ok(());
        }
    }
    Ok(())
}
