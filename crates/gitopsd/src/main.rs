//! gitopsd: bidirectional GitOps reconciler daemon.
//!
//! # Usage
//!
//! ```text
//! gitopsd [config.yaml]
//! ```
//!
//! The configuration names a git repository and an ordered rule set; see
//! the crate documentation for the rule semantics. SSH access to the
//! remote is configured through `SSH_KEY_PATH` and `SSH_KNOWN_HOSTS`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use gitopsd::{Config, Controller, KubeClusterClient, Repository};

#[derive(Parser, Debug)]
#[command(
    name = "gitopsd",
    version,
    about = "Sync Kubernetes objects to a git repository and back, rule by rule",
    long_about = None,
)]
struct Args {
    /// Path to the configuration file.
    #[arg(default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("cannot load configuration {}", args.config.display()))?;

    let repo = Repository::open(&config.git_url, &config.git_path, &config.branch)
        .await
        .context("cannot open repository")?;

    let client = kube::Client::try_default()
        .await
        .context("cannot connect to cluster")?;
    let cluster = Arc::new(KubeClusterClient::new(client));

    let controller = Controller::new(cluster, Arc::new(repo), Arc::new(config));

    let shutdown = controller.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received interrupt, shutting down");
            let _ = shutdown.send(());
        }
    });

    controller.run().await.context("cannot start manager")?;
    Ok(())
}
