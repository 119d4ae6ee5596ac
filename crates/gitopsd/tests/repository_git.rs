//! Repository behavior against real git remotes: clone, pull, push and
//! conflict recovery, each running over a throwaway bare repository.

use std::path::Path;
use std::process::Command;

use serde_json::json;
use tempfile::TempDir;

use gitopsd::{Identity, Object, Repository, SyncError};

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn bare_remote() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    run_git(dir.path(), &["init", "--bare", "--quiet", "origin.git"]);
    let url = dir.path().join("origin.git").to_string_lossy().to_string();
    (dir, url)
}

/// Pushes one file to the remote through a throwaway clone.
fn push_file(dir: &TempDir, url: &str, path: &str, contents: &str) {
    let seed = dir.path().join("seed");
    run_git(dir.path(), &["clone", "--quiet", url, "seed"]);
    run_git(&seed, &["config", "user.name", "seed"]);
    run_git(&seed, &["config", "user.email", "seed@localhost"]);
    run_git(&seed, &["checkout", "--quiet", "-B", "master"]);
    let full = seed.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(&full, contents).unwrap();
    run_git(&seed, &["add", "."]);
    run_git(&seed, &["commit", "--quiet", "-m", "external change"]);
    run_git(&seed, &["push", "--quiet", "origin", "master:master"]);
    std::fs::remove_dir_all(seed).unwrap();
}

fn config_map(name: &str) -> Object {
    Object::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": "hello"},
        "data": {"owner": name},
    }))
    .unwrap()
}

fn identity(name: &str) -> Identity {
    Identity::new("", "v1", "ConfigMap", "hello", name)
}

#[tokio::test]
async fn test_open_empty_remote() {
    let (_dir, url) = bare_remote();
    let repo = Repository::open(&url, ".", "master").await.unwrap();
    assert!(repo.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_loads_seeded_manifests() {
    let (dir, url) = bare_remote();
    push_file(
        &dir,
        &url,
        "hello/ConfigMap/seeded.yaml",
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: seeded\n  namespace: hello\n",
    );

    let repo = Repository::open(&url, ".", "master").await.unwrap();
    let all = repo.load_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].object.name(), "seeded");
    assert_eq!(all[0].path, "hello/ConfigMap/seeded.yaml");
}

#[tokio::test]
async fn test_upsert_is_visible_to_fresh_clone() {
    let (_dir, url) = bare_remote();

    let repo = Repository::open(&url, ".", "master").await.unwrap();
    repo.upsert(&config_map("pushed")).await.unwrap();

    let other = Repository::open(&url, ".", "master").await.unwrap();
    let found = other.find(&identity("pushed")).await.unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn test_pull_picks_up_external_push() {
    let (dir, url) = bare_remote();
    let repo = Repository::open(&url, ".", "master").await.unwrap();
    assert!(repo.find(&identity("external")).await.unwrap().is_none());

    push_file(
        &dir,
        &url,
        "hello/ConfigMap/external.yaml",
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: external\n  namespace: hello\n",
    );

    repo.pull().await.unwrap();
    assert!(repo.find(&identity("external")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_push_conflict_resets_and_surfaces_retry() {
    let (dir, url) = bare_remote();
    let repo = Repository::open(&url, ".", "master").await.unwrap();

    // The remote moves after our clone.
    push_file(
        &dir,
        &url,
        "hello/ConfigMap/external.yaml",
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: external\n  namespace: hello\n",
    );

    let err = repo.upsert(&config_map("ours")).await.unwrap_err();
    assert!(matches!(err, SyncError::ConflictRetry));

    // The workspace was reset to the remote tip: the external object is
    // there, ours is not.
    assert!(repo.find(&identity("external")).await.unwrap().is_some());
    assert!(repo.find(&identity("ours")).await.unwrap().is_none());

    // A retry from scratch succeeds and preserves both.
    repo.upsert(&config_map("ours")).await.unwrap();
    assert!(repo.find(&identity("ours")).await.unwrap().is_some());
    assert!(repo.find(&identity("external")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_pushes_file_removal() {
    let (_dir, url) = bare_remote();
    let repo = Repository::open(&url, ".", "master").await.unwrap();
    repo.upsert(&config_map("doomed")).await.unwrap();

    let found = repo.find(&identity("doomed")).await.unwrap().unwrap();
    repo.delete(&found).await.unwrap();

    let fresh = Repository::open(&url, ".", "master").await.unwrap();
    assert!(fresh.find(&identity("doomed")).await.unwrap().is_none());
}
