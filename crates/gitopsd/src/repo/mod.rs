//! The tracked repository.
//!
//! A [`Repository`] owns the in-memory [`Workspace`] of one clone plus the
//! git transport behind it. Every operation runs under a single async
//! mutex, reads included (they walk the tree): the worktree is not
//! reentrant, and the find-then-mutate pattern in [`Repository::upsert`]
//! and [`Repository::delete`] is only correct when no other writer can
//! slip in between. Mutations commit and push as one logical step, so a
//! commit never mixes writes from two callers.

mod auth;
mod transport;

pub use transport::{FetchOutcome, GitTransport, PushOutcome};

use tokio::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::manifest::ManifestFile;
use crate::object::{Identity, Object};
use crate::workspace::Workspace;

/// Extensions discovered as manifests.
const MANIFEST_EXTENSIONS: [&str; 3] = [".yaml", ".yml", ".json"];

/// An object together with the manifest file it lives in. Holding the path
/// rather than the file lets callers delete an object knowing only the
/// object itself.
#[derive(Debug, Clone)]
pub struct Located {
    pub path: String,
    pub object: Object,
}

/// One recorded mutation. The ledger backs tests and dry runs against
/// repositories without a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub message: String,
    pub path: String,
}

struct RepoInner {
    workspace: Workspace,
    transport: Option<GitTransport>,
    subdir: String,
    commits: Vec<CommitRecord>,
}

/// A cloned repository and its manifest tree.
pub struct Repository {
    inner: Mutex<RepoInner>,
}

impl Repository {
    /// Opens the repository. An empty `url` initializes an empty in-memory
    /// repository with no remote; anything else is cloned, tracking
    /// `branch`. `subdir` scopes manifest discovery.
    pub async fn open(url: &str, subdir: &str, branch: &str) -> Result<Self> {
        let subdir = Workspace::normalize(subdir)?;
        let mut workspace = Workspace::new();

        let transport = if url.is_empty() {
            None
        } else {
            let transport = GitTransport::clone(url, branch).await?;
            transport.mirror_into(&mut workspace)?;
            Some(transport)
        };

        Ok(Self {
            inner: Mutex::new(RepoInner {
                workspace,
                transport,
                subdir,
                commits: Vec::new(),
            }),
        })
    }

    /// Every object of every manifest under the subdirectory, in walk
    /// order.
    pub async fn load_all(&self) -> Result<Vec<Located>> {
        let inner = self.inner.lock().await;
        inner.load_all()
    }

    /// The first object in walk order whose identity matches.
    pub async fn find(&self, identity: &Identity) -> Result<Option<Located>> {
        let inner = self.inner.lock().await;
        inner.find(identity)
    }

    /// Writes the object into its manifest file (replacing it in place
    /// when present, creating `<subdir>/<namespace>/<Kind>/<name>.yaml`
    /// when not), then commits and pushes.
    pub async fn upsert(&self, object: &Object) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let identity = object.identity();

        let (mut file, action) = match inner.find(&identity)? {
            Some(found) => (
                ManifestFile::load(&inner.workspace, &found.path)?,
                "Updating",
            ),
            None => {
                let path = inner.manifest_path(&identity);
                let file = if inner.workspace.exists(&path) {
                    ManifestFile::load(&inner.workspace, &path)?
                } else {
                    ManifestFile::new(path)
                };
                (file, "Adding")
            }
        };

        file.upsert(object.clone());
        let message = format!("{action} resource {identity}");
        inner.apply(&file, &message).await
    }

    /// Removes the object from its file, rewriting or deleting the file,
    /// then commits and pushes.
    pub async fn delete(&self, located: &Located) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let identity = located.object.identity();

        if !inner.workspace.exists(&located.path) {
            return Ok(());
        }
        let mut file = ManifestFile::load(&inner.workspace, &located.path)?;
        if !file.remove(&identity) {
            return Ok(());
        }

        let message = format!("Removing resource {identity}");
        inner.apply(&file, &message).await
    }

    /// Fetches the tracked branch and hard-resets the workspace to the
    /// remote tip. Already up to date (or a still-empty remote) is
    /// success.
    pub async fn pull(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pull().await
    }

    /// The mutation ledger, oldest first.
    pub async fn commits(&self) -> Vec<CommitRecord> {
        self.inner.lock().await.commits.clone()
    }

    /// Reads a file out of the workspace. Test and inspection helper.
    pub async fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner.workspace.read(path).ok().map(|contents| contents.to_vec())
    }
}

impl RepoInner {
    fn load_all(&self) -> Result<Vec<Located>> {
        let mut located = Vec::new();
        self.workspace.walk(&self.subdir, |path, is_dir| {
            if is_dir || !is_manifest(path) {
                return Ok(());
            }
            let file = ManifestFile::load(&self.workspace, path)?;
            for object in file.objects() {
                located.push(Located {
                    path: path.to_string(),
                    object: object.clone(),
                });
            }
            Ok(())
        })?;
        Ok(located)
    }

    fn find(&self, identity: &Identity) -> Result<Option<Located>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|located| located.object.identity().matches(identity)))
    }

    fn manifest_path(&self, identity: &Identity) -> String {
        let mut segments = Vec::new();
        if !self.subdir.is_empty() {
            segments.push(self.subdir.as_str());
        }
        if !identity.namespace.is_empty() {
            segments.push(identity.namespace.as_str());
        }
        segments.push(identity.kind.as_str());
        let file = format!("{}.yaml", identity.name);
        let mut path = segments.join("/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&file);
        path
    }

    /// Commits one rewritten manifest file and pushes. The workspace is
    /// only updated once the transport accepted the change; a rejected
    /// push resets everything to the remote tip and surfaces
    /// [`SyncError::ConflictRetry`].
    async fn apply(&mut self, file: &ManifestFile, message: &str) -> Result<()> {
        let rendered = if file.is_empty() {
            None
        } else {
            Some(file.render()?)
        };

        match &self.transport {
            Some(transport) => {
                let committed = match stage_and_commit(transport, file, rendered.as_deref(), message)
                {
                    Ok(committed) => committed,
                    Err(e) => {
                        // Leave the checkout exactly as it was; a half
                        // staged tree would leak into the next commit.
                        if let Err(cleanup) = transport.discard_changes() {
                            log::warn!("could not discard failed change: {cleanup}");
                        }
                        return Err(e);
                    }
                };
                if committed {
                    log::info!("{message}");
                } else if !transport.has_unpushed_commits()? {
                    // Nothing changed and nothing is pending: no commit,
                    // no push.
                    return Ok(());
                }

                match transport.push().await {
                    Ok(PushOutcome::Pushed | PushOutcome::UpToDate) => {
                        self.sync_workspace(file, rendered)?;
                        Ok(())
                    }
                    Ok(PushOutcome::Rejected) => {
                        log::warn!("push rejected, resetting to remote tip");
                        self.pull().await?;
                        Err(SyncError::ConflictRetry)
                    }
                    Err(e) => {
                        // The commit stays local; the next mutation or
                        // retry pushes it.
                        self.sync_workspace(file, rendered)?;
                        Err(e)
                    }
                }
            }
            None => {
                self.sync_workspace(file, rendered)?;
                self.commits.push(CommitRecord {
                    message: message.to_string(),
                    path: file.path().to_string(),
                });
                log::info!("{message}");
                Ok(())
            }
        }
    }

    fn sync_workspace(&mut self, file: &ManifestFile, rendered: Option<Vec<u8>>) -> Result<()> {
        // Only reached once the transport accepted the change (or there is
        // no transport); the workspace mirrors the committed state.
        match rendered {
            Some(contents) => self.workspace.write(file.path(), &contents),
            None => {
                if self.workspace.exists(file.path()) {
                    self.workspace.remove(file.path())?;
                }
                Ok(())
            }
        }
    }

    async fn pull(&mut self) -> Result<()> {
        let Some(transport) = &self.transport else {
            return Ok(());
        };
        transport.fetch().await?;
        transport.reset_to_remote()?;
        transport.mirror_into(&mut self.workspace)?;
        Ok(())
    }
}

fn is_manifest(path: &str) -> bool {
    MANIFEST_EXTENSIONS
        .iter()
        .any(|extension| path.ends_with(extension))
}

/// Writes the rendered file into the checkout and commits it. Returns
/// whether a commit was created.
fn stage_and_commit(
    transport: &GitTransport,
    file: &ManifestFile,
    rendered: Option<&[u8]>,
    message: &str,
) -> Result<bool> {
    match rendered {
        Some(contents) => transport.write_file(file.path(), contents)?,
        None => transport.remove_file(file.path())?,
    }
    transport.stage(file.path())?;
    transport.commit(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(kind: &str, namespace: &str, name: &str) -> Object {
        Object::from_value(json!({
            "apiVersion": "extensions/v1beta1",
            "kind": kind,
            "metadata": {"name": name, "namespace": namespace},
        }))
        .unwrap()
    }

    async fn memory_repo() -> Repository {
        Repository::open("", ".", "master").await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_synthesizes_path() {
        let repo = memory_repo().await;
        repo.upsert(&object("Deployment", "hello", "test"))
            .await
            .unwrap();

        assert!(repo
            .read_file("hello/Deployment/test.yaml")
            .await
            .is_some());
        let commits = repo.commits().await;
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "Adding resource Deployment/hello/test");
        assert_eq!(commits[0].path, "hello/Deployment/test.yaml");
    }

    #[tokio::test]
    async fn test_upsert_cluster_scoped_path() {
        let repo = memory_repo().await;
        repo.upsert(&object("ClusterRole", "", "admin"))
            .await
            .unwrap();
        assert!(repo.read_file("ClusterRole/admin.yaml").await.is_some());
    }

    #[tokio::test]
    async fn test_upsert_respects_subdir() {
        let repo = Repository::open("", "manifests", "master").await.unwrap();
        repo.upsert(&object("Deployment", "hello", "test"))
            .await
            .unwrap();
        assert!(repo
            .read_file("manifests/hello/Deployment/test.yaml")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_find_and_update_in_place() {
        let repo = memory_repo().await;
        repo.upsert(&object("Deployment", "hello", "test"))
            .await
            .unwrap();

        let identity = object("Deployment", "hello", "test").identity();
        let found = repo.find(&identity).await.unwrap().unwrap();
        assert_eq!(found.path, "hello/Deployment/test.yaml");

        let updated = Object::from_value(json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "Deployment",
            "metadata": {
                "name": "test",
                "namespace": "hello",
                "labels": {"a": "label"},
            },
        }))
        .unwrap();
        repo.upsert(&updated).await.unwrap();

        let found = repo.find(&identity).await.unwrap().unwrap();
        assert_eq!(found.object.labels().get("a"), Some(&"label".to_string()));

        let commits = repo.commits().await;
        assert_eq!(commits.len(), 2);
        assert_eq!(
            commits[1].message,
            "Updating resource Deployment/hello/test"
        );
    }

    #[tokio::test]
    async fn test_find_ignores_version() {
        let repo = memory_repo().await;
        repo.upsert(&object("Deployment", "hello", "test"))
            .await
            .unwrap();

        let identity = Identity::new("extensions", "v1", "deployment", "hello", "test");
        assert!(repo.find(&identity).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_keeps_parents() {
        let repo = memory_repo().await;
        repo.upsert(&object("Deployment", "hello", "test"))
            .await
            .unwrap();

        let identity = object("Deployment", "hello", "test").identity();
        let found = repo.find(&identity).await.unwrap().unwrap();
        repo.delete(&found).await.unwrap();

        assert!(repo.find(&identity).await.unwrap().is_none());
        assert!(repo
            .read_file("hello/Deployment/test.yaml")
            .await
            .is_none());
        let commits = repo.commits().await;
        assert_eq!(
            commits[1].message,
            "Removing resource Deployment/hello/test"
        );
    }

    #[tokio::test]
    async fn test_delete_leaves_other_objects_in_file() {
        let repo = memory_repo().await;
        repo.upsert(&object("ConfigMap", "hello", "a")).await.unwrap();

        // Second object appended to the same file by hand.
        let mut contents = repo
            .read_file("hello/ConfigMap/a.yaml")
            .await
            .unwrap();
        contents.extend_from_slice(b"---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: hello\n");
        {
            let mut inner = repo.inner.lock().await;
            inner
                .workspace
                .write("hello/ConfigMap/a.yaml", &contents)
                .unwrap();
        }

        let a = Identity::new("", "v1", "ConfigMap", "hello", "a");
        let found = repo.find(&a).await.unwrap().unwrap();
        repo.delete(&found).await.unwrap();

        assert!(repo.find(&a).await.unwrap().is_none());
        let b = Identity::new("", "v1", "ConfigMap", "hello", "b");
        assert!(repo.find(&b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let repo = memory_repo().await;
        let located = Located {
            path: "hello/Deployment/test.yaml".to_string(),
            object: object("Deployment", "hello", "test"),
        };
        repo.delete(&located).await.unwrap();
        assert!(repo.commits().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_all_filters_extensions() {
        let repo = memory_repo().await;
        {
            let mut inner = repo.inner.lock().await;
            inner
                .workspace
                .write(
                    "a.yaml",
                    b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
                )
                .unwrap();
            inner
                .workspace
                .write(
                    "b.json",
                    br#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b"}}"#,
                )
                .unwrap();
            inner.workspace.write("README.md", b"not a manifest").unwrap();
        }

        let all = repo.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_pull_without_remote_is_noop() {
        let repo = memory_repo().await;
        repo.pull().await.unwrap();
    }
}
