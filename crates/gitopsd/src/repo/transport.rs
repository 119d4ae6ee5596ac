//! Git transport over the `git` CLI.
//!
//! The transport owns a scratch checkout for the lifetime of the process
//! and shells out to `git` for everything that touches the remote. Local
//! plumbing runs synchronously; network operations (fetch, push) go through
//! `tokio::process` so a slow remote never blocks the runtime.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;
use tokio::process::Command as TokioCommand;
use walkdir::WalkDir;

use super::auth;
use crate::error::{Result, SyncError};
use crate::workspace::Workspace;

/// Outcome of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The remote tip was fetched (it may or may not differ from ours).
    Fetched,
    /// The remote has no commits on the tracked branch yet.
    EmptyRemote,
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Nothing to push.
    UpToDate,
    /// Non-fast-forward rejection; the remote moved underneath us.
    Rejected,
}

/// A checkout of one remote branch.
pub struct GitTransport {
    scratch: TempDir,
    url: String,
    branch: String,
    env: Vec<(String, String)>,
}

impl GitTransport {
    /// Clones `url` into a scratch directory tracking `branch`. A remote
    /// without commits yields an empty checkout.
    pub async fn clone(url: &str, branch: &str) -> Result<Self> {
        let scratch = TempDir::new()?;
        let transport = Self {
            scratch,
            url: url.to_string(),
            branch: branch.to_string(),
            env: auth::build_env(),
        };

        transport.run(&["init", "--quiet"])?;
        transport.run(&["config", "user.name", "gitopsd"])?;
        transport.run(&["config", "user.email", "gitopsd@localhost"])?;
        transport.run(&["remote", "add", "origin", url])?;

        let local = transport.branch.clone();
        let remote = format!("origin/{}", transport.branch);
        match transport.fetch().await? {
            FetchOutcome::Fetched => {
                transport.run(&[
                    "checkout",
                    "--quiet",
                    "-B",
                    local.as_str(),
                    remote.as_str(),
                ])?;
            }
            FetchOutcome::EmptyRemote => {
                log::info!("remote {url} is empty, starting from an empty tree");
                transport.run(&["checkout", "--quiet", "-B", local.as_str()])?;
            }
        }

        Ok(transport)
    }

    pub fn workdir(&self) -> &Path {
        self.scratch.path()
    }

    /// Fetches the tracked branch. A missing remote ref (empty remote) is
    /// not an error.
    pub async fn fetch(&self) -> Result<FetchOutcome> {
        let output = self
            .run_network(&["fetch", "--quiet", "origin", &self.branch])
            .await?;
        if output.status.success() {
            return Ok(FetchOutcome::Fetched);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("couldn't find remote ref") {
            return Ok(FetchOutcome::EmptyRemote);
        }
        Err(SyncError::Git(format_git_error(&output)))
    }

    /// Hard-resets the worktree to the fetched remote tip. No-op while the
    /// remote is still empty.
    pub fn reset_to_remote(&self) -> Result<()> {
        if !self.has_remote_branch() {
            return Ok(());
        }
        let output = self.run(&[
            "reset",
            "--quiet",
            "--hard",
            &format!("origin/{}", self.branch),
        ])?;
        expect_success(output)
    }

    /// Throws away uncommitted local changes, staged or not.
    pub fn discard_changes(&self) -> Result<()> {
        let has_head = self
            .run(&["rev-parse", "--verify", "--quiet", "HEAD"])?
            .status
            .success();
        if has_head {
            expect_success(self.run(&["reset", "--quiet", "--hard"])?)?;
        }
        expect_success(self.run(&["clean", "--quiet", "-fd"])?)
    }

    /// Whether local commits exist that the remote has not seen.
    pub fn has_unpushed_commits(&self) -> Result<bool> {
        let has_head = self
            .run(&["rev-parse", "--verify", "--quiet", "HEAD"])?
            .status
            .success();
        if !self.has_remote_branch() {
            return Ok(has_head);
        }
        if !has_head {
            return Ok(false);
        }
        let range = format!("origin/{0}..{0}", self.branch);
        let output = self.run(&["rev-list", "--count", &range])?;
        expect_success_ref(&output)?;
        let count: u64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0);
        Ok(count > 0)
    }

    pub fn has_remote_branch(&self) -> bool {
        self.run(&[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("origin/{}", self.branch),
        ])
        .map(|output| output.status.success())
        .unwrap_or(false)
    }

    pub fn write_file(&self, relative: &str, contents: &[u8]) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn remove_file(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn stage(&self, relative: &str) -> Result<()> {
        let output = self.run(&["add", "--all", "--", relative])?;
        expect_success(output)
    }

    /// Commits staged changes. Returns false when the index is clean, so
    /// callers can skip the push.
    pub fn commit(&self, message: &str) -> Result<bool> {
        let status = self.run(&["status", "--porcelain"])?;
        if status.stdout.is_empty() {
            return Ok(false);
        }
        let output = self.run(&["commit", "--quiet", "-m", message])?;
        expect_success(output)?;
        log::debug!("committed: {message}");
        Ok(true)
    }

    /// Pushes the tracked branch.
    pub async fn push(&self) -> Result<PushOutcome> {
        let refspec = format!("{0}:{0}", self.branch);
        let output = self
            .run_network(&["push", "--quiet", "origin", &refspec])
            .await?;
        if output.status.success() {
            return Ok(PushOutcome::Pushed);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("src refspec") {
            // Unborn branch, nothing committed yet.
            return Ok(PushOutcome::UpToDate);
        }
        if stderr.contains("non-fast-forward")
            || stderr.contains("[rejected]")
            || stderr.contains("fetch first")
        {
            return Ok(PushOutcome::Rejected);
        }
        Err(SyncError::Git(format_git_error(&output)))
    }

    /// Rebuilds `workspace` from the checkout, dropping whatever it held.
    pub fn mirror_into(&self, workspace: &mut Workspace) -> Result<()> {
        workspace.clear();
        let root = self.scratch.path();
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if relative == ".git" || relative.starts_with(".git/") {
                continue;
            }
            let contents = std::fs::read(entry.path())?;
            workspace.write(&relative, &contents)?;
        }
        Ok(())
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let normalized = Workspace::normalize(relative)?;
        if normalized.is_empty() {
            return Err(SyncError::InvalidPath(relative.to_string()));
        }
        Ok(self.scratch.path().join(normalized))
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .current_dir(self.scratch.path())
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|e| SyncError::Git(e.to_string()))?;
        Ok(output)
    }

    async fn run_network(&self, args: &[&str]) -> Result<Output> {
        let output = TokioCommand::new("git")
            .current_dir(self.scratch.path())
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await
            .map_err(|e| SyncError::Git(e.to_string()))?;
        Ok(output)
    }
}

impl std::fmt::Debug for GitTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTransport")
            .field("url", &self.url)
            .field("branch", &self.branch)
            .field("workdir", &self.scratch.path())
            .finish()
    }
}

/// Formats a failed git invocation with whatever output it produced.
fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "git exited with code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{stderr}\n{stdout}"),
    }
}

fn expect_success(output: Output) -> Result<()> {
    expect_success_ref(&output)
}

fn expect_success_ref(output: &Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(SyncError::Git(format_git_error(output)))
    }
}
