//! `git` CLI adapter for reading checkout metadata.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::command::Invocation;
use crate::error::{PortError, PortResult};
use crate::ports::SourceControl;

/// Reads revision information from a working tree.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(repo_dir: impl AsRef<Path>) -> Self {
        Self {
            repo_dir: repo_dir.as_ref().to_path_buf(),
        }
    }

    fn git(&self) -> Invocation {
        Invocation::new("git").current_dir(&self.repo_dir)
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn head_sha(&self) -> PortResult<String> {
        let out = self.git().args(["rev-parse", "HEAD"]).capture().await?;
        let sha = String::from_utf8_lossy(&out).trim().to_string();
        if sha.is_empty() {
            return Err(PortError::Malformed {
                service: "git",
                message: "rev-parse HEAD returned empty output".to_string(),
            });
        }
        Ok(sha)
    }

    async fn describe_head(&self) -> PortResult<Vec<u8>> {
        self.git()
            .args(["log", "-n1", "--decorate=no"])
            .capture()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "build-bot"]);
        run_git(dir.path(), &["config", "user.email", "bot@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "first build"]);
        dir
    }

    #[tokio::test]
    async fn head_sha_is_full_revision() {
        let repo = make_git_repo();
        let sha = GitCli::new(repo.path()).head_sha().await.unwrap();
        assert_eq!(sha.len(), 40, "expected a full sha, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn describe_head_contains_subject() {
        let repo = make_git_repo();
        let text = GitCli::new(repo.path()).describe_head().await.unwrap();
        let text = String::from_utf8_lossy(&text);
        assert!(text.starts_with("commit "));
        assert!(text.contains("first build"));
        assert!(text.contains("build-bot"));
    }

    #[tokio::test]
    async fn head_sha_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitCli::new(dir.path()).head_sha().await.unwrap_err();
        assert!(matches!(err, PortError::CommandFailed { .. }));
    }
}
