//! Files the pipeline reads and writes in the checkout.
//!
//! Downstream artifact collection expects a fixed set of files to exist after
//! every phase, whether the build ran, failed or was skipped.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use buildfarm_ports::EnvMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::error::{BuildError, Result};
use crate::settings::Settings;

pub const BUILD_LOG: &str = "build.log";
pub const TEST_LOG: &str = "test.log";
pub const PROCESS_MANIFEST: &str = "metadata.toml";
pub const COMMIT_FILE: &str = "commit.txt";
const GIT_DIR: &str = ".git";

/// Working directory of one pipeline run.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    manifest_file: String,
    env_file: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            root: root.into(),
            manifest_file: settings.manifest_file.clone(),
            env_file: settings.env_file(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path(&self.manifest_file)
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(name)).await?)
    }

    /// Touch every baseline artifact that does not exist yet.
    pub async fn ensure_artifacts(&self) -> Result<()> {
        for name in [self.manifest_file.as_str(), BUILD_LOG, PROCESS_MANIFEST, TEST_LOG] {
            let path = self.path(name);
            if tokio::fs::try_exists(&path).await? {
                continue;
            }
            debug!(file = name, "touching artifact");
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, b"").await?;
        }
        Ok(())
    }

    pub async fn write_bytes(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    pub async fn write_toml<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        debug!(file = name, "writing toml");
        let text = toml::to_string(value)?;
        self.write_bytes(name, text.as_bytes()).await
    }

    /// Truncate-or-create a log file in the workspace.
    pub async fn create_log(&self, name: &str) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::create(self.path(name)).await?)
    }

    /// Persist the addon env overlay.
    pub async fn write_env_overlay(&self, env: &EnvMap) -> Result<()> {
        debug!(file = %self.env_file.display(), count = env.len(), "writing env overlay");
        if let Some(parent) = self.env_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.env_file, serde_json::to_vec(env)?).await?;
        Ok(())
    }

    /// Read the addon env overlay; `None` when prebuild never wrote one.
    pub async fn read_env_overlay(&self) -> Result<Option<EnvMap>> {
        match tokio::fs::read(&self.env_file).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Make `.git` a real directory.
    ///
    /// Some CI checkouts leave a `gitdir: <path>` pointer file instead; the
    /// pointer is replaced with a copy of the directory it names.
    pub async fn relocate_git_dir(&self) -> Result<()> {
        let git = self.path(GIT_DIR);
        let meta = tokio::fs::metadata(&git)
            .await
            .map_err(|e| BuildError::GitDir(format!("{}: {e}", git.display())))?;
        if meta.is_dir() {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&git).await?;
        let target = parse_gitdir(&content)
            .ok_or_else(|| BuildError::GitDir(format!("unrecognised .git file: {content:?}")))?;
        let source = self.root.join(target);

        info!(gitdir = %source.display(), "relocating git directory");
        tokio::fs::remove_file(&git).await?;
        let dest = git.clone();
        tokio::task::spawn_blocking(move || copy_dir_all(&source, &dest))
            .await
            .map_err(|e| BuildError::Task {
                name: "copy-git-dir".to_string(),
                message: e.to_string(),
            })??;
        Ok(())
    }
}

fn parse_gitdir(content: &str) -> Option<&str> {
    let path = content.trim().strip_prefix("gitdir:")?.trim();
    (!path.is_empty() && !path.contains('\n')).then_some(path)
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            symlink(&std::fs::read_link(entry.path())?, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::fs::copy(original, link).map(|_| ())
}
