//! Skip-build gate.
//!
//! Once a build id is marked, every later phase for that id is a no-op apart
//! from re-confirming its artifacts exist. The marker is a file in the
//! workspace and is never removed.

use std::path::PathBuf;
use std::sync::Arc;

use buildfarm_ports::SourceControl;
use tracing::{info, warn};

use crate::domain::error::Result;
use crate::workspace::{Workspace, COMMIT_FILE};

const MARKER_PREFIX: &str = ".buildfarm-skip-";

#[derive(Clone)]
pub struct SkipGate {
    workspace: Workspace,
    scm: Arc<dyn SourceControl>,
}

impl SkipGate {
    pub fn new(workspace: Workspace, scm: Arc<dyn SourceControl>) -> Self {
        Self { workspace, scm }
    }

    pub fn marker_path(&self, build_id: &str) -> PathBuf {
        self.workspace.path(&format!("{MARKER_PREFIX}{build_id}"))
    }

    pub async fn has_marker(&self, build_id: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.marker_path(build_id)).await?)
    }

    /// Idempotent: writing an existing marker leaves it in place.
    pub async fn write_marker(&self, build_id: &str) -> Result<()> {
        tokio::fs::write(self.marker_path(build_id), b"").await?;
        Ok(())
    }

    /// Record the commit description and touch every baseline artifact.
    ///
    /// Artifacts are ensured even if the commit description cannot be read.
    pub async fn finish(&self) -> Result<()> {
        let described = self.write_commit_description().await;
        self.workspace.ensure_artifacts().await?;
        described
    }

    pub async fn write_commit_description(&self) -> Result<()> {
        match self.scm.describe_head().await {
            Ok(text) => self.workspace.write_bytes(COMMIT_FILE, &text).await,
            Err(e) => {
                warn!(error = %e, "cannot describe HEAD commit");
                Err(e.into())
            }
        }
    }

    /// Finish, then mark `build_id` so later phases do nothing. No marker is
    /// written if finishing fails.
    pub async fn skip(&self, build_id: &str) -> Result<()> {
        info!(build_id, "skipping remaining phases");
        self.finish().await?;
        self.write_marker(build_id).await
    }
}

impl std::fmt::Debug for SkipGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipGate")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}
