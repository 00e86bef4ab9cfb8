//! Pipeline context shared by every phase.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use buildfarm_core::domain::legacy::LEGACY_MANIFEST_FILE;
use buildfarm_core::{
    BuildContext, BuildManifest, BuildSystem, LegacyManifest, Result, Settings, SkipGate,
    Workspace,
};
use buildfarm_ports::cli::{AwsCli, DockerCli, GitCli, PackCli};
use buildfarm_ports::{
    BuildpackEngine, ConfigStore, ContainerRuntime, ObjectStore, RegistryAuth, SourceControl,
    StackService,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::{build, postbuild, prebuild};

/// Object-store prefix holding the build cache.
pub const CACHE_PREFIX: &str = "cache";

/// Every external collaborator of a run.
#[derive(Clone)]
pub struct Ports {
    pub config: Arc<dyn ConfigStore>,
    pub stacks: Arc<dyn StackService>,
    pub registry: Arc<dyn RegistryAuth>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub buildpacks: Arc<dyn BuildpackEngine>,
    pub objects: Arc<dyn ObjectStore>,
    pub scm: Arc<dyn SourceControl>,
}

impl Ports {
    /// Production wiring: `aws`, `docker`, `pack` and `git` on the `PATH`.
    pub fn from_cli(workdir: &Path) -> Self {
        let aws = Arc::new(AwsCli::new());
        Self {
            config: aws.clone(),
            stacks: aws.clone(),
            registry: aws.clone(),
            objects: aws,
            runtime: Arc::new(DockerCli::new()),
            buildpacks: Arc::new(PackCli::new()),
            scm: Arc::new(GitCli::new(workdir)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prebuild,
    Build,
    Postbuild,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prebuild => "prebuild",
            Phase::Build => "build",
            Phase::Postbuild => "postbuild",
        }
    }
}

/// How a phase ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Skipped,
}

/// Summary of one phase invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub run_id: String,
    pub phase: Phase,
    pub build_id: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// One pipeline invocation over a checked-out working directory.
pub struct Pipeline {
    pub(crate) ctx: BuildContext,
    pub(crate) settings: Settings,
    pub(crate) ports: Ports,
    pub(crate) workspace: Workspace,
    pub(crate) gate: SkipGate,
    pub(crate) manifest: BuildManifest,
    pub(crate) manifest_found: bool,
    pub(crate) legacy: LegacyManifest,
    pub(crate) legacy_found: bool,
}

impl Pipeline {
    /// Read both manifests from `root`. Missing manifests load as empty.
    pub async fn load(
        ctx: BuildContext,
        settings: Settings,
        ports: Ports,
        root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let workspace = Workspace::new(root, &settings);
        let gate = SkipGate::new(workspace.clone(), ports.scm.clone());

        let manifest_found = tokio::fs::try_exists(workspace.manifest_path()).await?;
        let manifest = BuildManifest::load(&workspace.manifest_path()).await?;
        let legacy_path = workspace.path(LEGACY_MANIFEST_FILE);
        let legacy_found = tokio::fs::try_exists(&legacy_path).await?;
        let legacy = LegacyManifest::load(&legacy_path).await?;

        Ok(Self {
            ctx,
            settings,
            ports,
            workspace,
            gate,
            manifest,
            manifest_found,
            legacy,
            legacy_found,
        })
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn gate(&self) -> &SkipGate {
        &self.gate
    }

    /// Manifest this run builds from: the primary manifest, or one derived
    /// from the legacy manifest when only that exists.
    pub fn effective_manifest(&self) -> BuildManifest {
        if !self.manifest_found && self.legacy_found {
            self.legacy.to_build_manifest()
        } else {
            self.manifest.clone()
        }
    }

    pub fn build_system(&self) -> Result<BuildSystem> {
        Ok(self.effective_manifest().system()?)
    }

    /// Builder images; the primary manifest's builder overrides the legacy
    /// stack's images.
    pub fn builder_images(&self) -> Vec<String> {
        if self.manifest.build.builder.is_empty() {
            self.legacy.builders()
        } else {
            vec![self.manifest.build.builder.clone()]
        }
    }

    pub fn buildpacks(&self) -> Vec<String> {
        if self.manifest.build.buildpacks.is_empty() {
            self.legacy.buildpacks()
        } else {
            self.manifest.build.buildpacks.clone()
        }
    }

    /// Immutable image reference for the checked-out revision.
    pub async fn image_name(&self) -> Result<String> {
        let sha = self.ports.scm.head_sha().await?;
        Ok(format!("{}:{}", self.ctx.docker_repo, sha))
    }

    /// Run `phase` inside its tracing span and time it.
    pub async fn run(&self, phase: Phase) -> Result<PhaseReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "phase",
            name = phase.as_str(),
            build_id = %self.ctx.build_id,
            %run_id
        );
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = async {
            info!("starting phase");
            let outcome = match phase {
                Phase::Prebuild => prebuild::run(self).await?,
                Phase::Build => build::run(self).await?,
                Phase::Postbuild => postbuild::run(self).await?,
            };
            info!(?outcome, "phase finished");
            Ok::<_, buildfarm_core::BuildError>(outcome)
        }
        .instrument(span)
        .await?;

        Ok(PhaseReport {
            run_id,
            phase,
            build_id: self.ctx.build_id.clone(),
            outcome,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Commit description and baseline artifacts; safe to call after a
    /// failed phase.
    pub async fn finish(&self) -> Result<()> {
        self.gate.finish().await
    }

    /// True when an earlier phase marked this build as skipped.
    pub(crate) async fn skipped(&self, phase: Phase) -> Result<bool> {
        let skipped = self.gate.has_marker(&self.ctx.build_id).await?;
        if skipped {
            info!(phase = phase.as_str(), "build marked as skipped; nothing to do");
        }
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildfarm_ports::fakes::{
        FixedSourceControl, MemoryConfigStore, MemoryObjectStore, MemoryStackService,
        RecordingBuildpackEngine, RecordingRuntime, StaticRegistryAuth,
    };
    use buildfarm_ports::RegistryCredentials;

    fn ports() -> Ports {
        Ports {
            config: Arc::new(MemoryConfigStore::new()),
            stacks: Arc::new(MemoryStackService::new()),
            registry: Arc::new(StaticRegistryAuth::new(RegistryCredentials::new("AWS", "t"))),
            runtime: Arc::new(RecordingRuntime::new()),
            buildpacks: Arc::new(RecordingBuildpackEngine::new()),
            objects: Arc::new(MemoryObjectStore::new()),
            scm: Arc::new(FixedSourceControl::new("abc123")),
        }
    }

    async fn load(dir: &tempfile::TempDir) -> Pipeline {
        let ctx = BuildContext::from_lookup(|k| match k {
            "DOCKER_REPO" => Some("123.dkr.ecr.us-east-1.amazonaws.com/shop".to_string()),
            _ => None,
        });
        Pipeline::load(ctx, Settings::rooted_at(dir.path()), ports(), dir.path())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_legacy_manifest_used_when_primary_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.json"),
            r#"{"stack":"heroku-22","buildpacks":[{"url":"heroku/python"}]}"#,
        )
        .unwrap();

        let pipeline = load(&dir).await;

        assert_eq!(
            pipeline.effective_manifest().build.buildpacks,
            vec!["heroku/python"]
        );
        assert_eq!(pipeline.build_system().unwrap(), BuildSystem::Buildpack);
        assert_eq!(pipeline.builder_images()[0], "heroku/builder-classic:22");
    }

    #[tokio::test]
    async fn test_primary_builder_overrides_legacy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.json"), "{}").unwrap();
        std::fs::write(
            dir.path().join("buildfarm.toml"),
            "[build]\nbuilder = \"paketobuildpacks/builder:base\"\n",
        )
        .unwrap();

        let pipeline = load(&dir).await;

        assert_eq!(pipeline.builder_images(), vec!["paketobuildpacks/builder:base"]);
        assert!(pipeline.effective_manifest().build.buildpacks.is_empty());
    }

    #[tokio::test]
    async fn test_image_name_uses_head_revision() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = load(&dir).await;
        assert_eq!(
            pipeline.image_name().await.unwrap(),
            "123.dkr.ecr.us-east-1.amazonaws.com/shop:abc123"
        );
    }
}
