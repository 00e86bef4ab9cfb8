//! Build: produce the image, derive its process metadata, publish.

use std::sync::Arc;

use buildfarm_core::config_resolver;
use buildfarm_core::workspace::{BUILD_LOG, COMMIT_FILE, PROCESS_MANIFEST};
use buildfarm_core::{BuildManifest, BuildSystem, ProcessManifest, Result};
use buildfarm_ports::{
    BuildpackRequest, ContainerRuntime, ContainerSpec, DockerBuildRequest, EnvMap, PullPolicy,
};
use tracing::{debug, info};

use crate::markers;
use crate::pipeline::{Outcome, Phase, Pipeline, CACHE_PREFIX};
use crate::tasks::{TaskGroup, TaskPolicy};

/// Where the buildpack lifecycle leaves process metadata inside the image.
pub const IMAGE_METADATA_PATH: &str = "/layers/config/metadata.toml";

/// Image references for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTags {
    /// `{repo}:{sha}`
    pub revision: String,
    /// `{repo}:latest`
    pub latest: String,
    /// `{repo}:build-{n}`
    pub build: String,
}

impl ImageTags {
    pub fn new(repo: &str, sha: &str, build_number: &str) -> Self {
        Self {
            revision: format!("{repo}:{sha}"),
            latest: format!("{repo}:latest"),
            build: format!("{repo}:build-{build_number}"),
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![self.revision.clone(), self.latest.clone(), self.build.clone()]
    }
}

pub(crate) async fn run(p: &Pipeline) -> Result<Outcome> {
    if p.skipped(Phase::Build).await? {
        return Ok(Outcome::Skipped);
    }

    let env = config_resolver::build_env(p.ports.config.as_ref(), &p.ctx, &p.workspace).await?;
    let sha = p.ports.scm.head_sha().await?;
    let tags = ImageTags::new(&p.ctx.docker_repo, &sha, &p.ctx.build_number);
    tokio::fs::create_dir_all(&p.settings.cache_dir).await?;

    let manifest = p.effective_manifest();
    markers::print_start("build");
    let built = match manifest.system()? {
        BuildSystem::Dockerfile => dockerfile_build(p, &manifest, &tags).await,
        BuildSystem::Buildpack => buildpack_build(p, manifest, env, &tags).await,
    };
    markers::print_end("build");
    built?;

    publish(p, &tags).await?;
    p.gate.write_commit_description().await?;
    debug!(file = COMMIT_FILE, "recorded commit description");
    Ok(Outcome::Completed)
}

async fn dockerfile_build(p: &Pipeline, manifest: &BuildManifest, tags: &ImageTags) -> Result<()> {
    let request = DockerBuildRequest {
        context_dir: p.workspace.root().to_path_buf(),
        dockerfile: manifest.dockerfile_path().to_string(),
        tags: tags.all(),
        cache_dir: p.settings.cache_dir.clone(),
        log_file: p.workspace.path(BUILD_LOG),
    };
    info!(
        dockerfile = %request.dockerfile,
        image = %tags.revision,
        "building image from Dockerfile"
    );
    p.ports.runtime.build_image(&request).await?;

    p.workspace
        .write_toml(PROCESS_MANIFEST, &manifest.to_process_manifest())
        .await
}

async fn buildpack_build(
    p: &Pipeline,
    mut manifest: BuildManifest,
    env: EnvMap,
    tags: &ImageTags,
) -> Result<()> {
    let request = BuildpackRequest {
        app_dir: p.workspace.root().to_path_buf(),
        builder: p.builder_images().into_iter().next().unwrap_or_default(),
        buildpacks: p.buildpacks(),
        env,
        cache_dir: p.settings.cache_dir.clone(),
        image: tags.revision.clone(),
        additional_tags: vec![tags.latest.clone(), tags.build.clone()],
        pull_policy: PullPolicy::IfNotPresent,
        log_file: p.workspace.path(BUILD_LOG),
    };
    info!(builder = %request.builder, image = %request.image, "building image with buildpacks");
    p.ports.buildpacks.build(&request).await?;

    let metadata =
        read_image_metadata(p.ports.runtime.as_ref(), &p.ctx.container_name(), &tags.revision)
            .await?;
    p.workspace.write_bytes(PROCESS_MANIFEST, &metadata).await?;

    let processes = ProcessManifest::from_toml_str(&String::from_utf8_lossy(&metadata))?;
    processes.apply_to(&mut manifest);
    p.workspace.write_toml(&p.settings.manifest_file, &manifest).await
}

/// Copy the process metadata out of a throwaway container. The container is
/// removed whether or not the read succeeds.
async fn read_image_metadata(
    runtime: &dyn ContainerRuntime,
    name: &str,
    image: &str,
) -> Result<Vec<u8>> {
    let container = runtime.create_container(name, &ContainerSpec::new(image)).await?;
    let read = runtime.read_file(&container, IMAGE_METADATA_PATH).await;
    runtime.remove_container(&container).await?;
    Ok(read?)
}

/// Push every tag and archive the cache.
///
/// The build-number tag goes first; the other two share its layers and are
/// pushed concurrently once it lands. The cache upload overlaps all pushes.
async fn publish(p: &Pipeline, tags: &ImageTags) -> Result<()> {
    let mut tasks = TaskGroup::new();

    let objects = p.ports.objects.clone();
    let bucket = p.ctx.artifact_bucket.clone();
    let cache_dir = p.settings.cache_dir.clone();
    tasks.spawn("cache-upload", TaskPolicy::Required, async move {
        info!(bucket = %bucket, "archiving build cache");
        objects.upload_dir(&cache_dir, &bucket, CACHE_PREFIX, true).await?;
        Ok(())
    });

    info!(image = %tags.build, "pushing image");
    let first = p.ports.runtime.push_image(&tags.build).await;
    if first.is_ok() {
        for image in [&tags.revision, &tags.latest] {
            let runtime: Arc<dyn ContainerRuntime> = p.ports.runtime.clone();
            let image = image.clone();
            tasks.spawn(format!("push {image}"), TaskPolicy::Required, async move {
                runtime.push_image(&image).await?;
                Ok(())
            });
        }
    }

    let joined = tasks.join().await;
    first?;
    joined
}
