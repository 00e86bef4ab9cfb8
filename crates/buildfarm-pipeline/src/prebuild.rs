//! Prebuild: review-app gate, credentials, build engine and addons.

use std::collections::BTreeMap;

use buildfarm_core::{
    AddonManager, BuildManifest, BuildSystem, PrDecision, Result, ReviewAppMachine,
};
use tracing::{debug, info};

use crate::pipeline::{Outcome, Pipeline, CACHE_PREFIX};
use crate::tasks::{TaskGroup, TaskPolicy};

/// Upstream registry routed through the mirror inside the builder.
const MIRRORED_REGISTRY: &str = "docker.io";

pub(crate) async fn run(p: &Pipeline) -> Result<Outcome> {
    let machine = ReviewAppMachine::new(
        &p.ctx,
        p.ports.config.as_ref(),
        p.ports.stacks.as_ref(),
        &p.gate,
        &p.settings.stack_prefix,
    );
    if machine.evaluate().await? == PrDecision::Skip {
        return Ok(Outcome::Skipped);
    }

    let mut tasks = TaskGroup::new();
    let objects = p.ports.objects.clone();
    let bucket = p.ctx.artifact_bucket.clone();
    let cache_dir = p.settings.cache_dir.clone();
    tasks.spawn("cache-download", TaskPolicy::BestEffort, async move {
        info!(bucket = %bucket, "downloading build cache");
        objects.download_prefix(&bucket, CACHE_PREFIX, &cache_dir).await?;
        Ok(())
    });

    let prepared = prepare(p).await;
    let joined = tasks.join().await;
    prepared?;
    joined?;
    Ok(Outcome::Completed)
}

async fn prepare(p: &Pipeline) -> Result<()> {
    let manifest = p.effective_manifest();
    manifest.validate()?;

    p.workspace.relocate_git_dir().await?;
    login(p).await?;
    prepare_engine(p, &manifest).await?;

    let network = p.ctx.network_name();
    p.ports.runtime.create_network(network).await?;
    let overlay = AddonManager::new(p.ports.runtime.as_ref(), network)
        .start(&p.legacy.test_addons())
        .await?;
    p.workspace.write_env_overlay(&overlay).await?;

    if p.legacy_found && !p.manifest_found {
        info!(file = %p.settings.manifest_file, "converting legacy manifest");
        p.workspace.write_toml(&p.settings.manifest_file, &manifest).await?;
    }
    Ok(())
}

async fn login(p: &Pipeline) -> Result<()> {
    match p.ctx.dockerhub_credentials() {
        Some(credentials) => {
            debug!(username = %credentials.username, "logging in to Docker Hub");
            p.ports.runtime.login(None, &credentials).await?;
        }
        None => debug!("no Docker Hub credentials provided, skipping login"),
    }

    debug!(repo = %p.ctx.docker_repo, "logging in to image repository");
    let credentials = p.ports.registry.exchange_login().await?;
    p.ports
        .runtime
        .login(Some(p.ctx.registry_host()), &credentials)
        .await?;
    Ok(())
}

async fn prepare_engine(p: &Pipeline, manifest: &BuildManifest) -> Result<()> {
    match manifest.system()? {
        BuildSystem::Buildpack => {
            info!("pulling buildpack images");
            for image in p.builder_images() {
                p.ports.runtime.pull_image(&p.settings.mirrored(&image)).await?;
            }
        }
        BuildSystem::Dockerfile => {
            if p.ports.runtime.builder_running().await? {
                debug!("multi-platform builder is ready");
                return Ok(());
            }
            info!("setting up multi-platform builder");
            let config = p.settings.buildkit_config();
            if let Some(parent) = config.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&config, buildkit_config(&p.settings.mirror)?).await?;
            p.ports
                .runtime
                .create_builder(&p.ctx.container_name(), &config)
                .await?;
        }
    }
    Ok(())
}

/// `buildkitd.toml` routing the public registry through `mirror`.
fn buildkit_config(mirror: &str) -> Result<String> {
    let mut registries = BTreeMap::new();
    registries.insert(
        MIRRORED_REGISTRY,
        BTreeMap::from([("mirrors", vec![mirror.to_string()])]),
    );
    Ok(toml::to_string(&BTreeMap::from([("registry", registries)]))?)
}
