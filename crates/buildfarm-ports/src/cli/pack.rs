//! `pack` CLI adapter for buildpack builds.

use async_trait::async_trait;
use tracing::info;

use super::command::Invocation;
use crate::error::PortResult;
use crate::ports::{BuildpackEngine, BuildpackRequest};

/// Adapter over the `pack` command line.
///
/// Build environment values are set on the `pack` process itself and named
/// with `--env KEY`, so they reach the build unmodified and never appear in
/// arguments or on disk.
#[derive(Debug, Clone, Default)]
pub struct PackCli;

impl PackCli {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn build_args(request: &BuildpackRequest) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        request.image.clone(),
        "--builder".to_string(),
        request.builder.clone(),
    ];
    for buildpack in &request.buildpacks {
        args.push("--buildpack".to_string());
        args.push(buildpack.clone());
    }
    for key in request.env.keys() {
        args.push("--env".to_string());
        args.push(key.clone());
    }
    args.push("--cache".to_string());
    args.push(format!(
        "type=build;format=bind;source={}",
        request.cache_dir.display()
    ));
    for tag in &request.additional_tags {
        args.push("--tag".to_string());
        args.push(tag.clone());
    }
    args.push("--pull-policy".to_string());
    args.push(request.pull_policy.as_str().to_string());
    args.push("--path".to_string());
    args.push(request.app_dir.display().to_string());
    args
}

#[async_trait]
impl BuildpackEngine for PackCli {
    async fn build(&self, request: &BuildpackRequest) -> PortResult<()> {
        tokio::fs::create_dir_all(&request.cache_dir).await?;

        info!(image = %request.image, builder = %request.builder, "building with buildpacks");
        Invocation::new("pack")
            .args(build_args(request))
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stream(Some(&request.log_file))
            .await
    }
}
