//! `docker` CLI adapter.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::command::{not_found_if, Invocation};
use crate::error::{PortError, PortResult};
use crate::ports::{
    ContainerRuntime, ContainerSpec, DockerBuildRequest, LogStreams, RegistryCredentials,
};

const PROGRAM: &str = "docker";

/// Adapter over the `docker` command line (with the buildx plugin).
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }
}

/// Whether `buildx inspect` output shows a running container-driver builder.
pub(crate) fn parse_builder_ready(inspect: &str) -> bool {
    [r"Driver:\s+docker-container", r"Status:\s+running"]
        .iter()
        .all(|pattern| Regex::new(pattern).is_ok_and(|re| re.is_match(inspect)))
}

/// Arguments shared by `create` and `run`: options, image, then command.
///
/// The first entrypoint element becomes `--entrypoint`; the rest are placed
/// ahead of the command so the full argv is preserved.
pub(crate) fn container_args(
    name: &str,
    network: Option<&str>,
    spec: &ContainerSpec,
) -> Vec<String> {
    let mut args = vec!["--name".to_string(), name.to_string()];
    if let Some(network) = network {
        args.push("--network".to_string());
        args.push(network.to_string());
    }
    for pair in spec.env_strings() {
        args.push("--env".to_string());
        args.push(pair);
    }

    let mut command = Vec::new();
    if let Some(entrypoint) = &spec.entrypoint {
        let mut parts = entrypoint.iter();
        args.push("--entrypoint".to_string());
        args.push(parts.next().cloned().unwrap_or_default());
        command.extend(parts.cloned());
    }
    command.extend(spec.command.iter().cloned());

    args.push(spec.image.clone());
    args.extend(command);
    args
}

/// `buildx build` arguments for a Dockerfile build with a local cache.
pub(crate) fn build_args(request: &DockerBuildRequest) -> Vec<String> {
    let cache = request.cache_dir.display();
    let mut args = vec!["buildx".to_string(), "build".to_string()];
    for tag in &request.tags {
        args.push("--tag".to_string());
        args.push(tag.clone());
    }
    args.extend([
        "--progress".to_string(),
        "plain".to_string(),
        "--cache-to".to_string(),
        format!("type=local,dest={cache},mode=max"),
        "--cache-from".to_string(),
        format!("type=local,src={cache}"),
        "--file".to_string(),
        request.dockerfile.clone(),
        "--load".to_string(),
        request.context_dir.display().to_string(),
    ]);
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn login(
        &self,
        server: Option<&str>,
        credentials: &RegistryCredentials,
    ) -> PortResult<()> {
        let mut inv = Invocation::new(PROGRAM)
            .args([
                "login",
                "--username",
                credentials.username.as_str(),
                "--password-stdin",
            ])
            .stdin(credentials.password.clone());
        if let Some(server) = server {
            inv = inv.arg(server);
        }
        inv.capture().await?;
        info!(server = server.unwrap_or("docker.io"), "registry login succeeded");
        Ok(())
    }

    async fn create_network(&self, name: &str) -> PortResult<()> {
        Invocation::new(PROGRAM)
            .args(["network", "create", name])
            .capture()
            .await?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> PortResult<()> {
        debug!(image, "pulling image");
        Invocation::new(PROGRAM)
            .args(["pull", "--quiet", image])
            .capture()
            .await?;
        Ok(())
    }

    async fn push_image(&self, image: &str) -> PortResult<()> {
        info!(image, "pushing image");
        Invocation::new(PROGRAM)
            .args(["push", "--quiet", image])
            .capture()
            .await?;
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> PortResult<String> {
        let out = Invocation::new(PROGRAM)
            .arg("create")
            .args(container_args(name, None, spec))
            .capture()
            .await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    async fn run_container(
        &self,
        name: &str,
        network: &str,
        spec: &ContainerSpec,
    ) -> PortResult<String> {
        let out = Invocation::new(PROGRAM)
            .args(["run", "--detach"])
            .args(container_args(name, Some(network), spec))
            .capture()
            .await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    async fn read_file(&self, container: &str, path: &str) -> PortResult<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("file");
        Invocation::new(PROGRAM)
            .arg("cp")
            .arg(format!("{container}:{path}"))
            .arg(dest.display().to_string())
            .capture()
            .await
            .map_err(|e| not_found_if(e, "Could not find the file", path))?;
        Ok(tokio::fs::read(&dest).await?)
    }

    async fn wait(&self, container: &str) -> PortResult<i64> {
        let out = Invocation::new(PROGRAM)
            .args(["wait", container])
            .capture()
            .await?;
        let text = String::from_utf8_lossy(&out);
        text.trim().parse::<i64>().map_err(|_| PortError::Malformed {
            service: "docker",
            message: format!("unexpected wait output: {}", text.trim()),
        })
    }

    async fn logs(&self, container: &str) -> PortResult<LogStreams> {
        let mut child = Command::new(PROGRAM)
            .args(["logs", "--follow", container])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PortError::unavailable("docker", "logs stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PortError::unavailable("docker", "logs stderr not captured"))?;

        let name = container.to_string();
        let follower = async move {
            let status = child.wait().await?;
            if !status.success() {
                warn!(container = %name, status = %status, "log follower did not exit cleanly");
            }
            Ok::<(), PortError>(())
        }
        .boxed();

        Ok(LogStreams {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            follower,
        })
    }

    async fn remove_container(&self, container: &str) -> PortResult<()> {
        match Invocation::new(PROGRAM)
            .args(["rm", "--force", container])
            .capture()
            .await
        {
            Ok(_) => Ok(()),
            Err(PortError::CommandFailed { stderr, .. })
                if stderr.contains("No such container") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn build_image(&self, request: &DockerBuildRequest) -> PortResult<()> {
        info!(tags = ?request.tags, dockerfile = %request.dockerfile, "building image");
        Invocation::new(PROGRAM)
            .args(build_args(request))
            .current_dir(&request.context_dir)
            .stream(Some(&request.log_file))
            .await
    }

    async fn builder_running(&self) -> PortResult<bool> {
        let out = match Invocation::new(PROGRAM)
            .args(["buildx", "inspect"])
            .capture()
            .await
        {
            Ok(out) => out,
            Err(PortError::CommandFailed { stderr, .. }) => {
                debug!(stderr = %stderr, "no active builder");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        Ok(parse_builder_ready(&String::from_utf8_lossy(&out)))
    }

    async fn create_builder(&self, name: &str, config_file: &Path) -> PortResult<()> {
        info!(builder = name, "creating buildx builder");
        Invocation::new(PROGRAM)
            .args(["buildx", "create", "--use", "--name", name])
            .args(["--driver", "docker-container", "--config"])
            .arg(config_file.display().to_string())
            .arg("--bootstrap")
            .capture()
            .await?;
        Ok(())
    }
}
