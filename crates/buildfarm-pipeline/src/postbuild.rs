//! Postbuild: run the test command in a container from the built image.

use buildfarm_core::config_resolver;
use buildfarm_core::workspace::TEST_LOG;
use buildfarm_core::{BuildError, BuildSystem, Result};
use buildfarm_ports::io::tee;
use buildfarm_ports::{ContainerSpec, EnvMap, LogStreams};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::markers;
use crate::pipeline::{Outcome, Phase, Pipeline};
use crate::tasks::{TaskGroup, TaskPolicy};

pub const LAUNCHER: &str = "/cnb/lifecycle/launcher";

/// Container spec running `command` through a shell.
///
/// Buildpack images need the platform launcher to set up their runtime
/// environment; Dockerfile images run the shell directly.
pub fn test_spec(system: BuildSystem, image: &str, command: &str, env: EnvMap) -> ContainerSpec {
    let mut spec = ContainerSpec::new(image);
    spec.env = env;
    match system {
        BuildSystem::Buildpack => {
            spec.entrypoint = Some(vec![LAUNCHER.to_string()]);
            spec.command = vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()];
        }
        BuildSystem::Dockerfile => {
            spec.entrypoint = Some(vec!["/bin/sh".to_string(), "-c".to_string()]);
            spec.command = vec![command.to_string()];
        }
    }
    spec
}

pub(crate) async fn run(p: &Pipeline) -> Result<Outcome> {
    if p.skipped(Phase::Postbuild).await? {
        return Ok(Outcome::Skipped);
    }

    markers::print_start("test");
    let tested = run_tests(p).await;
    markers::print_end("test");
    tested?;
    Ok(Outcome::Completed)
}

async fn run_tests(p: &Pipeline) -> Result<()> {
    let mut log = p.workspace.create_log(TEST_LOG).await?;
    let manifest = p.effective_manifest();

    let command = if !manifest.test.command.is_empty() {
        manifest.test.command.clone()
    } else if let Some(script) = p.legacy.test_script() {
        script.to_string()
    } else {
        info!("no tests defined");
        log.write_all(b"no tests defined\n").await?;
        log.flush().await?;
        return Ok(());
    };

    let header = format!("+ {command}\n");
    log.write_all(header.as_bytes()).await?;
    log.flush().await?;
    tokio::io::stdout().write_all(header.as_bytes()).await?;

    let image = p.image_name().await?;
    let env = config_resolver::test_env(&p.manifest, &p.legacy, &p.workspace).await?;
    let spec = test_spec(manifest.system()?, &image, &command, env);

    let name = p.ctx.container_name();
    let runtime = &p.ports.runtime;
    info!(container = %name, image = %image, "starting test container");
    let exit_code = match runtime.run_container(&name, p.ctx.network_name(), &spec).await {
        Ok(container) => attach_and_wait(p, &container, log).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = runtime.remove_container(&name).await {
        warn!(container = %name, error = %e, "failed to remove test container");
    }

    match exit_code? {
        0 => Ok(()),
        code => Err(BuildError::TestFailed { exit_code: code }),
    }
}

/// Stream stdout and stderr to the console and the test log, then wait for
/// the container and the log follower to exit.
async fn attach_and_wait(p: &Pipeline, container: &str, log: tokio::fs::File) -> Result<i64> {
    let LogStreams {
        stdout,
        stderr,
        follower,
    } = p.ports.runtime.logs(container).await?;
    let log_err = log.try_clone().await?;

    let mut tasks = TaskGroup::new();
    tasks.spawn("test-stdout", TaskPolicy::Required, async move {
        tee(stdout, tokio::io::stdout(), Some(log)).await?;
        Ok(())
    });
    tasks.spawn("test-stderr", TaskPolicy::Required, async move {
        tee(stderr, tokio::io::stderr(), Some(log_err)).await?;
        Ok(())
    });
    tasks.spawn("log-follower", TaskPolicy::BestEffort, async move {
        follower.await?;
        Ok(())
    });

    let exit_code = p.ports.runtime.wait(container).await;
    tasks.join().await?;
    Ok(exit_code?)
}
