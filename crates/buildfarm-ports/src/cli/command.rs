//! Vendor CLI invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PortError, PortResult};
use crate::io::tee;

/// A single invocation of an external program.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    envs: Vec<(String, String)>,
}

impl Invocation {
    pub(crate) fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            dir: None,
            stdin: None,
            envs: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn current_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    pub(crate) fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Set variables on the child's environment only.
    pub(crate) fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run to completion and return stdout. Non-zero exit is an error.
    pub(crate) async fn capture(&self) -> PortResult<Vec<u8>> {
        debug!(program = %self.program, args = ?self.args.first(), "running command");
        let mut cmd = self.command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn()?;
        if let Some(input) = &self.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await?;
                pipe.shutdown().await?;
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(PortError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Run to completion, copying output to the console and to `log_file`.
    pub(crate) async fn stream(&self, log_file: Option<&Path>) -> PortResult<()> {
        debug!(program = %self.program, args = ?self.args.first(), "streaming command");
        let mut cmd = self.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PortError::unavailable("process", "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PortError::unavailable("process", "stderr not captured"))?;

        let (out_log, err_log) = match log_file {
            Some(path) => (Some(open_append(path).await?), Some(open_append(path).await?)),
            None => (None, None),
        };

        let (out, err) = tokio::join!(
            tee(stdout, tokio::io::stdout(), out_log),
            tee(stderr, tokio::io::stderr(), err_log),
        );
        out?;
        err?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(PortError::CommandFailed {
                program: self.program.clone(),
                code: status.code().unwrap_or(-1),
                stderr: format!("see output above ({})", self.args.join(" ")),
            });
        }
        Ok(())
    }
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Re-map a failed command to `NotFound` when its stderr contains `marker`.
pub(crate) fn not_found_if(err: PortError, marker: &str, what: &str) -> PortError {
    match err {
        PortError::CommandFailed { ref stderr, .. } if stderr.contains(marker) => {
            PortError::not_found(what)
        }
        other => other,
    }
}
