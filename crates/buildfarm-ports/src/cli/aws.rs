//! `aws` CLI adapter: parameters, stacks, registry login and cache sync.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::command::{not_found_if, Invocation};
use crate::error::{PortError, PortResult};
use crate::ports::{
    ConfigStore, EnvMap, ObjectStore, RegistryAuth, RegistryCredentials, StackService,
    StackSummary,
};

const PROGRAM: &str = "aws";

/// Username the registry expects alongside an exchanged login password.
pub const REGISTRY_USERNAME: &str = "AWS";

/// Adapter over the `aws` command line.
#[derive(Debug, Clone, Default)]
pub struct AwsCli {
    region: Option<String>,
}

impl AwsCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
        }
    }

    fn invocation(&self, service: &str, operation: &str) -> Invocation {
        let inv = Invocation::new(PROGRAM).arg(service).arg(operation);
        match &self.region {
            Some(region) => inv.arg("--region").arg(region.clone()),
            None => inv,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Parameter {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParametersByPath {
    #[serde(default)]
    parameters: Vec<Parameter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SingleParameter {
    parameter: Parameter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Stack {
    stack_name: String,
    stack_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Stacks {
    #[serde(default)]
    stacks: Vec<Stack>,
}

/// Parse `ssm get-parameters-by-path` output into stripped names.
pub(crate) fn parse_parameters(prefix: &str, body: &[u8]) -> PortResult<EnvMap> {
    let parsed: ParametersByPath = serde_json::from_slice(body)?;
    let base = prefix.trim_end_matches('/');
    Ok(parsed
        .parameters
        .into_iter()
        .map(|p| {
            let name = p
                .name
                .strip_prefix(base)
                .map(|rest| rest.trim_start_matches('/').to_string())
                .unwrap_or(p.name);
            (name, p.value)
        })
        .collect())
}

/// Parse `cloudformation describe-stacks` output.
pub(crate) fn parse_stack(name: &str, body: &[u8]) -> PortResult<StackSummary> {
    let parsed: Stacks = serde_json::from_slice(body)?;
    parsed
        .stacks
        .into_iter()
        .next()
        .map(|s| StackSummary {
            name: s.stack_name,
            status: s.stack_status,
        })
        .ok_or_else(|| PortError::not_found(format!("stack {name}")))
}

fn s3_url(bucket: &str, prefix: &str) -> String {
    format!("s3://{}/{}", bucket, prefix.trim_start_matches('/'))
}

#[async_trait]
impl ConfigStore for AwsCli {
    async fn get_by_prefix(&self, prefix: &str) -> PortResult<EnvMap> {
        let out = self
            .invocation("ssm", "get-parameters-by-path")
            .args(["--path", prefix, "--with-decryption", "--output", "json"])
            .capture()
            .await?;
        let values = parse_parameters(prefix, &out)?;
        debug!(prefix, count = values.len(), "fetched parameters");
        Ok(values)
    }

    async fn get_value(&self, name: &str) -> PortResult<String> {
        let out = self
            .invocation("ssm", "get-parameter")
            .args(["--name", name, "--with-decryption", "--output", "json"])
            .capture()
            .await
            .map_err(|e| not_found_if(e, "ParameterNotFound", name))?;
        let parsed: SingleParameter = serde_json::from_slice(&out)?;
        Ok(parsed.parameter.value)
    }

    async fn set_value(&self, name: &str, value: &str) -> PortResult<()> {
        self.invocation("ssm", "put-parameter")
            .args([
                "--name",
                name,
                "--value",
                value,
                "--type",
                "String",
                "--overwrite",
            ])
            .capture()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StackService for AwsCli {
    async fn describe(&self, name: &str) -> PortResult<StackSummary> {
        let out = self
            .invocation("cloudformation", "describe-stacks")
            .args(["--stack-name", name, "--output", "json"])
            .capture()
            .await
            .map_err(|e| not_found_if(e, "does not exist", name))?;
        parse_stack(name, &out)
    }

    async fn destroy(&self, name: &str) -> PortResult<()> {
        info!(stack = name, "deleting stack");
        self.invocation("cloudformation", "delete-stack")
            .args(["--stack-name", name])
            .capture()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryAuth for AwsCli {
    async fn exchange_login(&self) -> PortResult<RegistryCredentials> {
        let out = self
            .invocation("ecr", "get-login-password")
            .capture()
            .await?;
        let password = String::from_utf8_lossy(&out).trim().to_string();
        if password.is_empty() {
            return Err(PortError::Malformed {
                service: "ecr",
                message: "empty login password".to_string(),
            });
        }
        Ok(RegistryCredentials::new(REGISTRY_USERNAME, password))
    }
}

#[async_trait]
impl ObjectStore for AwsCli {
    async fn download_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        local_dir: &Path,
    ) -> PortResult<()> {
        tokio::fs::create_dir_all(local_dir).await?;
        self.invocation("s3", "sync")
            .arg(s3_url(bucket, prefix))
            .arg(local_dir.display().to_string())
            .arg("--quiet")
            .capture()
            .await?;
        Ok(())
    }

    async fn upload_dir(
        &self,
        local_dir: &Path,
        bucket: &str,
        prefix: &str,
        delete_extraneous: bool,
    ) -> PortResult<()> {
        let mut inv = self
            .invocation("s3", "sync")
            .arg(local_dir.display().to_string())
            .arg(s3_url(bucket, prefix))
            .arg("--quiet");
        if delete_extraneous {
            inv = inv.arg("--delete");
        }
        inv.capture().await?;
        Ok(())
    }
}
