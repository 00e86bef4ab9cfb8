//! Port definitions for Buildfarm
//!
//! Every external collaborator of a pipeline run sits behind one of these
//! traits:
//! - `ConfigStore`: hierarchical secrets/config parameters
//! - `StackService`: review-app stack lifecycle
//! - `RegistryAuth`: short-lived image registry credentials
//! - `ContainerRuntime`: networks, images, containers and Dockerfile builds
//! - `BuildpackEngine`: buildpack image builds
//! - `ObjectStore`: build cache transfer
//! - `SourceControl`: revision and commit description of the checkout
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module; CLI-backed adapters live in `cli`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::PortResult;

/// Ordered string-to-string environment map.
pub type EnvMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// ConfigStore - Secrets / Config Parameters
// ---------------------------------------------------------------------------

/// Hierarchical parameter store.
///
/// Guarantees:
/// - `get_by_prefix` returns names with the prefix already stripped.
/// - `set_value` overwrites any existing value.
/// - `get_value` fails with `PortError::NotFound` when the name is absent.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch every parameter directly under `prefix`.
    async fn get_by_prefix(&self, prefix: &str) -> PortResult<EnvMap>;

    /// Fetch a single parameter.
    async fn get_value(&self, name: &str) -> PortResult<String>;

    /// Create or overwrite a single parameter.
    async fn set_value(&self, name: &str, value: &str) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// StackService - Stack Lifecycle
// ---------------------------------------------------------------------------

/// Minimal description of a deployed stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSummary {
    pub name: String,
    pub status: String,
}

#[async_trait]
pub trait StackService: Send + Sync {
    /// Describe a stack. Returns `PortError::NotFound` if it does not exist.
    async fn describe(&self, name: &str) -> PortResult<StackSummary>;

    /// Request destruction of a stack.
    async fn destroy(&self, name: &str) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// RegistryAuth - Registry Credentials
// ---------------------------------------------------------------------------

/// Username/password pair for an image registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait RegistryAuth: Send + Sync {
    /// Exchange ambient cloud credentials for a short-lived registry login.
    async fn exchange_login(&self) -> PortResult<RegistryCredentials>;
}

// ---------------------------------------------------------------------------
// ContainerRuntime - Containers, Images, Networks
// ---------------------------------------------------------------------------

/// What to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub env: EnvMap,
    /// `None` keeps the image's own entrypoint.
    pub entrypoint: Option<Vec<String>>,
    pub command: Vec<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Environment as `KEY=VALUE` strings, in key order.
    pub fn env_strings(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Dockerfile build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerBuildRequest {
    pub context_dir: PathBuf,
    pub dockerfile: String,
    /// Fully qualified image references; the first is the primary tag.
    pub tags: Vec<String>,
    /// Local directory used as the layer cache source and destination.
    pub cache_dir: PathBuf,
    /// Builder output is copied here as well as to the console.
    pub log_file: PathBuf,
}

/// Separated stdout/stderr of a container.
///
/// `follower` resolves once whatever produces the streams has exited; callers
/// await it alongside draining both readers.
pub struct LogStreams {
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub follower: BoxFuture<'static, PortResult<()>>,
}

impl fmt::Debug for LogStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogStreams { .. }")
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Store credentials for `server` (`None` means the default public registry).
    async fn login(&self, server: Option<&str>, credentials: &RegistryCredentials)
        -> PortResult<()>;

    async fn create_network(&self, name: &str) -> PortResult<()>;

    async fn pull_image(&self, image: &str) -> PortResult<()>;

    async fn push_image(&self, image: &str) -> PortResult<()>;

    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> PortResult<String>;

    /// Create a container attached to `network` and start it, returning its id.
    async fn run_container(
        &self,
        name: &str,
        network: &str,
        spec: &ContainerSpec,
    ) -> PortResult<String>;

    /// Read a single file out of a container.
    async fn read_file(&self, container: &str, path: &str) -> PortResult<Vec<u8>>;

    /// Block until the container stops, returning its exit code.
    async fn wait(&self, container: &str) -> PortResult<i64>;

    /// Follow the container's output until it exits.
    async fn logs(&self, container: &str) -> PortResult<LogStreams>;

    /// Force-remove a container. Removing an absent container is not an error.
    async fn remove_container(&self, container: &str) -> PortResult<()>;

    /// Build an image from a Dockerfile with a local cache mount.
    async fn build_image(&self, request: &DockerBuildRequest) -> PortResult<()>;

    /// Whether the active multi-platform builder is usable.
    async fn builder_running(&self) -> PortResult<bool>;

    /// Create, select and boot a multi-platform builder.
    async fn create_builder(&self, name: &str, config_file: &Path) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// BuildpackEngine - Buildpack Builds
// ---------------------------------------------------------------------------

/// When the engine should fetch builder and run images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "always",
            PullPolicy::IfNotPresent => "if-not-present",
            PullPolicy::Never => "never",
        }
    }
}

/// Buildpack build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildpackRequest {
    pub app_dir: PathBuf,
    pub builder: String,
    pub buildpacks: Vec<String>,
    pub env: EnvMap,
    /// Bind-mounted build cache directory.
    pub cache_dir: PathBuf,
    /// Primary image reference.
    pub image: String,
    pub additional_tags: Vec<String>,
    pub pull_policy: PullPolicy,
    pub log_file: PathBuf,
}

#[async_trait]
pub trait BuildpackEngine: Send + Sync {
    async fn build(&self, request: &BuildpackRequest) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// ObjectStore - Cache Transfer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Mirror `s3://bucket/prefix` into `local_dir`.
    async fn download_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        local_dir: &Path,
    ) -> PortResult<()>;

    /// Mirror `local_dir` into `bucket/prefix`, optionally deleting remote
    /// objects that no longer exist locally.
    async fn upload_dir(
        &self,
        local_dir: &Path,
        bucket: &str,
        prefix: &str,
        delete_extraneous: bool,
    ) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// SourceControl - Checkout Metadata
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Full revision id of the checked-out commit.
    async fn head_sha(&self) -> PortResult<String>;

    /// Human-readable description of the checked-out commit.
    async fn describe_head(&self) -> PortResult<Vec<u8>>;
}
