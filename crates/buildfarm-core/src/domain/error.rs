//! Domain-level error taxonomy for Buildfarm.

use buildfarm_ports::PortError;

/// Errors produced by build manifest validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("[build] unknown value for system: {0}")]
    UnknownSystem(String),

    #[error("[build] buildpacks cannot be combined with a Dockerfile")]
    BuildpacksWithDockerfile,

    #[error("[build] buildpack builds cannot declare services; use a Procfile instead")]
    ServicesWithBuildpacks,

    #[error("[services] no web service defined")]
    MissingWebService,

    #[error("[services] service {0} has no command")]
    EmptyServiceCommand(String),

    #[error("[test] env {0} is not in KEY=VALUE format")]
    MalformedTestEnv(String),
}

/// Buildfarm pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Malformed declarative manifest; raised before any external side effect
    #[error("invalid build manifest: {0}")]
    Validation(#[from] ManifestError),

    /// A required external collaborator failed
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("not a pull request: source version {source_version:?}")]
    NotPullRequest { source_version: String },

    #[error("git metadata error: {0}")]
    GitDir(String),

    /// The test command ran and exited non-zero
    #[error("test failed with exit code {exit_code}")]
    TestFailed { exit_code: i64 },

    /// A spawned task panicked or was cancelled before reporting
    #[error("task {name} did not complete: {message}")]
    Task { name: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml parse error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

impl BuildError {
    /// Whether this is an ordinary test outcome rather than an infrastructure fault.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, BuildError::TestFailed { .. })
    }
}

/// Result type for Buildfarm domain operations.
pub type Result<T> = std::result::Result<T, BuildError>;
