//! Primary declarative build manifest.
//!
//! ```toml
//! [build]
//! system = "dockerfile"
//! dockerfile = "docker/Dockerfile"
//!
//! [test]
//! command = "make test"
//! env = ["RAILS_ENV=test"]
//!
//! [deploy]
//! release_command = "bin/migrate"
//!
//! [services.web]
//! command = "bin/server"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use buildfarm_ports::EnvMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ManifestError, Result};
use super::process::{ProcessManifest, ProcessType};

/// Default primary manifest file name.
pub const DEFAULT_MANIFEST_FILE: &str = "buildfarm.toml";

/// Dockerfile used when `[build] dockerfile` is unset.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// How the image is produced. Exactly one path runs per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    Buildpack,
    Dockerfile,
}

impl BuildSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSystem::Buildpack => "buildpack",
            BuildSystem::Dockerfile => "dockerfile",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub builder: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dockerfile: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// `KEY=VALUE` entries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub release_command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub command: String,
}

impl Service {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// The primary build manifest. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildManifest {
    pub build: BuildSection,
    pub test: TestSection,
    pub deploy: DeploySection,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Service>,
}

impl BuildManifest {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Read the manifest at `path`. A missing file yields an empty manifest.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "build manifest not found");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the declared build system.
    ///
    /// An empty selector means `dockerfile` when a Dockerfile is declared and
    /// `buildpack` otherwise.
    pub fn system(&self) -> std::result::Result<BuildSystem, ManifestError> {
        match self.build.system.as_str() {
            "buildpack" => Ok(BuildSystem::Buildpack),
            "dockerfile" => Ok(BuildSystem::Dockerfile),
            "" if !self.build.dockerfile.is_empty() => Ok(BuildSystem::Dockerfile),
            "" => Ok(BuildSystem::Buildpack),
            other => Err(ManifestError::UnknownSystem(other.to_string())),
        }
    }

    pub fn dockerfile_path(&self) -> &str {
        if self.build.dockerfile.is_empty() {
            DEFAULT_DOCKERFILE
        } else {
            &self.build.dockerfile
        }
    }

    /// Check the manifest before any external side effect.
    pub fn validate(&self) -> std::result::Result<(), ManifestError> {
        let system = self.system()?;

        for entry in &self.test.env {
            if !entry.contains('=') {
                return Err(ManifestError::MalformedTestEnv(entry.clone()));
            }
        }

        match system {
            BuildSystem::Buildpack => {
                if !self.build.dockerfile.is_empty() {
                    return Err(ManifestError::BuildpacksWithDockerfile);
                }
                if !self.services.is_empty() {
                    return Err(ManifestError::ServicesWithBuildpacks);
                }
            }
            BuildSystem::Dockerfile => {
                if !self.build.buildpacks.is_empty() {
                    return Err(ManifestError::BuildpacksWithDockerfile);
                }
                for (name, service) in &self.services {
                    if service.command.trim().is_empty() {
                        return Err(ManifestError::EmptyServiceCommand(name.clone()));
                    }
                }
                if !self.services.contains_key("web") {
                    return Err(ManifestError::MissingWebService);
                }
            }
        }
        Ok(())
    }

    /// Declared `[test] env` entries as a map. Later duplicates win.
    pub fn test_env(&self) -> EnvMap {
        self.test
            .env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Process manifest for a Dockerfile build: one entry per service plus
    /// the release command.
    pub fn to_process_manifest(&self) -> ProcessManifest {
        let mut manifest = ProcessManifest::default();
        for (name, service) in &self.services {
            manifest.push_command(name, &service.command);
        }
        if !self.deploy.release_command.is_empty() {
            manifest.push_command(ProcessType::RELEASE, &self.deploy.release_command);
        }
        manifest
    }
}
