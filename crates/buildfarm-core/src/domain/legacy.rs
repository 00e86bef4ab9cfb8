//! Legacy application manifest (`app.json`).

use std::collections::BTreeMap;
use std::path::Path;

use buildfarm_ports::EnvMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::Result;
use super::manifest::{BuildManifest, BuildSystem};

pub const LEGACY_MANIFEST_FILE: &str = "app.json";

pub const DEFAULT_STACK: &str = "heroku-20";

/// Buildpack ids that should resolve to their cloud-native implementation.
const CNB_BUILDPACKS: &[&str] = &[
    "heroku/java",
    "heroku/java-function",
    "heroku/jvm",
    "heroku/jvm-function-invoker",
    "heroku/maven",
    "heroku/nodejs",
    "heroku/nodejs-engine",
    "heroku/nodejs-function",
    "heroku/nodejs-function-invoker",
    "heroku/nodejs-npm",
    "heroku/nodejs-yarn",
    "heroku/procfile",
];

const CNB_PREFIX: &str = "urn:cnb:builder:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyBuildpack {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyEnvironment {
    pub scripts: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub addons: Vec<String>,
}

fn default_stack() -> String {
    DEFAULT_STACK.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyManifest {
    #[serde(default)]
    pub buildpacks: Vec<LegacyBuildpack>,
    #[serde(default = "default_stack")]
    pub stack: String,
    #[serde(default)]
    pub environments: BTreeMap<String, LegacyEnvironment>,
}

impl Default for LegacyManifest {
    fn default() -> Self {
        Self {
            buildpacks: Vec::new(),
            stack: default_stack(),
            environments: BTreeMap::new(),
        }
    }
}

fn patch_buildpack(id: &str) -> String {
    if CNB_BUILDPACKS.contains(&id) {
        format!("{CNB_PREFIX}{id}")
    } else {
        id.to_string()
    }
}

impl LegacyManifest {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read `app.json` at `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_json_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "legacy manifest not found");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Builder image first, then the run image used only for pre-pulling.
    pub fn builders(&self) -> Vec<String> {
        let images: &[&str] = match self.stack.as_str() {
            "heroku-18" => &["heroku/buildpacks:18", "heroku/heroku:18-cnb"],
            "heroku-20" => &["heroku/buildpacks:20", "heroku/heroku:20-cnb"],
            "heroku-22" => &["heroku/builder-classic:22", "heroku/heroku:22-cnb"],
            other => return vec![other.to_string()],
        };
        images.iter().map(|s| s.to_string()).collect()
    }

    pub fn buildpacks(&self) -> Vec<String> {
        self.buildpacks.iter().map(|bp| patch_buildpack(&bp.url)).collect()
    }

    fn test_environment(&self) -> Option<&LegacyEnvironment> {
        self.environments.get("test")
    }

    pub fn test_script(&self) -> Option<&str> {
        self.test_environment()?
            .scripts
            .get("test")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn test_env(&self) -> EnvMap {
        self.test_environment()
            .map(|e| e.env.clone())
            .unwrap_or_default()
    }

    pub fn test_addons(&self) -> Vec<String> {
        self.test_environment()
            .map(|e| e.addons.clone())
            .unwrap_or_default()
    }

    /// Equivalent primary manifest for a buildpack build.
    pub fn to_build_manifest(&self) -> BuildManifest {
        let mut manifest = BuildManifest::default();
        manifest.build.system = BuildSystem::Buildpack.as_str().to_string();
        manifest.build.buildpacks = self.buildpacks();
        manifest.build.builder = self.builders().into_iter().next().unwrap_or_default();
        manifest.test.command = self.test_script().unwrap_or_default().to_string();
        manifest.test.env = self
            .test_env()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        manifest
    }
}
