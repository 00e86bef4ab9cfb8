//! Tool settings with environment overrides.

use std::path::{Path, PathBuf};

use crate::domain::manifest::DEFAULT_MANIFEST_FILE;

pub const DEFAULT_MIRROR: &str = "mirror.gcr.io";
pub const DEFAULT_STACK_PREFIX: &str = "buildfarm";

const ENV_FILE: &str = "env.json";
const BUILDKIT_CONFIG: &str = "buildkitd.toml";

/// Where the pipeline keeps its scratch state and which mirrors it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Primary manifest file name, relative to the working directory.
    pub manifest_file: String,
    /// Local layer/build cache mirrored to the object store.
    pub cache_dir: PathBuf,
    /// Holds the addon env overlay and builder config.
    pub scratch_dir: PathBuf,
    /// Pull-through mirror for public images.
    pub mirror: String,
    /// Prefix of review-app stack names.
    pub stack_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let tmp = std::env::temp_dir();

        Self {
            manifest_file: get("BUILD_MANIFEST")
                .unwrap_or_else(|| DEFAULT_MANIFEST_FILE.to_string()),
            cache_dir: get("BUILDFARM_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| tmp.join("buildfarm-cache")),
            scratch_dir: get("BUILDFARM_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| tmp.clone()),
            mirror: get("BUILDFARM_MIRROR").unwrap_or_else(|| DEFAULT_MIRROR.to_string()),
            stack_prefix: get("BUILDFARM_STACK_PREFIX")
                .unwrap_or_else(|| DEFAULT_STACK_PREFIX.to_string()),
        }
    }

    /// Settings rooted in a single directory; used by tests and local runs.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            cache_dir: dir.join("cache"),
            scratch_dir: dir.join("scratch"),
            ..Self::default()
        }
    }

    /// Addon env overlay written by prebuild and read by later phases.
    pub fn env_file(&self) -> PathBuf {
        self.scratch_dir.join(ENV_FILE)
    }

    pub fn buildkit_config(&self) -> PathBuf {
        self.scratch_dir.join(BUILDKIT_CONFIG)
    }

    /// `{mirror}/{image}`
    pub fn mirrored(&self, image: &str) -> String {
        format!("{}/{}", self.mirror.trim_end_matches('/'), image)
    }
}
