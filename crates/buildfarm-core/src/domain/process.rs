//! Process metadata (`metadata.toml`) written by buildpack builds and
//! derived for Dockerfile builds.

use serde::{Deserialize, Serialize};

use super::error::Result;
use super::manifest::{BuildManifest, Service};
use super::shlex;

/// Process types with a reserved meaning.
pub struct ProcessType;

impl ProcessType {
    pub const RELEASE: &'static str = "release";
}

/// Buildpack whose auxiliary process types are not run as services.
const LEGACY_RUBY_BUILDPACK: &str = "heroku/ruby";
const LEGACY_RUBY_DROPPED: &[&str] = &["rake", "console"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub buildpack_id: String,
}

impl Process {
    /// Shell command line for this process.
    ///
    /// A lone element is returned unchanged since buildpacks already emit a
    /// full command line there; anything longer is quoted and joined.
    pub fn command_string(&self) -> String {
        let argv: Vec<&str> = self
            .command
            .iter()
            .chain(self.args.iter())
            .map(String::as_str)
            .collect();
        match argv.as_slice() {
            [single] => single.to_string(),
            words => shlex::join(words),
        }
    }

    fn is_disabled(&self) -> bool {
        self.buildpack_id == LEGACY_RUBY_BUILDPACK
            && LEGACY_RUBY_DROPPED.contains(&self.kind.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessManifest {
    #[serde(default)]
    pub processes: Vec<Process>,
}

impl ProcessManifest {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn push_command(&mut self, kind: &str, command: &str) {
        self.processes.push(Process {
            kind: kind.to_string(),
            command: vec![command.to_string()],
            ..Process::default()
        });
    }

    /// Replace `manifest`'s services and release command with these processes.
    pub fn apply_to(&self, manifest: &mut BuildManifest) {
        manifest.services.clear();
        for process in &self.processes {
            if process.kind == ProcessType::RELEASE {
                manifest.deploy.release_command = process.command_string();
                continue;
            }
            if process.is_disabled() {
                continue;
            }
            manifest
                .services
                .insert(process.kind.clone(), Service::new(process.command_string()));
        }
    }
}
