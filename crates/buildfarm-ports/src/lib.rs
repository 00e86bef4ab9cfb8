//! Buildfarm-Ports: External Collaborators for Buildfarm
//!
//! This crate defines the capability interfaces a pipeline run needs from the
//! outside world, in-memory fakes for tests, and adapters that drive the
//! vendor command-line tools.
//!
//! ## Layer 0 - Capabilities
//!
//! Focus: narrow async traits, no pipeline policy.
//!
//! ## Key Components
//!
//! - `ports`: `ConfigStore`, `StackService`, `RegistryAuth`, `ContainerRuntime`,
//!   `BuildpackEngine`, `ObjectStore`, `SourceControl`
//! - `cli`: `aws`, `docker`, `pack` and `git` backed implementations
//! - `fakes`: recording in-memory implementations

pub mod cli;
mod error;
pub mod fakes;
pub mod io;
pub mod ports;

pub use error::{PortError, PortResult};
pub use ports::{
    BuildpackEngine, BuildpackRequest, ConfigStore, ContainerRuntime, ContainerSpec,
    DockerBuildRequest, EnvMap, LogStreams, ObjectStore, PullPolicy, RegistryAuth,
    RegistryCredentials, SourceControl, StackService, StackSummary,
};
