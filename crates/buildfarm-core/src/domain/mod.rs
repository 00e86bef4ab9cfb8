//! Domain models for Buildfarm.
//!
//! Canonical definitions for the core entities:
//! - `BuildContext`: one pipeline invocation, read from the CI environment
//! - `BuildManifest`: the primary declarative manifest
//! - `LegacyManifest`: the older `app.json` format
//! - `ProcessManifest`: process metadata of a built image
//! - `ReviewAppRecord`: persisted pull-request lifecycle state

pub mod context;
pub mod error;
pub mod legacy;
pub mod manifest;
pub mod process;
pub mod review_app;
pub mod shlex;

// Re-export main types and errors
pub use context::{BuildContext, WebhookEvent};
pub use error::{BuildError, ManifestError, Result};
pub use legacy::{LegacyManifest, LEGACY_MANIFEST_FILE};
pub use manifest::{BuildManifest, BuildSystem, Service, DEFAULT_MANIFEST_FILE};
pub use process::{Process, ProcessManifest, ProcessType};
pub use review_app::{ReviewAppRecord, ReviewAppStatus};
