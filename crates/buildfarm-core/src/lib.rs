//! Buildfarm Core Library
//!
//! Domain model and the stateful building blocks of a pipeline run:
//! configuration resolution, the skip-build gate, the review-app state
//! machine and addon containers.

pub mod addons;
pub mod config_resolver;
pub mod domain;
pub mod review_app;
pub mod settings;
pub mod skip_gate;
pub mod telemetry;
pub mod workspace;

pub use domain::{
    BuildContext, BuildError, BuildManifest, BuildSystem, LegacyManifest, ManifestError,
    Process, ProcessManifest, Result, ReviewAppRecord, ReviewAppStatus, Service, WebhookEvent,
};

pub use addons::{Addon, AddonManager};
pub use review_app::{PrDecision, ReviewAppMachine};
pub use settings::Settings;
pub use skip_gate::SkipGate;
pub use telemetry::init_tracing;
pub use workspace::Workspace;
