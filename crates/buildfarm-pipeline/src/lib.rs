//! Buildfarm Pipeline - phase orchestration
//!
//! Turns a checked-out working directory into a published, tested image in
//! three separately invoked phases:
//! - `prebuild`: review-app gate, cache download, credentials, build engine,
//!   build network and addon containers
//! - `build`: Dockerfile or buildpack image build, process metadata, publish
//! - `postbuild`: test command in a container on the build network

mod build;
pub mod markers;
pub mod pipeline;
mod postbuild;
mod prebuild;
pub mod tasks;

// Re-export key types
pub use build::{ImageTags, IMAGE_METADATA_PATH};
pub use pipeline::{Outcome, Phase, PhaseReport, Pipeline, Ports, CACHE_PREFIX};
pub use postbuild::{test_spec, LAUNCHER};
pub use tasks::{TaskGroup, TaskPolicy};
