//! Port implementations backed by vendor command-line tools.

mod command;

pub mod aws;
pub mod docker;
pub mod git;
pub mod pack;

pub use aws::AwsCli;
pub use docker::DockerCli;
pub use git::GitCli;
pub use pack::PackCli;
