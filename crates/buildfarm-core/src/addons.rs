//! Addon container manager.
//!
//! Declared test addons become throwaway containers on the build network, and
//! each contributes one connection-string variable to the env overlay.

use buildfarm_ports::{ContainerRuntime, ContainerSpec, EnvMap};
use tracing::{debug, info};

use crate::domain::error::Result;

/// A recognised in-network addon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addon {
    Redis,
    Postgres,
}

impl Addon {
    pub fn parse(id: &str) -> Option<Self> {
        match id {
            "heroku-redis:in-dyno" => Some(Addon::Redis),
            "heroku-postgresql:in-dyno" => Some(Addon::Postgres),
            _ => None,
        }
    }

    /// Container name, which is also its hostname on the build network.
    pub fn container_name(&self) -> &'static str {
        match self {
            Addon::Redis => "redis",
            Addon::Postgres => "db",
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            Addon::Redis => "redis:alpine",
            Addon::Postgres => "postgres:alpine",
        }
    }

    pub fn spec(&self) -> ContainerSpec {
        let mut spec = ContainerSpec::new(self.image());
        if let Addon::Postgres = self {
            spec.env
                .insert("POSTGRES_PASSWORD".to_string(), "postgres".to_string());
        }
        spec
    }

    /// `(variable, value)` pointing the application at this addon.
    pub fn connection(&self) -> (&'static str, &'static str) {
        match self {
            Addon::Redis => ("REDIS_URL", "redis://redis:6379"),
            Addon::Postgres => (
                "DATABASE_URL",
                "postgres://postgres:postgres@db:5432/postgres",
            ),
        }
    }
}

/// Drop repeated identifiers, keeping first-seen order.
pub fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

pub struct AddonManager<'a> {
    runtime: &'a dyn ContainerRuntime,
    network: &'a str,
}

impl<'a> AddonManager<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, network: &'a str) -> Self {
        Self { runtime, network }
    }

    /// Start one container per recognised addon and return the env overlay.
    ///
    /// Any pull or start failure aborts; nothing is retried.
    pub async fn start(&self, declared: &[String]) -> Result<EnvMap> {
        let mut overlay = EnvMap::new();
        for id in dedupe(declared) {
            let Some(addon) = Addon::parse(&id) else {
                debug!(addon = %id, "ignoring unsupported addon");
                continue;
            };
            info!(addon = %id, container = addon.container_name(), "starting addon");
            self.runtime.pull_image(addon.image()).await?;
            self.runtime
                .run_container(addon.container_name(), self.network, &addon.spec())
                .await?;
            let (key, value) = addon.connection();
            overlay.insert(key.to_string(), value.to_string());
        }
        Ok(overlay)
    }
}
