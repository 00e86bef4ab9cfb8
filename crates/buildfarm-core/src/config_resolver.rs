//! Configuration resolver.
//!
//! Environment maps are built by overlaying an ordered list of layers: later
//! layers replace keys from earlier ones. Layer order is fixed per use:
//!
//! | env        | layers (lowest precedence first)                                  |
//! |------------|-------------------------------------------------------------------|
//! | build-time | `CI=true`, each store prefix in path order, addon overlay file    |
//! | test-time  | `CI=true`, legacy test env, manifest `[test] env`, addon overlay  |

use buildfarm_ports::{ConfigStore, EnvMap};
use tracing::{debug, info};

use crate::domain::context::BuildContext;
use crate::domain::error::Result;
use crate::domain::legacy::LegacyManifest;
use crate::domain::manifest::BuildManifest;
use crate::workspace::Workspace;

/// Baseline present in every resolved environment.
pub fn baseline() -> EnvMap {
    EnvMap::from([("CI".to_string(), "true".to_string())])
}

/// Merge `layers` in order; later layers win on key collision.
pub fn overlay<I>(layers: I) -> EnvMap
where
    I: IntoIterator<Item = EnvMap>,
{
    layers.into_iter().fold(EnvMap::new(), |mut acc, layer| {
        acc.extend(layer);
        acc
    })
}

/// Parameter-store prefixes for `ctx`, most specific last.
pub fn config_paths(ctx: &BuildContext) -> Vec<String> {
    if ctx.pipeline {
        vec![
            format!("/pipelines/{}/config/", ctx.app_name),
            format!(
                "/pipelines/{}/review-apps/{}/config/",
                ctx.app_name, ctx.source_version
            ),
        ]
    } else {
        vec![format!("/apps/{}/config/", ctx.app_name)]
    }
}

fn strip_prefix(prefix: &str, values: EnvMap) -> EnvMap {
    values
        .into_iter()
        .map(|(name, value)| match name.strip_prefix(prefix) {
            Some(rest) => (rest.to_string(), value),
            None => (name, value),
        })
        .collect()
}

/// Fetch every prefix and overlay them in order. Any store failure fails the
/// whole call.
pub async fn load_env(store: &dyn ConfigStore, paths: &[String]) -> Result<EnvMap> {
    let mut layers = Vec::with_capacity(paths.len());
    for prefix in paths {
        let values = store.get_by_prefix(prefix).await?;
        debug!(prefix = %prefix, count = values.len(), "loaded config layer");
        layers.push(strip_prefix(prefix, values));
    }
    Ok(overlay(layers))
}

async fn override_layer(workspace: &Workspace) -> Result<EnvMap> {
    match workspace.read_env_overlay().await? {
        Some(env) => Ok(env),
        None => {
            info!("no env overlay file; continuing without overrides");
            Ok(EnvMap::new())
        }
    }
}

/// Build-time environment.
pub async fn build_env(
    store: &dyn ConfigStore,
    ctx: &BuildContext,
    workspace: &Workspace,
) -> Result<EnvMap> {
    let stored = load_env(store, &config_paths(ctx)).await?;
    let overrides = override_layer(workspace).await?;
    Ok(overlay([baseline(), stored, overrides]))
}

/// Test-time environment.
pub async fn test_env(
    manifest: &BuildManifest,
    legacy: &LegacyManifest,
    workspace: &Workspace,
) -> Result<EnvMap> {
    let overrides = override_layer(workspace).await?;
    Ok(overlay([
        baseline(),
        legacy.test_env(),
        manifest.test_env(),
        overrides,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ctx(pipeline: bool) -> BuildContext {
        BuildContext::from_lookup(|k| match k {
            "APPNAME" => Some("shop".to_string()),
            "CODEBUILD_SOURCE_VERSION" => Some("pr/7".to_string()),
            "PIPELINE" => Some(if pipeline { "1" } else { "0" }.to_string()),
            _ => None,
        })
    }

    #[test]
    fn test_overlay_later_wins() {
        let merged = overlay([
            env(&[("A", "1"), ("B", "1")]),
            env(&[("B", "2")]),
            env(&[("C", "3")]),
        ]);
        assert_eq!(merged, env(&[("A", "1"), ("B", "2"), ("C", "3")]));
    }

    #[test]
    fn test_overlay_is_deterministic() {
        let layers = || vec![env(&[("X", "a")]), env(&[("X", "b"), ("Y", "c")])];
        assert_eq!(overlay(layers()), overlay(layers()));
    }

    #[test]
    fn test_config_paths_app() {
        assert_eq!(config_paths(&ctx(false)), vec!["/apps/shop/config/"]);
    }

    #[test]
    fn test_config_paths_pipeline_order() {
        assert_eq!(
            config_paths(&ctx(true)),
            vec![
                "/pipelines/shop/config/",
                "/pipelines/shop/review-apps/pr/7/config/",
            ]
        );
    }

    #[test]
    fn test_strip_prefix_is_idempotent() {
        let stripped = strip_prefix(
            "/apps/shop/config/",
            env(&[("/apps/shop/config/A", "1"), ("B", "2")]),
        );
        assert_eq!(stripped, env(&[("A", "1"), ("B", "2")]));
    }
}
