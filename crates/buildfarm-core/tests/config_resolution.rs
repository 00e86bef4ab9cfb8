//! Environment resolution, addon and skip-marker behaviour across modules.

use std::collections::HashMap;
use std::sync::Arc;

use buildfarm_core::config_resolver::{build_env, load_env, test_env};
use buildfarm_core::domain::shlex;
use buildfarm_core::{
    AddonManager, BuildContext, BuildManifest, LegacyManifest, ProcessManifest, Settings,
    SkipGate, Workspace,
};
use buildfarm_ports::fakes::{FixedSourceControl, MemoryConfigStore, RecordingRuntime};
use buildfarm_ports::EnvMap;

fn ctx(vars: &[(&str, &str)]) -> BuildContext {
    let env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    BuildContext::from_lookup(move |k| env.get(k).cloned())
}

fn workspace(dir: &tempfile::TempDir) -> Workspace {
    Workspace::new(dir.path(), &Settings::rooted_at(dir.path()))
}

fn env(pairs: &[(&str, &str)]) -> EnvMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// Build-time environment
// ============================================================================

#[tokio::test]
async fn test_app_build_env_with_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace(&dir);
    ws.write_env_overlay(&env(&[("REDIS_URL", "redis://redis:6379")]))
        .await
        .unwrap();
    let store = MemoryConfigStore::with_values([
        ("/apps/shop/config/SECRET", "s"),
        ("/apps/shop/config/CI", "false"),
        ("/apps/other/config/SECRET", "x"),
    ]);
    let ctx = ctx(&[("APPNAME", "shop"), ("PIPELINE", "0")]);

    let resolved = build_env(&store, &ctx, &ws).await.unwrap();

    assert_eq!(
        resolved,
        env(&[
            ("CI", "false"),
            ("REDIS_URL", "redis://redis:6379"),
            ("SECRET", "s"),
        ])
    );
}

#[tokio::test]
async fn test_review_app_config_overrides_pipeline_config() {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace(&dir);
    let store = MemoryConfigStore::with_values([
        ("/pipelines/shop/config/A", "pipeline"),
        ("/pipelines/shop/config/B", "pipeline"),
        ("/pipelines/shop/review-apps/pr/3/config/B", "review"),
    ]);
    let ctx = ctx(&[
        ("APPNAME", "shop"),
        ("PIPELINE", "1"),
        ("CODEBUILD_SOURCE_VERSION", "pr/3"),
    ]);

    let resolved = build_env(&store, &ctx, &ws).await.unwrap();

    assert_eq!(resolved["A"], "pipeline");
    assert_eq!(resolved["B"], "review");
    assert_eq!(resolved["CI"], "true");
}

#[tokio::test]
async fn test_override_file_beats_pipeline_config() {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace(&dir);
    ws.write_env_overlay(&env(&[("FOO", "override")]))
        .await
        .unwrap();
    let store = MemoryConfigStore::with_values([
        ("/pipelines/shop/config/FOO", "bar"),
        ("/pipelines/shop/review-apps/pr/3/config/FOO", "review"),
    ]);
    let ctx = ctx(&[
        ("APPNAME", "shop"),
        ("PIPELINE", "1"),
        ("CODEBUILD_SOURCE_VERSION", "pr/3"),
    ]);

    let resolved = build_env(&store, &ctx, &ws).await.unwrap();

    assert_eq!(resolved["FOO"], "override");
}

#[tokio::test]
async fn test_store_failure_fails_resolution() {
    let store = MemoryConfigStore::new();
    store.fail_prefix("/apps/shop/config/");

    let result = load_env(&store, &["/apps/shop/config/".to_string()]).await;

    assert!(result.is_err());
}

// ============================================================================
// Test-time environment
// ============================================================================

#[tokio::test]
async fn test_test_env_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace(&dir);
    ws.write_env_overlay(&env(&[("DATABASE_URL", "postgres://db")]))
        .await
        .unwrap();
    let legacy = LegacyManifest::from_json_str(
        r#"{"environments":{"test":{"env":{"LEVEL":"legacy","DATABASE_URL":"sqlite://"}}}}"#,
    )
    .unwrap();
    let manifest = BuildManifest::from_toml_str(
        r#"
[test]
command = "make test"
env = ["LEVEL=manifest"]
"#,
    )
    .unwrap();

    let resolved = test_env(&manifest, &legacy, &ws).await.unwrap();

    assert_eq!(
        resolved,
        env(&[
            ("CI", "true"),
            ("DATABASE_URL", "postgres://db"),
            ("LEVEL", "manifest"),
        ])
    );
}

#[tokio::test]
async fn test_test_env_without_overlay_file() {
    let dir = tempfile::tempdir().unwrap();
    let resolved = test_env(
        &BuildManifest::default(),
        &LegacyManifest::default(),
        &workspace(&dir),
    )
    .await
    .unwrap();
    assert_eq!(resolved, env(&[("CI", "true")]));
}

// ============================================================================
// Addons
// ============================================================================

#[tokio::test]
async fn test_duplicate_addons_start_once() {
    let runtime = RecordingRuntime::new();
    let declared: Vec<String> = [
        "heroku-redis:in-dyno",
        "heroku-postgresql:in-dyno",
        "heroku-redis:in-dyno",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let overlay = AddonManager::new(&runtime, "shop:42")
        .start(&declared)
        .await
        .unwrap();

    let names: Vec<String> = runtime.runs().into_iter().map(|(name, _, _)| name).collect();
    assert_eq!(names, vec!["redis", "db"]);
    assert_eq!(overlay.len(), 2);
    assert_eq!(overlay["REDIS_URL"], "redis://redis:6379");
}

// ============================================================================
// Skip gate
// ============================================================================

#[tokio::test]
async fn test_skip_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let gate = SkipGate::new(workspace(&dir), Arc::new(FixedSourceControl::new("abc")));

    gate.skip("build-1").await.unwrap();
    gate.skip("build-1").await.unwrap();

    assert!(gate.has_marker("build-1").await.unwrap());
    assert!(!gate.has_marker("build-2").await.unwrap());
    let commit = std::fs::read_to_string(dir.path().join("commit.txt")).unwrap();
    assert!(commit.starts_with("commit abc"));
}

#[tokio::test]
async fn test_finish_keeps_existing_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("build.log"), "step 1\n").unwrap();
    let gate = SkipGate::new(workspace(&dir), Arc::new(FixedSourceControl::new("abc")));

    gate.finish().await.unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("build.log")).unwrap(),
        "step 1\n"
    );
    assert!(dir.path().join("test.log").exists());
}

#[tokio::test]
async fn test_finish_without_git_still_touches_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let gate = SkipGate::new(workspace(&dir), Arc::new(FixedSourceControl::broken()));

    assert!(gate.finish().await.is_err());
    assert!(dir.path().join("metadata.toml").exists());
}

// ============================================================================
// Process metadata
// ============================================================================

#[test]
fn test_multi_word_process_command_is_quoted() {
    let text = r#"
[[processes]]
type = "release"
command = ["bin/migrate", "--message", "it's done"]
"#;
    let parsed = ProcessManifest::from_toml_str(text).unwrap();

    let mut manifest = BuildManifest::default();
    parsed.apply_to(&mut manifest);

    let expected = shlex::join(&["bin/migrate", "--message", "it's done"]);
    assert_eq!(manifest.deploy.release_command, expected);
    assert_eq!(
        manifest.to_process_manifest().processes[0].command,
        vec![expected]
    );
}
