//! Integration tests for the three phases against in-memory ports.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use buildfarm_core::{BuildContext, BuildError, BuildManifest, ProcessManifest, Settings};
use buildfarm_pipeline::{Outcome, Phase, Pipeline, Ports, IMAGE_METADATA_PATH, LAUNCHER};
use buildfarm_ports::fakes::{
    FixedSourceControl, MemoryConfigStore, MemoryObjectStore, MemoryStackService,
    RecordingBuildpackEngine, RecordingRuntime, RuntimeCall, StaticRegistryAuth, Transfer,
};
use buildfarm_ports::{EnvMap, PullPolicy, RegistryCredentials};

const REPO: &str = "123.dkr.ecr.us-east-1.amazonaws.com/shop";
const REGISTRY: &str = "123.dkr.ecr.us-east-1.amazonaws.com";

struct Harness {
    dir: tempfile::TempDir,
    config: Arc<MemoryConfigStore>,
    stacks: Arc<MemoryStackService>,
    runtime: Arc<RecordingRuntime>,
    buildpacks: Arc<RecordingBuildpackEngine>,
    objects: Arc<MemoryObjectStore>,
    vars: HashMap<String, String>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let vars = [
            ("APPNAME", "shop"),
            ("ARTIFACT_BUCKET", "artifacts"),
            ("CODEBUILD_BUILD_ID", "shop:42"),
            ("CODEBUILD_BUILD_NUMBER", "42"),
            ("CODEBUILD_SOURCE_VERSION", "main"),
            ("DOCKER_REPO", REPO),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            dir,
            config: Arc::new(MemoryConfigStore::new()),
            stacks: Arc::new(MemoryStackService::new()),
            runtime: Arc::new(RecordingRuntime::new()),
            buildpacks: Arc::new(RecordingBuildpackEngine::new()),
            objects: Arc::new(MemoryObjectStore::new()),
            vars,
        }
    }

    fn var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, contents: &str) {
        std::fs::write(self.root().join(name), contents).unwrap();
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.root().join(name)).unwrap()
    }

    fn settings(&self) -> Settings {
        Settings::rooted_at(self.root())
    }

    async fn pipeline(&self) -> Pipeline {
        let vars = self.vars.clone();
        let ctx = BuildContext::from_lookup(move |k| vars.get(k).cloned());
        let ports = Ports {
            config: self.config.clone(),
            stacks: self.stacks.clone(),
            registry: Arc::new(StaticRegistryAuth::new(RegistryCredentials::new(
                "AWS", "token",
            ))),
            runtime: self.runtime.clone(),
            buildpacks: self.buildpacks.clone(),
            objects: self.objects.clone(),
            scm: Arc::new(FixedSourceControl::new("abc123")),
        };
        Pipeline::load(ctx, self.settings(), ports, self.root())
            .await
            .unwrap()
    }
}

const APP_JSON: &str = r#"{
    "stack": "heroku-22",
    "buildpacks": [{"url": "heroku/python"}],
    "environments": {
        "test": {
            "scripts": {"test": "pytest"},
            "env": {"DJANGO_SETTINGS_MODULE": "shop.settings.test"},
            "addons": ["heroku-redis:in-dyno", "heroku-redis:in-dyno", "papertrail"]
        }
    }
}"#;

const DOCKERFILE_MANIFEST: &str = r#"
[build]
system = "dockerfile"

[deploy]
release_command = "echo release"

[services.web]
command = "echo hi"
"#;

const BUILDPACK_METADATA: &str = r#"
[[processes]]
type = "web"
command = ["gunicorn shop.wsgi"]
buildpack_id = "heroku/python"

[[processes]]
type = "release"
command = ["python", "manage.py", "migrate"]
buildpack_id = "heroku/python"
"#;

// ============================================================================
// Prebuild
// ============================================================================

#[tokio::test]
async fn test_prebuild_buildpack_app() {
    let h = Harness::new();
    h.write("app.json", APP_JSON);
    let pipeline = h.pipeline().await;

    let report = pipeline.run(Phase::Prebuild).await.unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(
        h.runtime.calls(),
        vec![
            RuntimeCall::Login {
                server: Some(REGISTRY.to_string()),
                username: "AWS".to_string(),
            },
            RuntimeCall::Pull("mirror.gcr.io/heroku/builder-classic:22".to_string()),
            RuntimeCall::Pull("mirror.gcr.io/heroku/heroku:22-cnb".to_string()),
            RuntimeCall::CreateNetwork("shop:42".to_string()),
            RuntimeCall::Pull("redis:alpine".to_string()),
            RuntimeCall::Run {
                name: "redis".to_string(),
                network: "shop:42".to_string(),
                spec: buildfarm_core::Addon::Redis.spec(),
            },
        ]
    );

    let overlay: EnvMap =
        serde_json::from_slice(&std::fs::read(h.settings().env_file()).unwrap()).unwrap();
    assert_eq!(overlay["REDIS_URL"], "redis://redis:6379");

    let converted = BuildManifest::from_toml_str(&h.read("buildfarm.toml")).unwrap();
    assert_eq!(converted.build.system, "buildpack");
    assert_eq!(converted.test.command, "pytest");

    assert!(matches!(
        h.objects.transfers().as_slice(),
        [Transfer::Download { bucket, prefix, .. }] if bucket == "artifacts" && prefix == "cache"
    ));
}

#[tokio::test]
async fn test_prebuild_dockerhub_login_when_credentials_present() {
    let h = Harness::new()
        .var("DOCKERHUB_USERNAME", "shopbot")
        .var("DOCKERHUB_ACCESS_TOKEN", "secret");
    let pipeline = h.pipeline().await;

    pipeline.run(Phase::Prebuild).await.unwrap();

    assert_eq!(
        h.runtime.calls()[0],
        RuntimeCall::Login {
            server: None,
            username: "shopbot".to_string(),
        }
    );
}

#[tokio::test]
async fn test_prebuild_dockerhub_placeholder_skips_login() {
    let h = Harness::new()
        .var("DOCKERHUB_USERNAME", "~")
        .var("DOCKERHUB_ACCESS_TOKEN", "~");
    let pipeline = h.pipeline().await;

    pipeline.run(Phase::Prebuild).await.unwrap();

    let logins: Vec<_> = h
        .runtime
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RuntimeCall::Login { .. }))
        .collect();
    assert_eq!(logins.len(), 1);
}

#[tokio::test]
async fn test_prebuild_cache_download_failure_is_tolerated() {
    let h = Harness::new();
    h.objects.fail_download();
    let pipeline = h.pipeline().await;

    let report = pipeline.run(Phase::Prebuild).await.unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(h.objects.transfers().len(), 1);
}

#[tokio::test]
async fn test_prebuild_dockerfile_creates_builder() {
    let h = Harness::new();
    h.write("buildfarm.toml", DOCKERFILE_MANIFEST);
    let pipeline = h.pipeline().await;

    pipeline.run(Phase::Prebuild).await.unwrap();

    let calls = h.runtime.calls();
    assert!(calls.contains(&RuntimeCall::BuilderRunning));
    assert!(calls.contains(&RuntimeCall::CreateBuilder("shop-42".to_string())));
    assert!(h.settings().buildkit_config().exists());
}

#[tokio::test]
async fn test_prebuild_dockerfile_reuses_running_builder() {
    let h = Harness::new();
    h.write("buildfarm.toml", DOCKERFILE_MANIFEST);
    h.runtime.set_builder_running(true);
    let pipeline = h.pipeline().await;

    pipeline.run(Phase::Prebuild).await.unwrap();

    assert!(!h
        .runtime
        .calls()
        .iter()
        .any(|c| matches!(c, RuntimeCall::CreateBuilder(_))));
}

#[tokio::test]
async fn test_prebuild_invalid_manifest_fails_before_side_effects() {
    let h = Harness::new();
    h.write("buildfarm.toml", "[build]\nsystem = \"dockerfile\"\n");
    let pipeline = h.pipeline().await;

    let result = pipeline.run(Phase::Prebuild).await;

    assert!(matches!(result, Err(BuildError::Validation(_))));
    assert!(h.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_prebuild_addon_failure_is_fatal() {
    let h = Harness::new();
    h.write("app.json", APP_JSON);
    h.runtime.fail_on("run:redis");
    let pipeline = h.pipeline().await;

    assert!(pipeline.run(Phase::Prebuild).await.is_err());
    assert!(!h.settings().env_file().exists());
}

#[tokio::test]
async fn test_prebuild_missing_git_dir_is_fatal() {
    let h = Harness::new();
    std::fs::remove_dir(h.root().join(".git")).unwrap();
    let pipeline = h.pipeline().await;

    let result = pipeline.run(Phase::Prebuild).await;

    assert!(matches!(result, Err(BuildError::GitDir(_))));
}

#[tokio::test]
async fn test_prebuild_open_pull_request_is_skipped() {
    let h = Harness::new()
        .var("PIPELINE", "1")
        .var("CODEBUILD_SOURCE_VERSION", "pr/9")
        .var("CODEBUILD_WEBHOOK_EVENT", "PULL_REQUEST_UPDATED");
    let pipeline = h.pipeline().await;

    let report = pipeline.run(Phase::Prebuild).await.unwrap();

    assert_eq!(report.outcome, Outcome::Skipped);
    assert!(h.runtime.calls().is_empty());
    assert!(h.objects.transfers().is_empty());
    assert_eq!(
        h.config.value("/pipelines/shop/review-apps/pr/9").as_deref(),
        Some(r#"{"pull_request":"pr/9","status":"open"}"#)
    );

    // later phases do nothing
    assert_eq!(
        pipeline.run(Phase::Build).await.unwrap().outcome,
        Outcome::Skipped
    );
    assert_eq!(
        pipeline.run(Phase::Postbuild).await.unwrap().outcome,
        Outcome::Skipped
    );
    assert!(h.buildpacks.requests().is_empty());
    assert!(h.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_prebuild_merged_pull_request_tears_down_review_app() {
    let h = Harness::new()
        .var("PIPELINE", "1")
        .var("CODEBUILD_SOURCE_VERSION", "pr/9")
        .var("CODEBUILD_WEBHOOK_EVENT", "PULL_REQUEST_MERGED");
    let h = Harness {
        stacks: Arc::new(MemoryStackService::with_stack("buildfarm-reviewapp-shop9")),
        ..h
    };
    let pipeline = h.pipeline().await;

    let report = pipeline.run(Phase::Prebuild).await.unwrap();

    assert_eq!(report.outcome, Outcome::Skipped);
    assert_eq!(h.stacks.destroyed(), vec!["buildfarm-reviewapp-shop9"]);
}

// ============================================================================
// Build
// ============================================================================

#[tokio::test]
async fn test_build_dockerfile_publishes_build_tag_first() {
    let h = Harness::new();
    h.write("buildfarm.toml", DOCKERFILE_MANIFEST);
    let pipeline = h.pipeline().await;

    let report = pipeline.run(Phase::Build).await.unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    let pushes = h.runtime.pushes();
    assert_eq!(pushes.len(), 3);
    assert_eq!(pushes[0], format!("{REPO}:build-42"));
    assert!(pushes.contains(&format!("{REPO}:abc123")));
    assert!(pushes.contains(&format!("{REPO}:latest")));

    let built = h
        .runtime
        .calls()
        .into_iter()
        .find_map(|c| match c {
            RuntimeCall::BuildImage(request) => Some(request),
            _ => None,
        })
        .unwrap();
    assert_eq!(built.dockerfile, "Dockerfile");
    assert_eq!(built.tags[0], format!("{REPO}:abc123"));

    let processes = ProcessManifest::from_toml_str(&h.read("metadata.toml")).unwrap();
    let kinds: Vec<&str> = processes.processes.iter().map(|p| p.kind.as_str()).collect();
    assert_eq!(kinds, vec!["web", "release"]);

    assert!(h.objects.transfers().contains(&Transfer::Upload {
        local_dir: h.settings().cache_dir,
        bucket: "artifacts".to_string(),
        prefix: "cache".to_string(),
        delete_extraneous: true,
    }));
    assert!(h.read("commit.txt").starts_with("commit abc123"));
}

#[tokio::test]
async fn test_build_buildpack_extracts_process_metadata() {
    let h = Harness::new();
    h.write("app.json", APP_JSON);
    h.config.insert("/apps/shop/config/SECRET_KEY", "s3cret");
    h.runtime.put_file(IMAGE_METADATA_PATH, BUILDPACK_METADATA);
    let pipeline = h.pipeline().await;

    pipeline.run(Phase::Build).await.unwrap();

    let requests = h.buildpacks.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.builder, "heroku/builder-classic:22");
    assert_eq!(request.buildpacks, vec!["heroku/python"]);
    assert_eq!(request.image, format!("{REPO}:abc123"));
    assert_eq!(
        request.additional_tags,
        vec![format!("{REPO}:latest"), format!("{REPO}:build-42")]
    );
    assert_eq!(request.pull_policy, PullPolicy::IfNotPresent);
    assert_eq!(request.env["CI"], "true");
    assert_eq!(request.env["SECRET_KEY"], "s3cret");

    let calls = h.runtime.calls();
    assert!(calls.contains(&RuntimeCall::Create {
        name: "shop-42".to_string(),
        image: format!("{REPO}:abc123"),
    }));
    assert!(calls.contains(&RuntimeCall::Remove("shop-42".to_string())));

    assert_eq!(h.read("metadata.toml"), BUILDPACK_METADATA);
    let manifest = BuildManifest::from_toml_str(&h.read("buildfarm.toml")).unwrap();
    assert_eq!(manifest.services["web"].command, "gunicorn shop.wsgi");
    assert_eq!(manifest.deploy.release_command, "python manage.py migrate");
}

#[tokio::test]
async fn test_build_engine_failure_skips_publish() {
    let h = Harness::new();
    h.buildpacks.fail();
    let pipeline = h.pipeline().await;

    let result = pipeline.run(Phase::Build).await;

    assert!(matches!(result, Err(BuildError::Port(_))));
    assert!(h.runtime.pushes().is_empty());
    assert!(h.objects.transfers().is_empty());
}

#[tokio::test]
async fn test_build_first_push_failure_is_fatal() {
    let h = Harness::new();
    h.write("buildfarm.toml", DOCKERFILE_MANIFEST);
    h.runtime.fail_on(format!("push:{REPO}:build-42"));
    let pipeline = h.pipeline().await;

    let result = pipeline.run(Phase::Build).await;

    assert!(result.is_err());
    assert_eq!(h.runtime.pushes(), vec![format!("{REPO}:build-42")]);
    // the cache upload was already running and is still awaited
    assert_eq!(h.objects.transfers().len(), 1);
}

#[tokio::test]
async fn test_build_cache_upload_failure_is_fatal() {
    let h = Harness::new();
    h.write("buildfarm.toml", DOCKERFILE_MANIFEST);
    h.objects.fail_upload();
    let pipeline = h.pipeline().await;

    let result = pipeline.run(Phase::Build).await;

    assert!(matches!(result, Err(BuildError::Port(_))));
    assert_eq!(h.runtime.pushes().len(), 3);
}

#[tokio::test]
async fn test_build_store_failure_is_fatal() {
    let h = Harness::new();
    h.config.fail_prefix("/apps/shop/config/");
    let pipeline = h.pipeline().await;

    assert!(pipeline.run(Phase::Build).await.is_err());
    assert!(h.buildpacks.requests().is_empty());
}

// ============================================================================
// Postbuild
// ============================================================================

#[tokio::test]
async fn test_postbuild_runs_tests_on_build_network() {
    let h = Harness::new();
    h.write("app.json", APP_JSON);
    h.runtime.set_output("4 passed\n", "");
    let pipeline = h.pipeline().await;
    pipeline
        .workspace()
        .write_env_overlay(&EnvMap::from([(
            "REDIS_URL".to_string(),
            "redis://redis:6379".to_string(),
        )]))
        .await
        .unwrap();

    let report = pipeline.run(Phase::Postbuild).await.unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    let runs = h.runtime.runs();
    assert_eq!(runs.len(), 1);
    let (name, network, spec) = &runs[0];
    assert_eq!(name, "shop-42");
    assert_eq!(network, "shop:42");
    assert_eq!(spec.image, format!("{REPO}:abc123"));
    assert_eq!(spec.entrypoint, Some(vec![LAUNCHER.to_string()]));
    assert_eq!(spec.command, vec!["/bin/sh", "-c", "pytest"]);
    assert_eq!(spec.env["CI"], "true");
    assert_eq!(spec.env["REDIS_URL"], "redis://redis:6379");
    assert_eq!(spec.env["DJANGO_SETTINGS_MODULE"], "shop.settings.test");

    assert_eq!(
        h.runtime.calls().last(),
        Some(&RuntimeCall::Remove("shop-42".to_string()))
    );
    assert_eq!(h.runtime.finished_followers(), 1);
    let log = h.read("test.log");
    assert!(log.starts_with("+ pytest\n"));
    assert!(log.contains("4 passed"));
}

#[tokio::test]
async fn test_postbuild_failing_tests_report_exit_code() {
    let h = Harness::new();
    h.write("buildfarm.toml", "[test]\ncommand = \"make test\"\n");
    h.runtime.set_exit_code(3);
    let pipeline = h.pipeline().await;

    let err = pipeline.run(Phase::Postbuild).await.unwrap_err();

    assert!(err.is_test_failure());
    assert_eq!(err.to_string(), "test failed with exit code 3");
    assert!(h
        .runtime
        .calls()
        .contains(&RuntimeCall::Remove("shop-42".to_string())));
}

#[tokio::test]
async fn test_postbuild_container_removed_when_start_fails() {
    let h = Harness::new();
    h.write("buildfarm.toml", "[test]\ncommand = \"make test\"\n");
    h.runtime.fail_on("run:shop-42");
    let pipeline = h.pipeline().await;

    let err = pipeline.run(Phase::Postbuild).await.unwrap_err();

    assert!(!err.is_test_failure());
    assert_eq!(
        h.runtime.calls().last(),
        Some(&RuntimeCall::Remove("shop-42".to_string()))
    );
}

#[tokio::test]
async fn test_postbuild_without_tests_succeeds() {
    let h = Harness::new();
    let pipeline = h.pipeline().await;

    let report = pipeline.run(Phase::Postbuild).await.unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.phase, Phase::Postbuild);
    assert!(h.runtime.calls().is_empty());
    assert_eq!(h.read("test.log"), "no tests defined\n");
}

// ============================================================================
// Finish
// ============================================================================

#[tokio::test]
async fn test_finish_after_failure_leaves_artifacts() {
    let h = Harness::new();
    h.buildpacks.fail();
    let pipeline = h.pipeline().await;

    assert!(pipeline.run(Phase::Build).await.is_err());
    pipeline.finish().await.unwrap();

    for artifact in ["buildfarm.toml", "build.log", "metadata.toml", "test.log", "commit.txt"] {
        assert!(h.root().join(artifact).exists(), "{artifact} missing");
    }
}
