//! In-memory fakes for the ports (testing only)
//!
//! Provides `MemoryConfigStore`, `MemoryStackService`, `StaticRegistryAuth`,
//! `RecordingRuntime`, `RecordingBuildpackEngine`, `MemoryObjectStore` and
//! `FixedSourceControl`. Each satisfies its trait contract without external
//! dependencies and records what it was asked to do so tests can assert on
//! call order and count. Failures are injected per operation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::{PortError, PortResult};
use crate::ports::*;

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

/// Parameter store backed by a `BTreeMap<full name, value>`.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<BTreeMap<String, String>>,
    failing_prefixes: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<(String, String)>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (k, v) in values {
            store.insert(k, v);
        }
        store
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .lock()
            .unwrap()
            .insert(name.into(), value.into());
    }

    /// Current value of a parameter, bypassing failure injection.
    pub fn value(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }

    /// Every `set_value` call that succeeded, in order.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap().clone()
    }

    /// Make `get_by_prefix(prefix)` fail.
    pub fn fail_prefix(&self, prefix: impl Into<String>) {
        self.failing_prefixes.lock().unwrap().insert(prefix.into());
    }

    /// Make `get_value` fail with `Unavailable`.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Make `set_value` fail with `Unavailable`.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_by_prefix(&self, prefix: &str) -> PortResult<EnvMap> {
        if self.failing_prefixes.lock().unwrap().contains(prefix) {
            return Err(PortError::unavailable("config store", format!("cannot list {prefix}")));
        }
        let values = self.values.lock().unwrap();
        Ok(values
            .iter()
            .filter_map(|(name, value)| {
                let key = name.strip_prefix(prefix)?;
                (!key.is_empty() && !key.contains('/')).then(|| (key.to_string(), value.clone()))
            })
            .collect())
    }

    async fn get_value(&self, name: &str) -> PortResult<String> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PortError::unavailable("config store", "read refused"));
        }
        self.values
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| PortError::not_found(name))
    }

    async fn set_value(&self, name: &str, value: &str) -> PortResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::unavailable("config store", "write refused"));
        }
        self.insert(name, value);
        self.writes
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStackService
// ---------------------------------------------------------------------------

/// Stack service backed by a set of live stack names.
#[derive(Debug, Default)]
pub struct MemoryStackService {
    stacks: Mutex<BTreeSet<String>>,
    destroyed: Mutex<Vec<String>>,
    fail_describe: AtomicBool,
    fail_destroy: AtomicBool,
}

impl MemoryStackService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(name: impl Into<String>) -> Self {
        let service = Self::new();
        service.stacks.lock().unwrap().insert(name.into());
        service
    }

    /// Names passed to `destroy`, in call order.
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn fail_describe(&self) {
        self.fail_describe.store(true, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self) {
        self.fail_destroy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StackService for MemoryStackService {
    async fn describe(&self, name: &str) -> PortResult<StackSummary> {
        if self.fail_describe.load(Ordering::SeqCst) {
            return Err(PortError::unavailable("stack service", "describe refused"));
        }
        if self.stacks.lock().unwrap().contains(name) {
            Ok(StackSummary {
                name: name.to_string(),
                status: "CREATE_COMPLETE".to_string(),
            })
        } else {
            Err(PortError::not_found(format!("stack {name}")))
        }
    }

    async fn destroy(&self, name: &str) -> PortResult<()> {
        self.destroyed.lock().unwrap().push(name.to_string());
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(PortError::unavailable("stack service", "destroy refused"));
        }
        self.stacks.lock().unwrap().remove(name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticRegistryAuth
// ---------------------------------------------------------------------------

/// Registry auth that always hands out the same credentials (or always fails).
#[derive(Debug, Clone)]
pub struct StaticRegistryAuth {
    credentials: Option<RegistryCredentials>,
}

impl StaticRegistryAuth {
    pub fn new(credentials: RegistryCredentials) -> Self {
        Self {
            credentials: Some(credentials),
        }
    }

    pub fn failing() -> Self {
        Self { credentials: None }
    }
}

#[async_trait]
impl RegistryAuth for StaticRegistryAuth {
    async fn exchange_login(&self) -> PortResult<RegistryCredentials> {
        self.credentials
            .clone()
            .ok_or_else(|| PortError::unavailable("registry auth", "token exchange refused"))
    }
}

// ---------------------------------------------------------------------------
// RecordingRuntime
// ---------------------------------------------------------------------------

/// One call made against a `RecordingRuntime`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Login {
        server: Option<String>,
        username: String,
    },
    CreateNetwork(String),
    Pull(String),
    Push(String),
    Create {
        name: String,
        image: String,
    },
    Run {
        name: String,
        network: String,
        spec: ContainerSpec,
    },
    ReadFile {
        container: String,
        path: String,
    },
    Wait(String),
    Logs(String),
    Remove(String),
    BuildImage(DockerBuildRequest),
    BuilderRunning,
    CreateBuilder(String),
}

/// Container runtime that records calls and serves canned files, logs and
/// exit codes. Container ids equal container names.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    failures: Mutex<HashSet<String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
    exit_code: AtomicI64,
    builder_running: AtomicBool,
    followers_done: Arc<AtomicUsize>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Images pushed, in the order the pushes started.
    pub fn pushes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Push(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    /// `Run` calls, in order.
    pub fn runs(&self) -> Vec<(String, String, ContainerSpec)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Run {
                    name,
                    network,
                    spec,
                } => Some((name, network, spec)),
                _ => None,
            })
            .collect()
    }

    /// Inject a failure. `op` is either an operation name (`"push"`, `"run"`,
    /// `"pull"`, `"build_image"`, `"create_network"`, `"login"`, `"wait"`, ...)
    /// or `"<op>:<subject>"` to fail only for one image/container.
    pub fn fail_on(&self, op: impl Into<String>) {
        self.failures.lock().unwrap().insert(op.into());
    }

    /// Serve `contents` for `read_file(_, path)`.
    pub fn put_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), contents.into());
    }

    pub fn set_output(&self, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) {
        *self.stdout.lock().unwrap() = stdout.into();
        *self.stderr.lock().unwrap() = stderr.into();
    }

    pub fn set_exit_code(&self, code: i64) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub fn set_builder_running(&self, running: bool) {
        self.builder_running.store(running, Ordering::SeqCst);
    }

    /// Log followers that have been awaited to completion.
    pub fn finished_followers(&self) -> usize {
        self.followers_done.load(Ordering::SeqCst)
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: &str, subject: &str) -> PortResult<()> {
        let failures = self.failures.lock().unwrap();
        if failures.contains(op) || failures.contains(&format!("{op}:{subject}")) {
            return Err(PortError::CommandFailed {
                program: "docker".to_string(),
                code: 1,
                stderr: format!("injected {op} failure for {subject}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn login(
        &self,
        server: Option<&str>,
        credentials: &RegistryCredentials,
    ) -> PortResult<()> {
        self.record(RuntimeCall::Login {
            server: server.map(str::to_string),
            username: credentials.username.clone(),
        });
        self.check("login", server.unwrap_or("default"))
    }

    async fn create_network(&self, name: &str) -> PortResult<()> {
        self.record(RuntimeCall::CreateNetwork(name.to_string()));
        self.check("create_network", name)
    }

    async fn pull_image(&self, image: &str) -> PortResult<()> {
        self.record(RuntimeCall::Pull(image.to_string()));
        self.check("pull", image)
    }

    async fn push_image(&self, image: &str) -> PortResult<()> {
        self.record(RuntimeCall::Push(image.to_string()));
        self.check("push", image)
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> PortResult<String> {
        self.record(RuntimeCall::Create {
            name: name.to_string(),
            image: spec.image.clone(),
        });
        self.check("create", name)?;
        Ok(name.to_string())
    }

    async fn run_container(
        &self,
        name: &str,
        network: &str,
        spec: &ContainerSpec,
    ) -> PortResult<String> {
        self.record(RuntimeCall::Run {
            name: name.to_string(),
            network: network.to_string(),
            spec: spec.clone(),
        });
        self.check("run", name)?;
        Ok(name.to_string())
    }

    async fn read_file(&self, container: &str, path: &str) -> PortResult<Vec<u8>> {
        self.record(RuntimeCall::ReadFile {
            container: container.to_string(),
            path: path.to_string(),
        });
        self.check("read_file", path)?;
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("{container}:{path}")))
    }

    async fn wait(&self, container: &str) -> PortResult<i64> {
        self.record(RuntimeCall::Wait(container.to_string()));
        self.check("wait", container)?;
        Ok(self.exit_code.load(Ordering::SeqCst))
    }

    async fn logs(&self, container: &str) -> PortResult<LogStreams> {
        self.record(RuntimeCall::Logs(container.to_string()));
        self.check("logs", container)?;
        let stdout = self.stdout.lock().unwrap().clone();
        let stderr = self.stderr.lock().unwrap().clone();
        Ok(LogStreams {
            stdout: Box::new(std::io::Cursor::new(stdout)),
            stderr: Box::new(std::io::Cursor::new(stderr)),
            follower: {
                let done = Arc::clone(&self.followers_done);
                async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), PortError>(())
                }
                .boxed()
            },
        })
    }

    async fn remove_container(&self, container: &str) -> PortResult<()> {
        self.record(RuntimeCall::Remove(container.to_string()));
        self.check("remove", container)
    }

    async fn build_image(&self, request: &DockerBuildRequest) -> PortResult<()> {
        self.record(RuntimeCall::BuildImage(request.clone()));
        self.check("build_image", &request.dockerfile)
    }

    async fn builder_running(&self) -> PortResult<bool> {
        self.record(RuntimeCall::BuilderRunning);
        self.check("builder_running", "inspect")?;
        Ok(self.builder_running.load(Ordering::SeqCst))
    }

    async fn create_builder(&self, name: &str, _config_file: &Path) -> PortResult<()> {
        self.record(RuntimeCall::CreateBuilder(name.to_string()));
        self.check("create_builder", name)
    }
}

// ---------------------------------------------------------------------------
// RecordingBuildpackEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingBuildpackEngine {
    requests: Mutex<Vec<BuildpackRequest>>,
    fail: AtomicBool,
}

impl RecordingBuildpackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<BuildpackRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BuildpackEngine for RecordingBuildpackEngine {
    async fn build(&self, request: &BuildpackRequest) -> PortResult<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::CommandFailed {
                program: "pack".to_string(),
                code: 1,
                stderr: "injected build failure".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

/// One completed transfer against a `MemoryObjectStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Download {
        bucket: String,
        prefix: String,
        local_dir: PathBuf,
    },
    Upload {
        local_dir: PathBuf,
        bucket: String,
        prefix: String,
        delete_extraneous: bool,
    },
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    transfers: Mutex<Vec<Transfer>>,
    fail_download: AtomicBool,
    fail_upload: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn fail_download(&self) {
        self.fail_download.store(true, Ordering::SeqCst);
    }

    pub fn fail_upload(&self) {
        self.fail_upload.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        local_dir: &Path,
    ) -> PortResult<()> {
        self.transfers.lock().unwrap().push(Transfer::Download {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            local_dir: local_dir.to_path_buf(),
        });
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(PortError::unavailable("object store", "download refused"));
        }
        Ok(())
    }

    async fn upload_dir(
        &self,
        local_dir: &Path,
        bucket: &str,
        prefix: &str,
        delete_extraneous: bool,
    ) -> PortResult<()> {
        self.transfers.lock().unwrap().push(Transfer::Upload {
            local_dir: local_dir.to_path_buf(),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            delete_extraneous,
        });
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(PortError::unavailable("object store", "upload refused"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FixedSourceControl
// ---------------------------------------------------------------------------

/// Source control that reports a fixed revision.
#[derive(Debug, Clone)]
pub struct FixedSourceControl {
    sha: Option<String>,
}

impl FixedSourceControl {
    pub fn new(sha: impl Into<String>) -> Self {
        Self {
            sha: Some(sha.into()),
        }
    }

    /// A checkout with no readable revision.
    pub fn broken() -> Self {
        Self { sha: None }
    }
}

#[async_trait]
impl SourceControl for FixedSourceControl {
    async fn head_sha(&self) -> PortResult<String> {
        self.sha
            .clone()
            .ok_or_else(|| PortError::not_found("HEAD revision"))
    }

    async fn describe_head(&self) -> PortResult<Vec<u8>> {
        let sha = self.head_sha().await?;
        let text = format!("commit {sha}\nAuthor: Test <test@example.com>\n\n    test commit\n");
        Ok(text.into_bytes())
    }
}
