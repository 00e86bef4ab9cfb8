//! Bounded structured concurrency for overlapping external calls.
//!
//! A phase spawns a handful of named tasks, keeps working, and then joins
//! the whole group before it returns. Every task is awaited, including those
//! whose failure will be ignored.

use std::future::Future;

use buildfarm_core::{BuildError, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// How a task's failure affects the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPolicy {
    /// Failure fails the join.
    Required,
    /// Failure is logged at the join point and dropped.
    BestEffort,
}

struct Spawned {
    name: String,
    policy: TaskPolicy,
    handle: JoinHandle<Result<()>>,
}

#[derive(Default)]
pub struct TaskGroup {
    tasks: Vec<Spawned>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, policy: TaskPolicy, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, ?policy, "spawning task");
        self.tasks.push(Spawned {
            name,
            policy,
            handle: tokio::spawn(task),
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task. Returns the first required failure in spawn
    /// order; best-effort failures are only logged.
    pub async fn join(self) -> Result<()> {
        let (meta, handles): (Vec<_>, Vec<_>) = self
            .tasks
            .into_iter()
            .map(|t| ((t.name, t.policy), t.handle))
            .unzip();

        let mut first_failure = None;
        for ((name, policy), joined) in meta.into_iter().zip(join_all(handles).await) {
            let outcome = joined
                .map_err(|e| BuildError::Task {
                    name: name.clone(),
                    message: e.to_string(),
                })
                .and_then(|result| result);
            match (outcome, policy) {
                (Ok(()), _) => debug!(task = %name, "task finished"),
                (Err(e), TaskPolicy::BestEffort) => {
                    warn!(task = %name, error = %e, "best-effort task failed")
                }
                (Err(e), TaskPolicy::Required) => {
                    error!(task = %name, error = %e, "task failed");
                    first_failure.get_or_insert(e);
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
