//! Pull-request / review-app state machine.
//!
//! Target status, first matching rule wins:
//!
//! | trigger                                | target    |
//! |----------------------------------------|-----------|
//! | explicit create request                | `created` |
//! | PR created or reopened                 | `open`    |
//! | PR merged                              | `merged`  |
//! | PR closed                              | `closed`  |
//! | anything else, no persisted record     | `open`    |
//! | anything else, record exists           | keep      |
//!
//! Only a `created` review app lets the pipeline continue; every other outcome
//! marks the build skipped.

use buildfarm_ports::{ConfigStore, StackService};
use tracing::{debug, info, warn};

use crate::domain::context::{BuildContext, WebhookEvent};
use crate::domain::error::{BuildError, Result};
use crate::domain::review_app::{ReviewAppRecord, ReviewAppStatus};
use crate::skip_gate::SkipGate;

/// Outcome of the review-app gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrDecision {
    Continue,
    Skip,
}

/// Status forced by the trigger itself, if any.
pub fn explicit_target(ctx: &BuildContext) -> Option<ReviewAppStatus> {
    if ctx.create_review_app {
        return Some(ReviewAppStatus::Created);
    }
    match ctx.webhook_event {
        WebhookEvent::PullRequestCreated | WebhookEvent::PullRequestReopened => {
            Some(ReviewAppStatus::Open)
        }
        WebhookEvent::PullRequestMerged => Some(ReviewAppStatus::Merged),
        WebhookEvent::PullRequestClosed => Some(ReviewAppStatus::Closed),
        _ => None,
    }
}

/// Parameter holding the record for this pull request.
pub fn record_name(ctx: &BuildContext) -> String {
    format!("/pipelines/{}/review-apps/{}", ctx.app_name, ctx.source_version)
}

/// Stack backing this pull request's review app.
pub fn stack_name(ctx: &BuildContext, stack_prefix: &str) -> String {
    format!(
        "{}-reviewapp-{}{}",
        stack_prefix,
        ctx.app_name,
        ctx.pr_number().unwrap_or_default()
    )
}

/// Drives the review-app lifecycle for one pipeline invocation.
pub struct ReviewAppMachine<'a> {
    ctx: &'a BuildContext,
    store: &'a dyn ConfigStore,
    stacks: &'a dyn StackService,
    gate: &'a SkipGate,
    stack_prefix: &'a str,
}

impl<'a> ReviewAppMachine<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        store: &'a dyn ConfigStore,
        stacks: &'a dyn StackService,
        gate: &'a SkipGate,
        stack_prefix: &'a str,
    ) -> Self {
        Self {
            ctx,
            store,
            stacks,
            gate,
            stack_prefix,
        }
    }

    /// Apply the lifecycle rules and decide whether the build continues.
    pub async fn evaluate(&self) -> Result<PrDecision> {
        if !self.ctx.pipeline {
            return Ok(PrDecision::Continue);
        }
        if self.ctx.pr_number().is_none() {
            return Err(BuildError::NotPullRequest {
                source_version: self.ctx.source_version.clone(),
            });
        }

        let target = explicit_target(self.ctx);
        debug!(pr = %self.ctx.source_version, target = ?target, "review app target");

        match target {
            Some(status) if status.is_terminal() => {
                self.tear_down().await?;
                self.skip().await
            }
            Some(ReviewAppStatus::Created) => {
                let persisted = self.read_record().await?;
                let current = match persisted {
                    Some(record) if record.status == ReviewAppStatus::Created => record,
                    _ => self.write_status(ReviewAppStatus::Created).await?,
                };
                if current.status == ReviewAppStatus::Created {
                    Ok(PrDecision::Continue)
                } else {
                    self.skip().await
                }
            }
            Some(status) => {
                let persisted = self.read_record().await?;
                if persisted.map(|r| r.status) != Some(status) {
                    self.write_status(status).await?;
                }
                self.skip().await
            }
            None => match self.read_record().await? {
                None => {
                    self.write_status(ReviewAppStatus::Open).await?;
                    self.skip().await
                }
                Some(record) if record.status == ReviewAppStatus::Created => {
                    Ok(PrDecision::Continue)
                }
                Some(record) => {
                    debug!(status = record.status.as_str(), "keeping review app status");
                    self.skip().await
                }
            },
        }
    }

    async fn skip(&self) -> Result<PrDecision> {
        self.gate.skip(&self.ctx.build_id).await?;
        Ok(PrDecision::Skip)
    }

    /// Persisted record. A missing or malformed record counts as absent; any
    /// other store failure is an error.
    pub async fn read_record(&self) -> Result<Option<ReviewAppRecord>> {
        let name = record_name(self.ctx);
        let raw = match self.store.get_value(&name).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                debug!(parameter = %name, "no review app record");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(parameter = %name, error = %e, "ignoring malformed review app record");
                Ok(None)
            }
        }
    }

    async fn write_status(&self, status: ReviewAppStatus) -> Result<ReviewAppRecord> {
        let record = ReviewAppRecord::new(self.ctx.source_version.clone(), status);
        let name = record_name(self.ctx);
        info!(parameter = %name, status = status.as_str(), "updating review app status");
        self.store
            .set_value(&name, &serde_json::to_string(&record)?)
            .await?;
        Ok(record)
    }

    /// Destroy the review-app stack if it exists. Lookup failures count as
    /// "no stack"; destroy failures are fatal.
    async fn tear_down(&self) -> Result<()> {
        let stack = stack_name(self.ctx, self.stack_prefix);
        let exists = match self.stacks.describe(&stack).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!(stack = %stack, error = %e, "unable to access review app stack");
                false
            }
        };
        if exists {
            info!(stack = %stack, pr = %self.ctx.source_version, "deleting review app");
            self.stacks.destroy(&stack).await?;
        }
        Ok(())
    }
}
