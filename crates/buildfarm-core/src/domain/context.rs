//! Per-invocation build context read from the CI platform environment.

use buildfarm_ports::RegistryCredentials;
use serde::{Deserialize, Serialize};

/// Source-control webhook event that triggered the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEvent {
    PullRequestCreated,
    PullRequestReopened,
    PullRequestUpdated,
    PullRequestMerged,
    PullRequestClosed,
    Push,
    Other(String),
}

impl WebhookEvent {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "PULL_REQUEST_CREATED" => WebhookEvent::PullRequestCreated,
            "PULL_REQUEST_REOPENED" => WebhookEvent::PullRequestReopened,
            "PULL_REQUEST_UPDATED" => WebhookEvent::PullRequestUpdated,
            "PULL_REQUEST_MERGED" => WebhookEvent::PullRequestMerged,
            "PULL_REQUEST_CLOSED" => WebhookEvent::PullRequestClosed,
            "PUSH" => WebhookEvent::Push,
            other => WebhookEvent::Other(other.to_string()),
        }
    }
}

/// Placeholder the parameter store uses for "no value".
const EMPTY_PLACEHOLDER: &str = "~";

/// Immutable description of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub build_id: String,
    pub build_number: String,
    pub source_version: String,
    pub app_name: String,
    /// Target image repository, `host/path`.
    pub docker_repo: String,
    pub artifact_bucket: String,
    pub pipeline: bool,
    /// Set when a review app was explicitly requested for this PR.
    pub create_review_app: bool,
    pub branch: String,
    pub webhook_event: WebhookEvent,
    pub dockerhub_username: String,
    pub dockerhub_access_token: String,
}

impl BuildContext {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a context from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(*k))
                .find(|v| !v.is_empty())
                .unwrap_or_default()
        };

        Self {
            build_id: get("CODEBUILD_BUILD_ID"),
            build_number: get("CODEBUILD_BUILD_NUMBER"),
            source_version: get("CODEBUILD_SOURCE_VERSION"),
            app_name: get("APPNAME"),
            docker_repo: get("DOCKER_REPO"),
            artifact_bucket: get("ARTIFACT_BUCKET"),
            pipeline: get("PIPELINE") == "1",
            create_review_app: get("REVIEW_APP_STATUS") == "created",
            branch: first(&["BRANCH", "CODEBUILD_WEBHOOK_HEAD_REF", "CODEBUILD_SOURCE_VERSION"]),
            webhook_event: match first(&["CODEBUILD_WEBHOOK_EVENT"]).as_str() {
                "" => WebhookEvent::PullRequestUpdated,
                raw => WebhookEvent::parse(raw),
            },
            dockerhub_username: get("DOCKERHUB_USERNAME"),
            dockerhub_access_token: get("DOCKERHUB_ACCESS_TOKEN"),
        }
    }

    /// PR number for `pr/<n>` source versions.
    pub fn pr_number(&self) -> Option<&str> {
        self.source_version.strip_prefix("pr/")
    }

    /// Build id made safe for container and builder names.
    pub fn container_name(&self) -> String {
        self.build_id.replace(':', "-")
    }

    /// Network shared by every container of this build.
    pub fn network_name(&self) -> &str {
        &self.build_id
    }

    /// Registry host of the target repository.
    pub fn registry_host(&self) -> &str {
        self.docker_repo
            .split_once('/')
            .map(|(host, _)| host)
            .unwrap_or(&self.docker_repo)
    }

    /// Third-party registry credentials, if usable.
    pub fn dockerhub_credentials(&self) -> Option<RegistryCredentials> {
        let unset = |v: &str| v.is_empty() || v == EMPTY_PLACEHOLDER;
        if unset(&self.dockerhub_username) || unset(&self.dockerhub_access_token) {
            return None;
        }
        Some(RegistryCredentials::new(
            &self.dockerhub_username,
            &self.dockerhub_access_token,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_from_lookup_reads_platform_variables() {
        let ctx = BuildContext::from_lookup(lookup(&[
            ("APPNAME", "shop"),
            ("CODEBUILD_BUILD_ID", "shop-build:1234"),
            ("CODEBUILD_BUILD_NUMBER", "42"),
            ("CODEBUILD_SOURCE_VERSION", "pr/7"),
            ("CODEBUILD_WEBHOOK_EVENT", "PULL_REQUEST_MERGED"),
            ("PIPELINE", "1"),
            ("REVIEW_APP_STATUS", "created"),
            ("DOCKER_REPO", "123.dkr.ecr.us-east-1.amazonaws.com/shop"),
        ]));

        assert_eq!(ctx.app_name, "shop");
        assert_eq!(ctx.build_number, "42");
        assert!(ctx.pipeline);
        assert!(ctx.create_review_app);
        assert_eq!(ctx.webhook_event, WebhookEvent::PullRequestMerged);
        assert_eq!(ctx.pr_number(), Some("7"));
        assert_eq!(ctx.container_name(), "shop-build-1234");
        assert_eq!(ctx.registry_host(), "123.dkr.ecr.us-east-1.amazonaws.com");
    }

    #[test]
    fn test_branch_fallback_skips_empty_values() {
        let ctx = BuildContext::from_lookup(lookup(&[
            ("BRANCH", ""),
            ("CODEBUILD_WEBHOOK_HEAD_REF", "refs/heads/main"),
            ("CODEBUILD_SOURCE_VERSION", "abc"),
        ]));
        assert_eq!(ctx.branch, "refs/heads/main");
    }

    #[test]
    fn test_pipeline_flag_requires_exact_value() {
        let ctx = BuildContext::from_lookup(lookup(&[("PIPELINE", "true")]));
        assert!(!ctx.pipeline);
        assert_eq!(ctx.webhook_event, WebhookEvent::PullRequestUpdated);
    }

    #[test]
    fn test_dockerhub_placeholder_means_absent() {
        let ctx = BuildContext::from_lookup(lookup(&[
            ("DOCKERHUB_USERNAME", "~"),
            ("DOCKERHUB_ACCESS_TOKEN", "token"),
        ]));
        assert!(ctx.dockerhub_credentials().is_none());

        let ctx = BuildContext::from_lookup(lookup(&[
            ("DOCKERHUB_USERNAME", "bot"),
            ("DOCKERHUB_ACCESS_TOKEN", "token"),
        ]));
        assert_eq!(ctx.dockerhub_credentials().map(|c| c.username), Some("bot".to_string()));
    }
}
