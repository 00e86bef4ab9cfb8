//! Persisted review-app status of a pull request.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a review app.
///
/// Only `Created` lets a pipeline run past prebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAppStatus {
    #[default]
    #[serde(rename = "")]
    Unset,
    Open,
    Created,
    Merged,
    Closed,
    /// Any status string this version does not recognise.
    #[serde(other)]
    Unknown,
}

impl ReviewAppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAppStatus::Unset => "",
            ReviewAppStatus::Open => "open",
            ReviewAppStatus::Created => "created",
            ReviewAppStatus::Merged => "merged",
            ReviewAppStatus::Closed => "closed",
            ReviewAppStatus::Unknown => "unknown",
        }
    }

    /// Terminal states tear the review app down.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewAppStatus::Merged | ReviewAppStatus::Closed)
    }
}

/// Record stored in the parameter store for each pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAppRecord {
    pub pull_request: String,
    #[serde(default)]
    pub status: ReviewAppStatus,
}

impl ReviewAppRecord {
    pub fn new(pull_request: impl Into<String>, status: ReviewAppStatus) -> Self {
        Self {
            pull_request: pull_request.into(),
            status,
        }
    }
}
