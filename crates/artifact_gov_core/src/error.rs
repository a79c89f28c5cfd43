use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("failed precondition: {} issue(s)", .0.len())]
    FailedPrecondition(Vec<PreflightIssue>),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation timed out; it may have
    /// partially applied up to its atomicity boundary.
    #[error("outcome unknown: {0}")]
    OutcomeUnknown(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GovernanceError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::InvalidArgument(_) => 400,
            Self::InvalidState(_) => 409,
            Self::FailedPrecondition(_) => 412,
            Self::Conflict(_) => 409,
            Self::OutcomeUnknown(_) => 504,
            Self::Internal(_) => 500,
        }
    }

    /// Stable wire name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::FailedPrecondition(_) => "failed_precondition",
            Self::Conflict(_) => "conflict",
            Self::OutcomeUnknown(_) => "outcome_unknown",
            Self::Internal(_) => "internal",
        }
    }

    /// Only version-counter / pointer collisions and store failures may be
    /// retried by the caller. An unknown outcome must be re-checked first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Internal(_))
    }

    pub fn issues(&self) -> &[PreflightIssue] {
        match self {
            Self::FailedPrecondition(issues) => issues,
            _ => &[],
        }
    }
}

/// Which preflight check produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    TaskBlocker,
    ApprovalIncomplete,
    BatchSizeExceeded,
    BatchWriteLimitExceeded,
    EmptyChangeSet,
    VersionMissing,
    VersionNotPublishable,
    VersionEntityMismatch,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskBlocker => "task_blocker",
            Self::ApprovalIncomplete => "approval_incomplete",
            Self::BatchSizeExceeded => "batch_size_exceeded",
            Self::BatchWriteLimitExceeded => "batch_write_limit_exceeded",
            Self::EmptyChangeSet => "empty_change_set",
            Self::VersionMissing => "version_missing",
            Self::VersionNotPublishable => "version_not_publishable",
            Self::VersionEntityMismatch => "version_entity_mismatch",
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One blocking condition found by the publish preflight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightIssue {
    pub code: IssueCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
}

impl PreflightIssue {
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            item_id: None,
        }
    }

    pub fn for_item(code: IssueCode, item_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            item_id: Some(item_id),
        }
    }
}

impl std::fmt::Display for PreflightIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
