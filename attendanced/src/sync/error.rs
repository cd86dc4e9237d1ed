use std::fmt;
use std::time::Duration;

use attendance_core::{ApiErrorClass, CloudError};
use serde::Serialize;
use thiserror::Error;

use super::store::StoreError;

/// Stable codes surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorCode {
    Unauthenticated,
    PermissionDenied,
    NotFound,
    RateLimited,
    Unavailable,
    InvalidResponse,
    Rejected,
}

impl SyncErrorCode {
    pub fn from_cloud(err: &CloudError) -> Self {
        match err {
            CloudError::Request(source) if source.is_decode() => SyncErrorCode::InvalidResponse,
            CloudError::Request(_) => SyncErrorCode::Unavailable,
            CloudError::Url(_) | CloudError::CannotBeABase => SyncErrorCode::Rejected,
            CloudError::Api { .. } => match err.classification() {
                Some(ApiErrorClass::Auth) => SyncErrorCode::Unauthenticated,
                Some(ApiErrorClass::PermissionDenied) => SyncErrorCode::PermissionDenied,
                Some(ApiErrorClass::NotFound) => SyncErrorCode::NotFound,
                Some(ApiErrorClass::RateLimit) => SyncErrorCode::RateLimited,
                Some(ApiErrorClass::Transient) => SyncErrorCode::Unavailable,
                Some(ApiErrorClass::Permanent) | None => SyncErrorCode::Rejected,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorCode::Unauthenticated => "unauthenticated",
            SyncErrorCode::PermissionDenied => "permission_denied",
            SyncErrorCode::NotFound => "not_found",
            SyncErrorCode::RateLimited => "rate_limited",
            SyncErrorCode::Unavailable => "unavailable",
            SyncErrorCode::InvalidResponse => "invalid_response",
            SyncErrorCode::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no authenticated user")]
    Auth,
    #[error("no write permission on tracker {tracker_id} owned by {owner_id}")]
    PermissionDenied { owner_id: String, tracker_id: String },
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("remote store error ({code}): {source}")]
    Remote {
        code: SyncErrorCode,
        #[source]
        source: CloudError,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("local store error: {0}")]
    Store(StoreError),
    #[error("not found: {0}")]
    NotFound(String),
}

impl SyncError {
    pub fn remote(source: CloudError) -> Self {
        SyncError::Remote {
            code: SyncErrorCode::from_cloud(&source),
            source,
        }
    }

    pub fn code(&self) -> SyncErrorCode {
        match self {
            SyncError::Auth => SyncErrorCode::Unauthenticated,
            SyncError::PermissionDenied { .. } => SyncErrorCode::PermissionDenied,
            SyncError::NetworkUnavailable => SyncErrorCode::Unavailable,
            SyncError::Remote { code, .. } => *code,
            SyncError::Validation(_) | SyncError::Store(_) => SyncErrorCode::Rejected,
            SyncError::NotFound(_) => SyncErrorCode::NotFound,
        }
    }

    /// Only transport failures and transient server answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { source, .. } => source.is_retryable(),
            SyncError::NetworkUnavailable => true,
            _ => false,
        }
    }

    /// How long the remote store asked us to wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Remote { source, .. } => source.retry_after_secs().map(Duration::from_secs),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => SyncError::Validation(message),
            other => SyncError::Store(other),
        }
    }
}
