//! Error taxonomy shared by every warden crate.

use thiserror::Error;

/// Result type used across the service layer.
pub type AuthResult<T> = Result<T, AuthError>;

/// Domain-level error returned to callers.
///
/// Every variant except `Storage` is a distinguishable sentinel that callers map
/// to their own transport (401/403/404/409/429...). `Storage` carries the
/// lower-layer cause as its `source()` but never renders it in `Display`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email already exists")]
    EmailExists,

    #[error("token is invalid")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("invalid token type")]
    WrongTokenType,

    #[error("session does not belong to token subject")]
    SessionMismatch,

    #[error("session not found")]
    SessionNotFound,

    #[error("user is not a member of the workspace")]
    NotMember,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid role")]
    InvalidRole,

    #[error("workspace not found")]
    WorkspaceNotFound,

    #[error("owner cannot leave workspace, delete it instead")]
    OwnerCannotLeave,

    #[error("user not found")]
    UserNotFound,

    #[error("user is already a member")]
    AlreadyMember,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("request was cancelled or timed out")]
    ContextCancelled,

    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap an unexpected lower-layer error.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }

    /// Stable machine-readable code for transport mapping.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailExists => "email_exists",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::WrongTokenType => "wrong_token_type",
            AuthError::SessionMismatch => "session_mismatch",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::NotMember => "not_member",
            AuthError::Forbidden => "forbidden",
            AuthError::InvalidRole => "invalid_role",
            AuthError::WorkspaceNotFound => "workspace_not_found",
            AuthError::OwnerCannotLeave => "owner_cannot_leave",
            AuthError::UserNotFound => "user_not_found",
            AuthError::AlreadyMember => "already_member",
            AuthError::Validation(_) => "validation_error",
            AuthError::RateLimited => "rate_limited",
            AuthError::ContextCancelled => "context_cancelled",
            AuthError::Storage(_) => "storage_failure",
        }
    }

    /// Errors that mean "the presented credential is not acceptable".
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::InvalidToken
                | AuthError::ExpiredToken
                | AuthError::WrongTokenType
                | AuthError::SessionMismatch
                | AuthError::SessionNotFound
        )
    }
}
