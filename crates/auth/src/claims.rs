use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_core::{AuthError, TokenId, UserId};

/// Which of the two credential flavours a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload sealed inside every credential. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
    /// Random per-credential identifier.
    pub id: TokenId,

    /// Subject the credential was issued to.
    pub user_id: UserId,

    #[serde(rename = "type")]
    pub kind: TokenKind,

    pub issued_at: DateTime<Utc>,

    #[serde(rename = "expired_at")]
    pub expires_at: DateTime<Utc>,
}

impl CredentialPayload {
    pub fn new(user_id: UserId, kind: TokenKind, issued_at: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id: TokenId::random(),
            user_id,
            kind,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is invalid")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("invalid token type")]
    WrongType,

    #[error("failed to seal token")]
    Seal,
}

impl From<TokenError> for AuthError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Invalid => AuthError::InvalidToken,
            TokenError::Expired => AuthError::ExpiredToken,
            TokenError::WrongType => AuthError::WrongTokenType,
            TokenError::Seal => AuthError::storage(value),
        }
    }
}

/// Deterministically validate an opened payload.
///
/// Expiry is checked before the kind, so an expired refresh token presented as
/// an access token reports `Expired`.
pub fn validate_payload(
    payload: &CredentialPayload,
    expected: TokenKind,
    now: DateTime<Utc>,
) -> Result<(), TokenError> {
    if payload.is_expired_at(now) {
        return Err(TokenError::Expired);
    }
    if payload.kind != expected {
        return Err(TokenError::WrongType);
    }
    Ok(())
}
