//! Credential issuer: seals [`CredentialPayload`]s into opaque bearer tokens.
//!
//! Tokens have the shape `wd1.local.<base64url(nonce || ciphertext)>`. The body is
//! the JSON payload encrypted with XChaCha20-Poly1305 under a fixed 32-byte key,
//! with the version header bound as associated data. The issuer holds no mutable
//! state and performs no I/O, so one instance is shared by every request thread.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

use warden_core::UserId;

use crate::claims::{CredentialPayload, TokenError, TokenKind, validate_payload};

const HEADER: &str = "wd1.local.";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Key material
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key size: must be exactly {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// 32-byte symmetric key, wiped from memory on drop.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; 32]>);

impl SymmetricKey {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != Self::LEN {
            return Err(KeyError::InvalidLength {
                expected: Self::LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl core::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuer
// ─────────────────────────────────────────────────────────────────────────────

/// Lifetimes of the two credential kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssuerError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("{kind} token lifetime must be positive and representable")]
    InvalidTtl { kind: TokenKind },
}

/// A freshly minted credential and the payload sealed inside it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub payload: CredentialPayload,
}

pub struct CredentialIssuer {
    key: SymmetricKey,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

impl CredentialIssuer {
    pub fn new(key: SymmetricKey, config: TokenConfig) -> Result<Self, IssuerError> {
        Ok(Self {
            key,
            access_ttl: to_chrono(config.access_ttl, TokenKind::Access)?,
            refresh_ttl: to_chrono(config.refresh_ttl, TokenKind::Refresh)?,
        })
    }

    /// Build from raw key bytes; fails unless exactly 32 bytes are given.
    pub fn from_key_bytes(key: &[u8], config: TokenConfig) -> Result<Self, IssuerError> {
        Self::new(SymmetricKey::from_bytes(key)?, config)
    }

    pub fn access_ttl(&self) -> chrono::Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, user_id: UserId) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, TokenKind::Access, Utc::now())
    }

    pub fn issue_refresh(&self, user_id: UserId) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, TokenKind::Refresh, Utc::now())
    }

    pub fn verify_access(&self, token: &str) -> Result<CredentialPayload, TokenError> {
        self.verify_at(token, TokenKind::Access, Utc::now())
    }

    pub fn verify_refresh(&self, token: &str) -> Result<CredentialPayload, TokenError> {
        self.verify_at(token, TokenKind::Refresh, Utc::now())
    }

    /// Mint a credential with an explicit issuance time.
    pub fn issue_at(
        &self,
        user_id: UserId,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let payload = CredentialPayload::new(user_id, kind, now, ttl);
        let token = self.seal(&payload)?;
        Ok(IssuedToken { token, payload })
    }

    /// Open and validate a credential against an explicit clock.
    ///
    /// Any envelope or decoding failure is `Invalid`; only then are expiry and
    /// kind checked, in that order.
    pub fn verify_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<CredentialPayload, TokenError> {
        let payload = self.open(token)?;
        validate_payload(&payload, expected, now)?;
        Ok(payload)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()))
    }

    fn seal(&self, payload: &CredentialPayload) -> Result<String, TokenError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(payload).map_err(|_| TokenError::Seal)?);

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: HEADER.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Seal)?;

        let mut body = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&ciphertext);

        Ok(format!("{HEADER}{}", URL_SAFE_NO_PAD.encode(body)))
    }

    fn open(&self, token: &str) -> Result<CredentialPayload, TokenError> {
        let body = token.strip_prefix(HEADER).ok_or(TokenError::Invalid)?;
        let raw = URL_SAFE_NO_PAD.decode(body).map_err(|_| TokenError::Invalid)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::Invalid);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

        let plaintext = self
            .cipher()
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: HEADER.as_bytes(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| TokenError::Invalid)?;

        serde_json::from_slice(&plaintext).map_err(|_| TokenError::Invalid)
    }
}

impl core::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("key", &self.key)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

fn to_chrono(ttl: Duration, kind: TokenKind) -> Result<chrono::Duration, IssuerError> {
    match chrono::Duration::from_std(ttl) {
        Ok(d) if d > chrono::Duration::zero() => Ok(d),
        _ => Err(IssuerError::InvalidTtl { kind }),
    }
}
