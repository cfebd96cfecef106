//! `warden-auth`: credentials, password hashing and workspace authorization.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod issuer;
pub mod password;
pub mod roles;

pub use authorize::{AuthorizationExplanation, DenialKind, PolicyError, WorkspaceOperation, authorize, explain};
pub use claims::{CredentialPayload, TokenError, TokenKind, validate_payload};
pub use issuer::{CredentialIssuer, IssuedToken, IssuerError, KeyError, SymmetricKey, TokenConfig};
pub use password::{PasswordError, PasswordHasher, PasswordHashingConfig};
pub use roles::WorkspaceRole;
