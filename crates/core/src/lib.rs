//! `warden-core`: identifiers, error taxonomy and request context.
//!
//! This crate contains no storage, crypto or transport concerns.

pub mod context;
pub mod error;
pub mod id;

pub use context::{CancelFlag, Cancellation, ClientInfo, RequestContext};
pub use error::{AuthError, AuthResult};
pub use id::{SessionId, TokenId, UserId, WorkspaceId};
