//! Orchestration layer: registration, login, rotation, logout, workspace
//! membership and profile management over the infrastructure seams.

pub mod auth;
pub mod bootstrap;
pub mod events;
pub mod user;
pub mod validate;
pub mod workspace;

pub use auth::{AuthOutcome, AuthService, LoginInput, RegisterInput, TokenPair, bearer_token};
pub use bootstrap::{BootstrapError, LimitClass, Services, init_logging};
pub use events::{AuthEvent, AuthEventKind, EventPublisher, InMemoryEventPublisher, NoopEventPublisher, PublishError};
pub use user::{UpdateProfileInput, UserService};
pub use workspace::{CreateWorkspaceInput, WorkspaceService};
