//! Background workers (std threads with graceful shutdown).

mod periodic;
mod session_sweeper;

pub use periodic::{PeriodicWorker, WorkerHandle};
pub use session_sweeper::{spawn_session_sweeper, sweep_expired_sessions};
