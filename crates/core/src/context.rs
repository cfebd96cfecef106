//! Per-request context: caller cancellation, deadline and client metadata.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{AuthError, AuthResult};

/// Cooperative cancellation signal checked before expensive work.
pub trait Cancellation: Send + Sync {
    /// Non-blocking cancellation check.
    fn is_cancelled(&self) -> bool;
}

/// Shared flag a transport layer flips when the client goes away.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Cancellation for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Cancellation and deadline for one service-level call.
#[derive(Clone, Default)]
pub struct RequestContext {
    cancel: Option<Arc<dyn Cancellation>>,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancel: Arc<dyn Cancellation>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the caller cancelled or the deadline passed.
    pub fn is_done(&self) -> bool {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Abort early with `ContextCancelled` when the caller is gone.
    pub fn check(&self) -> AuthResult<()> {
        if self.is_done() {
            return Err(AuthError::ContextCancelled);
        }
        Ok(())
    }
}

impl core::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestContext")
            .field("cancellable", &self.cancel.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Network origin of a request, recorded on sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_context_never_cancels() {
        assert!(RequestContext::background().check().is_ok());
    }

    #[test]
    fn flipped_flag_cancels() {
        let flag = CancelFlag::new();
        let ctx = RequestContext::background().with_cancellation(Arc::new(flag.clone()));
        assert!(ctx.check().is_ok());

        flag.cancel();
        assert!(matches!(ctx.check(), Err(AuthError::ContextCancelled)));
    }

    #[test]
    fn past_deadline_cancels() {
        let ctx = RequestContext::background().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(ctx.is_done());
    }
}
