//! Domain events emitted after a state change has been committed.
//!
//! Publication is fire-and-forget from the orchestrators' point of view: a
//! failing publisher is logged and never turns a successful operation into an
//! error.

use std::collections::VecDeque;
use std::sync::{Arc, mpsc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use warden_core::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuthEventKind {
    #[serde(rename = "user.registered")]
    UserRegistered,
    #[serde(rename = "user.logged_in")]
    UserLoggedIn,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "workspace.created")]
    WorkspaceCreated,
    #[serde(rename = "workspace.updated")]
    WorkspaceUpdated,
    #[serde(rename = "workspace.deleted")]
    WorkspaceDeleted,
    #[serde(rename = "member.added")]
    MemberAdded,
    #[serde(rename = "member.removed")]
    MemberRemoved,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::UserRegistered => "user.registered",
            AuthEventKind::UserLoggedIn => "user.logged_in",
            AuthEventKind::UserUpdated => "user.updated",
            AuthEventKind::WorkspaceCreated => "workspace.created",
            AuthEventKind::WorkspaceUpdated => "workspace.updated",
            AuthEventKind::WorkspaceDeleted => "workspace.deleted",
            AuthEventKind::MemberAdded => "member.added",
            AuthEventKind::MemberRemoved => "member.removed",
        }
    }
}

impl core::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
///
/// `user_id` is the actor. `payload` is free-form JSON and never carries
/// credentials or password hashes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AuthEventKind,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub payload: JsonValue,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, user_id: UserId, payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            user_id,
            payload,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("event publisher is closed")]
    Closed,

    #[error("event transport failed: {0}")]
    Transport(String),
}

/// Outbound seam for domain events (message broker, audit log, ...).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: AuthEvent) -> Result<(), PublishError>;
}

impl<P> EventPublisher for Arc<P>
where
    P: EventPublisher + ?Sized,
{
    fn publish(&self, event: AuthEvent) -> Result<(), PublishError> {
        (**self).publish(event)
    }
}

/// Publish and log on failure; the caller's operation has already committed.
pub(crate) fn publish_best_effort(publisher: &dyn EventPublisher, event: AuthEvent) {
    let kind = event.kind;
    let user_id = event.user_id;
    match publisher.publish(event) {
        Ok(()) => debug!(event = %kind, user_id = %user_id, "event published"),
        Err(err) => warn!(event = %kind, user_id = %user_id, error = %err, "failed to publish event"),
    }
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn publish(&self, _event: AuthEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// In-process fan-out publisher for tests/dev.
///
/// Every subscriber receives a copy of each event; disconnected subscribers
/// are dropped on the next publish. A bounded history is kept for inspection.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    subscribers: Mutex<Vec<mpsc::Sender<AuthEvent>>>,
    history: Mutex<VecDeque<AuthEvent>>,
    closed: Mutex<bool>,
}

impl InMemoryEventPublisher {
    const HISTORY_LIMIT: usize = 1024;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<AuthEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Events published so far, oldest first.
    pub fn published(&self) -> Vec<AuthEvent> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn kinds(&self) -> Vec<AuthEventKind> {
        self.history.lock().iter().map(|e| e.kind).collect()
    }

    /// Refuse further events with [`PublishError::Closed`].
    pub fn close(&self) {
        *self.closed.lock() = true;
        self.subscribers.lock().clear();
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish(&self, event: AuthEvent) -> Result<(), PublishError> {
        if *self.closed.lock() {
            return Err(PublishError::Closed);
        }

        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());

        let mut history = self.history.lock();
        if history.len() == Self::HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribers_receive_copies() {
        let publisher = InMemoryEventPublisher::new();
        let a = publisher.subscribe();
        let b = publisher.subscribe();

        let user = UserId::new();
        publisher
            .publish(AuthEvent::new(AuthEventKind::UserRegistered, user, json!({"name": "A"})))
            .unwrap();

        assert_eq!(a.try_recv().unwrap().kind, AuthEventKind::UserRegistered);
        assert_eq!(b.try_recv().unwrap().user_id, user);
        assert_eq!(publisher.kinds(), vec![AuthEventKind::UserRegistered]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let publisher = InMemoryEventPublisher::new();
        drop(publisher.subscribe());
        publisher
            .publish(AuthEvent::new(AuthEventKind::UserLoggedIn, UserId::new(), JsonValue::Null))
            .unwrap();
        assert!(publisher.subscribers.lock().is_empty());
    }

    #[test]
    fn history_keeps_the_most_recent_events() {
        let publisher = InMemoryEventPublisher::new();
        let users: Vec<UserId> = (0..InMemoryEventPublisher::HISTORY_LIMIT + 6).map(|_| UserId::new()).collect();
        for user in &users {
            publisher
                .publish(AuthEvent::new(AuthEventKind::UserLoggedIn, *user, JsonValue::Null))
                .unwrap();
        }

        let kept = publisher.published();
        assert_eq!(kept.len(), InMemoryEventPublisher::HISTORY_LIMIT);
        assert_eq!(kept[0].user_id, users[6]);
        assert_eq!(kept.last().map(|e| e.user_id), users.last().copied());
    }

    #[test]
    fn closed_publisher_refuses_events() {
        let publisher = InMemoryEventPublisher::new();
        publisher.close();
        let err = publisher
            .publish(AuthEvent::new(AuthEventKind::UserUpdated, UserId::new(), JsonValue::Null))
            .unwrap_err();
        assert_eq!(err, PublishError::Closed);

        // best-effort publication swallows it
        publish_best_effort(
            &publisher,
            AuthEvent::new(AuthEventKind::UserUpdated, UserId::new(), JsonValue::Null),
        );
        assert!(publisher.published().is_empty());
    }

    #[test]
    fn wire_shape_uses_dotted_type_names() {
        let event = AuthEvent::new(AuthEventKind::MemberRemoved, UserId::new(), json!({}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "member.removed");
        assert!(value.get("timestamp").is_some());
    }
}
