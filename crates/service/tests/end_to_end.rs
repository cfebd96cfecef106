use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use warden_auth::WorkspaceRole;
use warden_core::{AuthError, CancelFlag, ClientInfo, RequestContext};
use warden_infra::store::SessionRepository;
use warden_infra::{AppConfig, FilterParams, InMemoryStore, NoopUserCache};
use warden_service::{
    AuthEventKind, CreateWorkspaceInput, InMemoryEventPublisher, LoginInput, RegisterInput, Services,
};

fn config() -> AppConfig {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("TOKEN_SYMMETRIC_KEY", "end-to-end-test-key-32-bytes-ok!"),
        ("PASSWORD_HASH_MEMORY_KIB", "64"),
        ("PASSWORD_HASH_ITERATIONS", "1"),
        ("SESSION_SWEEP_INTERVAL", "1h"),
    ]);
    AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap()
}

struct Harness {
    services: Services<InMemoryStore>,
    store: Arc<InMemoryStore>,
    events: Arc<InMemoryEventPublisher>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let events = Arc::new(InMemoryEventPublisher::new());
    let services = Services::build_with(&config(), store.clone(), Arc::new(NoopUserCache), events.clone()).unwrap();
    Harness {
        services,
        store,
        events,
    }
}

fn client() -> ClientInfo {
    ClientInfo::new("192.0.2.10", "e2e")
}

fn register(h: &Harness, email: &str, name: &str) -> warden_service::AuthOutcome {
    h.services
        .auth
        .register(
            &RequestContext::background(),
            RegisterInput {
                email: Some(email.into()),
                password: "s3cret-passphrase".into(),
                name: name.into(),
            },
            &client(),
        )
        .unwrap()
}

#[test]
fn register_login_workspace_lifecycle() {
    let h = harness();
    let ctx = RequestContext::background();

    let a = register(&h, "a@example.com", "Alice");
    assert_eq!(h.store.count_sessions(a.user.id).unwrap(), 1);
    assert!(a.tokens.access_token_expires_at < a.tokens.refresh_token_expires_at);

    let wrong = h.services.auth.login(
        &ctx,
        LoginInput {
            email: "a@example.com".into(),
            password: "not-the-passphrase".into(),
        },
        &client(),
    );
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

    let b = register(&h, "b@example.com", "Bob");

    let ws = h
        .services
        .workspaces
        .create(
            a.user.id,
            CreateWorkspaceInput {
                name: "Acme".into(),
                avatar_url: None,
            },
        )
        .unwrap();
    assert_eq!(h.services.workspaces.member_role(ws.id, a.user.id).unwrap(), WorkspaceRole::Owner);

    h.services
        .workspaces
        .add_member(a.user.id, ws.id, b.user.id, WorkspaceRole::Member)
        .unwrap();
    assert_eq!(h.services.workspaces.get(b.user.id, ws.id).unwrap().name, "Acme");
    assert!(matches!(
        h.services.workspaces.update(b.user.id, ws.id, "Bob's now"),
        Err(AuthError::Forbidden)
    ));

    let members = h
        .services
        .workspaces
        .list_members(b.user.id, ws.id, &FilterParams::default())
        .unwrap();
    assert_eq!(members.pagination.total, 2);

    h.services.workspaces.remove_member(a.user.id, ws.id, b.user.id).unwrap();
    assert!(matches!(
        h.services.workspaces.member_role(ws.id, b.user.id),
        Err(AuthError::NotMember)
    ));

    assert_eq!(
        h.events.kinds(),
        vec![
            AuthEventKind::UserRegistered,
            AuthEventKind::UserRegistered,
            AuthEventKind::WorkspaceCreated,
            AuthEventKind::MemberAdded,
            AuthEventKind::MemberRemoved,
        ]
    );
    h.services.shutdown();
}

#[test]
fn rotated_refresh_token_cannot_be_reused() {
    let h = harness();
    let ctx = RequestContext::background();
    let a = register(&h, "a@example.com", "Alice");

    let rotated = h.services.auth.refresh(&ctx, &a.tokens.refresh_token, &client()).unwrap();
    let reused = h.services.auth.refresh(&ctx, &a.tokens.refresh_token, &client());
    assert!(matches!(reused, Err(AuthError::SessionNotFound)));

    // The rotated credential is still good, and authenticates as A.
    let payload = h
        .services
        .auth
        .authenticate(&format!("Bearer {}", rotated.access_token))
        .unwrap();
    assert_eq!(payload.user_id, a.user.id);
    assert!(h.services.auth.refresh(&ctx, &rotated.refresh_token, &client()).is_ok());
    h.services.shutdown();
}

#[test]
fn access_credential_outlives_logout_but_refresh_does_not() {
    let h = harness();
    let a = register(&h, "a@example.com", "Alice");

    h.services.auth.logout(&a.tokens.refresh_token).unwrap();

    let payload = h
        .services
        .auth
        .authenticate(&format!("Bearer {}", a.tokens.access_token))
        .unwrap();
    assert_eq!(payload.user_id, a.user.id);

    let refreshed = h
        .services
        .auth
        .refresh(&RequestContext::background(), &a.tokens.refresh_token, &client());
    assert!(matches!(refreshed, Err(AuthError::SessionNotFound)));
    h.services.shutdown();
}

#[test]
fn concurrent_rotation_admits_one_winner() {
    let h = Arc::new(harness());
    let a = register(&h, "a@example.com", "Alice");
    let token = Arc::new(a.tokens.refresh_token.clone());

    const RACERS: usize = 8;
    let barrier = Arc::new(Barrier::new(RACERS));
    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let h = Arc::clone(&h);
            let token = Arc::clone(&token);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                h.services.auth.refresh(&RequestContext::background(), &token, &client())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|j| j.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AuthError::SessionNotFound)));
    assert_eq!(h.store.count_sessions(a.user.id).unwrap(), 1);
}

#[test]
fn logout_reports_success_when_storage_fails() {
    let h = harness();
    let a = register(&h, "a@example.com", "Alice");

    h.store.set_unavailable(true);
    assert!(h.services.auth.logout(&a.tokens.refresh_token).is_ok());

    h.store.set_unavailable(false);
    assert_eq!(h.store.count_sessions(a.user.id).unwrap(), 1);
    h.services.auth.logout(&a.tokens.refresh_token).unwrap();
    assert_eq!(h.store.count_sessions(a.user.id).unwrap(), 0);
    h.services.shutdown();
}

#[test]
fn cancelled_or_timed_out_requests_do_no_work() {
    let h = harness();

    let flag = CancelFlag::new();
    flag.cancel();
    let cancelled = RequestContext::background().with_cancellation(Arc::new(flag));
    let login = h.services.auth.login(
        &cancelled,
        LoginInput {
            email: "a@example.com".into(),
            password: "whatever-it-is".into(),
        },
        &client(),
    );
    assert!(matches!(login, Err(AuthError::ContextCancelled)));

    let expired = RequestContext::background().with_timeout(Duration::ZERO);
    let register = h.services.auth.register(
        &expired,
        RegisterInput {
            email: Some("late@example.com".into()),
            password: "s3cret-passphrase".into(),
            name: "Late".into(),
        },
        &client(),
    );
    assert!(matches!(register, Err(AuthError::ContextCancelled)));
    assert!(h.events.published().is_empty());
    h.services.shutdown();
}

#[test]
fn profile_and_session_management() {
    let h = harness();
    let ctx = RequestContext::background();
    let a = register(&h, "a@example.com", "Alice");
    h.services
        .auth
        .login(
            &ctx,
            LoginInput {
                email: "a@example.com".into(),
                password: "s3cret-passphrase".into(),
            },
            &client(),
        )
        .unwrap();

    let sessions = h.services.users.list_sessions(a.user.id, &FilterParams::default()).unwrap();
    assert_eq!(sessions.pagination.total, 2);

    let first = sessions.data[0].id;
    h.services.users.revoke_session(a.user.id, first).unwrap();
    assert_eq!(h.services.users.revoke_all_sessions(a.user.id).unwrap(), 1);

    let refreshed = h.services.auth.refresh(&ctx, &a.tokens.refresh_token, &client());
    assert!(refreshed.is_err());
    assert_eq!(h.services.users.get_user(a.user.id).unwrap().name, "Alice");
    h.services.shutdown();
}
