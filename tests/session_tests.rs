use recydash::accounts::UserDirectory;
use recydash::error::{DashboardError, DashboardResult};
use recydash::persistence::{KeyValueStore, MemoryStore, PersistenceBridge};
use recydash::session::{
    CredentialValidator, Credentials, Gate, Grant, Intent, SessionGuard, SessionRestore,
    SessionState, TOKEN_KEY, USER_KEY,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Accepts `secret` as every user's password and `good-token` as the only
/// live token. Sign-out can be made to fail.
#[derive(Default)]
struct Backend {
    sign_out_fails: bool,
    validations: AtomicUsize,
}

impl CredentialValidator for Backend {
    async fn validate(&self, credentials: &Credentials) -> DashboardResult<Grant> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if credentials.password == "secret" {
            Ok(Grant {
                token: "good-token".to_string(),
                user: json!({ "username": credentials.username }),
            })
        } else {
            Err(DashboardError::Validation("Identifiants invalides".to_string()))
        }
    }

    async fn validate_token(&self, token: &str) -> DashboardResult<bool> {
        Ok(token == "good-token")
    }

    async fn sign_out(&self, _token: &str) -> DashboardResult<()> {
        if self.sign_out_fails {
            Err(DashboardError::Network("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

fn persisted(token: &str) -> MemoryStore {
    let kv = MemoryStore::new();
    kv.set(TOKEN_KEY, &json!(token).to_string()).unwrap();
    kv.set(USER_KEY, r#"{"username":"admin"}"#).unwrap();
    kv
}

#[tokio::test]
async fn startup_without_a_token_is_anonymous() {
    let guard = SessionGuard::restore(
        PersistenceBridge::new(MemoryStore::new()),
        Backend::default(),
        SessionRestore::Revalidate,
    )
    .await;
    assert_eq!(guard.state(), SessionState::Anonymous);
    assert_eq!(guard.user(), None);
}

#[tokio::test]
async fn optimistic_restore_trusts_any_persisted_token() {
    for token in ["good-token", "revoked-token"] {
        let guard = SessionGuard::restore(
            PersistenceBridge::new(persisted(token)),
            Backend::default(),
            SessionRestore::Optimistic,
        )
        .await;
        assert_eq!(guard.state(), SessionState::Authenticated);
        assert_eq!(guard.session().token.as_deref(), Some(token));
        assert_eq!(guard.user(), Some(&json!({ "username": "admin" })));
    }
}

#[tokio::test]
async fn revalidating_restore_accepts_a_live_token() {
    let guard = SessionGuard::restore(
        PersistenceBridge::new(persisted("good-token")),
        Backend::default(),
        SessionRestore::Revalidate,
    )
    .await;
    assert_eq!(guard.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn revalidating_restore_discards_a_rejected_token() {
    let kv = persisted("revoked-token");
    let guard = SessionGuard::restore(
        PersistenceBridge::new(kv.clone()),
        Backend::default(),
        SessionRestore::Revalidate,
    )
    .await;

    assert_eq!(guard.state(), SessionState::Anonymous);
    assert_eq!(kv.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(kv.get(USER_KEY).unwrap(), None);
}

#[tokio::test]
async fn login_persists_the_session() {
    let kv = MemoryStore::new();
    let mut guard = SessionGuard::restore(
        PersistenceBridge::new(kv.clone()),
        Backend::default(),
        SessionRestore::Optimistic,
    )
    .await;

    guard.login(&Credentials::new("admin", "secret")).await.unwrap();
    assert_eq!(guard.state(), SessionState::Authenticated);
    assert_eq!(kv.get(TOKEN_KEY).unwrap().as_deref(), Some("\"good-token\""));

    let restored = SessionGuard::restore(
        PersistenceBridge::new(kv),
        Backend::default(),
        SessionRestore::Revalidate,
    )
    .await;
    assert!(restored.is_authenticated());
    assert_eq!(restored.user(), Some(&json!({ "username": "admin" })));
}

#[tokio::test]
async fn rejected_login_persists_nothing() {
    let kv = MemoryStore::new();
    let mut guard = SessionGuard::restore(
        PersistenceBridge::new(kv.clone()),
        Backend::default(),
        SessionRestore::Optimistic,
    )
    .await;

    let err = guard.login(&Credentials::new("admin", "nope")).await.unwrap_err();
    assert_eq!(err.to_string(), "Identifiants invalides");
    assert_eq!(guard.state(), SessionState::Anonymous);
    assert_eq!(guard.last_error(), Some("Identifiants invalides"));
    assert_eq!(kv.get(TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn blank_credentials_are_rejected_locally() {
    let mut guard = SessionGuard::restore(
        PersistenceBridge::new(MemoryStore::new()),
        Backend::default(),
        SessionRestore::Optimistic,
    )
    .await;

    assert!(guard.login(&Credentials::new("  ", "secret")).await.is_err());
    assert!(guard.login(&Credentials::new("admin", "")).await.is_err());
    assert_eq!(guard.validator().validations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn logout_succeeds_even_when_remote_sign_out_fails() {
    let kv = persisted("good-token");
    let backend = Backend {
        sign_out_fails: true,
        ..Backend::default()
    };
    let mut guard =
        SessionGuard::restore(PersistenceBridge::new(kv.clone()), backend, SessionRestore::Optimistic)
            .await;
    assert!(guard.is_authenticated());

    guard.logout().await;

    assert_eq!(guard.state(), SessionState::Anonymous);
    assert_eq!(guard.session().token, None);
    assert_eq!(kv.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(kv.get(USER_KEY).unwrap(), None);
}

#[tokio::test]
async fn gated_intent_resumes_after_login() {
    let mut guard = SessionGuard::restore(
        PersistenceBridge::new(MemoryStore::new()),
        Backend::default(),
        SessionRestore::Optimistic,
    )
    .await;

    let intent = Intent::new("/documents/upload");
    assert_eq!(guard.gate(intent.clone()), Gate::RedirectToLogin);
    assert_eq!(guard.pending_intent(), Some(&intent));

    guard.login(&Credentials::new("admin", "secret")).await.unwrap();
    assert_eq!(guard.take_resume(), Some(intent.clone()));
    assert_eq!(guard.gate(intent.clone()), Gate::Proceed(intent));
}

#[tokio::test]
async fn local_accounts_drive_the_whole_session() {
    let dir = tempfile::tempdir().unwrap();
    let users = Arc::new(UserDirectory::open(dir.path()).unwrap());
    users.register("admin", "admin@example.com", "secret").unwrap();

    let kv = MemoryStore::new();
    let mut guard = SessionGuard::restore(
        PersistenceBridge::new(kv.clone()),
        Arc::clone(&users),
        SessionRestore::Revalidate,
    )
    .await;
    guard.login(&Credentials::new("admin", "secret")).await.unwrap();
    let token = guard.session().token.clone().unwrap();
    assert_eq!(users.token_user(&token).as_deref(), Some("admin"));

    let restored = SessionGuard::restore(
        PersistenceBridge::new(kv.clone()),
        Arc::clone(&users),
        SessionRestore::Revalidate,
    )
    .await;
    assert!(restored.is_authenticated());

    guard.logout().await;
    assert_eq!(users.token_user(&token), None);

    kv.set(TOKEN_KEY, &json!(token).to_string()).unwrap();
    let stale = SessionGuard::restore(
        PersistenceBridge::new(kv),
        Arc::clone(&users),
        SessionRestore::Revalidate,
    )
    .await;
    assert_eq!(stale.state(), SessionState::Anonymous);
}
