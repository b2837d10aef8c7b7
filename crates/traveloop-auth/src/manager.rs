//! Session manager: the single source of truth for "who is logged in".
//!
//! The manager owns the current `AuthState`, publishes it through a watch
//! channel for read-only consumers, and delegates every mutating operation
//! to the configured `IdentityProvider`. On startup it performs exactly one
//! session check; afterwards the loading flag stays false until teardown.
//!
//! Provider push notifications are applied in delivery order by a
//! forwarding task. A notification racing a manual login/logout resolves
//! last-write-wins; there is no sequencing token. `shutdown` (or drop)
//! stops the forwarding task but does not abort in-flight requests.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::provider::{IdentityProvider, SessionChange};
use crate::session::{AuthState, Session};

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    state: Arc<watch::Sender<AuthState>>,
    listener: JoinHandle<()>,
}

impl SessionManager {
    /// Create the manager and start its bootstrap. The returned manager is
    /// `Initializing` until the one-shot startup session check resolves;
    /// `ready` awaits that point.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (tx, _) = watch::channel(AuthState::Initializing);
        let state = Arc::new(tx);
        // Subscribe before spawning so no notification is missed between
        // bootstrap and the forwarding loop.
        let changes = provider.subscribe();
        let listener = tokio::spawn(run_listener(
            Arc::clone(&provider),
            Arc::clone(&state),
            changes,
        ));

        Self {
            provider,
            state,
            listener,
        }
    }

    /// Wait until the startup session check has resolved.
    pub async fn ready(&self) {
        let mut rx = self.state.subscribe();
        while rx.borrow_and_update().is_loading() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Current state, read synchronously.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// The current session, if authenticated.
    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    /// True only while the startup session check is in flight.
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    /// Subscribe to state changes. Receivers observe every transition the
    /// manager publishes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Sign in with email and password. One provider round trip; on success
    /// the state transitions to `Authenticated`. Expected failures leave
    /// the state untouched and surface as an `AuthError` value.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        match self.provider.sign_in(email, password).await {
            Ok(session) => {
                info!(email = %session.email, "login succeeded");
                apply(&self.state, AuthState::Authenticated(session.clone()));
                Ok(session)
            }
            Err(err) => {
                warn!(error = %err, "login failed");
                Err(err)
            }
        }
    }

    /// Create an account and sign in immediately; there is no separate
    /// confirmation step. A duplicate email surfaces as an error value and
    /// leaves the state untouched.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Session, AuthError> {
        match self.provider.sign_up(email, password, name).await {
            Ok(session) => {
                info!(email = %session.email, "registration succeeded");
                apply(&self.state, AuthState::Authenticated(session.clone()));
                Ok(session)
            }
            Err(err) => {
                warn!(error = %err, "registration failed");
                Err(err)
            }
        }
    }

    /// Request provider-side invalidation, then clear local state
    /// unconditionally. A failed provider call is logged; logout never
    /// leaves the manager authenticated.
    pub async fn logout(&self) {
        if let Err(err) = self.provider.sign_out().await {
            warn!(error = %err, "provider sign-out failed, clearing local session anyway");
        }
        apply(&self.state, AuthState::Unauthenticated);
    }

    /// Stop forwarding provider notifications. In-flight operations are
    /// not cancelled.
    pub fn shutdown(&self) {
        self.listener.abort();
        // An aborted bootstrap can no longer resolve the loading flag;
        // release any consumer waiting on it.
        self.state.send_if_modified(|current| {
            if current.is_loading() {
                *current = AuthState::Unauthenticated;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Bootstrap the initial state with one provider query, then forward push
/// notifications until the channel closes or the task is aborted.
async fn run_listener(
    provider: Arc<dyn IdentityProvider>,
    state: Arc<watch::Sender<AuthState>>,
    mut changes: broadcast::Receiver<SessionChange>,
) {
    let initial = match provider.current_session().await {
        Ok(Some(session)) => {
            info!(email = %session.email, "restored existing session");
            AuthState::Authenticated(session)
        }
        Ok(None) => AuthState::Unauthenticated,
        Err(err) => {
            // Never stay stuck in Initializing over a failed check.
            warn!(error = %err, "startup session check failed, starting unauthenticated");
            AuthState::Unauthenticated
        }
    };
    state.send_replace(initial);

    loop {
        match changes.recv().await {
            Ok(SessionChange::Established(session)) => {
                debug!(email = %session.email, "provider reported session established");
                apply(&state, AuthState::Authenticated(session));
            }
            Ok(SessionChange::Ended) => {
                debug!("provider reported session ended");
                apply(&state, AuthState::Unauthenticated);
            }
            Err(RecvError::Lagged(skipped)) => {
                // Missed notifications; resync from the provider instead of
                // guessing which state is current.
                warn!(skipped, "session notifications lagged, resyncing");
                match provider.current_session().await {
                    Ok(Some(session)) => apply(&state, AuthState::Authenticated(session)),
                    Ok(None) => apply(&state, AuthState::Unauthenticated),
                    Err(err) => warn!(error = %err, "resync after lag failed"),
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Publish `next` only when it differs from the current state. A manual
/// operation and the provider notification it triggers collapse into a
/// single observable transition.
fn apply(state: &watch::Sender<AuthState>, next: AuthState) {
    state.send_if_modified(move |current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LocalProvider, CHANGE_CHANNEL_CAPACITY};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Provider double with a fixed account table, programmable latency,
    /// and a handle for pushing change notifications.
    struct StubProvider {
        latency: Duration,
        startup: StartupBehavior,
        fail_sign_out: bool,
        changes: broadcast::Sender<SessionChange>,
    }

    enum StartupBehavior {
        NoSession,
        Session(Session),
        Fail,
    }

    fn stub_session(email: &str) -> Session {
        Session {
            id: format!("user_{}", email),
            email: email.to_string(),
            name: None,
            role: Some("user".to_string()),
        }
    }

    impl StubProvider {
        fn new() -> Self {
            let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
            Self {
                latency: Duration::ZERO,
                startup: StartupBehavior::NoSession,
                fail_sign_out: false,
                changes,
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn with_startup_session(mut self, session: Session) -> Self {
            self.startup = StartupBehavior::Session(session);
            self
        }

        fn with_failing_startup(mut self) -> Self {
            self.startup = StartupBehavior::Fail;
            self
        }

        fn with_failing_sign_out(mut self) -> Self {
            self.fail_sign_out = true;
            self
        }

        fn push(&self, change: SessionChange) {
            let _ = self.changes.send(change);
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn current_session(&self) -> Result<Option<Session>, AuthError> {
            tokio::time::sleep(self.latency).await;
            match &self.startup {
                StartupBehavior::NoSession => Ok(None),
                StartupBehavior::Session(session) => Ok(Some(session.clone())),
                StartupBehavior::Fail => {
                    Err(AuthError::ProviderUnavailable("stub outage".to_string()))
                }
            }
        }

        async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
            tokio::time::sleep(self.latency).await;
            if email == "a@x.com" && password == "secret1" {
                Ok(stub_session(email))
            } else {
                Err(AuthError::InvalidCredentials)
            }
        }

        async fn sign_up(
            &self,
            email: &str,
            _password: &str,
            _name: Option<&str>,
        ) -> Result<Session, AuthError> {
            tokio::time::sleep(self.latency).await;
            if email == "a@x.com" {
                Err(AuthError::DuplicateAccount)
            } else {
                Ok(stub_session(email))
            }
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            tokio::time::sleep(self.latency).await;
            if self.fail_sign_out {
                Err(AuthError::ProviderUnavailable("stub outage".to_string()))
            } else {
                Ok(())
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
            self.changes.subscribe()
        }
    }

    #[tokio::test]
    async fn test_register_then_read_matches_email() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(Arc::new(LocalProvider::new(dir.path())));
        manager.ready().await;

        manager
            .register("a@x.com", "secret1", Some("Ada"))
            .await
            .unwrap();
        let session = manager.current_session().unwrap();
        assert_eq!(session.email, "a@x.com");
        assert!(manager.state().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_failure_leaves_unauthenticated_unchanged() {
        let manager = SessionManager::new(Arc::new(StubProvider::new()));
        manager.ready().await;

        let err = manager.login("nobody@x.com", "pw").await.unwrap_err();
        assert!(err.is_expected());
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_login_failure_preserves_existing_session() {
        let prior = stub_session("a@x.com");
        let provider = StubProvider::new().with_startup_session(prior.clone());
        let manager = SessionManager::new(Arc::new(provider));
        manager.ready().await;
        assert_eq!(manager.state(), AuthState::Authenticated(prior.clone()));

        let err = manager.login("a@x.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
        assert_eq!(manager.state(), AuthState::Authenticated(prior));
    }

    #[tokio::test]
    async fn test_logout_clears_state_even_when_provider_fails() {
        let provider = StubProvider::new()
            .with_startup_session(stub_session("a@x.com"))
            .with_failing_sign_out();
        let manager = SessionManager::new(Arc::new(provider));
        manager.ready().await;
        assert!(manager.state().is_authenticated());

        manager.logout().await;
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_loading_resolves_once_and_stays_false() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(Arc::new(LocalProvider::new(dir.path())));
        manager.ready().await;
        assert!(!manager.is_loading());

        manager.register("a@x.com", "secret1", None).await.unwrap();
        assert!(!manager.is_loading());
        manager.logout().await;
        assert!(!manager.is_loading());
        let _ = manager.login("a@x.com", "wrong").await;
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_startup_failure_defaults_to_unauthenticated() {
        let provider = StubProvider::new().with_failing_startup();
        let manager = SessionManager::new(Arc::new(provider));
        manager.ready().await;
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_full_account_lifecycle() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(Arc::new(LocalProvider::new(dir.path())));
        manager.ready().await;

        let session = manager.register("a@x.com", "secret1", None).await.unwrap();
        assert_eq!(session.email, "a@x.com");

        let err = manager.login("a@x.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
        assert_eq!(
            manager.current_session().map(|s| s.email),
            Some("a@x.com".to_string())
        );

        manager.logout().await;
        assert!(manager.current_session().is_none());

        let session = manager.login("a@x.com", "secret1").await.unwrap();
        assert_eq!(session.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_logout_issued_after_login_wins() {
        let provider = Arc::new(StubProvider::new().with_latency(Duration::from_millis(50)));
        let dyn_provider: Arc<dyn IdentityProvider> = Arc::clone(&provider) as _;
        let manager = Arc::new(SessionManager::new(dyn_provider));
        manager.ready().await;

        // Login is in flight when logout is issued; the later transition
        // must win.
        let login_manager = Arc::clone(&manager);
        let login = tokio::spawn(async move { login_manager.login("a@x.com", "secret1").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.logout().await;

        let login_result = login.await.unwrap();
        assert!(login_result.is_ok());
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_provider_notifications_drive_state() {
        let provider = Arc::new(StubProvider::new());
        let dyn_provider: Arc<dyn IdentityProvider> = Arc::clone(&provider) as _;
        let manager = SessionManager::new(dyn_provider);
        manager.ready().await;
        let mut rx = manager.subscribe();

        provider.push(SessionChange::Established(stub_session("b@x.com")));
        rx.changed().await.unwrap();
        assert_eq!(
            manager.current_session().map(|s| s.email),
            Some("b@x.com".to_string())
        );

        provider.push(SessionChange::Ended);
        rx.changed().await.unwrap();
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_session_restored_on_startup() {
        let dir = tempdir().unwrap();
        {
            let manager = SessionManager::new(Arc::new(LocalProvider::new(dir.path())));
            manager.ready().await;
            manager.register("a@x.com", "secret1", None).await.unwrap();
        }

        let manager = SessionManager::new(Arc::new(LocalProvider::new(dir.path())));
        manager.ready().await;
        assert_eq!(
            manager.current_session().map(|s| s.email),
            Some("a@x.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_bootstrap_unblocks_ready() {
        let provider = StubProvider::new().with_latency(Duration::from_secs(5));
        let provider: Arc<dyn IdentityProvider> = Arc::new(provider);
        let manager = SessionManager::new(provider);
        assert!(manager.is_loading());

        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(1), manager.ready())
            .await
            .expect("ready did not resolve after shutdown");
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_shutdown_stops_notification_forwarding() {
        let provider = Arc::new(StubProvider::new());
        let dyn_provider: Arc<dyn IdentityProvider> = Arc::clone(&provider) as _;
        let manager = SessionManager::new(dyn_provider);
        manager.ready().await;

        manager.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;

        provider.push(SessionChange::Established(stub_session("b@x.com")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }
}
