//! Session state machine.
//!
//! `SessionManager` owns the session: the persisted credential pair, the
//! identity decoded from it, and the startup loading flag. State lives in
//! a `tokio::sync::watch` channel so consumers (routing, views) observe
//! transitions instead of polling ambient globals.
//!
//! Lifecycle: the session starts `INITIALIZING` (`is_loading == true`);
//! the one-time [`SessionManager::initialize`] sequence moves it to
//! authenticated or anonymous and drops the flag. After that, `login`,
//! `logout`, and `apply_refreshed_access` drive the remaining transitions.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ApiError;

use super::claims::{self, Identity};
use super::error::AuthError;
use super::store::{CredentialPair, TokenStore};

/// Network capability to validate and rotate tokens.
///
/// Implemented by `ApiClient` against the real token endpoints; session
/// tests substitute a scripted fake.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Check the access token against the server. Any failure means
    /// "invalid" for session purposes.
    async fn verify(&self, access: &str) -> Result<(), ApiError>;

    /// Exchange the refresh token for a new access token.
    async fn refresh(&self, refresh: &str) -> Result<String, ApiError>;
}

/// Observable session state.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub credentials: Option<CredentialPair>,
    pub identity: Option<Identity>,
    /// True only while the startup validation sequence runs.
    pub is_loading: bool,
}

impl SessionState {
    /// Logged in exactly when an access token is present. Derived, never
    /// set independently, so it cannot drift from `credentials`.
    pub fn is_logged_in(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Owner of the session state and its persistence.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(SessionState {
            credentials: None,
            identity: None,
            is_loading: true,
        });
        Self { store, state }
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.borrow().credentials.as_ref().map(|c| c.access.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.borrow().credentials.as_ref().map(|c| c.refresh.clone())
    }

    /// Run the one-time startup sequence.
    ///
    /// Reads the stored pair, verifies the access token against the
    /// server, and falls back to a refresh exchange when verification
    /// fails. A failed exchange clears the store. Always terminates in a
    /// well-defined state with `is_loading == false` - no outcome leaves
    /// the session stuck loading or crashes the caller.
    pub async fn initialize(&self, tokens: &dyn TokenService) {
        if !self.is_loading() {
            warn!("Startup sequence already ran, ignoring");
            return;
        }

        let Some(mut pair) = self.store.get() else {
            debug!("No stored credentials, starting anonymous");
            self.finish_startup(None);
            return;
        };

        match tokens.verify(&pair.access).await {
            Ok(()) => {
                debug!("Stored access token is valid");
                self.finish_startup(Some(pair));
            }
            Err(err) => {
                debug!(error = %err, "Stored access token rejected, trying refresh");
                match tokens.refresh(&pair.refresh).await {
                    Ok(new_access) => {
                        pair.access = new_access;
                        self.persist(&pair);
                        info!("Access token refreshed at startup");
                        self.finish_startup(Some(pair));
                    }
                    Err(err) => {
                        info!(error = %err, "Refresh token rejected, starting anonymous");
                        self.clear_store();
                        self.finish_startup(None);
                    }
                }
            }
        }
    }

    /// Establish a session from a freshly issued pair.
    ///
    /// Persists the pair and decodes identity from its access half.
    /// Consumers watching the state typically navigate to the
    /// authenticated landing view on the resulting transition.
    pub fn login(&self, pair: CredentialPair) {
        self.persist(&pair);
        let identity = decode_identity(&pair.access);
        self.state.send_modify(|state| {
            state.credentials = Some(pair);
            state.identity = identity;
        });
        info!("Logged in");
    }

    /// Tear down the session: clear the store and the in-memory state.
    ///
    /// Idempotent. The transition to a logged-out state is the routing
    /// collaborator's cue to navigate to the anonymous entry point.
    pub fn logout(&self) {
        self.clear_store();
        self.state.send_modify(|state| {
            state.credentials = None;
            state.identity = None;
        });
        info!("Logged out");
    }

    /// Replace the access half of the current pair after a refresh
    /// exchange, re-persist, and recompute identity. The refresh half is
    /// retained.
    ///
    /// Requires an active session: the refresh path only runs after a
    /// successful login, so a missing session is surfaced as
    /// [`AuthError::InvalidState`] instead of silently ignored.
    pub fn apply_refreshed_access(&self, new_access: &str) -> Result<(), AuthError> {
        let Some(mut pair) = self.state.borrow().credentials.clone() else {
            return Err(AuthError::InvalidState("refresh applied before login"));
        };

        pair.access = new_access.to_string();
        self.persist(&pair);
        let identity = decode_identity(&pair.access);
        self.state.send_modify(|state| {
            state.credentials = Some(pair);
            state.identity = identity;
        });
        debug!("Applied refreshed access token");
        Ok(())
    }

    fn finish_startup(&self, pair: Option<CredentialPair>) {
        let identity = pair.as_ref().and_then(|p| decode_identity(&p.access));
        self.state.send_replace(SessionState {
            credentials: pair,
            identity,
            is_loading: false,
        });
    }

    // Storage failures are logged and swallowed: persistence is best
    // effort and must never take down an otherwise valid session.
    fn persist(&self, pair: &CredentialPair) {
        if let Err(err) = self.store.set(pair) {
            warn!(error = %err, "Failed to persist credentials");
        }
    }

    fn clear_store(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Failed to clear token store");
        }
    }
}

fn decode_identity(access: &str) -> Option<Identity> {
    match claims::decode(access) {
        Ok(identity) => Some(identity),
        Err(err) => {
            warn!(error = %err, "Could not decode identity from access token");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::auth::claims::encode_token;
    use crate::auth::store::MemoryTokenStore;

    struct FakeTokenService {
        verify_ok: bool,
        refresh_result: Option<String>,
        verify_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    impl FakeTokenService {
        fn new(verify_ok: bool, refresh_result: Option<&str>) -> Self {
            Self {
                verify_ok,
                refresh_result: refresh_result.map(str::to_string),
                verify_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
            }
        }

        fn verify_calls(&self) -> usize {
            self.verify_calls.load(Ordering::SeqCst)
        }

        fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenService for FakeTokenService {
        async fn verify(&self, _access: &str) -> Result<(), ApiError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if self.verify_ok {
                Ok(())
            } else {
                Err(ApiError::VerifyFailed)
            }
        }

        async fn refresh(&self, _refresh: &str) -> Result<String, ApiError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_result.clone().ok_or(ApiError::RefreshFailed)
        }
    }

    fn pair(access: &str, refresh: &str) -> CredentialPair {
        CredentialPair {
            access: access.to_string(),
            refresh: refresh.to_string(),
        }
    }

    fn manager_with(stored: Option<CredentialPair>) -> (SessionManager, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        if let Some(p) = &stored {
            store.set(p).unwrap();
        }
        (SessionManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_startup_without_stored_credentials_is_anonymous() {
        let (session, _store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);

        assert!(session.is_loading());
        session.initialize(&tokens).await;

        let state = session.state();
        assert!(!state.is_loading);
        assert!(!state.is_logged_in());
        assert!(state.identity.is_none());
        // No stored pair means no network traffic at all
        assert_eq!(tokens.verify_calls(), 0);
        assert_eq!(tokens.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_startup_with_valid_access_token() {
        let access = encode_token("alice", 42);
        let (session, store) = manager_with(Some(pair(&access, "R1")));
        let tokens = FakeTokenService::new(true, None);

        session.initialize(&tokens).await;

        let state = session.state();
        assert!(!state.is_loading);
        assert!(state.is_logged_in());
        assert_eq!(state.identity.as_ref().unwrap().username, "alice");
        assert_eq!(state.identity.as_ref().unwrap().user_id, 42);
        // Verify sufficed, no refresh exchange happened
        assert_eq!(tokens.verify_calls(), 1);
        assert_eq!(tokens.refresh_calls(), 0);
        assert_eq!(store.get(), Some(pair(&access, "R1")));
    }

    #[tokio::test]
    async fn test_startup_refreshes_rejected_access_token() {
        let (session, store) = manager_with(Some(pair("A1", "R1")));
        let tokens = FakeTokenService::new(false, Some("A2"));

        session.initialize(&tokens).await;

        let state = session.state();
        assert!(!state.is_loading);
        assert!(state.is_logged_in());
        assert_eq!(tokens.refresh_calls(), 1);
        // Access half rotated, refresh half retained, and persisted
        assert_eq!(session.access_token().as_deref(), Some("A2"));
        assert_eq!(session.refresh_token().as_deref(), Some("R1"));
        assert_eq!(store.get(), Some(pair("A2", "R1")));
    }

    #[tokio::test]
    async fn test_startup_clears_store_when_refresh_also_fails() {
        let (session, store) = manager_with(Some(pair("A1", "R1")));
        let tokens = FakeTokenService::new(false, None);

        session.initialize(&tokens).await;

        let state = session.state();
        assert!(!state.is_loading);
        assert!(!state.is_logged_in());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_startup_runs_only_once() {
        let (session, _store) = manager_with(Some(pair("A1", "R1")));
        let tokens = FakeTokenService::new(true, None);

        session.initialize(&tokens).await;
        session.initialize(&tokens).await;

        assert_eq!(tokens.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_login_persists_pair_and_decodes_identity() {
        let (session, store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);
        session.initialize(&tokens).await;

        let access = encode_token("bob", 7);
        session.login(pair(&access, "R1"));

        assert!(session.is_logged_in());
        assert_eq!(session.identity().unwrap().username, "bob");
        assert_eq!(store.get(), Some(pair(&access, "R1")));
    }

    #[tokio::test]
    async fn test_login_with_undecodable_access_still_logs_in() {
        let (session, _store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);
        session.initialize(&tokens).await;

        session.login(pair("garbage", "R1"));

        // Logged in is defined by credential presence, not identity
        assert!(session.is_logged_in());
        assert!(session.identity().is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (session, store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);
        session.initialize(&tokens).await;
        session.login(pair(&encode_token("alice", 42), "R1"));

        session.logout();
        session.logout();

        let state = session.state();
        assert!(!state.is_logged_in());
        assert!(state.credentials.is_none());
        assert!(state.identity.is_none());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_logged_in_tracks_credential_presence() {
        let (session, _store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);

        let check = |s: &SessionManager| {
            let state = s.state();
            assert_eq!(state.is_logged_in(), state.credentials.is_some());
        };

        check(&session);
        session.initialize(&tokens).await;
        check(&session);
        session.login(pair(&encode_token("alice", 42), "R1"));
        check(&session);
        session.logout();
        check(&session);
    }

    #[tokio::test]
    async fn test_apply_refreshed_access_replaces_access_only() {
        let (session, store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);
        session.initialize(&tokens).await;
        session.login(pair(&encode_token("alice", 42), "R1"));

        let rotated = encode_token("alice", 42);
        session.apply_refreshed_access(&rotated).unwrap();

        assert_eq!(session.access_token().as_deref(), Some(rotated.as_str()));
        assert_eq!(session.refresh_token().as_deref(), Some("R1"));
        assert_eq!(session.identity().unwrap().username, "alice");
        assert_eq!(store.get(), Some(pair(&rotated, "R1")));
    }

    #[tokio::test]
    async fn test_apply_refreshed_access_without_session_is_an_error() {
        let (session, _store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);
        session.initialize(&tokens).await;

        let result = session.apply_refreshed_access("A2");
        assert!(matches!(result, Err(AuthError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let (session, _store) = manager_with(None);
        let tokens = FakeTokenService::new(true, None);
        let mut rx = session.subscribe();

        assert!(rx.borrow().is_loading);

        session.initialize(&tokens).await;
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_loading);
        assert!(!rx.borrow().is_logged_in());

        session.login(pair(&encode_token("alice", 42), "R1"));
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_logged_in());

        session.logout();
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_logged_in());
    }
}
