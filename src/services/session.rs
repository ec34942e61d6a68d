use crate::models::TokenPair;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use tokio::sync::watch;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogoutReason {
    /// An authorization failure arrived and no refresh token was held.
    MissingRefreshToken,
    /// The refresh endpoint turned the refresh token down.
    RefreshRejected,
    /// A request was still unauthorized after its one retry.
    RetryRejected,
    UserRequested,
}

#[derive(Debug, Default, Clone)]
struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Bumped every time credentials are installed from outside.
    episode: u64,
    ended: bool,
}

/// Process-wide credentials.
///
/// Readers always get the latest token; the token guard's refresh step is the
/// only automatic writer. `end` clears the tokens and fires the logout signal
/// at most once per episode (the span since the last `establish`). A refresh
/// result only lands in the episode it was started from.
#[derive(Debug)]
pub struct AuthSession {
    state: RwLock<SessionState>,
    logout_count: AtomicUsize,
    logout_tx: watch::Sender<Option<LogoutReason>>,
}

impl AuthSession {
    /// A session without credentials, e.g. before login.
    pub fn new() -> Self {
        let (logout_tx, _) = watch::channel(None);
        Self {
            state: RwLock::new(SessionState::default()),
            logout_count: AtomicUsize::new(0),
            logout_tx,
        }
    }

    pub fn with_tokens(pair: TokenPair) -> Self {
        let session = Self::new();
        session.establish(pair);
        session
    }

    /// Installs a fresh token pair after login and opens a new episode.
    pub fn establish(&self, pair: TokenPair) {
        self.set_tokens(Some(pair.access_token), Some(pair.refresh_token));
    }

    /// Sets raw tokens, either of which may be absent, and opens a new episode.
    pub fn set_tokens(&self, access_token: Option<String>, refresh_token: Option<String>) {
        let mut state = self.write();
        state.access_token = access_token;
        state.refresh_token = refresh_token;
        state.episode += 1;
        state.ended = false;
        self.logout_tx.send_replace(None);
    }

    /// The refresh token together with the episode it belongs to.
    pub(crate) fn refresh_grant(&self) -> (Option<String>, u64) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.refresh_token.clone(), state.episode)
    }

    /// Stores a refreshed pair without starting a new episode. Returns `false`
    /// and changes nothing when `episode` has ended or been replaced since.
    pub(crate) fn store(&self, pair: &TokenPair, episode: u64) -> bool {
        let mut state = self.write();
        if state.ended || state.episode != episode {
            return false;
        }
        state.access_token = Some(pair.access_token.clone());
        state.refresh_token = Some(pair.refresh_token.clone());
        true
    }

    pub fn access_token(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.refresh_grant().0
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Clears credentials and signals logout. Returns `false` when the
    /// current episode had already ended, in which case nothing fires.
    pub fn end(&self, reason: LogoutReason) -> bool {
        let mut state = self.write();
        state.access_token = None;
        state.refresh_token = None;
        if state.ended {
            return false;
        }
        state.ended = true;
        self.logout_count.fetch_add(1, Ordering::SeqCst);
        tracing::warn!("Session ended: {:?}", reason);
        self.logout_tx.send_replace(Some(reason));
        true
    }

    pub fn subscribe_logout(&self) -> watch::Receiver<Option<LogoutReason>> {
        self.logout_tx.subscribe()
    }

    pub fn logout_count(&self) -> usize {
        self.logout_count.load(Ordering::SeqCst)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}


impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
