//! Session provider - credential lifecycle over agent and vault
//!
//! One provider per running context. It owns the agent, persists sessions
//! through the encrypted vault, and exposes a watcher so sibling contexts
//! sharing the same storage scope can observe sign-outs.
//!
//! # Example
//!
//! ```rust,no_run
//! use atproto_client::SessionProvider;
//! use storage::{KvStore, SessionVault, VaultConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let kv = KvStore::in_memory()?;
//!     let vault = SessionVault::new(kv, &VaultConfig::from_env());
//!     let mut provider = SessionProvider::new("https://bsky.social", vault);
//!
//!     if !provider.resume().await? {
//!         provider.sign_in("alice.bsky.social", "password").await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::agent::{Agent, AgentError};
use crate::session::SessionData;
use std::sync::Arc;
use storage::{SessionVault, Subscription, VaultError};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors that can occur during provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Vault error
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    /// Agent error
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// No active session
    #[error("No active session")]
    NoSession,
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Authentication state of the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; sign-in required
    Unauthenticated,
    /// Sign-in in flight
    Authenticating,
    /// Live session held
    Authenticated,
    /// Token refresh in flight
    Refreshing,
}

/// Watches the persisted session for changes made by other contexts
///
/// Obtained from [`SessionProvider::watcher`]. After [`changed`] resolves
/// the observer calls [`SessionProvider::revalidate`] to bring its own
/// state in line with storage.
///
/// [`changed`]: SessionWatcher::changed
pub struct SessionWatcher {
    sub: Subscription,
}

impl SessionWatcher {
    /// Wait for the next change to the persisted session
    ///
    /// Resolves `true` when a change arrived and `false` when the storage
    /// scope shut down and no further events will come.
    pub async fn changed(&mut self) -> bool {
        self.sub.changed().await
    }
}

/// Session provider owning the agent and the persisted credential lifecycle
pub struct SessionProvider {
    service: String,
    vault: SessionVault,
    agent: Option<Arc<RwLock<Agent>>>,
    state: SessionState,
}

impl SessionProvider {
    /// Create a provider for the given service over a session vault
    pub fn new(service: impl Into<String>, vault: SessionVault) -> Self {
        Self {
            service: service.into(),
            vault,
            agent: None,
            state: SessionState::Unauthenticated,
        }
    }

    /// Get the current authentication state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check whether a live session is held
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Get a handle to the authenticated agent, if any
    pub fn agent(&self) -> Option<Arc<RwLock<Agent>>> {
        self.agent.clone()
    }

    /// Get the current session data, if any
    pub async fn session(&self) -> Option<SessionData> {
        match &self.agent {
            Some(agent) => agent.read().await.session().cloned(),
            None => None,
        }
    }

    /// Sign in against a different service endpoint
    ///
    /// The provider keeps the new endpoint for later resumes and refreshes.
    pub async fn sign_in_with_service(
        &mut self,
        identifier: impl Into<String>,
        password: impl Into<String>,
        service: impl Into<String>,
    ) -> Result<SessionData> {
        self.service = service.into();
        self.sign_in(identifier, password).await
    }

    /// Sign in with credentials, persisting the session on success
    pub async fn sign_in(
        &mut self,
        identifier: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<SessionData> {
        self.state = SessionState::Authenticating;

        let mut agent = Agent::new(self.service.clone());
        let session_data = match agent.login(identifier, password).await {
            Ok(data) => data,
            Err(e) => {
                self.state = SessionState::Unauthenticated;
                return Err(e.into());
            }
        };

        if let Err(e) = self.vault.store(&session_data) {
            self.state = SessionState::Unauthenticated;
            return Err(e.into());
        }

        self.agent = Some(Arc::new(RwLock::new(agent)));
        self.state = SessionState::Authenticated;

        info!(did = %session_data.did, "Signed in");
        Ok(session_data)
    }

    /// Attempt to restore a persisted session
    ///
    /// Returns `Ok(true)` when a session is live afterwards and `Ok(false)`
    /// when there is nothing usable to restore (no blob, corrupt blob, or a
    /// lapsed refresh token; the latter two also clear the vault). A live
    /// access token resumes without network traffic; a lapsed one triggers
    /// exactly one refresh call and the refreshed tokens are re-persisted.
    /// Transient transport failures propagate as errors without touching
    /// the vault so a later attempt can still succeed. Every error path
    /// settles the state back to [`SessionState::Unauthenticated`] rather
    /// than leaving it mid-refresh.
    pub async fn resume(&mut self) -> Result<bool> {
        let session_data = match self.vault.load::<SessionData>() {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(false),
            Err(VaultError::Corrupt(reason)) => {
                warn!(%reason, "Discarding corrupt persisted session");
                self.vault.clear()?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if session_data.refresh_expired() {
            debug!("Persisted refresh token lapsed, discarding session");
            self.vault.clear()?;
            return Ok(false);
        }

        let needs_refresh = session_data.access_expired();
        if needs_refresh {
            self.state = SessionState::Refreshing;
        }

        let mut agent = Agent::new(self.service.clone());
        let restored = match agent.resume_session(session_data).await {
            Ok(data) => data,
            Err(AgentError::Xrpc(e)) if matches!(e.status(), 400 | 401) => {
                // The server rejected the refresh token outright.
                warn!(status = e.status(), "Server rejected persisted session");
                self.vault.clear()?;
                self.state = SessionState::Unauthenticated;
                return Ok(false);
            }
            Err(e) => {
                self.state = SessionState::Unauthenticated;
                return Err(e.into());
            }
        };

        if needs_refresh {
            if let Err(e) = self.vault.store(&restored) {
                self.state = SessionState::Unauthenticated;
                return Err(e.into());
            }
        }

        self.agent = Some(Arc::new(RwLock::new(agent)));
        self.state = SessionState::Authenticated;

        info!(did = %restored.did, refreshed = needs_refresh, "Session resumed");
        Ok(true)
    }

    /// Sign out, clearing persisted and in-memory state
    ///
    /// The remote session delete is best effort; a failure there never
    /// blocks the local sign-out.
    pub async fn sign_out(&mut self) -> Result<()> {
        if let Some(agent) = self.agent.take() {
            let mut agent = agent.write().await;
            if let Err(e) = agent.delete_remote_session().await {
                warn!(error = %e, "Remote session delete failed, continuing sign-out");
            }
            agent.logout();
        }

        self.vault.clear()?;
        self.state = SessionState::Unauthenticated;

        info!("Signed out");
        Ok(())
    }

    /// Reconcile in-memory state with the persisted session
    ///
    /// Called after [`SessionWatcher::changed`] fires. A vanished blob means
    /// another context signed out, so the agent is dropped. A present blob
    /// is adopted in place without network traffic (another context may
    /// have refreshed the tokens).
    pub async fn revalidate(&mut self) -> Result<()> {
        let session_data = match self.vault.load::<SessionData>() {
            Ok(data) => data,
            Err(VaultError::Corrupt(reason)) => {
                warn!(%reason, "Persisted session corrupt during revalidate");
                None
            }
            Err(e) => return Err(e.into()),
        };

        match session_data {
            None => {
                if self.agent.take().is_some() {
                    info!("Session cleared by another context, dropping agent");
                }
                self.state = SessionState::Unauthenticated;
            }
            Some(data) => {
                match &self.agent {
                    Some(agent) => agent.write().await.adopt_session(data),
                    None => {
                        let mut agent = Agent::new(self.service.clone());
                        agent.adopt_session(data);
                        self.agent = Some(Arc::new(RwLock::new(agent)));
                    }
                }
                self.state = SessionState::Authenticated;
            }
        }

        Ok(())
    }

    /// Subscribe to persisted-session changes from sibling contexts
    pub fn watcher(&self) -> SessionWatcher {
        SessionWatcher { sub: self.vault.watch() }
    }
}
