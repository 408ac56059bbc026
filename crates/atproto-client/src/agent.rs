//! Agent - authenticated client for AT Protocol services
//!
//! The agent owns the XRPC client and the in-memory session. It knows how
//! to create a session from credentials, adopt a previously persisted one,
//! and refresh lapsed access tokens. Persistence is not its concern; the
//! session provider layers that on top.
//!
//! # Example
//!
//! ```rust,no_run
//! use atproto_client::Agent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut agent = Agent::new("https://bsky.social");
//!
//!     agent.login("alice.bsky.social", "password").await?;
//!     println!("Logged in as: {}", agent.did().unwrap());
//!
//!     Ok(())
//! }
//! ```

use crate::session::{is_jwt_expired, SessionData, SessionError};
use crate::xrpc::{XrpcClient, XrpcClientConfig, XrpcError, XrpcRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// XRPC error
    #[error("XRPC error: {0}")]
    Xrpc(#[from] XrpcError),

    /// No active session
    #[error("No active session - please login first")]
    NoSession,

    /// Service error
    #[error("Service error: {0}")]
    Service(String),
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Login request parameters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// User identifier (handle or email)
    pub identifier: String,
    /// User password
    pub password: String,
    /// Optional auth factor token for 2FA
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_factor_token: Option<String>,
}

/// Response from `createSession` and `refreshSession`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Access JWT token
    pub access_jwt: String,
    /// Refresh JWT token
    pub refresh_jwt: String,
    /// User DID
    pub did: String,
    /// User handle
    pub handle: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Session active
    #[serde(default)]
    pub active: Option<bool>,
    /// Account status
    #[serde(default)]
    pub status: Option<String>,
}

impl SessionResponse {
    fn into_session_data(self) -> SessionData {
        SessionData {
            access_jwt: self.access_jwt,
            refresh_jwt: self.refresh_jwt,
            did: self.did,
            handle: self.handle,
            email: self.email,
            active: self.active.unwrap_or(true),
            status: self.status,
        }
    }
}

/// Authenticated client for a single AT Protocol service
pub struct Agent {
    service: String,
    client: XrpcClient,
    session: Option<SessionData>,
}

impl Agent {
    /// Create a new agent for the given PDS service URL
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        let client = XrpcClient::new(XrpcClientConfig::new(service.clone()));

        Self { service, client, session: None }
    }

    /// Create a new agent with a custom XRPC configuration
    pub fn with_config(config: XrpcClientConfig) -> Self {
        let service = config.service_url.clone();
        let client = XrpcClient::new(config);

        Self { service, client, session: None }
    }

    /// Login to the service with credentials
    pub async fn login(
        &mut self,
        identifier: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<SessionData> {
        self.login_with_token(identifier, password, None).await
    }

    /// Login with an optional 2FA auth factor token
    pub async fn login_with_token(
        &mut self,
        identifier: impl Into<String>,
        password: impl Into<String>,
        auth_token: Option<String>,
    ) -> Result<SessionData> {
        let request = LoginRequest {
            identifier: identifier.into(),
            password: password.into(),
            auth_factor_token: auth_token,
        };

        let xrpc_request = XrpcRequest::procedure("com.atproto.server.createSession")
            .json_body(&request)
            .map_err(|e| AgentError::Service(e.to_string()))?;

        let response: SessionResponse =
            self.client.procedure(xrpc_request).await.map(|r| r.data)?;

        let session_data = response.into_session_data();
        info!(did = %session_data.did, "Session created");

        self.install_session(session_data.clone());
        Ok(session_data)
    }

    /// Resume from previously persisted session data
    ///
    /// Adopts the tokens as-is when the access token is still live. When it
    /// has lapsed, exchanges the refresh token for a fresh pair in a single
    /// network call. The returned bundle is whatever the agent ends up
    /// holding, so callers can re-persist it.
    pub async fn resume_session(&mut self, session_data: SessionData) -> Result<SessionData> {
        if !is_jwt_expired(&session_data.access_jwt) {
            debug!(did = %session_data.did, "Resuming session without refresh");
            self.install_session(session_data.clone());
            return Ok(session_data);
        }

        debug!(did = %session_data.did, "Access token lapsed, refreshing");
        self.refresh_with(&session_data.refresh_jwt).await
    }

    /// Exchange the current refresh token for a new token pair
    pub async fn refresh_session(&mut self) -> Result<SessionData> {
        let refresh_jwt = self
            .session
            .as_ref()
            .map(|s| s.refresh_jwt.clone())
            .ok_or(AgentError::NoSession)?;

        self.refresh_with(&refresh_jwt).await
    }

    async fn refresh_with(&mut self, refresh_jwt: &str) -> Result<SessionData> {
        // refreshSession authenticates with the refresh token, not access.
        let xrpc_request = XrpcRequest::procedure("com.atproto.server.refreshSession")
            .header("Authorization", format!("Bearer {refresh_jwt}"));

        let response: SessionResponse =
            self.client.procedure(xrpc_request).await.map(|r| r.data)?;

        let session_data = response.into_session_data();
        info!(did = %session_data.did, "Session refreshed");

        self.install_session(session_data.clone());
        Ok(session_data)
    }

    /// Adopt session data without any network traffic
    ///
    /// Used when another context already validated or refreshed the tokens
    /// and this agent only needs to catch up.
    pub fn adopt_session(&mut self, session_data: SessionData) {
        self.install_session(session_data);
    }

    /// Ask the server to invalidate the current refresh token
    ///
    /// Leaves the local session in place; callers that want a full sign-out
    /// follow this with [`Agent::logout`].
    pub async fn delete_remote_session(&mut self) -> Result<()> {
        let refresh_jwt = self
            .session
            .as_ref()
            .map(|s| s.refresh_jwt.clone())
            .ok_or(AgentError::NoSession)?;

        // deleteSession also authenticates with the refresh token.
        let xrpc_request = XrpcRequest::procedure("com.atproto.server.deleteSession")
            .header("Authorization", format!("Bearer {refresh_jwt}"));

        self.client.procedure::<serde_json::Value>(xrpc_request).await?;
        info!("Remote session deleted");
        Ok(())
    }

    /// Drop the local session and auth header
    pub fn logout(&mut self) {
        self.session = None;
        self.client.set_auth_header(None);
        debug!("Local session cleared");
    }

    fn install_session(&mut self, session_data: SessionData) {
        self.client
            .set_auth_header(Some(format!("Bearer {}", session_data.access_jwt)));
        self.session = Some(session_data);
    }

    /// Get the current session data
    pub fn session(&self) -> Option<&SessionData> {
        self.session.as_ref()
    }

    /// Get the current user's DID
    pub fn did(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.did.as_str())
    }

    /// Get the current user's handle
    pub fn handle(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.handle.as_str())
    }

    /// Check whether the agent holds a session
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Get the service URL
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Borrow the XRPC client for direct requests
    pub fn client(&self) -> &XrpcClient {
        &self.client
    }
}
