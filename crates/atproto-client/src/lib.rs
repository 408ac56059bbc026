//! AT Protocol client for Skylark
//!
//! This crate provides the XRPC transport, the authenticated agent, and the
//! session provider that owns the credential lifecycle (sign-in, encrypted
//! persistence, resume with transparent refresh, sign-out).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod session;
pub mod xrpc;

pub use agent::{Agent, AgentError};
pub use session::provider::{ProviderError, SessionProvider, SessionState, SessionWatcher};
pub use session::SessionData;
pub use xrpc::{ErrorKind, XrpcClient, XrpcClientConfig, XrpcError, XrpcRequest, XrpcResponse};
