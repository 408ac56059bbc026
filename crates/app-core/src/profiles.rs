//! Profile viewing
//!
//! Fetches profile data for the profile page header and resolves handles
//! to DIDs for mention navigation.

use async_trait::async_trait;
use atproto_client::xrpc::XrpcRequest;
use atproto_client::{Agent, ErrorKind, XrpcError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::richtext::{HandleResolver, RichTextError};

/// Profile service error types
#[derive(Debug, Error)]
pub enum ProfileError {
    /// XRPC error
    #[error("XRPC error: {0}")]
    Xrpc(#[from] XrpcError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProfileError {
    /// Coarse classification for inline display
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProfileError::Xrpc(e) => e.kind(),
            ProfileError::Serialization(_) => ErrorKind::Other,
        }
    }
}

/// Result type for profile operations
pub type Result<T> = std::result::Result<T, ProfileError>;

/// Viewer state for a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewerState {
    /// Whether the current user is muting this profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,

    /// Whether this profile is blocking the current user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<bool>,

    /// URI of the follow record if following
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,

    /// URI of the follow record if followed by this profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followed_by: Option<String>,
}

/// Compact profile view, as embedded in feed posts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewBasic {
    /// DID
    pub did: String,

    /// Handle
    pub handle: String,

    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Avatar image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    /// Viewer state relative to this profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ProfileViewerState>,
}

/// Full profile view for the profile page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewDetailed {
    /// DID
    pub did: String,

    /// Handle
    pub handle: String,

    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Profile description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Avatar image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    /// Banner image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,

    /// Follower count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<u32>,

    /// Following count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follows_count: Option<u32>,

    /// Post count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posts_count: Option<u32>,

    /// Timestamp when indexed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,

    /// Viewer state relative to this profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ProfileViewerState>,
}

#[derive(Debug, Deserialize)]
struct ResolveHandleResponse {
    did: String,
}

/// Profile service over the shared agent
#[derive(Clone)]
pub struct ProfileService {
    agent: Arc<RwLock<Agent>>,
}

impl ProfileService {
    /// Create a new profile service
    pub fn new(agent: Arc<RwLock<Agent>>) -> Self {
        Self { agent }
    }

    /// Fetch a profile by handle or DID
    pub async fn get_profile(&self, actor: &str) -> Result<ProfileViewDetailed> {
        let request = XrpcRequest::query("app.bsky.actor.getProfile").param("actor", actor);

        let agent = self.agent.read().await;
        let response = agent.client().query::<ProfileViewDetailed>(request).await?;

        Ok(response.data)
    }

    /// Resolve a handle to its DID
    pub async fn resolve_handle(&self, handle: &str) -> Result<String> {
        let request =
            XrpcRequest::query("com.atproto.identity.resolveHandle").param("handle", handle);

        let agent = self.agent.read().await;
        let response = agent
            .client()
            .query::<ResolveHandleResponse>(request)
            .await?;

        Ok(response.data.did)
    }
}

#[async_trait]
impl HandleResolver for ProfileService {
    async fn resolve(&self, handle: &str) -> std::result::Result<String, RichTextError> {
        self.resolve_handle(handle)
            .await
            .map_err(|e| RichTextError::ApiError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_deserialization() {
        let json = r#"{
            "did": "did:plc:abc123",
            "handle": "alice.bsky.social",
            "displayName": "Alice",
            "description": "hi",
            "followersCount": 10,
            "followsCount": 5,
            "postsCount": 42,
            "viewer": { "following": "at://did:plc:me/app.bsky.graph.follow/3k" }
        }"#;

        let profile: ProfileViewDetailed = serde_json::from_str(json).unwrap();
        assert_eq!(profile.handle, "alice.bsky.social");
        assert_eq!(profile.followers_count, Some(10));
        assert!(profile.viewer.unwrap().following.is_some());
    }

    #[test]
    fn test_profile_basic_tolerates_missing_optionals() {
        let json = r#"{ "did": "did:plc:abc123", "handle": "alice.bsky.social" }"#;

        let profile: ProfileViewBasic = serde_json::from_str(json).unwrap();
        assert!(profile.display_name.is_none());
        assert!(profile.viewer.is_none());
    }

    #[test]
    fn test_error_kind_passthrough() {
        let err = ProfileError::Xrpc(XrpcError::new(404, "NotFound", "no such actor"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
