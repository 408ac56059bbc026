//! Post and account interactions
//!
//! Like, repost, and follow are each one record create against the user's
//! repo; their inverses are one record delete. The UI applies counts
//! optimistically and reverts them when the call fails.

use atproto_client::xrpc::XrpcRequest;
use atproto_client::{Agent, ErrorKind, XrpcError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Interaction error types
#[derive(Debug, Error)]
pub enum InteractionError {
    /// XRPC error
    #[error("XRPC error: {0}")]
    Xrpc(#[from] XrpcError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No active session
    #[error("No active session")]
    NoSession,

    /// Malformed record URI
    #[error("Malformed record URI: {0}")]
    InvalidUri(String),
}

impl InteractionError {
    /// Coarse classification for inline display
    pub fn kind(&self) -> ErrorKind {
        match self {
            InteractionError::Xrpc(e) => e.kind(),
            InteractionError::NoSession => ErrorKind::Unauthenticated,
            InteractionError::InvalidUri(_) => ErrorKind::BadRequest,
            InteractionError::Serialization(_) => ErrorKind::Other,
        }
    }
}

/// Result type for interaction operations
pub type Result<T> = std::result::Result<T, InteractionError>;

/// Reference to a post being interacted with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    /// Post URI
    pub uri: String,
    /// Post CID
    pub cid: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRecordRequest<T: Serialize> {
    repo: String,
    collection: String,
    record: T,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRecordRequest {
    repo: String,
    collection: String,
    rkey: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectRecord {
    #[serde(rename = "$type")]
    record_type: String,
    subject: PostRef,
    created_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FollowRecord {
    #[serde(rename = "$type")]
    record_type: String,
    subject: String,
    created_at: String,
}

/// The rkey is the last path segment of an at:// record URI
fn rkey_from_uri(uri: &str) -> Result<&str> {
    uri.rsplit('/')
        .next()
        .filter(|rkey| !rkey.is_empty() && uri.starts_with("at://"))
        .ok_or_else(|| InteractionError::InvalidUri(uri.to_string()))
}

/// Interaction service over the shared agent
#[derive(Clone)]
pub struct InteractionService {
    agent: Arc<RwLock<Agent>>,
}

impl InteractionService {
    /// Create a new interaction service
    pub fn new(agent: Arc<RwLock<Agent>>) -> Self {
        Self { agent }
    }

    async fn create_record<T: Serialize + Send + Sync>(
        &self,
        collection: &str,
        record: T,
    ) -> Result<String> {
        let agent = self.agent.read().await;
        let repo = agent.did().ok_or(InteractionError::NoSession)?.to_string();

        let request = XrpcRequest::procedure("com.atproto.repo.createRecord").json_body(
            &CreateRecordRequest { repo, collection: collection.to_string(), record },
        )?;

        let response = agent
            .client()
            .procedure::<CreateRecordResponse>(request)
            .await?;

        Ok(response.data.uri)
    }

    async fn delete_record(&self, collection: &str, record_uri: &str) -> Result<()> {
        let rkey = rkey_from_uri(record_uri)?.to_string();

        let agent = self.agent.read().await;
        let repo = agent.did().ok_or(InteractionError::NoSession)?.to_string();

        let request = XrpcRequest::procedure("com.atproto.repo.deleteRecord").json_body(
            &DeleteRecordRequest { repo, collection: collection.to_string(), rkey },
        )?;

        agent
            .client()
            .procedure::<serde_json::Value>(request)
            .await?;

        Ok(())
    }

    /// Like a post, returning the like record URI (needed to unlike)
    pub async fn like(&self, post: PostRef) -> Result<String> {
        self.create_record(
            "app.bsky.feed.like",
            SubjectRecord {
                record_type: "app.bsky.feed.like".to_string(),
                subject: post,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await
    }

    /// Remove a like by its record URI
    pub async fn unlike(&self, like_uri: &str) -> Result<()> {
        self.delete_record("app.bsky.feed.like", like_uri).await
    }

    /// Repost a post, returning the repost record URI
    pub async fn repost(&self, post: PostRef) -> Result<String> {
        self.create_record(
            "app.bsky.feed.repost",
            SubjectRecord {
                record_type: "app.bsky.feed.repost".to_string(),
                subject: post,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await
    }

    /// Remove a repost by its record URI
    pub async fn unrepost(&self, repost_uri: &str) -> Result<()> {
        self.delete_record("app.bsky.feed.repost", repost_uri).await
    }

    /// Follow an account by DID, returning the follow record URI
    pub async fn follow(&self, did: &str) -> Result<String> {
        self.create_record(
            "app.bsky.graph.follow",
            FollowRecord {
                record_type: "app.bsky.graph.follow".to_string(),
                subject: did.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await
    }

    /// Remove a follow by its record URI
    pub async fn unfollow(&self, follow_uri: &str) -> Result<()> {
        self.delete_record("app.bsky.graph.follow", follow_uri).await
    }
}

/// Optimistically tracked interaction counts for one post
///
/// The UI bumps the count when the user acts, then reverts if the call
/// fails. Counts saturate at zero; the server remains authoritative on the
/// next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteractionCounts {
    /// Like count
    pub likes: u32,
    /// Repost count
    pub reposts: u32,
}

impl InteractionCounts {
    /// Create from server-reported counts
    pub fn new(likes: u32, reposts: u32) -> Self {
        Self { likes, reposts }
    }

    /// Apply an optimistic like
    pub fn apply_like(&mut self) {
        self.likes = self.likes.saturating_add(1);
    }

    /// Revert a like (failure or unlike)
    pub fn revert_like(&mut self) {
        self.likes = self.likes.saturating_sub(1);
    }

    /// Apply an optimistic repost
    pub fn apply_repost(&mut self) {
        self.reposts = self.reposts.saturating_add(1);
    }

    /// Revert a repost (failure or unrepost)
    pub fn revert_repost(&mut self) {
        self.reposts = self.reposts.saturating_sub(1);
    }
}

/// Snapshot of a post's interaction state taken before an optimistic update
///
/// Captured before the UI applies the hoped-for outcome; [`revert`] puts
/// everything back when the mutation call fails.
///
/// [`revert`]: OptimisticInteraction::revert
#[derive(Debug, Clone)]
pub struct OptimisticInteraction {
    previous_counts: InteractionCounts,
    previous_viewer: crate::feeds::ViewerState,
}

impl OptimisticInteraction {
    /// Capture the pre-mutation state
    pub fn begin(counts: &InteractionCounts, viewer: &crate::feeds::ViewerState) -> Self {
        Self { previous_counts: *counts, previous_viewer: viewer.clone() }
    }

    /// Restore the pre-mutation state after a failed call
    pub fn revert(
        self,
        counts: &mut InteractionCounts,
        viewer: &mut crate::feeds::ViewerState,
    ) {
        *counts = self.previous_counts;
        *viewer = self.previous_viewer;
    }
}

/// Log a failed mutation and produce the message for a transient notification
pub fn mutation_failure_notice(action: &str, error: &InteractionError) -> String {
    warn!(action, error = %error, "Mutation failed");
    format!("Couldn't {action}. Please try again.")
}
