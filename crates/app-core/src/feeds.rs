//! Feed pagination
//!
//! Cursor-based feed fetching over the timeline, author-feed, and likes
//! endpoints, merged into one scrollable in-memory sequence. Pages are
//! requested strictly sequentially per feed identity; a filter switch
//! discards whatever a stale in-flight fetch eventually returns.

use async_trait::async_trait;
use atproto_client::xrpc::XrpcRequest;
use atproto_client::{Agent, ErrorKind, XrpcError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::profiles::ProfileViewBasic;

/// Posts fetched per page
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// How close to the end of the materialized list counts as "near"
const NEAR_END_THRESHOLD: usize = 5;

/// Errors that can occur during feed operations
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// XRPC error
    #[error("XRPC error: {0}")]
    Xrpc(#[from] XrpcError),

    /// JSON parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FeedError {
    /// Coarse classification for inline display
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::Xrpc(e) => e.kind(),
            FeedError::Parse(_) => ErrorKind::Other,
        }
    }
}

/// Result type for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Image in an images embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedImage {
    /// Thumbnail URL
    pub thumb: String,
    /// Full-size URL
    pub fullsize: String,
    /// Alt text
    #[serde(default)]
    pub alt: String,
}

/// External link card in an embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLink {
    /// Destination URL
    pub uri: String,
    /// Card title
    #[serde(default)]
    pub title: String,
    /// Card description
    #[serde(default)]
    pub description: String,
    /// Thumbnail URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
}

/// Embedded content on a post
///
/// Closed over the embed kinds the app displays; anything the server adds
/// later lands in [`Embed::Unknown`] and is skipped at render time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    /// Attached images
    #[serde(rename = "app.bsky.embed.images#view")]
    Images {
        /// The images, up to four
        images: Vec<EmbedImage>,
    },
    /// Attached video
    #[serde(rename = "app.bsky.embed.video#view")]
    Video {
        /// HLS playlist URL
        playlist: String,
        /// Poster thumbnail URL
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
    },
    /// External link card
    #[serde(rename = "app.bsky.embed.external#view")]
    External {
        /// The link card
        external: ExternalLink,
    },
    /// Quoted post
    #[serde(rename = "app.bsky.embed.record#view")]
    Record {
        /// The quoted record view
        record: serde_json::Value,
    },
    /// Quoted post with attached media
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia {
        /// The quoted record view
        record: serde_json::Value,
        /// The attached media view
        media: serde_json::Value,
    },
    /// An embed kind this app does not know
    #[serde(other)]
    Unknown,
}

impl Embed {
    /// Whether this embed carries directly attached media
    pub fn has_media(&self) -> bool {
        matches!(
            self,
            Embed::Images { .. } | Embed::Video { .. } | Embed::RecordWithMedia { .. }
        )
    }
}

/// The authored record inside a post view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    /// Post text
    #[serde(default)]
    pub text: String,

    /// Creation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Reply reference, present when this post is a reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<serde_json::Value>,

    /// Rich text facets attached by the author
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<serde_json::Value>,
}

/// Viewer's state relative to a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ViewerState {
    /// URI of the viewer's like, if they liked this post
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like: Option<String>,

    /// URI of the viewer's repost, if they reposted this post
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost: Option<String>,
}

/// A post view in a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    /// URI of the post
    pub uri: String,

    /// CID of the post
    pub cid: String,

    /// Author of the post
    pub author: ProfileViewBasic,

    /// The authored record
    pub record: PostRecord,

    /// Embedded content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,

    /// Reply count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u32>,

    /// Repost count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<u32>,

    /// Like count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u32>,

    /// Timestamp when indexed
    pub indexed_at: String,

    /// Viewer state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerState>,
}

impl PostView {
    /// Whether this post is a reply
    pub fn is_reply(&self) -> bool {
        self.record.reply.is_some()
    }
}

/// A post in a feed with its context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedViewPost {
    /// The post itself
    pub post: PostView,

    /// Reply context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<serde_json::Value>,

    /// Reason this post appears in the feed (repost, pin)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<serde_json::Value>,
}

/// One fetched page of a feed
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Posts in the page, in feed order
    pub posts: Vec<FeedViewPost>,
    /// Continuation cursor; absent when the feed is exhausted
    pub cursor: Option<String>,
}

/// Which feed to paginate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFilter {
    /// Home timeline of the signed-in user
    Timeline,
    /// An actor's posts, replies excluded
    AuthorPosts {
        /// Handle or DID
        actor: String,
    },
    /// An actor's posts including replies
    AuthorWithReplies {
        /// Handle or DID
        actor: String,
    },
    /// An actor's media-bearing posts, replies excluded
    AuthorMedia {
        /// Handle or DID
        actor: String,
    },
    /// Posts an actor has liked
    AuthorLikes {
        /// Handle or DID
        actor: String,
    },
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    feed: Vec<FeedViewPost>,
    #[serde(default)]
    cursor: Option<String>,
}

/// Source of feed pages
///
/// Abstracted so the paginator can be driven by scripted pages in tests.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch one page of the given feed
    async fn fetch_page(
        &self,
        filter: &FeedFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<FeedPage>;
}

/// Feed source backed by the XRPC endpoints
pub struct XrpcFeedSource {
    agent: Arc<RwLock<Agent>>,
}

impl XrpcFeedSource {
    /// Create a source over the shared agent
    pub fn new(agent: Arc<RwLock<Agent>>) -> Self {
        Self { agent }
    }
}

/// Drop reply posts from a fetched page
///
/// The author feed endpoint cannot combine its media filter with reply
/// exclusion, so media tabs strip replies after the fetch.
fn strip_replies(posts: Vec<FeedViewPost>) -> Vec<FeedViewPost> {
    posts.into_iter().filter(|p| !p.post.is_reply()).collect()
}

#[async_trait]
impl FeedSource for XrpcFeedSource {
    async fn fetch_page(
        &self,
        filter: &FeedFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<FeedPage> {
        let mut request = match filter {
            FeedFilter::Timeline => XrpcRequest::query("app.bsky.feed.getTimeline"),
            FeedFilter::AuthorPosts { actor } => {
                XrpcRequest::query("app.bsky.feed.getAuthorFeed")
                    .param("actor", actor)
                    .param("filter", "posts_no_replies")
            }
            FeedFilter::AuthorWithReplies { actor } => {
                XrpcRequest::query("app.bsky.feed.getAuthorFeed")
                    .param("actor", actor)
                    .param("filter", "posts_with_replies")
            }
            FeedFilter::AuthorMedia { actor } => {
                XrpcRequest::query("app.bsky.feed.getAuthorFeed")
                    .param("actor", actor)
                    .param("filter", "posts_with_media")
            }
            FeedFilter::AuthorLikes { actor } => {
                XrpcRequest::query("app.bsky.feed.getActorLikes").param("actor", actor)
            }
        };

        request = request.param("limit", limit.to_string());
        if let Some(cursor) = cursor {
            request = request.param("cursor", cursor);
        }

        let agent = self.agent.read().await;
        let response = agent.client().query::<FeedResponse>(request).await?;
        drop(agent);

        let mut posts = response.data.feed;
        if matches!(filter, FeedFilter::AuthorMedia { .. }) {
            posts = strip_replies(posts);
        }

        Ok(FeedPage { posts, cursor: response.data.cursor })
    }
}

/// Outcome of a [`FeedPaginator::load_more`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was appended with this many posts
    Appended(usize),
    /// The feed is exhausted; nothing further will be requested
    EndOfFeed,
    /// A fetch for this feed is already outstanding
    AlreadyLoading,
    /// The filter changed while the fetch was in flight; result discarded
    Superseded,
}

struct PaginatorInner {
    filter: FeedFilter,
    posts: Vec<FeedViewPost>,
    cursor: Option<String>,
    exhausted: bool,
    in_flight: bool,
    generation: u64,
}

/// Cursor-sequential paginator over one feed identity
///
/// Pages are appended to an in-memory sequence; the consuming UI asks for
/// more when the viewport nears the end of what is materialized. Cloning
/// shares the accumulated state.
#[derive(Clone)]
pub struct FeedPaginator {
    source: Arc<dyn FeedSource>,
    limit: u32,
    inner: Arc<Mutex<PaginatorInner>>,
}

impl FeedPaginator {
    /// Create a paginator over a source, starting on the given feed
    pub fn new(source: Arc<dyn FeedSource>, filter: FeedFilter) -> Self {
        Self {
            source,
            limit: DEFAULT_PAGE_LIMIT,
            inner: Arc::new(Mutex::new(PaginatorInner {
                filter,
                posts: Vec::new(),
                cursor: None,
                exhausted: false,
                in_flight: false,
                generation: 0,
            })),
        }
    }

    /// Set the page size
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Fetch and append the next page
    ///
    /// At most one fetch is outstanding per paginator; concurrent calls get
    /// [`LoadOutcome::AlreadyLoading`]. A fetch error leaves the cursor
    /// untouched so an explicit user retry picks up where it left off.
    pub async fn load_more(&self) -> Result<LoadOutcome> {
        let (filter, cursor, generation) = {
            let mut inner = self.inner.lock().await;
            if inner.exhausted {
                return Ok(LoadOutcome::EndOfFeed);
            }
            if inner.in_flight {
                return Ok(LoadOutcome::AlreadyLoading);
            }
            inner.in_flight = true;
            (inner.filter.clone(), inner.cursor.clone(), inner.generation)
        };

        let result = self
            .source
            .fetch_page(&filter, cursor.as_deref(), self.limit)
            .await;

        let mut inner = self.inner.lock().await;

        if inner.generation != generation {
            // Filter changed underneath us; the result belongs to a feed
            // identity nobody is looking at anymore.
            debug!("Discarding stale page for superseded feed");
            return Ok(LoadOutcome::Superseded);
        }

        inner.in_flight = false;

        let page = result?;
        let appended = page.posts.len();

        inner.posts.extend(page.posts);
        inner.cursor = page.cursor;
        if inner.cursor.is_none() {
            inner.exhausted = true;
        }

        debug!(appended, exhausted = inner.exhausted, "Feed page appended");

        if appended == 0 && inner.exhausted {
            Ok(LoadOutcome::EndOfFeed)
        } else {
            Ok(LoadOutcome::Appended(appended))
        }
    }

    /// Switch to a different feed identity, clearing accumulated posts
    pub async fn set_filter(&self, filter: FeedFilter) {
        let mut inner = self.inner.lock().await;
        inner.filter = filter;
        inner.posts.clear();
        inner.cursor = None;
        inner.exhausted = false;
        inner.in_flight = false;
        inner.generation += 1;
    }

    /// Whether a view at `visible_index` warrants fetching the next page
    pub async fn near_end(&self, visible_index: usize) -> bool {
        let inner = self.inner.lock().await;
        !inner.exhausted
            && !inner.in_flight
            && inner.posts.len().saturating_sub(visible_index) <= NEAR_END_THRESHOLD
    }

    /// Snapshot of the accumulated posts
    pub async fn posts(&self) -> Vec<FeedViewPost> {
        self.inner.lock().await.posts.clone()
    }

    /// Number of accumulated posts
    pub async fn len(&self) -> usize {
        self.inner.lock().await.posts.len()
    }

    /// Whether no posts are accumulated
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.posts.is_empty()
    }

    /// Whether the feed reported exhaustion
    pub async fn is_exhausted(&self) -> bool {
        self.inner.lock().await.exhausted
    }

    /// The current feed identity
    pub async fn filter(&self) -> FeedFilter {
        self.inner.lock().await.filter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ProfileViewBasic;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn post(uri: &str, reply: bool) -> FeedViewPost {
        FeedViewPost {
            post: PostView {
                uri: uri.to_string(),
                cid: format!("cid-{uri}"),
                author: ProfileViewBasic {
                    did: "did:plc:author".to_string(),
                    handle: "author.bsky.social".to_string(),
                    display_name: None,
                    avatar: None,
                    viewer: None,
                },
                record: PostRecord {
                    text: "post text".to_string(),
                    created_at: None,
                    reply: reply.then(|| serde_json::json!({"root": {}, "parent": {}})),
                    facets: None,
                },
                embed: None,
                reply_count: None,
                repost_count: None,
                like_count: None,
                indexed_at: "2024-01-01T00:00:00Z".to_string(),
                viewer: None,
            },
            reply: None,
            reason: None,
        }
    }

    /// Serves a fixed script of pages, tracking cursors seen
    struct ScriptedSource {
        pages: Vec<FeedPage>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<FeedPage>) -> Self {
            Self { pages, calls: AtomicUsize::new(0), gate: None }
        }

        fn gated(pages: Vec<FeedPage>, gate: Arc<Notify>) -> Self {
            Self { pages, calls: AtomicUsize::new(0), gate: Some(gate) }
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _filter: &FeedFilter,
            cursor: Option<&str>,
            _limit: u32,
        ) -> Result<FeedPage> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            let call = self.calls.fetch_add(1, Ordering::SeqCst);

            // The cursor handed back must be the one the previous page produced.
            if call > 0 {
                let expected = self.pages[call - 1].cursor.as_deref();
                assert_eq!(cursor, expected, "cursor chain broken at page {call}");
            } else {
                assert_eq!(cursor, None);
            }

            Ok(self.pages[call].clone())
        }
    }

    fn two_page_script() -> Vec<FeedPage> {
        vec![
            FeedPage {
                posts: vec![post("at://a/1", false), post("at://a/2", false)],
                cursor: Some("page2".to_string()),
            },
            FeedPage { posts: vec![post("at://a/3", false)], cursor: None },
        ]
    }

    #[tokio::test]
    async fn test_pages_accumulate_in_order() {
        let source = Arc::new(ScriptedSource::new(two_page_script()));
        let paginator = FeedPaginator::new(source, FeedFilter::Timeline);

        assert_eq!(paginator.load_more().await.unwrap(), LoadOutcome::Appended(2));
        assert_eq!(paginator.load_more().await.unwrap(), LoadOutcome::Appended(1));

        let uris: Vec<_> = paginator
            .posts()
            .await
            .iter()
            .map(|p| p.post.uri.clone())
            .collect();
        assert_eq!(uris, vec!["at://a/1", "at://a/2", "at://a/3"]);
    }

    #[tokio::test]
    async fn test_missing_cursor_terminates_pagination() {
        let source = Arc::new(ScriptedSource::new(two_page_script()));
        let paginator = FeedPaginator::new(source.clone(), FeedFilter::Timeline);

        paginator.load_more().await.unwrap();
        paginator.load_more().await.unwrap();
        assert!(paginator.is_exhausted().await);

        // Further calls never reach the source.
        assert_eq!(paginator.load_more().await.unwrap(), LoadOutcome::EndOfFeed);
        assert_eq!(paginator.load_more().await.unwrap(), LoadOutcome::EndOfFeed);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_load_is_rejected() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::gated(two_page_script(), gate.clone()));
        let paginator = FeedPaginator::new(source, FeedFilter::Timeline);

        let first = {
            let paginator = paginator.clone();
            tokio::spawn(async move { paginator.load_more().await })
        };

        // Wait until the first fetch is parked on the gate.
        tokio::task::yield_now().await;
        assert_eq!(
            paginator.load_more().await.unwrap(),
            LoadOutcome::AlreadyLoading
        );

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), LoadOutcome::Appended(2));
    }

    #[tokio::test]
    async fn test_filter_switch_discards_stale_page() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::gated(two_page_script(), gate.clone()));
        let paginator = FeedPaginator::new(source, FeedFilter::Timeline);

        let stale = {
            let paginator = paginator.clone();
            tokio::spawn(async move { paginator.load_more().await })
        };
        tokio::task::yield_now().await;

        paginator
            .set_filter(FeedFilter::AuthorPosts { actor: "alice.bsky.social".to_string() })
            .await;

        gate.notify_one();
        assert_eq!(stale.await.unwrap().unwrap(), LoadOutcome::Superseded);

        // Nothing from the stale page landed.
        assert!(paginator.is_empty().await);
        assert_eq!(
            paginator.filter().await,
            FeedFilter::AuthorPosts { actor: "alice.bsky.social".to_string() }
        );
    }

    #[tokio::test]
    async fn test_near_end_thresholds() {
        let source = Arc::new(ScriptedSource::new(vec![FeedPage {
            posts: (0..20).map(|i| post(&format!("at://a/{i}"), false)).collect(),
            cursor: Some("more".to_string()),
        }]));
        let paginator = FeedPaginator::new(source, FeedFilter::Timeline);
        paginator.load_more().await.unwrap();

        assert!(!paginator.near_end(0).await);
        assert!(paginator.near_end(16).await);
        assert!(paginator.near_end(19).await);
    }

    #[test]
    fn test_strip_replies() {
        let posts = vec![
            post("at://a/1", false),
            post("at://a/2", true),
            post("at://a/3", false),
        ];

        let kept = strip_replies(posts);
        let uris: Vec<_> = kept.iter().map(|p| p.post.uri.as_str()).collect();
        assert_eq!(uris, vec!["at://a/1", "at://a/3"]);
    }

    #[test]
    fn test_embed_union_deserialization() {
        let images: Embed = serde_json::from_str(
            r#"{
                "$type": "app.bsky.embed.images#view",
                "images": [{ "thumb": "t", "fullsize": "f", "alt": "" }]
            }"#,
        )
        .unwrap();
        assert!(images.has_media());

        let external: Embed = serde_json::from_str(
            r#"{
                "$type": "app.bsky.embed.external#view",
                "external": { "uri": "https://example.com", "title": "x", "description": "" }
            }"#,
        )
        .unwrap();
        assert!(!external.has_media());

        let unknown: Embed = serde_json::from_str(
            r#"{ "$type": "app.bsky.embed.somethingNew#view" }"#,
        )
        .unwrap();
        assert_eq!(unknown, Embed::Unknown);
    }

    #[test]
    fn test_post_view_deserialization() {
        let json = r#"{
            "uri": "at://did:plc:author/app.bsky.feed.post/3k",
            "cid": "bafy...",
            "author": { "did": "did:plc:author", "handle": "author.bsky.social" },
            "record": {
                "text": "hello world",
                "createdAt": "2024-01-01T00:00:00Z",
                "reply": { "root": {}, "parent": {} }
            },
            "likeCount": 3,
            "indexedAt": "2024-01-01T00:00:01Z",
            "viewer": { "like": "at://did:plc:me/app.bsky.feed.like/3l" }
        }"#;

        let view: PostView = serde_json::from_str(json).unwrap();
        assert!(view.is_reply());
        assert_eq!(view.like_count, Some(3));
        assert!(view.viewer.unwrap().like.is_some());
    }
}
