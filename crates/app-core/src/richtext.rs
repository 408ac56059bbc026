//! Rich text tokenization
//!
//! Splits free-form post text into typed segments (plain, mention, link,
//! hashtag). Tokenization is total and pure: any string in, an ordered
//! sequence of segments out, and concatenating the segments' literal text
//! always reconstructs the input exactly.
//!
//! Mentions are resolved first and their text is never reconsidered for
//! link matching, so a domain-shaped handle like `@alice.example.com` stays
//! one mention rather than becoming a mention plus a link.
//!
//! # Example
//!
//! ```rust
//! use app_core::richtext::{tokenize, Segment};
//!
//! let segments = tokenize("hello @alice.bsky.social check #art");
//! assert!(matches!(&segments[1], Segment::Mention { handle, .. } if handle == "alice.bsky.social"));
//! ```

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Errors that can occur during handle resolution
#[derive(Debug, thiserror::Error)]
pub enum RichTextError {
    /// Network or API error
    #[error("API error: {0}")]
    ApiError(String),
}

/// Result type for rich text operations
pub type Result<T> = std::result::Result<T, RichTextError>;

/// A typed span of post text
///
/// Every variant carries the exact literal substring it was cut from. The
/// concatenation of `text()` over a tokenized sequence, in order, is the
/// original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text with no special meaning
    Plain {
        /// The literal substring
        text: String,
    },
    /// A mention of another account
    Mention {
        /// The literal substring, including the leading `@`
        text: String,
        /// The mentioned handle, without the leading `@`
        handle: String,
        /// The resolved DID, filled in by [`resolve_mentions`]
        did: Option<String>,
    },
    /// A link to an external destination
    Link {
        /// The literal substring as it appeared in the post
        text: String,
        /// Navigation target, normalized to carry a scheme
        uri: String,
    },
    /// A hashtag
    Tag {
        /// The literal substring, including the leading `#`
        text: String,
        /// The tag name, without the leading `#`
        tag: String,
    },
}

impl Segment {
    /// The exact literal substring this segment was cut from
    pub fn text(&self) -> &str {
        match self {
            Segment::Plain { text }
            | Segment::Mention { text, .. }
            | Segment::Link { text, .. }
            | Segment::Tag { text, .. } => text,
        }
    }
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@[\w-]+(?:\.[\w-]+)*").expect("mention regex"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:https?://)?(?:www\.)?[A-Za-z0-9][-A-Za-z0-9@:%._+~#=]{0,255}\.[A-Za-z]{2,}[-A-Za-z0-9()@:%_+.~#?&/=]*",
        )
        .expect("url regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#[A-Za-z][A-Za-z0-9_]*").expect("tag regex"))
}

/// Punctuation that never ends a URL in running text
const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"', ')', ']'];

/// Tokenize post text into an ordered, non-overlapping segment sequence
///
/// Two passes: mentions first, then links and hashtags inside the remaining
/// plain spans. The result covers every character of the input exactly once.
pub fn tokenize(text: &str) -> Vec<Segment> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut cursor = 0;

    for m in mention_regex().find_iter(text) {
        // Anything directly attached to a word (emails, mid-token @s) is
        // not a mention.
        if preceded_by_word(text, m.start()) {
            continue;
        }
        if m.start() < cursor {
            continue;
        }

        if m.start() > cursor {
            tokenize_plain_span(&text[cursor..m.start()], &mut segments);
        }

        let matched = m.as_str();
        segments.push(Segment::Mention {
            text: matched.to_string(),
            handle: matched[1..].to_string(),
            did: None,
        });
        cursor = m.end();
    }

    if cursor < text.len() {
        tokenize_plain_span(&text[cursor..], &mut segments);
    }

    segments
}

/// Scan a provisional plain span for links and hashtags
fn tokenize_plain_span(span: &str, segments: &mut Vec<Segment>) {
    let mut matches: Vec<(usize, usize, Segment)> = Vec::new();

    for m in url_regex().find_iter(span) {
        if preceded_by_word(span, m.start()) || preceded_by(span, m.start(), '@') {
            continue;
        }

        let trimmed = shed_trailing_punct(m.as_str());
        if trimmed.is_empty() {
            continue;
        }

        let uri = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        matches.push((
            m.start(),
            m.start() + trimmed.len(),
            Segment::Link { text: trimmed.to_string(), uri },
        ));
    }

    for m in tag_regex().find_iter(span) {
        if preceded_by_word(span, m.start()) || preceded_by(span, m.start(), '#') {
            continue;
        }

        let matched = m.as_str();
        matches.push((
            m.start(),
            m.end(),
            Segment::Tag { text: matched.to_string(), tag: matched[1..].to_string() },
        ));
    }

    matches.sort_by_key(|(start, _, _)| *start);

    let mut cursor = 0;
    for (start, end, segment) in matches {
        // Overlap goes to whichever match started earlier.
        if start < cursor {
            continue;
        }

        if start > cursor {
            segments.push(Segment::Plain { text: span[cursor..start].to_string() });
        }
        segments.push(segment);
        cursor = end;
    }

    if cursor < span.len() {
        segments.push(Segment::Plain { text: span[cursor..].to_string() });
    }
}

fn preceded_by_word(text: &str, offset: usize) -> bool {
    text[..offset]
        .chars()
        .next_back()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false)
}

fn preceded_by(text: &str, offset: usize, ch: char) -> bool {
    text[..offset].chars().next_back() == Some(ch)
}

/// Strip punctuation a sentence leaves stuck to a URL
///
/// A closing parenthesis is kept when the match contains its opener, so
/// Wikipedia-style `example.com/Foo_(bar)` URLs survive intact.
fn shed_trailing_punct(matched: &str) -> &str {
    let mut s = matched;
    loop {
        let Some(last) = s.chars().next_back() else {
            break;
        };
        if !TRAILING_PUNCT.contains(&last) {
            break;
        }
        if last == ')' && s.contains('(') {
            break;
        }
        s = &s[..s.len() - last.len_utf8()];
    }
    s
}

/// Resolves handles to stable DIDs
#[async_trait]
pub trait HandleResolver: Send + Sync {
    /// Resolve a handle (without the leading `@`) to its DID
    async fn resolve(&self, handle: &str) -> Result<String>;
}

/// Fill in DIDs for the mention segments of a tokenized sequence
///
/// Resolution failures are logged and leave the DID unset; the mention is
/// still navigable by handle.
pub async fn resolve_mentions<R: HandleResolver + ?Sized>(
    segments: &mut [Segment],
    resolver: &R,
) {
    for segment in segments.iter_mut() {
        if let Segment::Mention { handle, did, .. } = segment {
            match resolver.resolve(handle).await {
                Ok(resolved) => *did = Some(resolved),
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Handle resolution failed");
                }
            }
        }
    }
}
