//! Rich text rendering
//!
//! Maps tokenized segments to display units a UI layer can draw without
//! re-tokenizing. Pure and order-preserving: one display unit per segment,
//! no hidden state.

use crate::richtext::Segment;

/// Where a navigable display unit leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A route inside the application (profile page, tag listing)
    Internal(String),
    /// An external URL
    External(String),
}

/// One drawable unit of rendered rich text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayUnit {
    /// Inert text
    Text {
        /// The text to draw
        text: String,
    },
    /// A clickable unit
    Anchor {
        /// The visible label
        label: String,
        /// Navigation target
        destination: Destination,
        /// Whether activation opens a new external context
        opens_new_context: bool,
    },
}

/// Route for a profile page keyed by handle
pub fn profile_route(handle: &str) -> String {
    format!("/{handle}")
}

/// Route for a tag listing keyed by tag name
pub fn tag_route(tag: &str) -> String {
    format!("/tag/{tag}")
}

/// Strip a leading scheme from link display text
fn display_label(text: &str) -> &str {
    text.strip_prefix("https://")
        .or_else(|| text.strip_prefix("http://"))
        .unwrap_or(text)
}

/// Render segments into display units
///
/// Exactly one unit per segment, in segment order. Mentions and tags
/// navigate internally; links open in a new external context with the
/// scheme stripped from the visible label.
pub fn render(segments: &[Segment]) -> Vec<DisplayUnit> {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Plain { text } => DisplayUnit::Text { text: text.clone() },
            Segment::Mention { text, handle, .. } => DisplayUnit::Anchor {
                label: text.clone(),
                destination: Destination::Internal(profile_route(handle)),
                opens_new_context: false,
            },
            Segment::Link { text, uri } => DisplayUnit::Anchor {
                label: display_label(text).to_string(),
                destination: Destination::External(uri.clone()),
                opens_new_context: true,
            },
            Segment::Tag { text, tag } => DisplayUnit::Anchor {
                label: text.clone(),
                destination: Destination::Internal(tag_route(tag)),
                opens_new_context: false,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::richtext::tokenize;

    #[test]
    fn test_one_unit_per_segment_in_order() {
        let segments = tokenize("hello @bob.bsky.social check #art and http://foo.io");
        let units = render(&segments);

        assert_eq!(units.len(), segments.len());
        for (segment, unit) in segments.iter().zip(&units) {
            match segment {
                Segment::Plain { .. } => assert!(matches!(unit, DisplayUnit::Text { .. })),
                _ => assert!(matches!(unit, DisplayUnit::Anchor { .. })),
            }
        }
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let segments = tokenize("hi @alice.test see example.com/x #rust");
        assert_eq!(render(&segments), render(&segments));
    }

    #[test]
    fn test_mention_routes_to_profile() {
        let segments = tokenize("@alice.bsky.social");
        let units = render(&segments);

        assert_eq!(
            units[0],
            DisplayUnit::Anchor {
                label: "@alice.bsky.social".to_string(),
                destination: Destination::Internal("/alice.bsky.social".to_string()),
                opens_new_context: false,
            }
        );
    }

    #[test]
    fn test_tag_routes_to_tag_listing() {
        let segments = tokenize("#art");
        let units = render(&segments);

        assert_eq!(
            units[0],
            DisplayUnit::Anchor {
                label: "#art".to_string(),
                destination: Destination::Internal("/tag/art".to_string()),
                opens_new_context: false,
            }
        );
    }

    #[test]
    fn test_link_label_strips_scheme() {
        let segments = tokenize("https://example.com/x");
        let units = render(&segments);

        assert_eq!(
            units[0],
            DisplayUnit::Anchor {
                label: "example.com/x".to_string(),
                destination: Destination::External("https://example.com/x".to_string()),
                opens_new_context: true,
            }
        );
    }

    #[test]
    fn test_schemeless_link_label_unchanged() {
        let segments = tokenize("example.com/x");
        let units = render(&segments);

        assert_eq!(
            units[0],
            DisplayUnit::Anchor {
                label: "example.com/x".to_string(),
                destination: Destination::External("https://example.com/x".to_string()),
                opens_new_context: true,
            }
        );
    }
}
