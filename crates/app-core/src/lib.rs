//! Core application logic for Skylark
//!
//! This crate contains the rich text tokenizer and renderer, feed
//! pagination, profile viewing, and post interactions. Everything here is
//! UI-framework agnostic; a front end consumes segments, display units,
//! and post pages as plain data.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod feeds;
pub mod interactions;
pub mod profiles;
pub mod render;
pub mod richtext;

pub use feeds::{FeedFilter, FeedPage, FeedPaginator, FeedSource, LoadOutcome, XrpcFeedSource};
pub use interactions::{InteractionCounts, InteractionService, OptimisticInteraction, PostRef};
pub use profiles::{ProfileService, ProfileViewBasic, ProfileViewDetailed};
pub use render::{render, Destination, DisplayUnit};
pub use richtext::{resolve_mentions, tokenize, HandleResolver, Segment};
