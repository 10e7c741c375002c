//! # lib_livefeed
//!
//! A resilient live-data client. A screen (or any other consumer) mounts one
//! [`feed::LiveFeedClient`] per endpoint and receives continuously updated
//! server data without manual refresh:
//!
//! - a server-push (SSE) stream is opened and every well-formed event is
//!   delivered as a [`feed::DataSnapshot`];
//! - genuine connection failures are retried with capped exponential backoff;
//! - once the retry budget is spent the client falls back to plain polling.
//!
//! Modules are gated by folder, the same way across the workspace:
//! `configs`, `retrieve` and `feed` (all enabled by `full`, the default).

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Library-wide error type.
#[cfg(any(feature = "configs", feature = "retrieve"))]
pub mod errors;

/// Endpoint and retry-policy configuration.
#[cfg(feature = "configs")]
pub mod configs;

/// Generic HTTP retrieval with retry middleware.
#[cfg(feature = "retrieve")]
pub mod retrieve;

/// The Live Feed Client.
#[cfg(feature = "feed")]
pub mod feed;

#[cfg(any(feature = "configs", feature = "retrieve"))]
pub use errors::FeedError;
