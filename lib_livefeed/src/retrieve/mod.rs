//! # Data Retrieval Module
//!
//! Request/response HTTP access for the parts of the system that do not
//! stream. The live feed's polling fallback fetches its snapshots through
//! the `ApiClient` defined here.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff for transient failures.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
