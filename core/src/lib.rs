//! Typed JSON client for a remote HTTP API.
//!
//! # Overview
//! `ApiClient` resolves request paths against a fixed base URL, encodes JSON
//! request bodies, sends them through a `reqwest::Client`, and either decodes
//! the JSON response into a caller-supplied value or copies the raw body into
//! a writer.
//!
//! # Design
//! - The base URL is validated once, in `ApiClient::new`.
//! - Request construction (`build_request`) is pure and testable without a
//!   server; `execute` does the I/O.
//! - Every call takes a `Context`; canceling it or passing its deadline
//!   aborts the in-flight request and surfaces `ApiError::Context`.
//! - Errors raised after a response arrived carry that response, so callers
//!   can still inspect the status code.
//!
//! ```no_run
//! use apiclient::{ApiClient, Context, Destination};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Default, Deserialize)]
//! struct Album {
//!     id: u64,
//!     title: String,
//! }
//!
//! # async fn run() -> Result<(), apiclient::ApiError> {
//! let client = ApiClient::new("https://api.example.com/v1/", None)?;
//! let ctx = Context::background().with_timeout(std::time::Duration::from_secs(5));
//! let mut albums: Vec<Album> = Vec::new();
//! let response = client.get(&ctx, "albums", Destination::json(&mut albums)).await?;
//! println!("{} albums ({})", albums.len(), response.status);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;

pub use client::ApiClient;
pub use config::{ClientConfig, DEFAULT_TIMEOUT};
pub use context::{Context, ContextError};
pub use error::ApiError;
pub use http::{ApiRequest, ApiResponse, Destination, HttpMethod, JsonTarget};
