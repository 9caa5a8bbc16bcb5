//! Error types for the API client.
//!
//! # Design
//! Failures that happen after a response arrived (`UnsuccessfulStatus`,
//! `Decode`, `Write`) carry the `ApiResponse` so callers can still branch on
//! the status code and headers. Failures before that point (bad input,
//! cancellation, transport) have no response to carry.

use reqwest::StatusCode;
use thiserror::Error;

use crate::context::ContextError;
use crate::http::ApiResponse;

/// Boxed error used where the underlying cause can come from several layers
/// (network read, context, sink).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by `ApiClient`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The base URL could not be parsed or lacks a scheme or host.
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request path could not be parsed as a URL reference.
    #[error("failed to parse relative path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The request payload could not be serialized to JSON.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// The caller's context was canceled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Network, DNS or connection failure, including the transport's own
    /// timeout.
    #[error("failed to execute request: {0}")]
    Transport(#[source] reqwest::Error),

    /// The server answered with a status outside `200..300`.
    #[error("request failed with status {}: {body}", .response.status.as_u16())]
    UnsuccessfulStatus { response: ApiResponse, body: String },

    /// The body was non-empty and could not be decoded into the destination.
    #[error("failed to decode response body: {source}")]
    Decode {
        response: ApiResponse,
        #[source]
        source: BoxError,
    },

    /// Copying the raw body into the caller's writer failed.
    #[error("failed to write response body to writer: {source}")]
    Write {
        response: ApiResponse,
        #[source]
        source: BoxError,
    },

    /// Client configuration could not be loaded.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// The response that accompanied this error, if one was received.
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            ApiError::UnsuccessfulStatus { response, .. }
            | ApiError::Decode { response, .. }
            | ApiError::Write { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Status code of the accompanying response, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|response| response.status)
    }

    /// True for cancellation and deadline errors raised by the caller's
    /// context.
    pub fn is_context(&self) -> bool {
        matches!(self, ApiError::Context(_))
    }
}
