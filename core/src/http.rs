//! Plain-data request and response types.
//!
//! # Design
//! `ApiRequest` is fully built before anything touches the network, so URL
//! resolution, headers and body encoding can be checked without a server.
//! `ApiResponse` keeps only the status line metadata: the body is consumed
//! inside `ApiClient::execute` and handed to the caller's `Destination`.

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWrite;
use url::Url;

use crate::context::Context;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// A request ready to be sent by `ApiClient::execute`.
///
/// Built by `ApiClient::build_request`, which resolves `url` against the
/// client's base URL and attaches the caller's context.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub(crate) ctx: Context,
}

impl ApiRequest {
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

/// Status, headers and final URL of a received response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A value the response body can be JSON-decoded into.
///
/// Implemented for every `DeserializeOwned` type. Only the first JSON value
/// in the body is read. Returns `Ok(false)` without touching `self` when the
/// body holds no value at all or the first value is `null`.
pub trait JsonTarget {
    fn decode_json(&mut self, body: &[u8]) -> Result<bool, serde_json::Error>;
}

impl<T: DeserializeOwned> JsonTarget for T {
    fn decode_json(&mut self, body: &[u8]) -> Result<bool, serde_json::Error> {
        if starts_with_null(body) {
            return Ok(false);
        }
        let mut values = serde_json::Deserializer::from_slice(body).into_iter::<T>();
        match values.next() {
            Some(value) => {
                *self = value?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn starts_with_null(body: &[u8]) -> bool {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    match body[start..].strip_prefix(b"null") {
        Some(rest) => rest.first().map_or(true, |b| !b.is_ascii_alphanumeric()),
        None => false,
    }
}

/// Where a successful response body goes.
pub enum Destination<'a> {
    /// Drain and drop the body.
    Discard,
    /// Copy the raw body bytes, unmodified.
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
    /// Decode the body as JSON.
    Json(&'a mut (dyn JsonTarget + Send)),
}

impl<'a> Destination<'a> {
    pub fn writer<W>(writer: &'a mut W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'a,
    {
        Destination::Writer(writer)
    }

    pub fn json<T>(value: &'a mut T) -> Self
    where
        T: DeserializeOwned + Send + 'a,
    {
        Destination::Json(value)
    }
}

impl std::fmt::Debug for Destination<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Discard => f.write_str("Discard"),
            Destination::Writer(_) => f.write_str("Writer"),
            Destination::Json(_) => f.write_str("Json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Album {
        id: u64,
        title: String,
    }

    #[test]
    fn decode_json_fills_target() {
        let mut album = Album::default();
        let decoded = album.decode_json(br#"{"id":1,"title":"Blue"}"#).unwrap();
        assert!(decoded);
        assert_eq!(album, Album { id: 1, title: "Blue".to_string() });
    }

    #[test]
    fn decode_json_empty_body_leaves_target_untouched() {
        let mut album = Album { id: 7, title: "Kept".to_string() };
        assert!(!album.decode_json(b"").unwrap());
        assert!(!album.decode_json(b" \n").unwrap());
        assert_eq!(album.id, 7);
        assert_eq!(album.title, "Kept");
    }

    #[test]
    fn decode_json_null_leaves_target_untouched() {
        let mut album = Album { id: 5, title: "Kept".to_string() };
        assert!(!album.decode_json(b"null").unwrap());
        assert!(!album.decode_json(b" null\n").unwrap());
        assert_eq!(album.id, 5);

        let mut count = 1u32;
        assert!(!count.decode_json(b"null").unwrap());
        assert_eq!(count, 1);
    }

    #[test]
    fn decode_json_rejects_null_prefixed_garbage() {
        let mut album = Album::default();
        assert!(album.decode_json(b"nullx").is_err());
    }

    #[test]
    fn decode_json_rejects_trailing_comma() {
        let mut album = Album::default();
        let err = album.decode_json(br#"{"id": 1, "title": "x",}"#).unwrap_err();
        assert!(err.is_syntax());
        assert_eq!(album, Album::default());
    }

    #[test]
    fn decode_json_reads_only_first_value() {
        let mut count = 0u32;
        assert!(count.decode_json(b"3\n4").unwrap());
        assert_eq!(count, 3);
    }

    #[test]
    fn method_converts_to_reqwest() {
        assert_eq!(Method::from(HttpMethod::Delete), Method::DELETE);
        assert_eq!(HttpMethod::Patch.as_str(), "PATCH");
    }
}
