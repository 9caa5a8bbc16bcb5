//! JSON API client bound to a single base URL.
//!
//! # Design
//! `ApiClient` holds the validated base URL and a `reqwest::Client`, both
//! fixed at construction; every call allocates its own request and response,
//! so a client can be cloned and shared across tasks freely. Each call is
//! split into `build_request` (pure: resolve, encode, set headers) and
//! `execute` (I/O: send, classify, hand the body to a `Destination`). Every
//! await on the network races the caller's `Context`.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use url::Url;

use crate::config::{ClientConfig, DEFAULT_TIMEOUT};
use crate::context::Context;
use crate::error::{ApiError, BoxError};
use crate::http::{ApiRequest, ApiResponse, Destination, HttpMethod};

const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client for `base_url`, which must include a scheme and host.
    ///
    /// When `transport` is `None` a client with a 30 second timeout is built;
    /// otherwise the given client is used as is, timeout included. No network
    /// I/O happens here.
    pub fn new(base_url: &str, transport: Option<reqwest::Client>) -> Result<Self, ApiError> {
        let base_url = parse_base_url(base_url)?;
        let http = match transport {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .map_err(ApiError::Transport)?,
        };
        Ok(Self { base_url, http })
    }

    /// Create a client whose transport is built from `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = parse_base_url(&config.base_url)?;
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        let http = builder.build().map_err(ApiError::Transport)?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL.
    ///
    /// `users` is appended to the base path, `/users` replaces it, and an
    /// absolute URL replaces the base entirely.
    pub fn resolve(&self, path: &str) -> Result<Url, ApiError> {
        let invalid = |reason: String| ApiError::InvalidPath {
            path: path.to_string(),
            reason,
        };
        check_reference(path).map_err(|reason| invalid(reason.to_string()))?;
        self.base_url.join(path).map_err(|e| invalid(e.to_string()))
    }

    /// Build a request without sending it.
    ///
    /// A present `body` is encoded as JSON and marks the request with
    /// `Content-Type: application/json`. `Accept: application/json` is always
    /// set.
    pub fn build_request<B>(
        &self,
        ctx: &Context,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiRequest, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.resolve(path)?;
        let body = body
            .map(|body| serde_json::to_vec(body).map_err(ApiError::Encode))
            .transpose()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        }

        Ok(ApiRequest {
            method,
            url,
            headers,
            body,
            ctx: ctx.clone(),
        })
    }

    /// Send `request` and deliver a successful body to `dest`.
    ///
    /// Statuses outside `200..300` become `UnsuccessfulStatus` with the body
    /// text in the message. An empty successful body leaves a JSON
    /// destination untouched.
    pub async fn execute(
        &self,
        request: ApiRequest,
        dest: Destination<'_>,
    ) -> Result<ApiResponse, ApiError> {
        let ApiRequest {
            method,
            url,
            headers,
            body,
            ctx,
        } = request;

        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let mut builder = self.http.request(method.into(), url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        debug!(method = method.as_str(), url = %url, "sending request");
        let sent = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            sent = builder.send() => sent,
        };
        let mut response = match sent {
            Ok(response) => response,
            Err(e) => {
                if let Some(err) = ctx.err() {
                    return Err(err.into());
                }
                return Err(ApiError::Transport(e));
            }
        };

        let meta = ApiResponse {
            status: response.status(),
            headers: response.headers().clone(),
            url: response.url().clone(),
        };
        debug!(status = meta.status.as_u16(), url = %meta.url, "received response");

        if !meta.is_success() {
            let body = read_body_partial(&ctx, &mut response).await;
            return Err(ApiError::UnsuccessfulStatus {
                body: String::from_utf8_lossy(&body).into_owned(),
                response: meta,
            });
        }

        match dest {
            Destination::Discard => {
                // Best effort: a failed drain only means the connection is not reused.
                read_body_partial(&ctx, &mut response).await;
            }
            Destination::Writer(writer) => {
                if let Err(source) = copy_body(&ctx, &mut response, writer).await {
                    return Err(ApiError::Write {
                        response: meta,
                        source,
                    });
                }
            }
            Destination::Json(target) => {
                let decoded = match read_body(&ctx, &mut response).await {
                    Ok(body) => target.decode_json(&body).map_err(BoxError::from),
                    Err(source) => Err(source),
                };
                if let Err(source) = decoded {
                    return Err(ApiError::Decode {
                        response: meta,
                        source,
                    });
                }
            }
        }

        Ok(meta)
    }

    pub async fn get(
        &self,
        ctx: &Context,
        path: &str,
        dest: Destination<'_>,
    ) -> Result<ApiResponse, ApiError> {
        let request = self.build_request::<()>(ctx, HttpMethod::Get, path, None)?;
        self.execute(request, dest).await
    }

    pub async fn post<B>(
        &self,
        ctx: &Context,
        path: &str,
        body: &B,
        dest: Destination<'_>,
    ) -> Result<ApiResponse, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let request = self.build_request(ctx, HttpMethod::Post, path, Some(body))?;
        self.execute(request, dest).await
    }

    pub async fn put<B>(
        &self,
        ctx: &Context,
        path: &str,
        body: &B,
        dest: Destination<'_>,
    ) -> Result<ApiResponse, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let request = self.build_request(ctx, HttpMethod::Put, path, Some(body))?;
        self.execute(request, dest).await
    }

    pub async fn delete(
        &self,
        ctx: &Context,
        path: &str,
        dest: Destination<'_>,
    ) -> Result<ApiResponse, ApiError> {
        let request = self.build_request::<()>(ctx, HttpMethod::Delete, path, None)?;
        self.execute(request, dest).await
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw).map_err(|e| ApiError::InvalidUrl {
        url: raw.to_string(),
        reason: format!("failed to parse base URL: {e}"),
    })?;
    if url.scheme().is_empty() || !url.has_host() {
        return Err(ApiError::InvalidUrl {
            url: raw.to_string(),
            reason: "must include scheme and host".to_string(),
        });
    }
    Ok(url)
}

/// Reject references that are not valid URI references even though
/// `Url::join` would accept them as opaque relative paths.
fn check_reference(reference: &str) -> Result<(), &'static str> {
    if reference.bytes().any(|b| b.is_ascii_control()) {
        return Err("invalid control character in URL");
    }
    let (before_fragment, fragment) = reference.split_once('#').unwrap_or((reference, ""));
    check_escapes(fragment)?;
    let rest = before_fragment.split('?').next().unwrap_or_default();
    if !has_scheme(rest)? {
        let first_segment = rest.split('/').next().unwrap_or_default();
        if first_segment.contains(':') {
            return Err("first path segment in URL cannot contain colon");
        }
    }
    check_escapes(rest)
}

fn has_scheme(rest: &str) -> Result<bool, &'static str> {
    for (i, b) in rest.bytes().enumerate() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' => {}
            b'0'..=b'9' | b'+' | b'-' | b'.' if i > 0 => {}
            b':' if i == 0 => return Err("missing protocol scheme"),
            b':' => return Ok(true),
            _ => return Ok(false),
        }
    }
    Ok(false)
}

fn check_escapes(path: &str) -> Result<(), &'static str> {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err("invalid URL escape");
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

async fn next_chunk(
    ctx: &Context,
    response: &mut reqwest::Response,
) -> Result<Option<Bytes>, BoxError> {
    tokio::select! {
        biased;
        err = ctx.done() => Err(err.into()),
        chunk = response.chunk() => chunk.map_err(Into::into),
    }
}

async fn read_body(ctx: &Context, response: &mut reqwest::Response) -> Result<Vec<u8>, BoxError> {
    let mut body = Vec::new();
    while let Some(chunk) = next_chunk(ctx, response).await? {
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Read until the body ends or a read fails, keeping whatever arrived.
async fn read_body_partial(ctx: &Context, response: &mut reqwest::Response) -> Vec<u8> {
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = next_chunk(ctx, response).await {
        body.extend_from_slice(&chunk);
    }
    body
}

async fn copy_body(
    ctx: &Context,
    response: &mut reqwest::Response,
    writer: &mut (dyn AsyncWrite + Unpin + Send),
) -> Result<(), BoxError> {
    while let Some(chunk) = next_chunk(ctx, response).await? {
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::ser::Error as _;
    use serde::{Serialize, Serializer};

    use super::*;
    use crate::context::ContextError;

    fn client() -> ApiClient {
        ApiClient::new("https://base.com/v1/", None).unwrap()
    }

    #[derive(Serialize)]
    struct Album {
        id: u64,
        title: String,
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cannot encode"))
        }
    }

    #[test]
    fn new_keeps_base_url() {
        let client = ApiClient::new("https://example.com/api", None).unwrap();
        assert_eq!(client.base_url().as_str(), "https://example.com/api");
    }

    #[test]
    fn new_accepts_custom_transport() {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap();
        let client = ApiClient::new("http://localhost:8080", Some(http)).unwrap();
        assert_eq!(client.base_url().host_str(), Some("localhost"));
        assert_eq!(client.base_url().port(), Some(8080));
    }

    #[test]
    fn new_rejects_missing_scheme() {
        let err = ApiClient::new("example.com/api", None).unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl { .. }));
    }

    #[test]
    fn new_rejects_missing_host() {
        let err = ApiClient::new("mailto:someone@example.com", None).unwrap_err();
        match err {
            ApiError::InvalidUrl { reason, .. } => assert_eq!(reason, "must include scheme and host"),
            other => panic!("expected InvalidUrl, got {other:?}"),
        }
    }

    #[test]
    fn new_rejects_unparseable() {
        let err = ApiClient::new("://invalid-url", None).unwrap_err();
        assert!(err.to_string().contains("failed to parse base URL"));
    }

    #[test]
    fn from_config_uses_base_url() {
        let config = ClientConfig::new("http://localhost:3000/api/").with_user_agent("gofetch/1.0");
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.base_url().path(), "/api/");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let c = client();
        assert_eq!(c.resolve("users").unwrap().as_str(), "https://base.com/v1/users");
        assert_eq!(c.resolve("/users").unwrap().as_str(), "https://base.com/users");
        assert_eq!(
            c.resolve("https://other.com/x").unwrap().as_str(),
            "https://other.com/x"
        );
    }

    #[test]
    fn resolve_rejects_malformed_references() {
        let c = client();
        for path in [
            ":invalid:",
            "1:2",
            "bad\npath",
            "items/%zz",
            "users#%zz",
            "http://host:port/",
        ] {
            let err = c.resolve(path).unwrap_err();
            assert!(
                matches!(err, ApiError::InvalidPath { .. }),
                "{path:?}: expected InvalidPath, got {err:?}"
            );
        }
    }

    #[test]
    fn resolve_keeps_valid_fragment_and_query() {
        let url = client().resolve("users?q=%zz#top%20").unwrap();
        assert_eq!(url.fragment(), Some("top%20"));
    }

    #[test]
    fn resolve_allows_colon_after_first_segment() {
        let c = client();
        assert_eq!(
            c.resolve("albums/a:b").unwrap().as_str(),
            "https://base.com/v1/albums/a:b"
        );
        assert_eq!(c.resolve("/a:b").unwrap().as_str(), "https://base.com/a:b");
    }

    #[test]
    fn build_request_without_body_sets_only_accept() {
        let req = client()
            .build_request::<()>(&Context::background(), HttpMethod::Get, "albums", None)
            .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url.as_str(), "https://base.com/v1/albums");
        assert_eq!(req.headers[ACCEPT], APPLICATION_JSON);
        assert!(req.headers.get(CONTENT_TYPE).is_none());
        assert!(req.body.is_none());
    }

    #[test]
    fn build_request_with_body_sets_content_type() {
        let album = Album {
            id: 10,
            title: "Kind of Blue".to_string(),
        };
        let req = client()
            .build_request(&Context::background(), HttpMethod::Post, "albums", Some(&album))
            .unwrap();
        assert_eq!(req.headers[CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(req.headers[ACCEPT], APPLICATION_JSON);
        let body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["id"], 10);
        assert_eq!(body["title"], "Kind of Blue");
    }

    #[test]
    fn build_request_does_not_escape_html() {
        let album = Album {
            id: 1,
            title: "<Rock & Roll>".to_string(),
        };
        let req = client()
            .build_request(&Context::background(), HttpMethod::Put, "albums/1", Some(&album))
            .unwrap();
        let raw = String::from_utf8(req.body.unwrap()).unwrap();
        assert!(raw.contains("<Rock & Roll>"), "{raw}");
    }

    #[test]
    fn build_request_reports_encode_error() {
        let err = client()
            .build_request(&Context::background(), HttpMethod::Post, "albums", Some(&Unencodable))
            .unwrap_err();
        assert!(matches!(err, ApiError::Encode(_)));
    }

    #[test]
    fn build_request_checks_path_before_encoding() {
        let err = client()
            .build_request(&Context::background(), HttpMethod::Post, ":invalid:", Some(&Unencodable))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn execute_with_expired_context_sends_nothing() {
        let client = ApiClient::new("http://127.0.0.1:9", None).unwrap();
        let ctx = Context::background().with_timeout(Duration::ZERO);
        let err = client.get(&ctx, "albums", Destination::Discard).await.unwrap_err();
        assert!(matches!(err, ApiError::Context(ContextError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn execute_with_canceled_context_sends_nothing() {
        let client = ApiClient::new("http://127.0.0.1:9", None).unwrap();
        let ctx = Context::background().with_cancel();
        ctx.cancel();
        let err = client.delete(&ctx, "albums/1", Destination::Discard).await.unwrap_err();
        assert!(matches!(err, ApiError::Context(ContextError::Canceled)));
    }
}
