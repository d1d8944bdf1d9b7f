//! Proxies a single request to a selected upstream and, for streamed
//! responses, incrementally extracts token usage as the stream passes
//! through.
//!
//! Connection pooling and header filtering follow a pooled-client,
//! header-allowlist shape; the streaming path additionally scans each
//! SSE frame for a usage payload as it passes through.

use crate::models::error::GatewayError;
use crate::models::upstream::{ProviderType, Upstream};
use crate::models::usage::Usage;
use actix_web::http::header::{HeaderMap as ActixHeaderMap, HeaderName as ActixHeaderName, HeaderValue as ActixHeaderValue};
use actix_web::http::Method as ActixMethod;
use actix_web::HttpResponse;
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use log::{debug, warn};
use reqwest::{
    header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue},
    Client, Method as ReqwestMethod,
};
use serde_json::Value;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

const SKIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "authorization",
    "x-api-key",
    "keep-alive",
    "transfer-encoding",
];
const SKIP_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding", "content-length"];

/// What happened to a forwarded request, reported once the body (streamed
/// or buffered) has fully passed through. Used to update the health
/// tracker and the request log after the fact. Transport-level failures
/// never reach this type — they short-circuit `forward` as a `GatewayError`
/// before any response is built.
pub struct ForwardCompletion {
    pub status: u16,
    pub latency_ms: u64,
    /// Known immediately for buffered responses; always `None` here for
    /// streamed ones since the body hasn't been read yet — see
    /// `ForwardOutcome::stream_completion`.
    pub usage: Option<Usage>,
}

/// How an SSE body wrapped by [`sse_usage_stream`] ended.
pub enum StreamCompletion {
    /// The upstream stream reached a clean EOF, carrying whatever usage was
    /// observed in its frames (`None` if none was ever seen).
    Closed(Option<Usage>),
    /// The upstream connection failed mid-stream, after a `STREAM_ERROR`
    /// frame was already appended to what the client received.
    Error,
}

pub struct ForwardOutcome {
    pub response: HttpResponse,
    pub completion: ForwardCompletion,
    /// Once `true`, the response has already started streaming to the
    /// caller and failover to another upstream is no longer possible.
    pub is_streaming: bool,
    /// `Some` exactly when `is_streaming` is `true`. Resolves once the
    /// wrapped stream reaches its end; callers use this to defer recording
    /// success/failure and releasing the connection slot until the stream
    /// actually closes, instead of at the moment headers were received.
    pub stream_completion: Option<oneshot::Receiver<StreamCompletion>>,
}

pub struct ProxyForwarder {
    client: Client,
}

impl ProxyForwarder {
    pub fn new() -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client }
    }

    /// Forwards `body` to `upstream` at `path_and_query`, returning an
    /// actix response. SSE bodies (`text/event-stream`) are streamed
    /// through a usage-extracting transform; everything else is buffered
    /// so its usage object (if any) can be read directly.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        method: &ActixMethod,
        path_and_query: &str,
        headers: &ActixHeaderMap,
        body: Bytes,
    ) -> Result<ForwardOutcome, GatewayError> {
        let url = join_url(&upstream.base_url, path_and_query);
        let started = Instant::now();

        let request = self
            .client
            .request(parse_method(method), &url)
            .headers(build_upstream_headers(headers, &upstream.api_key, upstream.provider_type))
            .timeout(Duration::from_secs(upstream.timeout_seconds))
            .body(body);

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                GatewayError::RequestTimeout { timeout_secs: upstream.timeout_seconds }
            } else {
                warn!("upstream request failed: {err}");
                GatewayError::ServiceUnavailable
            }
        })?;

        let status = response.status().as_u16();
        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let response_headers = build_downstream_headers(response.headers());

        if is_sse {
            let (stream, completion_rx) = sse_usage_stream(response.bytes_stream());
            let mut builder = HttpResponse::build(
                actix_web::http::StatusCode::from_u16(status).unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
            );
            for (name, value) in response_headers {
                builder.insert_header((name, value));
            }
            let http_response = builder.streaming(stream);
            Ok(ForwardOutcome {
                response: http_response,
                completion: ForwardCompletion {
                    status,
                    latency_ms: started.elapsed().as_millis() as u64,
                    usage: None,
                },
                is_streaming: true,
                stream_completion: Some(completion_rx),
            })
        } else {
            let body_bytes = response.bytes().await.map_err(|_| GatewayError::StreamError)?;
            let usage = serde_json::from_slice::<Value>(&body_bytes)
                .ok()
                .and_then(|v| extract_usage(&v));
            let mut builder = HttpResponse::build(
                actix_web::http::StatusCode::from_u16(status).unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
            );
            for (name, value) in response_headers {
                builder.insert_header((name, value));
            }
            let http_response = builder.body(body_bytes);
            Ok(ForwardOutcome {
                response: http_response,
                completion: ForwardCompletion {
                    status,
                    latency_ms: started.elapsed().as_millis() as u64,
                    usage,
                },
                is_streaming: false,
                stream_completion: None,
            })
        }
    }
}

impl Default for ProxyForwarder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_method(method: &ActixMethod) -> ReqwestMethod {
    match *method {
        ActixMethod::GET => ReqwestMethod::GET,
        ActixMethod::POST => ReqwestMethod::POST,
        ActixMethod::PUT => ReqwestMethod::PUT,
        ActixMethod::DELETE => ReqwestMethod::DELETE,
        ActixMethod::HEAD => ReqwestMethod::HEAD,
        ActixMethod::OPTIONS => ReqwestMethod::OPTIONS,
        ActixMethod::PATCH => ReqwestMethod::PATCH,
        _ => ReqwestMethod::GET,
    }
}

fn join_url(base_url: &str, path_and_query: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path_and_query.trim_start_matches('/'))
}

/// Converts and filters downstream headers for upstream forwarding, and
/// substitutes the gateway's own credential for whatever the caller sent
/// (the caller authenticates to the gateway, not to the upstream). The
/// credential is injected in the shape each provider expects: anthropic
/// wants `x-api-key` (plus a default `anthropic-version` if the caller
/// didn't set one), everything else gets a bearer `Authorization` header.
fn build_upstream_headers(
    original: &ActixHeaderMap,
    upstream_api_key: &str,
    provider_type: ProviderType,
) -> ReqwestHeaderMap {
    let mut headers = ReqwestHeaderMap::with_capacity(original.len() + 2);
    for (name, value) in original {
        let lower = name.as_str().to_lowercase();
        if lower.starts_with("proxy-") || SKIP_REQUEST_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(name, value);
        }
    }
    match provider_type {
        ProviderType::Anthropic => {
            if let Ok(value) = HeaderValue::from_str(upstream_api_key) {
                headers.insert(HeaderName::from_static("x-api-key"), value);
            }
            if !headers.contains_key("anthropic-version") {
                headers.insert(
                    HeaderName::from_static("anthropic-version"),
                    HeaderValue::from_static("2023-06-01"),
                );
            }
        }
        ProviderType::Openai | ProviderType::Google | ProviderType::Custom => {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {upstream_api_key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
    }
    headers
}

fn build_downstream_headers(original: &ReqwestHeaderMap) -> Vec<(ActixHeaderName, ActixHeaderValue)> {
    let mut out = Vec::with_capacity(original.len());
    for (name, value) in original {
        let lower = name.as_str().to_lowercase();
        if SKIP_RESPONSE_HEADERS.iter().any(|skip| lower.starts_with(skip)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            ActixHeaderName::from_bytes(name.as_ref()),
            ActixHeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.push((name, value));
        }
    }
    out
}

const STREAM_ERROR_FRAME: &[u8] = b"data: {\"error\":{\"code\":\"STREAM_ERROR\",\"message\":\"upstream stream failed\"}}\n\n";

/// Wraps an upstream SSE byte stream in a pass-through that also scans each
/// `data:` frame for a usage object. The gateway never buffers the whole
/// stream: frames are forwarded to the client as they arrive. A mid-stream
/// upstream failure is turned into one last `STREAM_ERROR` frame rather
/// than dropped silently, since the response's status/headers are already
/// committed by the time this runs. Either way, [`StreamCompletion`] is
/// delivered on the returned receiver once the stream ends — the caller
/// awaits it separately, after the response has already been handed back,
/// so building it never blocks on consuming it. Dropping the returned
/// stream (client disconnect) cancels the underlying upstream read exactly
/// as dropping any other `Stream` would.
fn sse_usage_stream(
    upstream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> (
    Pin<Box<dyn Stream<Item = Result<Bytes, actix_web::Error>> + Send>>,
    oneshot::Receiver<StreamCompletion>,
) {
    let (tx, rx) = oneshot::channel();

    let scanning = stream::unfold(
        (Some(upstream), String::new(), None::<Usage>, Some(tx)),
        move |(upstream, mut buffer, mut last_usage, mut tx)| async move {
            let mut upstream = upstream?;
            loop {
                match upstream.next().await {
                    Some(Ok(chunk)) => {
                        if let Ok(text) = std::str::from_utf8(&chunk) {
                            buffer.push_str(text);
                            while let Some(pos) = buffer.find("\n\n") {
                                let frame = buffer[..pos].to_string();
                                buffer.drain(..pos + 2);
                                if let Some(usage) = parse_sse_frame_usage(&frame) {
                                    last_usage = Some(Usage::merge_latest(last_usage.unwrap_or_default(), usage));
                                }
                            }
                        }
                        return Some((chunk, (Some(upstream), buffer, last_usage, tx)));
                    }
                    Some(Err(err)) => {
                        debug!("sse upstream stream error: {err}");
                        if let Some(tx) = tx.take() {
                            let _ = tx.send(StreamCompletion::Error);
                        }
                        // Emit the error frame now, then end the stream on
                        // the next poll without touching `upstream` again.
                        return Some((Bytes::from_static(STREAM_ERROR_FRAME), (None, buffer, last_usage, None)));
                    }
                    None => {
                        if let Some(tx) = tx.take() {
                            let _ = tx.send(StreamCompletion::Closed(last_usage));
                        }
                        return None;
                    }
                }
            }
        },
    )
    .map(Ok::<Bytes, actix_web::Error>);

    (Box::pin(scanning), rx)
}

/// Parses one `data: {...}` SSE frame and extracts a normalized [`Usage`],
/// if the payload carries one. `data: [DONE]` and non-JSON frames yield
/// `None` rather than an error — usage is opportunistic, not required.
fn parse_sse_frame_usage(frame: &str) -> Option<Usage> {
    for line in frame.lines() {
        let Some(data) = line.strip_prefix("data:") else { continue };
        let data = data.trim();
        if data == "[DONE]" {
            return None;
        }
        if let Ok(value) = serde_json::from_str::<Value>(data) {
            return extract_usage(&value);
        }
    }
    None
}

/// Normalizes the usage object from any of the three shapes this gateway
/// proxies: OpenAI chat completions / responses API `usage`, and
/// Anthropic's `usage` (found directly or nested under `message`).
pub fn extract_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage").or_else(|| value.get("message").and_then(|m| m.get("usage")))?;

    let get = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);

    let prompt_tokens = usage
        .get("prompt_tokens")
        .or_else(|| usage.get("input_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let completion_tokens = usage
        .get("completion_tokens")
        .or_else(|| usage.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total_tokens = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prompt_tokens + completion_tokens);
    let cached_tokens = usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let reasoning_tokens = usage
        .get("completion_tokens_details")
        .and_then(|d| d.get("reasoning_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let cache_creation_tokens = get("cache_creation_input_tokens");
    let cache_read_tokens = get("cache_read_input_tokens");

    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cached_tokens,
        reasoning_tokens,
        cache_creation_tokens,
        cache_read_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_openai_chat_usage() {
        let value: Value = serde_json::from_str(
            r#"{"usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}}"#,
        )
        .unwrap();
        let usage = extract_usage(&value).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn extracts_anthropic_usage_with_cache_fields() {
        let value: Value = serde_json::from_str(
            r#"{"usage": {"input_tokens": 20, "output_tokens": 8, "cache_creation_input_tokens": 4, "cache_read_input_tokens": 2}}"#,
        )
        .unwrap();
        let usage = extract_usage(&value).unwrap();
        assert_eq!(usage.prompt_tokens, 20);
        assert_eq!(usage.completion_tokens, 8);
        assert_eq!(usage.cache_creation_tokens, 4);
        assert_eq!(usage.cache_read_tokens, 2);
    }

    #[test]
    fn sse_done_frame_yields_no_usage() {
        assert!(parse_sse_frame_usage("data: [DONE]").is_none());
    }

    #[test]
    fn sse_frame_with_usage_is_parsed() {
        let frame = r#"data: {"usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}}"#;
        let usage = parse_sse_frame_usage(frame).unwrap();
        assert_eq!(usage.total_tokens, 3);
    }

    #[test]
    fn join_url_collapses_double_slash() {
        assert_eq!(join_url("https://api.example.com/", "/v1/chat"), "https://api.example.com/v1/chat");
        assert_eq!(join_url("https://api.example.com", "v1/chat"), "https://api.example.com/v1/chat");
    }

    fn downstream_headers(pairs: &[(&str, &str)]) -> ActixHeaderMap {
        let mut headers = ActixHeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                ActixHeaderName::from_bytes(name.as_bytes()).unwrap(),
                ActixHeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn anthropic_upstream_gets_x_api_key_and_default_version() {
        let headers = downstream_headers(&[("authorization", "Bearer caller-token")]);
        let out = build_upstream_headers(&headers, "sk-ant-secret", ProviderType::Anthropic);
        assert_eq!(out.get("x-api-key").unwrap(), "sk-ant-secret");
        assert_eq!(out.get("anthropic-version").unwrap(), "2023-06-01");
        assert!(!out.contains_key(reqwest::header::AUTHORIZATION));
    }

    #[test]
    fn anthropic_upstream_keeps_caller_supplied_version() {
        let headers = downstream_headers(&[("anthropic-version", "2024-01-01")]);
        let out = build_upstream_headers(&headers, "sk-ant-secret", ProviderType::Anthropic);
        assert_eq!(out.get("anthropic-version").unwrap(), "2024-01-01");
    }

    #[test]
    fn openai_upstream_gets_bearer_authorization() {
        let headers = downstream_headers(&[]);
        let out = build_upstream_headers(&headers, "sk-openai-secret", ProviderType::Openai);
        assert_eq!(out.get(reqwest::header::AUTHORIZATION).unwrap(), "Bearer sk-openai-secret");
        assert!(!out.contains_key("x-api-key"));
    }

    #[test]
    fn caller_credentials_and_hop_by_hop_headers_are_stripped() {
        let headers = downstream_headers(&[
            ("authorization", "Bearer caller-token"),
            ("x-api-key", "caller-anthropic-key"),
            ("keep-alive", "timeout=5"),
            ("transfer-encoding", "chunked"),
            ("proxy-authorization", "Basic xyz"),
            ("proxy-connection", "keep-alive"),
            ("x-request-id", "keep-me"),
        ]);
        let out = build_upstream_headers(&headers, "gateway-key", ProviderType::Anthropic);
        assert!(!out.contains_key("keep-alive"));
        assert!(!out.contains_key("transfer-encoding"));
        assert!(!out.contains_key("proxy-authorization"));
        assert!(!out.contains_key("proxy-connection"));
        assert_eq!(out.get("x-api-key").unwrap(), "gateway-key");
        assert_eq!(out.get("x-request-id").unwrap(), "keep-me");
    }
}
