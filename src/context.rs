//! Per-request state: correlation headers, the request context, and the
//! consume-once response channel.
//!
//! Correlation data is carried explicitly on the request context and on
//! every handler call; there is no thread-ambient state, so nothing can
//! leak between requests that happen to share a worker.

use crate::ids::RequestId;
use http::Method;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Prefix of the correlation headers the engine recognizes. Only headers
/// under this prefix are copied into the correlation map.
pub const HEADER_PREFIX: &str = "x-rl-";
pub const TENANT_HEADER: &str = "x-rl-tenant";
pub const REQUEST_ID_HEADER: &str = "x-rl-request-id";
pub const USER_ID_HEADER: &str = "x-rl-user-id";
pub const MODULE_HEADER: &str = "x-rl-module-id";

/// Stream-phase flags set by the streaming controller before each
/// invocation of a stream-capable handler.
pub const STREAM_ID_FLAG: &str = "x-rl-stream-id";
pub const STREAM_COMPLETE_FLAG: &str = "x-rl-stream-complete";
pub const STREAM_ABORT_FLAG: &str = "x-rl-stream-abort";

/// Path prefix of the always-available status routes that bypass the
/// tenant precondition.
pub const ADMIN_PATH_PREFIX: &str = "/admin";

/// Case-insensitive key/value context threaded through binding, invocation
/// and logging. Keys are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelationMap {
    entries: HashMap<String, String>,
}

impl CorrelationMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the recognized correlation headers from a raw header list.
    #[must_use]
    pub fn from_headers(headers: &[(String, String)]) -> Self {
        let mut map = Self::new();
        for (name, value) in headers {
            let key = name.to_ascii_lowercase();
            if key.starts_with(HEADER_PREFIX) {
                map.entries.insert(key, value.clone());
            }
        }
        map
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_ascii_lowercase(), value.to_string());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_ascii_lowercase()).map(|s| s.as_str())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.get(TENANT_HEADER)
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.get(REQUEST_ID_HEADER)
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.get(USER_ID_HEADER)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The request line and headers as the transport delivered them. Body
/// bytes arrive separately through [`crate::engine::RequestConn`].
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Path with optional query string, e.g. `/notes?limit=10`.
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Mutable per-request state, created at request arrival and dropped at
/// response completion. Exclusively owned by one request's execution.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Lowercased header names, in arrival order.
    headers: Vec<(String, String)>,
    /// Decoded query pairs, in request order; repeats preserved.
    query: Vec<(String, String)>,
    /// Ordered URL-decoded path captures, set after route matching.
    pub path_captures: Vec<String>,
    pub correlation: CorrelationMap,
    /// Set when the route accepts form-encoded uploads; the transport is
    /// expected to switch the connection to multipart parsing.
    pub expect_multipart: bool,
    /// Response media type selected by content negotiation.
    pub media_type: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(head: &RequestHead) -> Self {
        let (path, query_str) = match head.uri.split_once('?') {
            Some((p, q)) => (p, q),
            None => (head.uri.as_str(), ""),
        };
        let headers: Vec<(String, String)> = head
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        let query: Vec<(String, String)> = url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let correlation = CorrelationMap::from_headers(&headers);
        let request_id = RequestId::from_header_or_new(correlation.request_id());
        debug!(
            request_id = %request_id,
            method = %head.method,
            path = %path,
            correlation_headers = correlation.len(),
            "request context created"
        );
        Self {
            request_id,
            method: head.method.clone(),
            path: path.to_string(),
            headers,
            query,
            path_captures: Vec::new(),
            correlation,
            expect_multipart: false,
            media_type: None,
        }
    }

    /// Case-insensitive header lookup; first occurrence wins.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First occurrence of a query parameter.
    #[must_use]
    pub fn query_first(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All occurrences of a query parameter, in request order.
    #[must_use]
    pub fn query_all(&self, name: &str) -> Vec<String> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.correlation.tenant()
    }
}

/// The transport's half of response emission. The engine drives this hook;
/// implementations write to the wire (or record, in tests).
pub trait WireResponse: Send {
    fn set_status(&mut self, status: u16);
    fn set_chunked(&mut self, chunked: bool);
    /// May be called repeatedly with the same name; duplicates must be
    /// preserved on the wire (e.g. multiple `Set-Cookie` entries).
    fn add_header(&mut self, name: &str, value: &str);
    fn write(&mut self, bytes: &[u8]);
    fn end(&mut self);
}

/// Consume-once wrapper around the transport's [`WireResponse`].
///
/// Every layer that can terminate the request does so through this
/// channel; once ended, further termination attempts are no-ops and
/// `ended()` reports true. Callers must check it after every layer that
/// may have short-circuited.
pub struct ResponseChannel {
    wire: Option<Box<dyn WireResponse>>,
    started: Instant,
    request_id: RequestId,
    method: Method,
    path: String,
    tenant: Option<String>,
}

impl ResponseChannel {
    #[must_use]
    pub fn new(wire: Box<dyn WireResponse>, ctx: &RequestContext) -> Self {
        Self {
            wire: Some(wire),
            started: Instant::now(),
            request_id: ctx.request_id,
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            tenant: ctx.tenant().map(|s| s.to_string()),
        }
    }

    #[must_use]
    pub fn ended(&self) -> bool {
        self.wire.is_none()
    }

    /// Elapsed wall time since request arrival, in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub(crate) fn take_wire(&mut self) -> Option<Box<dyn WireResponse>> {
        self.wire.take()
    }

    /// Terminate the request with an error status and a message body.
    ///
    /// 422 carries `application/json` (the structured error collection);
    /// every other status gets `text/plain`. No-op if already ended.
    pub fn end_with_error(&mut self, status: u16, message: &str) {
        let Some(mut wire) = self.wire.take() else {
            return;
        };
        wire.set_chunked(true);
        wire.set_status(status);
        if status == 422 {
            wire.add_header("Content-Type", "application/json");
        } else {
            wire.add_header("Content-Type", "text/plain");
        }
        if !message.is_empty() {
            wire.write(message.as_bytes());
        }
        wire.end();
        info!(
            target: "ramline::access",
            request_id = %self.request_id,
            method = %self.method,
            path = %self.path,
            status = status,
            latency_ms = -1i64,
            tenant = self.tenant.as_deref().unwrap_or(""),
            message = message,
            "request terminated"
        );
    }

    pub(crate) fn access_log(&self, status: u16, entity: Option<&str>) {
        info!(
            target: "ramline::access",
            request_id = %self.request_id,
            method = %self.method,
            path = %self.path,
            status = status,
            latency_ms = self.elapsed_ms(),
            tenant = self.tenant.as_deref().unwrap_or(""),
            "request completed"
        );
        if let Some(body) = entity {
            debug!(
                target: "ramline::access",
                request_id = %self.request_id,
                entity = body,
                "response entity"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_map_keeps_only_prefixed_headers() {
        let headers = vec![
            ("X-RL-Tenant".to_string(), "diku".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
            ("x-rl-user-id".to_string(), "u-1".to_string()),
        ];
        let map = CorrelationMap::from_headers(&headers);
        assert_eq!(map.tenant(), Some("diku"));
        assert_eq!(map.user_id(), Some("u-1"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn context_parses_query_in_order_with_repeats() {
        let head = RequestHead::new(Method::GET, "/notes?tag=a&limit=5&tag=b");
        let ctx = RequestContext::new(&head);
        assert_eq!(ctx.path, "/notes");
        assert_eq!(ctx.query_first("tag"), Some("a"));
        assert_eq!(ctx.query_all("tag"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ctx.query_first("limit"), Some("5"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let head = RequestHead::new(Method::GET, "/notes").header("Accept", "text/plain");
        let ctx = RequestContext::new(&head);
        assert_eq!(ctx.header("accept"), Some("text/plain"));
        assert_eq!(ctx.header("ACCEPT"), Some("text/plain"));
    }
}
