//! Type-erased HTTP request/response shapes passed through interceptors.

use bytes::Bytes;
use http::HeaderMap;
use triwire_core::{Code, RpcError};

use crate::method::{Idempotency, StreamKind};

/// Transport-level details that rode along with a response.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingInfo {
    /// The raw HTTP status, when the transport saw one.
    pub http_status: Option<u16>,
}

/// One outgoing HTTP call, built by the client and transformed by the
/// request side of the interceptor chain before it reaches the transport.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Fully assembled URL, query string included for GET dispatch.
    pub url: String,
    pub method: http::Method,
    /// Content type the protocol interceptor settled on; mirrored into
    /// `headers` when set.
    pub content_type: String,
    pub headers: HeaderMap,
    /// Serialized request message. `None` for stream setup requests and GET.
    pub message: Option<Bytes>,
    /// Method path of the call, `package.Service/Method`.
    pub path: String,
    pub stream_kind: StreamKind,
    pub idempotency: Idempotency,
}

impl HttpRequest {
    pub fn new(
        url: String,
        headers: HeaderMap,
        message: Option<Bytes>,
        path: String,
        stream_kind: StreamKind,
        idempotency: Idempotency,
    ) -> Self {
        Self {
            url,
            method: http::Method::POST,
            content_type: String::new(),
            headers,
            message,
            path,
            stream_kind,
            idempotency,
        }
    }
}

/// One incoming HTTP response, built by the transport and transformed by the
/// response side of the interceptor chain. Interceptors may replace any
/// field, notably `code`, `message`, `trailers`, and `error`.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// RPC code for the exchange. Starts from the transport's view of the
    /// HTTP status; protocol interceptors overwrite it with the wire status.
    pub code: Code,
    pub headers: HeaderMap,
    /// Raw response body; the protocol interceptor reduces it to the message
    /// payload (unenveloped, decompressed).
    pub message: Bytes,
    pub trailers: HeaderMap,
    pub tracing: TracingInfo,
    /// Set when the exchange failed; `None` means the call carried an OK
    /// status end to end.
    pub error: Option<RpcError>,
}

impl HttpResponse {
    /// A response representing a failure before or inside the transport.
    pub fn from_error(error: RpcError) -> Self {
        Self {
            code: error.code(),
            headers: HeaderMap::new(),
            message: Bytes::new(),
            trailers: HeaderMap::new(),
            tracing: TracingInfo::default(),
            error: Some(error),
        }
    }

    /// A successful transport exchange, before protocol interpretation.
    pub fn new(http_status: u16, headers: HeaderMap, message: Bytes, trailers: HeaderMap) -> Self {
        Self {
            code: Code::from_http_status(http_status),
            headers,
            message,
            trailers,
            tracing: TracingInfo {
                http_status: Some(http_status),
            },
            error: None,
        }
    }
}
