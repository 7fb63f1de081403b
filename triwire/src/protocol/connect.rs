//! The Connect protocol.
//!
//! Unary calls are plain HTTP exchanges: the body is the bare message,
//! errors are non-2xx responses with a JSON body, and trailers ride as
//! `trailer-`-prefixed headers. Idempotent calls may go out as cacheable GET
//! requests with the message in the query string. Streaming calls use
//! enveloped bodies; the final envelope (end-stream flag) carries a JSON
//! object with the error and trailing metadata.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use http::HeaderMap;
use serde::Deserialize;
use triwire_core::{
    acceptable_encodings, headers, is_end_stream, pack, response_pool, unpack_with_header_byte,
    Code, CompressionPool, ErrorDetail, RequestCompression, RpcError, Status,
};

use crate::config::{GetConfiguration, ProtocolClientConfig};
use crate::http::{HttpRequest, HttpResponse};
use crate::interceptor::{Interceptor, StreamFunction, UnaryFunction};
use crate::method::StreamKind;
use crate::protocol::{connect_timeout_value, ensure_user_agent, header_value};
use crate::result::{RawStreamResult, StreamResult};

const PROTOCOL_VERSION_HEADER: &str = "connect-protocol-version";
const PROTOCOL_VERSION: &str = "1";
const TIMEOUT_HEADER: &str = "connect-timeout-ms";
const STREAMING_CONTENT_ENCODING: &str = "connect-content-encoding";
const STREAMING_ACCEPT_ENCODING: &str = "connect-accept-encoding";

struct Inner {
    encoding: &'static str,
    request_compression: Option<RequestCompression>,
    pools: Vec<Arc<dyn CompressionPool>>,
    get_configuration: GetConfiguration,
    timeout: Option<Duration>,
}

/// Protocol interceptor for Connect.
pub struct ConnectInterceptor(Arc<Inner>);

impl ConnectInterceptor {
    pub(crate) fn new(config: &ProtocolClientConfig) -> Self {
        Self(Arc::new(Inner {
            encoding: config.serialization.encoding_name(),
            request_compression: config.request_compression.clone(),
            pools: config.compression_pools.clone(),
            get_configuration: config.get_configuration,
            timeout: config.timeout,
        }))
    }
}

impl Interceptor for ConnectInterceptor {
    fn unary_function(&self) -> UnaryFunction {
        let inner = self.0.clone();
        let response_inner = self.0.clone();
        UnaryFunction {
            request: Box::new(move |mut request| {
                ensure_user_agent(&mut request.headers);
                if let Some(accept) = acceptable_encodings(&inner.pools) {
                    request.headers.insert(ACCEPT_ENCODING, header_value(&accept)?);
                }
                if let Some(value) = inner.timeout.and_then(connect_timeout_value) {
                    request.headers.insert(TIMEOUT_HEADER, header_value(&value)?);
                }

                if inner.get_configuration.allows(request.idempotency)
                    && request.stream_kind == StreamKind::Unary
                {
                    return into_get_request(request, &inner);
                }

                request.content_type = format!("application/{}", inner.encoding);
                request
                    .headers
                    .insert(CONTENT_TYPE, header_value(&request.content_type)?);
                request.headers.insert(
                    PROTOCOL_VERSION_HEADER,
                    header_value(PROTOCOL_VERSION)?,
                );
                if let Some(compression) = &inner.request_compression {
                    if let Some(message) = request.message.take() {
                        if compression.applies_to(message.len()) {
                            let compressed = compression.pool.compress(&message).map_err(|e| {
                                RpcError::Encode(format!("compression failed: {e}"))
                            })?;
                            request
                                .headers
                                .insert(CONTENT_ENCODING, header_value(compression.pool.name())?);
                            request.message = Some(compressed);
                        } else {
                            request.message = Some(message);
                        }
                    }
                }
                Ok(request)
            }),
            response: Box::new(move |response| unary_response(response, &response_inner)),
        }
    }

    fn stream_function(&self) -> StreamFunction {
        let inner = self.0.clone();
        let body_inner = self.0.clone();
        let result_inner = self.0.clone();
        // Negotiated per stream once the response headers arrive.
        let mut response_compression: Option<Arc<dyn CompressionPool>> = None;
        StreamFunction {
            request: Box::new(move |mut request| {
                request.content_type = format!("application/connect+{}", inner.encoding);
                request
                    .headers
                    .insert(CONTENT_TYPE, header_value(&request.content_type)?);
                request
                    .headers
                    .insert(PROTOCOL_VERSION_HEADER, header_value(PROTOCOL_VERSION)?);
                ensure_user_agent(&mut request.headers);
                if let Some(accept) = acceptable_encodings(&inner.pools) {
                    request
                        .headers
                        .insert(STREAMING_ACCEPT_ENCODING, header_value(&accept)?);
                }
                if let Some(compression) = &inner.request_compression {
                    request.headers.insert(
                        STREAMING_CONTENT_ENCODING,
                        header_value(compression.pool.name())?,
                    );
                }
                if let Some(value) = inner.timeout.and_then(connect_timeout_value) {
                    request.headers.insert(TIMEOUT_HEADER, header_value(&value)?);
                }
                Ok(request)
            }),
            request_body: Box::new(move |message| {
                match &body_inner.request_compression {
                    Some(compression) => pack(
                        &message,
                        Some(compression.pool.as_ref()),
                        compression.min_bytes,
                    ),
                    None => pack(&message, None, 0),
                }
            }),
            stream_result: Box::new(move |result| match result {
                StreamResult::Headers { headers } => {
                    let encoding = headers
                        .get(STREAMING_CONTENT_ENCODING)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    match response_pool(encoding.as_deref(), &result_inner.pools) {
                        Ok(pool) => {
                            response_compression = pool;
                            StreamResult::Headers { headers }
                        }
                        Err(error) => StreamResult::completed_with(error),
                    }
                }
                StreamResult::Message { message } => {
                    match unpack_with_header_byte(&message, response_compression.as_deref()) {
                        Ok((flags, payload)) if is_end_stream(flags) => parse_end_stream(&payload),
                        Ok((_, payload)) => StreamResult::Message { message: payload },
                        Err(error) => StreamResult::completed_with(error),
                    }
                }
                complete @ StreamResult::Complete { .. } => complete,
            }),
        }
    }
}

/// Rewrite a unary POST into the Connect GET form: the serialized message
/// moves into the query string as unpadded URL-safe base64 and the body is
/// dropped.
fn into_get_request(mut request: HttpRequest, inner: &Inner) -> Result<HttpRequest, RpcError> {
    let message = request.message.take().unwrap_or_default();
    let (message, compression) = match &inner.request_compression {
        Some(compression) if compression.applies_to(message.len()) => {
            let compressed = compression
                .pool
                .compress(&message)
                .map_err(|e| RpcError::Encode(format!("compression failed: {e}")))?;
            (compressed, Some(compression.pool.name()))
        }
        _ => (message, None),
    };

    let mut url = format!(
        "{}?connect=v1&encoding={}&message={}&base64=1",
        request.url,
        inner.encoding,
        URL_SAFE_NO_PAD.encode(&message),
    );
    if let Some(name) = compression {
        url.push_str("&compression=");
        url.push_str(name);
    }

    request.url = url;
    request.method = http::Method::GET;
    request.content_type = String::new();
    Ok(request)
}

fn unary_response(mut response: HttpResponse, inner: &Inner) -> HttpResponse {
    if response.error.is_some() {
        return response;
    }

    // Connect unary trailers travel as prefixed headers.
    let (plain, trailers) = headers::split_trailers(std::mem::take(&mut response.headers));
    response.headers = plain;
    headers::merge(&mut response.trailers, &trailers);

    let http_status = response.tracing.http_status.unwrap_or(200);
    if !(200..300).contains(&http_status) {
        let metadata = super::completion::error_metadata(&response.headers, &response.trailers);
        let body = decompressed_error_body(&response, inner);
        let error = parse_error_body(&body, http_status, metadata);
        response.code = error.code();
        response.error = Some(error);
        response.message = Bytes::new();
        return response;
    }

    response.code = Code::Ok;
    let encoding = response
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    match response_pool(encoding.as_deref(), &inner.pools) {
        Ok(Some(pool)) => match pool.decompress(&response.message) {
            Ok(message) => response.message = message,
            Err(e) => {
                let error = RpcError::Decode(format!("decompression failed: {e}"));
                response.code = error.code();
                response.error = Some(error);
            }
        },
        Ok(None) => {}
        Err(error) => {
            response.code = error.code();
            response.error = Some(error);
        }
    }
    response
}

/// Error bodies may be compressed like any other response body; fall back to
/// the raw bytes when the encoding is unknown or broken.
fn decompressed_error_body(response: &HttpResponse, inner: &Inner) -> Bytes {
    let encoding = response
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    if let Ok(Some(pool)) = response_pool(encoding, &inner.pools) {
        if let Ok(body) = pool.decompress(&response.message) {
            return body;
        }
    }
    response.message.clone()
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<DetailJson>,
}

#[derive(Deserialize)]
struct DetailJson {
    #[serde(rename = "type")]
    type_url: String,
    #[serde(default)]
    value: String,
}

/// Parse a Connect unary error body, falling back to the HTTP status when
/// the body is not a Connect error.
fn parse_error_body(body: &[u8], http_status: u16, metadata: HeaderMap) -> RpcError {
    let fallback = Code::from_http_status(http_status);
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => {
            let code = parsed
                .code
                .as_deref()
                .and_then(Code::from_name)
                .unwrap_or(fallback);
            let status = match parsed.message {
                Some(message) => Status::new(code, message),
                None => Status::from_code(code),
            };
            let details = parsed.details.iter().filter_map(parse_detail).collect();
            RpcError::Status(status.with_details(details).with_metadata(metadata))
        }
        Err(_) => {
            let message = std::str::from_utf8(body)
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown error");
            RpcError::Status(Status::new(fallback, message).with_metadata(metadata))
        }
    }
}

fn parse_detail(detail: &DetailJson) -> Option<ErrorDetail> {
    let value = super::completion::decode_base64(&detail.value)?;
    Some(ErrorDetail::new(&detail.type_url, value))
}

#[derive(Deserialize)]
struct EndStreamBody {
    #[serde(default)]
    error: Option<EndStreamError>,
    #[serde(default)]
    metadata: Option<HashMap<String, Vec<String>>>,
}

#[derive(Deserialize)]
struct EndStreamError {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<DetailJson>,
}

/// Parse the payload of an end-stream frame into the terminal result.
///
/// Absence of `error` means the stream completed OK; `metadata` becomes the
/// trailers.
fn parse_end_stream(payload: &[u8]) -> RawStreamResult {
    if payload.is_empty() {
        return StreamResult::Complete {
            code: Code::Ok,
            error: None,
            trailers: HeaderMap::new(),
        };
    }

    let body: EndStreamBody = match serde_json::from_slice(payload) {
        Ok(body) => body,
        Err(e) => {
            return StreamResult::completed_with(RpcError::Protocol(format!(
                "invalid end-stream frame: {e}"
            )));
        }
    };

    let trailers = body
        .metadata
        .map(|metadata| {
            headers::from_string_pairs(
                metadata.iter().map(|(k, v)| (k.as_str(), v.as_slice())),
            )
        })
        .unwrap_or_default();

    match body.error {
        None => StreamResult::Complete {
            code: Code::Ok,
            error: None,
            trailers,
        },
        Some(error) => {
            let code = Code::from_name(&error.code).unwrap_or(Code::Unknown);
            let status = match error.message {
                Some(message) => Status::new(code, message),
                None => Status::from_code(code),
            };
            let details = error.details.iter().filter_map(parse_detail).collect();
            StreamResult::Complete {
                code,
                error: Some(RpcError::Status(
                    status.with_details(details).with_metadata(trailers.clone()),
                )),
                trailers,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Idempotency;
    use crate::testing::strategy;
    use triwire_core::GzipPool;

    fn config() -> ProtocolClientConfig {
        ProtocolClientConfig::new(
            "https://example.com",
            strategy(),
            crate::config::NetworkProtocol::Connect,
        )
    }

    fn unary_request(message: &[u8]) -> HttpRequest {
        HttpRequest::new(
            "https://example.com/ping.v1.PingService/Ping".into(),
            HeaderMap::new(),
            Some(Bytes::copy_from_slice(message)),
            "ping.v1.PingService/Ping".into(),
            StreamKind::Unary,
            Idempotency::Unknown,
        )
    }

    #[test]
    fn unary_request_headers() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut unary = interceptor.unary_function();
        let out = (unary.request)(unary_request(b"msg")).unwrap();

        assert_eq!(out.method, http::Method::POST);
        assert_eq!(out.headers.get("content-type").unwrap(), "application/codec_name");
        assert_eq!(out.headers.get("connect-protocol-version").unwrap(), "1");
        assert_eq!(out.headers.get("accept-encoding").unwrap(), "gzip");
        assert_eq!(
            out.headers.get("user-agent").unwrap(),
            super::super::DEFAULT_USER_AGENT
        );
        assert_eq!(&out.message.unwrap()[..], b"msg");
    }

    #[test]
    fn caller_user_agent_preserved() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut unary = interceptor.unary_function();
        let mut request = unary_request(b"msg");
        request
            .headers
            .insert("User-Agent", "my-custom-user-agent".parse().unwrap());
        let out = (unary.request)(request).unwrap();
        assert_eq!(out.headers.get("user-agent").unwrap(), "my-custom-user-agent");
    }

    #[test]
    fn get_dispatch_for_idempotent_methods() {
        let config = config().with_get_configuration(GetConfiguration::IfNoSideEffects);
        let interceptor = ConnectInterceptor::new(&config);
        let mut unary = interceptor.unary_function();

        let mut request = unary_request(b"query");
        request.idempotency = Idempotency::NoSideEffects;
        let out = (unary.request)(request).unwrap();

        assert_eq!(out.method, http::Method::GET);
        assert!(out.message.is_none());
        let encoded = URL_SAFE_NO_PAD.encode(b"query");
        assert_eq!(
            out.url,
            format!(
                "https://example.com/ping.v1.PingService/Ping?connect=v1&encoding=codec_name&message={encoded}&base64=1"
            )
        );
        assert!(!out.headers.contains_key("content-type"));
    }

    #[test]
    fn get_dispatch_requires_idempotency() {
        let config = config().with_get_configuration(GetConfiguration::IfNoSideEffects);
        let interceptor = ConnectInterceptor::new(&config);
        let mut unary = interceptor.unary_function();
        let out = (unary.request)(unary_request(b"q")).unwrap();
        assert_eq!(out.method, http::Method::POST);
    }

    #[test]
    fn request_compression_applied_over_threshold() {
        let pool = Arc::new(GzipPool::default());
        let config = config()
            .with_request_compression(RequestCompression::new(4, pool.clone()));
        let interceptor = ConnectInterceptor::new(&config);
        let mut unary = interceptor.unary_function();

        let out = (unary.request)(unary_request(b"long enough payload")).unwrap();
        assert_eq!(out.headers.get("content-encoding").unwrap(), "gzip");
        let body = out.message.unwrap();
        assert_eq!(
            &pool.decompress(&body).unwrap()[..],
            b"long enough payload"
        );

        let mut unary = interceptor.unary_function();
        let out = (unary.request)(unary_request(b"x")).unwrap();
        assert!(!out.headers.contains_key("content-encoding"));
        assert_eq!(&out.message.unwrap()[..], b"x");
    }

    #[test]
    fn unary_error_body_parsed() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let body = br#"{"code":"permission_denied","message":"nope","details":[{"type":"acme.Reason","value":"AQID"}]}"#;
        let response = HttpResponse::new(
            403,
            HeaderMap::new(),
            Bytes::from_static(body),
            HeaderMap::new(),
        );
        let out = (unary.response)(response);

        let error = out.error.unwrap();
        assert_eq!(error.code(), Code::PermissionDenied);
        assert_eq!(error.message(), Some("nope"));
        assert_eq!(error.details()[0].type_url(), "acme.Reason");
        assert_eq!(error.details()[0].value(), &[1, 2, 3]);
        assert_eq!(out.code, Code::PermissionDenied);
    }

    #[test]
    fn unary_error_falls_back_to_http_status() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut unary = interceptor.unary_function();
        let response = HttpResponse::new(
            429,
            HeaderMap::new(),
            Bytes::from_static(b"slow down"),
            HeaderMap::new(),
        );
        let out = (unary.response)(response);
        let error = out.error.unwrap();
        assert_eq!(error.code(), Code::ResourceExhausted);
        assert_eq!(error.message(), Some("slow down"));
    }

    #[test]
    fn trailer_prefixed_headers_promoted() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let mut headers = HeaderMap::new();
        headers.insert("trailer-x-cost", "3".parse().unwrap());
        headers.insert("x-plain", "yes".parse().unwrap());
        let response = HttpResponse::new(200, headers, Bytes::from_static(b"ok"), HeaderMap::new());
        let out = (unary.response)(response);

        assert!(out.error.is_none());
        assert_eq!(out.trailers.get("x-cost").unwrap(), "3");
        assert!(!out.headers.contains_key("trailer-x-cost"));
        assert_eq!(out.headers.get("x-plain").unwrap(), "yes");
    }

    #[test]
    fn unary_response_decompressed() {
        let pool = GzipPool::default();
        let interceptor = ConnectInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let mut headers = HeaderMap::new();
        headers.insert("content-encoding", "gzip".parse().unwrap());
        let body = pool.compress(b"clear").unwrap();
        let response = HttpResponse::new(200, headers, body, HeaderMap::new());
        let out = (unary.response)(response);
        assert!(out.error.is_none());
        assert_eq!(&out.message[..], b"clear");
    }

    #[test]
    fn unknown_response_encoding_fails() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let mut headers = HeaderMap::new();
        headers.insert("content-encoding", "snappy".parse().unwrap());
        let response = HttpResponse::new(200, headers, Bytes::new(), HeaderMap::new());
        let out = (unary.response)(response);
        let error = out.error.unwrap();
        assert_eq!(error.code(), Code::Internal);
    }

    #[test]
    fn stream_request_headers() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut stream = interceptor.stream_function();
        let mut request = unary_request(b"");
        request.message = None;
        request.stream_kind = StreamKind::BidiStream;
        let out = (stream.request)(request).unwrap();
        assert_eq!(
            out.headers.get("content-type").unwrap(),
            "application/connect+codec_name"
        );
        assert_eq!(out.headers.get("connect-accept-encoding").unwrap(), "gzip");
        assert_eq!(out.headers.get("connect-protocol-version").unwrap(), "1");
    }

    #[test]
    fn stream_messages_enveloped() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut stream = interceptor.stream_function();
        let frame = (stream.request_body)(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(frame[0], 0);
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn end_stream_frame_with_metadata() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut stream = interceptor.stream_function();

        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/connect+codec_name".parse().unwrap());
        let _ = (stream.stream_result)(StreamResult::Headers { headers });

        let frame = {
            let payload = br#"{"metadata":{"k":["v"]}}"#;
            let mut frame = vec![triwire_core::FLAG_END_STREAM];
            frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            frame.extend_from_slice(payload);
            Bytes::from(frame)
        };
        match (stream.stream_result)(StreamResult::Message { message: frame }) {
            StreamResult::Complete { code, error, trailers } => {
                assert_eq!(code, Code::Ok);
                assert!(error.is_none());
                assert_eq!(trailers.get("k").unwrap(), "v");
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn end_stream_frame_with_error() {
        let payload = br#"{"error":{"code":"unavailable","message":"draining"}}"#;
        match parse_end_stream(payload) {
            StreamResult::Complete { code, error, .. } => {
                assert_eq!(code, Code::Unavailable);
                let error = error.unwrap();
                assert_eq!(error.code(), Code::Unavailable);
                assert_eq!(error.message(), Some("draining"));
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn stream_message_frames_pass_through() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut stream = interceptor.stream_function();

        let frame = pack(b"payload", None, 0).unwrap();
        match (stream.stream_result)(StreamResult::Message { message: frame }) {
            StreamResult::Message { message } => assert_eq!(&message[..], b"payload"),
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn stream_unknown_encoding_completes_with_error() {
        let interceptor = ConnectInterceptor::new(&config());
        let mut stream = interceptor.stream_function();

        let mut headers = HeaderMap::new();
        headers.insert("connect-content-encoding", "snappy".parse().unwrap());
        match (stream.stream_result)(StreamResult::Headers { headers }) {
            StreamResult::Complete { code, .. } => assert_eq!(code, Code::Internal),
            _ => panic!("expected completion"),
        }
    }
}
