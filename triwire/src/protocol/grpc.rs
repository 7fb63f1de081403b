//! The gRPC protocol.
//!
//! Every body, unary included, carries enveloped messages. The RPC status
//! never lives in the HTTP status line: it arrives in HTTP trailers (or, for
//! trailers-only responses, among the headers) as `grpc-status`,
//! `grpc-message`, and `grpc-status-details-bin`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, TE};
use triwire_core::{
    acceptable_encodings, is_end_stream, pack, response_pool, unpack_with_header_byte, Code,
    CompressionPool, ErrorDetailParser, RequestCompression, RpcError,
};

use crate::config::ProtocolClientConfig;
use crate::http::{HttpRequest, HttpResponse};
use crate::interceptor::{Interceptor, StreamFunction, UnaryFunction};
use crate::protocol::completion::{
    complete_from_trailers, error_metadata, parse_completion, GRPC_STATUS,
};
use crate::protocol::{ensure_user_agent, grpc_timeout_value, header_value};
use crate::result::StreamResult;

const GRPC_ENCODING: &str = "grpc-encoding";
const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
const GRPC_TIMEOUT: &str = "grpc-timeout";

struct Inner {
    encoding: &'static str,
    parser: Arc<dyn ErrorDetailParser>,
    request_compression: Option<RequestCompression>,
    pools: Vec<Arc<dyn CompressionPool>>,
    timeout: Option<Duration>,
}

impl Inner {
    fn apply_request_headers(&self, request: &mut HttpRequest) -> Result<(), RpcError> {
        request.content_type = format!("application/grpc+{}", self.encoding);
        request
            .headers
            .insert(CONTENT_TYPE, header_value(&request.content_type)?);
        request.headers.insert(TE, header_value("trailers")?);
        ensure_user_agent(&mut request.headers);
        if let Some(accept) = acceptable_encodings(&self.pools) {
            request
                .headers
                .insert(GRPC_ACCEPT_ENCODING, header_value(&accept)?);
        }
        if let Some(compression) = &self.request_compression {
            request
                .headers
                .insert(GRPC_ENCODING, header_value(compression.pool.name())?);
        }
        if let Some(value) = self.timeout.and_then(grpc_timeout_value) {
            request.headers.insert(GRPC_TIMEOUT, header_value(&value)?);
        }
        Ok(())
    }

    fn envelope(&self, message: &[u8]) -> Result<Bytes, RpcError> {
        match &self.request_compression {
            Some(compression) => pack(
                message,
                Some(compression.pool.as_ref()),
                compression.min_bytes,
            ),
            None => pack(message, None, 0),
        }
    }

    fn response_pool_for(
        &self,
        headers: &http::HeaderMap,
    ) -> Result<Option<Arc<dyn CompressionPool>>, RpcError> {
        let encoding = headers.get(GRPC_ENCODING).and_then(|v| v.to_str().ok());
        response_pool(encoding, &self.pools)
    }
}

/// Protocol interceptor for gRPC.
pub struct GrpcInterceptor(Arc<Inner>);

impl GrpcInterceptor {
    pub(crate) fn new(config: &ProtocolClientConfig) -> Self {
        Self(Arc::new(Inner {
            encoding: config.serialization.encoding_name(),
            parser: config.serialization.error_detail_parser(),
            request_compression: config.request_compression.clone(),
            pools: config.compression_pools.clone(),
            timeout: config.timeout,
        }))
    }
}

impl Interceptor for GrpcInterceptor {
    fn unary_function(&self) -> UnaryFunction {
        let inner = self.0.clone();
        let response_inner = self.0.clone();
        UnaryFunction {
            request: Box::new(move |mut request| {
                inner.apply_request_headers(&mut request)?;
                if let Some(message) = request.message.take() {
                    request.message = Some(inner.envelope(&message)?);
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
        let mut response_compression: Option<Arc<dyn CompressionPool>> = None;
        StreamFunction {
            request: Box::new(move |mut request| {
                inner.apply_request_headers(&mut request)?;
                Ok(request)
            }),
            request_body: Box::new(move |message| body_inner.envelope(&message)),
            stream_result: Box::new(move |result| match result {
                StreamResult::Headers { headers } => {
                    // Trailers-only: the server answered with a status among
                    // the headers and no body will follow.
                    if headers.contains_key(GRPC_STATUS) {
                        return complete_from_trailers(headers, result_inner.parser.as_ref());
                    }
                    match result_inner.response_pool_for(&headers) {
                        Ok(pool) => {
                            response_compression = pool;
                            StreamResult::Headers { headers }
                        }
                        Err(error) => StreamResult::completed_with(error),
                    }
                }
                StreamResult::Message { message } => {
                    match unpack_with_header_byte(&message, response_compression.as_deref()) {
                        Ok((flags, _)) if is_end_stream(flags) => {
                            StreamResult::completed_with(RpcError::Protocol(format!(
                                "unexpected frame flags for grpc: 0x{flags:02x}"
                            )))
                        }
                        Ok((_, payload)) => StreamResult::Message { message: payload },
                        Err(error) => StreamResult::completed_with(error),
                    }
                }
                StreamResult::Complete {
                    code,
                    error,
                    trailers,
                } => {
                    if error.is_some() {
                        // Transport-level failure; nothing to reinterpret.
                        return StreamResult::Complete {
                            code,
                            error,
                            trailers,
                        };
                    }
                    complete_from_trailers(trailers, result_inner.parser.as_ref())
                }
            }),
        }
    }
}

fn unary_response(mut response: HttpResponse, inner: &Inner) -> HttpResponse {
    if response.error.is_some() {
        return response;
    }

    // Trailers-only responses put the status among the headers.
    let completion_source = if !response.trailers.contains_key(GRPC_STATUS)
        && response.headers.contains_key(GRPC_STATUS)
    {
        &response.headers
    } else {
        &response.trailers
    };

    let completion = match parse_completion(completion_source, inner.parser.as_ref()) {
        Some(Ok(completion)) => completion,
        Some(Err(error)) => {
            response.code = error.code();
            response.error = Some(error);
            return response;
        }
        None => {
            let error = RpcError::Protocol("response carried no grpc-status".into());
            response.code = error.code();
            response.error = Some(error);
            return response;
        }
    };

    response.code = completion.code;
    if let Some(error) =
        completion.into_error(error_metadata(&response.headers, &response.trailers))
    {
        response.error = Some(error);
        response.message = Bytes::new();
        return response;
    }

    // OK: the body is a single envelope.
    let pool = match inner.response_pool_for(&response.headers) {
        Ok(pool) => pool,
        Err(error) => {
            response.code = error.code();
            response.error = Some(error);
            return response;
        }
    };
    match unpack_with_header_byte(&response.message, pool.as_deref()) {
        Ok((_, payload)) => response.message = payload,
        Err(error) => {
            response.code = error.code();
            response.error = Some(error);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkProtocol;
    use crate::method::{Idempotency, StreamKind};
    use crate::testing::strategy;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use http::HeaderMap;
    use triwire_core::GzipPool;

    fn config() -> ProtocolClientConfig {
        ProtocolClientConfig::new("https://example.com", strategy(), NetworkProtocol::Grpc)
    }

    fn request(message: &[u8]) -> HttpRequest {
        HttpRequest::new(
            "https://example.com/test.Service/Unary".into(),
            HeaderMap::new(),
            Some(Bytes::copy_from_slice(message)),
            "test.Service/Unary".into(),
            StreamKind::Unary,
            Idempotency::Unknown,
        )
    }

    fn ok_trailers() -> HeaderMap {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", "0".parse().unwrap());
        trailers
    }

    #[test]
    fn unary_request_wire_shape() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut unary = interceptor.unary_function();
        let out = (unary.request)(request(b"msg")).unwrap();

        assert_eq!(
            out.headers.get("content-type").unwrap(),
            "application/grpc+codec_name"
        );
        assert_eq!(out.headers.get("te").unwrap(), "trailers");
        assert_eq!(out.headers.get("grpc-accept-encoding").unwrap(), "gzip");

        // body is enveloped
        let body = out.message.unwrap();
        assert_eq!(body[0], 0);
        assert_eq!(&body[5..], b"msg");
    }

    #[test]
    fn caller_user_agent_wins() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut unary = interceptor.unary_function();
        let mut req = request(b"m");
        req.headers
            .insert("user-agent", "my-custom-user-agent".parse().unwrap());
        let out = (unary.request)(req).unwrap();
        assert_eq!(out.headers.get("User-Agent").unwrap(), "my-custom-user-agent");
        assert_eq!(out.headers.get_all("user-agent").iter().count(), 1);
    }

    #[test]
    fn unary_ok_status_from_trailers() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let body = pack(b"reply", None, 0).unwrap();
        let response = HttpResponse::new(200, HeaderMap::new(), body, ok_trailers());
        let out = (unary.response)(response);

        assert_eq!(out.code, Code::Ok);
        assert!(out.error.is_none());
        assert_eq!(&out.message[..], b"reply");
    }

    #[test]
    fn unary_error_status_with_details() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", "8".parse().unwrap());
        trailers.insert("grpc-message", "no%20more%20resources!".parse().unwrap());
        trailers.insert(
            "grpc-status-details-bin",
            STANDARD.encode(b"some_string").parse().unwrap(),
        );
        let response = HttpResponse::new(200, HeaderMap::new(), Bytes::new(), trailers);
        let out = (unary.response)(response);

        assert_eq!(out.code, Code::ResourceExhausted);
        let error = out.error.unwrap();
        assert_eq!(error.code(), Code::ResourceExhausted);
        assert_eq!(error.message(), Some("no more resources!"));
        // the test parser maps the whole payload through as one detail
        assert_eq!(error.details().len(), 1);
        assert_eq!(error.details()[0].value(), b"some_string");
    }

    #[test]
    fn unary_trailers_only_response() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", "12".parse().unwrap());
        let response = HttpResponse::new(200, headers, Bytes::new(), HeaderMap::new());
        let out = (unary.response)(response);

        assert_eq!(out.code, Code::Unimplemented);
        assert!(out.error.is_some());
    }

    #[test]
    fn unary_missing_status_is_protocol_error() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut unary = interceptor.unary_function();
        let response = HttpResponse::new(200, HeaderMap::new(), Bytes::new(), HeaderMap::new());
        let out = (unary.response)(response);
        assert_eq!(out.code, Code::Internal);
        assert!(matches!(out.error, Some(RpcError::Protocol(_))));
    }

    #[test]
    fn unary_response_decompressed() {
        let pool = GzipPool::default();
        let config = config();
        let interceptor = GrpcInterceptor::new(&config);
        let mut unary = interceptor.unary_function();

        let mut headers = HeaderMap::new();
        headers.insert("grpc-encoding", "gzip".parse().unwrap());
        let body = pack(b"reply", Some(&pool), 0).unwrap();
        let response = HttpResponse::new(200, headers, body, ok_trailers());
        let out = (unary.response)(response);
        assert!(out.error.is_none());
        assert_eq!(&out.message[..], b"reply");
    }

    #[test]
    fn stream_compressed_messages_round_trip() {
        let pool = Arc::new(GzipPool::default());
        let config =
            config().with_request_compression(RequestCompression::new(1, pool.clone()));
        let interceptor = GrpcInterceptor::new(&config);
        let mut stream = interceptor.stream_function();

        let frame = (stream.request_body)(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(frame[0] & 0b01, 0b01);

        let (flags, payload) = unpack_with_header_byte(&frame, Some(pool.as_ref())).unwrap();
        assert_eq!(flags & 0b01, 0b01);
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn stream_headers_negotiate_pool() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut stream = interceptor.stream_function();

        let mut headers = HeaderMap::new();
        headers.insert("grpc-encoding", "gzip".parse().unwrap());
        match (stream.stream_result)(StreamResult::Headers { headers }) {
            StreamResult::Headers { .. } => {}
            _ => panic!("expected headers to pass through"),
        }

        // compressed frame now decodes
        let gzip = GzipPool::default();
        let frame = pack(b"data", Some(&gzip), 0).unwrap();
        match (stream.stream_result)(StreamResult::Message { message: frame }) {
            StreamResult::Message { message } => assert_eq!(&message[..], b"data"),
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn stream_trailers_only_headers_complete() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut stream = interceptor.stream_function();

        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", "7".parse().unwrap());
        match (stream.stream_result)(StreamResult::Headers { headers }) {
            StreamResult::Complete { code, error, .. } => {
                assert_eq!(code, Code::PermissionDenied);
                assert!(error.is_some());
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn stream_completion_parsed_from_http_trailers() {
        let interceptor = GrpcInterceptor::new(&config());
        let mut stream = interceptor.stream_function();

        let result = (stream.stream_result)(StreamResult::Complete {
            code: Code::Ok,
            error: None,
            trailers: ok_trailers(),
        });
        match result {
            StreamResult::Complete { code, error, .. } => {
                assert_eq!(code, Code::Ok);
                assert!(error.is_none());
            }
            _ => panic!("expected completion"),
        }
    }
}
