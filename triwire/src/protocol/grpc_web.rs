//! The gRPC-Web protocol.
//!
//! gRPC minus HTTP trailers: the status triple arrives as a final envelope
//! whose flag byte has the trailer bit (0x80) set and whose payload is an
//! HTTP/1.1-style header block. Everything else (content types aside)
//! matches gRPC, including trailers-only responses delivered among the
//! headers.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use triwire_core::{
    acceptable_encodings, headers, pack, response_pool, split_frame, unpack_with_header_byte,
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

/// Flag bit marking the trailer frame. gRPC-Web uses the high bit, unlike
/// the Connect end-stream bit.
const TRAILER_FLAG: u8 = 0b1000_0000;

fn is_trailer_frame(flags: u8) -> bool {
    flags & TRAILER_FLAG != 0
}

struct Inner {
    encoding: &'static str,
    parser: Arc<dyn ErrorDetailParser>,
    request_compression: Option<RequestCompression>,
    pools: Vec<Arc<dyn CompressionPool>>,
    timeout: Option<Duration>,
}

impl Inner {
    fn apply_request_headers(&self, request: &mut HttpRequest) -> Result<(), RpcError> {
        request.content_type = format!("application/grpc-web+{}", self.encoding);
        request
            .headers
            .insert(CONTENT_TYPE, header_value(&request.content_type)?);
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
        headers: &HeaderMap,
    ) -> Result<Option<Arc<dyn CompressionPool>>, RpcError> {
        let encoding = headers.get(GRPC_ENCODING).and_then(|v| v.to_str().ok());
        response_pool(encoding, &self.pools)
    }
}

/// Protocol interceptor for gRPC-Web.
pub struct GrpcWebInterceptor(Arc<Inner>);

impl GrpcWebInterceptor {
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

impl Interceptor for GrpcWebInterceptor {
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
                        Ok((flags, payload)) if is_trailer_frame(flags) => {
                            let trailers = headers::parse_header_block(&payload);
                            complete_from_trailers(trailers, result_inner.parser.as_ref())
                        }
                        Ok((_, payload)) => StreamResult::Message { message: payload },
                        Err(error) => StreamResult::completed_with(error),
                    }
                }
                complete @ StreamResult::Complete { .. } => complete,
            }),
        }
    }
}

/// Split a unary gRPC-Web body into its message payload and the trailer
/// block carried by the final frame.
fn split_unary_body(
    body: &[u8],
    pool: Option<&dyn CompressionPool>,
) -> Result<(Option<Bytes>, Option<HeaderMap>), RpcError> {
    let mut buf = BytesMut::from(body);
    let mut message = None;
    let mut trailers = None;
    while let Some(frame) = split_frame(&mut buf) {
        let (flags, payload) = unpack_with_header_byte(&frame, pool)?;
        if is_trailer_frame(flags) {
            trailers = Some(headers::parse_header_block(&payload));
        } else {
            message = Some(payload);
        }
    }
    if !buf.is_empty() {
        return Err(RpcError::Protocol(format!(
            "{} trailing bytes after final frame",
            buf.len()
        )));
    }
    Ok((message, trailers))
}

fn unary_response(mut response: HttpResponse, inner: &Inner) -> HttpResponse {
    if response.error.is_some() {
        return response;
    }

    let pool = match inner.response_pool_for(&response.headers) {
        Ok(pool) => pool,
        Err(error) => {
            response.code = error.code();
            response.error = Some(error);
            return response;
        }
    };

    let (message, frame_trailers) = match split_unary_body(&response.message, pool.as_deref()) {
        Ok(parts) => parts,
        Err(error) => {
            response.code = error.code();
            response.error = Some(error);
            return response;
        }
    };
    if let Some(trailers) = frame_trailers {
        headers::merge(&mut response.trailers, &trailers);
    }

    // Trailers-only responses carry the status among the headers.
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

    match message {
        Some(message) => response.message = message,
        None => {
            let error = RpcError::Protocol("response carried no message frame".into());
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
    use triwire_core::Code;

    fn config() -> ProtocolClientConfig {
        ProtocolClientConfig::new("https://example.com", strategy(), NetworkProtocol::GrpcWeb)
    }

    fn trailer_frame(block: &[u8]) -> Bytes {
        let mut frame = vec![TRAILER_FLAG];
        frame.extend_from_slice(&(block.len() as u32).to_be_bytes());
        frame.extend_from_slice(block);
        Bytes::from(frame)
    }

    #[test]
    fn request_content_type_and_no_te() {
        let interceptor = GrpcWebInterceptor::new(&config());
        let mut unary = interceptor.unary_function();
        let request = HttpRequest::new(
            "https://example.com/test.Service/Unary".into(),
            HeaderMap::new(),
            Some(Bytes::from_static(b"msg")),
            "test.Service/Unary".into(),
            StreamKind::Unary,
            Idempotency::Unknown,
        );
        let out = (unary.request)(request).unwrap();
        assert_eq!(
            out.headers.get("content-type").unwrap(),
            "application/grpc-web+codec_name"
        );
        assert!(!out.headers.contains_key("te"));
        // body still enveloped like gRPC
        assert_eq!(out.message.unwrap()[0], 0);
    }

    #[test]
    fn unary_body_with_trailer_frame() {
        let interceptor = GrpcWebInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let mut body = pack(b"reply", None, 0).unwrap().to_vec();
        body.extend_from_slice(&trailer_frame(b"grpc-status: 0\r\n"));
        let response =
            HttpResponse::new(200, HeaderMap::new(), Bytes::from(body), HeaderMap::new());
        let out = (unary.response)(response);

        assert_eq!(out.code, Code::Ok);
        assert!(out.error.is_none());
        assert_eq!(&out.message[..], b"reply");
        assert_eq!(out.trailers.get("grpc-status").unwrap(), "0");
    }

    #[test]
    fn unary_error_in_trailer_frame() {
        let interceptor = GrpcWebInterceptor::new(&config());
        let mut unary = interceptor.unary_function();

        let block = b"grpc-status: 5\r\ngrpc-message: nothing%20here\r\n";
        let body = trailer_frame(block);
        let response = HttpResponse::new(200, HeaderMap::new(), body, HeaderMap::new());
        let out = (unary.response)(response);

        assert_eq!(out.code, Code::NotFound);
        let error = out.error.unwrap();
        assert_eq!(error.message(), Some("nothing here"));
    }

    #[test]
    fn stream_trailer_frame_completes() {
        let interceptor = GrpcWebInterceptor::new(&config());
        let mut stream = interceptor.stream_function();

        let _ = (stream.stream_result)(StreamResult::Headers {
            headers: HeaderMap::new(),
        });

        let message_frame = pack(b"data", None, 0).unwrap();
        match (stream.stream_result)(StreamResult::Message {
            message: message_frame,
        }) {
            StreamResult::Message { message } => assert_eq!(&message[..], b"data"),
            _ => panic!("expected message"),
        }

        let result = (stream.stream_result)(StreamResult::Message {
            message: trailer_frame(b"grpc-status: 0\r\nx-extra: yes\r\n"),
        });
        match result {
            StreamResult::Complete { code, error, trailers } => {
                assert_eq!(code, Code::Ok);
                assert!(error.is_none());
                assert_eq!(trailers.get("x-extra").unwrap(), "yes");
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn trailer_bit_is_high_bit() {
        assert!(is_trailer_frame(0x80));
        assert!(is_trailer_frame(0x81));
        assert!(!is_trailer_frame(0x02));
        assert!(!is_trailer_frame(0x01));
    }
}
