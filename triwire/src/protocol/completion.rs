//! gRPC completion parsing, shared by the gRPC and gRPC-Web interceptors.
//!
//! A completion is the `grpc-status` / `grpc-message` /
//! `grpc-status-details-bin` triple, whether it arrives as HTTP trailers
//! (gRPC), among response headers (trailers-only responses), or inside a
//! trailer frame (gRPC-Web).

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use http::HeaderMap;
use percent_encoding::percent_decode_str;
use triwire_core::{headers, Code, ErrorDetail, ErrorDetailParser, RpcError, Status};

use crate::result::{RawStreamResult, StreamResult};

pub(crate) const GRPC_STATUS: &str = "grpc-status";
pub(crate) const GRPC_MESSAGE: &str = "grpc-message";
pub(crate) const GRPC_STATUS_DETAILS: &str = "grpc-status-details-bin";

/// A parsed gRPC completion.
pub(crate) struct GrpcCompletion {
    pub code: Code,
    pub message: Option<String>,
    pub details: Vec<ErrorDetail>,
}

impl GrpcCompletion {
    /// Turn a non-OK completion into the error callers observe. `None` for
    /// OK.
    pub(crate) fn into_error(self, metadata: HeaderMap) -> Option<RpcError> {
        if self.code == Code::Ok {
            return None;
        }
        let status = match self.message {
            Some(message) => Status::new(self.code, message),
            None => Status::from_code(self.code),
        };
        Some(RpcError::Status(
            status.with_details(self.details).with_metadata(metadata),
        ))
    }
}

/// Parse a completion out of a trailer map.
///
/// Returns `None` when no `grpc-status` is present at all (the caller
/// decides whether that is a trailers-elsewhere situation or a protocol
/// error).
pub(crate) fn parse_completion(
    trailers: &HeaderMap,
    parser: &dyn ErrorDetailParser,
) -> Option<Result<GrpcCompletion, RpcError>> {
    let raw = trailers.get(GRPC_STATUS)?;
    let code = match raw
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .and_then(Code::from_value)
    {
        Some(code) => code,
        None => {
            return Some(Err(RpcError::Protocol(format!(
                "invalid grpc-status trailer: {raw:?}"
            ))));
        }
    };

    let message = trailers
        .get(GRPC_MESSAGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| percent_decode_str(v).decode_utf8_lossy().into_owned());

    let details = trailers
        .get(GRPC_STATUS_DETAILS)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_base64)
        .map(|bytes| parser.parse_details(&bytes))
        .unwrap_or_default();

    Some(Ok(GrpcCompletion {
        code,
        message,
        details,
    }))
}

/// Map a trailer set onto a terminal stream result.
///
/// gRPC treats a stream that ends without any `grpc-status` as broken, so
/// that case completes with a protocol error.
pub(crate) fn complete_from_trailers(
    trailers: HeaderMap,
    parser: &dyn ErrorDetailParser,
) -> RawStreamResult {
    match parse_completion(&trailers, parser) {
        None => StreamResult::completed_with(RpcError::Protocol(
            "stream completed without a grpc-status trailer".into(),
        )),
        Some(Err(error)) => StreamResult::completed_with(error),
        Some(Ok(completion)) => {
            let code = completion.code;
            let error = completion.into_error(trailers.clone());
            StreamResult::Complete {
                code,
                error,
                trailers,
            }
        }
    }
}

/// Binary trailer values are base64; servers differ on padding.
pub(crate) fn decode_base64(value: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(value)
        .or_else(|_| STANDARD_NO_PAD.decode(value))
        .ok()
}

/// Merge headers and trailers into the metadata attached to an error.
pub(crate) fn error_metadata(response_headers: &HeaderMap, trailers: &HeaderMap) -> HeaderMap {
    let mut metadata = response_headers.clone();
    headers::merge(&mut metadata, trailers);
    metadata
}
