//! Caller-facing call results.

use bytes::Bytes;
use http::HeaderMap;
use triwire_core::{Code, RpcError};

/// Outcome of a unary call.
///
/// Both arms carry the response headers and trailers; a failure never hides
/// the metadata that accompanied it.
#[derive(Debug)]
pub enum ResponseMessage<T> {
    Success {
        message: T,
        headers: HeaderMap,
        trailers: HeaderMap,
    },
    Failure {
        error: RpcError,
        headers: HeaderMap,
        trailers: HeaderMap,
    },
}

impl<T> ResponseMessage<T> {
    pub fn headers(&self) -> &HeaderMap {
        match self {
            ResponseMessage::Success { headers, .. } => headers,
            ResponseMessage::Failure { headers, .. } => headers,
        }
    }

    pub fn trailers(&self) -> &HeaderMap {
        match self {
            ResponseMessage::Success { trailers, .. } => trailers,
            ResponseMessage::Failure { trailers, .. } => trailers,
        }
    }

    pub fn message(&self) -> Option<&T> {
        match self {
            ResponseMessage::Success { message, .. } => Some(message),
            ResponseMessage::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match self {
            ResponseMessage::Success { .. } => None,
            ResponseMessage::Failure { error, .. } => Some(error),
        }
    }

    /// Collapse into a plain `Result`, discarding metadata.
    pub fn into_result(self) -> Result<T, RpcError> {
        match self {
            ResponseMessage::Success { message, .. } => Ok(message),
            ResponseMessage::Failure { error, .. } => Err(error),
        }
    }
}

/// One event observed on a stream.
///
/// Per stream: `Headers` is delivered first and once, `Message`s follow in
/// wire order, and `Complete` is terminal and appears exactly once.
#[derive(Debug)]
pub enum StreamResult<T> {
    Headers {
        headers: HeaderMap,
    },
    Message {
        message: T,
    },
    Complete {
        code: Code,
        error: Option<RpcError>,
        trailers: HeaderMap,
    },
}

impl<T> StreamResult<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, StreamResult::Complete { .. })
    }

    /// A completion for a local failure.
    pub fn completed_with(error: RpcError) -> Self {
        StreamResult::Complete {
            code: error.code(),
            error: Some(error),
            trailers: HeaderMap::new(),
        }
    }
}

/// Stream results as the interceptor chain sees them: message payloads are
/// still raw bytes (whole envelopes from the transport, unpacked payloads
/// after the protocol interceptor).
pub type RawStreamResult = StreamResult<Bytes>;
