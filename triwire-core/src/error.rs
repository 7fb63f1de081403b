//! Error types surfaced to RPC callers.
//!
//! Every failure a call can produce ends up as an [`RpcError`]: a remote
//! status ([`Status`]) or one of the local failure kinds (transport, encode,
//! decode, protocol). Remote statuses may carry typed [`ErrorDetail`]s and
//! response metadata.

use http::HeaderMap;

use crate::code::Code;

/// A self-describing error detail attached to a remote status.
///
/// Maps to `google.protobuf.Any` on the wire: a type name plus the encoded
/// message bytes. On the Connect wire the `type.googleapis.com/` prefix is
/// stripped from type names and values travel as unpadded base64.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    type_url: String,
    value: Vec<u8>,
}

impl ErrorDetail {
    pub fn new<S: Into<String>>(type_url: S, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// The type name, without the `type.googleapis.com/` prefix.
    pub fn type_url(&self) -> &str {
        self.type_url
            .strip_prefix("type.googleapis.com/")
            .unwrap_or(&self.type_url)
    }

    /// The encoded message bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// A remote RPC status: a non-OK code plus optional message, details, and
/// the metadata (headers and trailers) that accompanied it.
#[derive(Clone, Debug)]
pub struct Status {
    code: Code,
    message: Option<String>,
    details: Vec<ErrorDetail>,
    metadata: HeaderMap,
}

impl Status {
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: vec![],
            metadata: HeaderMap::new(),
        }
    }

    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: vec![],
            metadata: HeaderMap::new(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn add_detail<S: Into<String>>(mut self, type_url: S, value: Vec<u8>) -> Self {
        self.details.push(ErrorDetail::new(type_url, value));
        self
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {}", self.code(), message),
            None => f.write_str(self.code().as_str()),
        }
    }
}

/// The error type for RPC calls.
///
/// Variants classify where the failure originated; [`RpcError::code`] maps
/// each variant onto the code callers observe.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RpcError {
    /// A status delivered by the server.
    #[error("{0}")]
    Status(Status),

    /// Transport-level failure (connection refused, reset, timed out socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// Outgoing message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// Incoming message could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),

    /// Malformed frame, unknown compression, bad trailers.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Create a remote status error with a code and message.
    pub fn status<S: Into<String>>(code: Code, message: S) -> Self {
        RpcError::Status(Status::new(code, message))
    }

    /// The code callers observe for this error.
    ///
    /// Local failures map onto fixed codes: transport errors are
    /// `Unavailable`; encode, decode, and protocol errors are `Internal`.
    pub fn code(&self) -> Code {
        match self {
            RpcError::Status(status) => status.code(),
            RpcError::Transport(_) => Code::Unavailable,
            RpcError::Encode(_) | RpcError::Decode(_) | RpcError::Protocol(_) => Code::Internal,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            RpcError::Status(status) => status.message(),
            RpcError::Transport(msg)
            | RpcError::Encode(msg)
            | RpcError::Decode(msg)
            | RpcError::Protocol(msg) => Some(msg),
        }
    }

    /// Typed details, present only on remote statuses.
    pub fn details(&self) -> &[ErrorDetail] {
        match self {
            RpcError::Status(status) => status.details(),
            _ => &[],
        }
    }

    /// Metadata that accompanied the error, empty for local failures.
    pub fn metadata(&self) -> Option<&HeaderMap> {
        match self {
            RpcError::Status(status) => Some(status.metadata()),
            _ => None,
        }
    }

    /// The inner status, if this error came from the server.
    pub fn as_status(&self) -> Option<&Status> {
        match self {
            RpcError::Status(status) => Some(status),
            _ => None,
        }
    }

    pub fn canceled() -> Self {
        RpcError::Status(Status::from_code(Code::Canceled))
    }

    pub fn deadline_exceeded() -> Self {
        RpcError::Status(Status::from_code(Code::DeadlineExceeded))
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        RpcError::Status(status)
    }
}
