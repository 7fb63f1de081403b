//! Serialization seams.
//!
//! The engine never depends on a concrete message runtime. A
//! [`SerializationStrategy`] names the encoding and supplies the error-detail
//! parser; [`Serialization<T>`] binds the strategy to a message type. A
//! protobuf-full, protobuf-lite, or JSON strategy each implement these
//! outside this workspace.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{ErrorDetail, RpcError};

/// Encoding identity plus the pieces of serialization that are not tied to a
/// message type. Object-safe so protocol interceptors can hold it.
pub trait SerializationStrategy: Send + Sync + 'static {
    /// The encoding token used in content types, e.g. `proto` or `json`
    /// (`application/grpc+proto`, `application/connect+json`).
    fn encoding_name(&self) -> &'static str;

    /// Parser for binary error-detail payloads (`google.rpc.Status`).
    fn error_detail_parser(&self) -> Arc<dyn ErrorDetailParser>;
}

/// Serialization of one message type under a strategy.
pub trait Serialization<T>: SerializationStrategy {
    fn serialize(&self, message: &T) -> Result<Bytes, RpcError>;

    /// Byte-stable serialization, required for GET request URLs.
    ///
    /// Defaults to [`serialize`](Serialization::serialize); strategies whose
    /// plain output is not deterministic must override.
    fn deterministic_serialize(&self, message: &T) -> Result<Bytes, RpcError> {
        self.serialize(message)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, RpcError>;
}

/// Parses and produces the binary error-detail payloads carried in
/// `grpc-status-details-bin` trailers.
///
/// The payload is an encoded `google.rpc.Status`; decoding it requires a
/// message runtime, which is why this sits behind a trait.
pub trait ErrorDetailParser: Send + Sync + 'static {
    /// Extract the details list from an encoded `google.rpc.Status`.
    ///
    /// Unparsable payloads yield an empty list; a bad detail never masks the
    /// status it rode in on.
    fn parse_details(&self, bytes: &[u8]) -> Vec<ErrorDetail>;

    /// Encode details back into a `google.rpc.Status` payload.
    fn serialize_details(&self, details: &[ErrorDetail]) -> Bytes;
}

impl ErrorDetail {
    /// Decode the detail payload as a message of type `T`.
    pub fn unpack<T, S>(&self, strategy: &S) -> Result<T, RpcError>
    where
        S: Serialization<T> + ?Sized,
    {
        strategy.deserialize(self.value())
    }
}
