//! Core protocol types for triwire.
//!
//! This crate holds the protocol-neutral leaves shared by the engine crate
//! (`triwire`): status codes, error types, the envelope framer, compression
//! pools, header utilities, and the serialization seams.
//!
//! ## Modules
//!
//! - [`code`]: RPC status codes
//! - [`error`]: Error and status types with typed details
//! - [`envelope`]: Enveloped message framing
//! - [`compression`]: Compression pool trait and gzip pool
//! - [`headers`]: Header map utilities
//! - [`serialization`]: Codec and error-detail parser traits

mod code;
mod compression;
mod envelope;
mod error;
pub mod headers;
mod serialization;

pub use code::Code;
pub use compression::{
    acceptable_encodings, pool_named, response_pool, CompressionPool, GzipPool,
    RequestCompression,
};
pub use envelope::{
    is_compressed, is_end_stream, pack, split_frame, unpack_with_header_byte,
    ENVELOPE_HEADER_LEN, FLAG_COMPRESSED, FLAG_END_STREAM,
};
pub use error::{ErrorDetail, RpcError, Status};
pub use serialization::{ErrorDetailParser, Serialization, SerializationStrategy};
