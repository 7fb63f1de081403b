//! Multi-protocol RPC client engine.
//!
//! One client surface over three interoperable wire protocols — Connect,
//! gRPC, and gRPC-Web — on HTTP/1.1 or HTTP/2. The engine negotiates
//! headers, codec, and compression, frames and envelopes messages, drives a
//! pluggable HTTP transport, and turns response frames and trailers back
//! into typed results or structured errors with typed details.
//!
//! The pieces:
//!
//! - [`ProtocolClient`]: serializes, runs the interceptor chain, dispatches.
//! - [`Interceptor`] / [`InterceptorChain`]: ordered request/response
//!   transforms; the protocol interceptor is always installed last, nearest
//!   the transport.
//! - [`protocol`]: the Connect, gRPC, and gRPC-Web interceptors.
//! - [`BidirectionalStream`] and friends: the stream state machine and
//!   receive pump.
//! - [`Transport`]: the boundary this crate drives but does not implement.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use triwire::{MethodSpec, NetworkProtocol, ProtocolClient, ProtocolClientConfig, StreamKind};
//!
//! let config = ProtocolClientConfig::new(
//!     "https://demo.connectrpc.com",
//!     strategy.clone(),
//!     NetworkProtocol::Connect,
//! );
//! let client = ProtocolClient::new(transport, strategy, config);
//!
//! let method = MethodSpec::new("buf.connect.demo.eliza.v1.ElizaService/Say", StreamKind::Unary);
//! let response = client.unary(&request, headers, &method).await;
//! ```

mod client;
mod config;
mod duplex;
mod http;
mod interceptor;
mod method;
pub mod protocol;
mod result;
pub mod transport;

pub use client::ProtocolClient;
pub use config::{GetConfiguration, InterceptorFactory, NetworkProtocol, ProtocolClientConfig};
pub use duplex::{BidirectionalStream, ClientStream, ServerStream, StreamReceiver, StreamSender};
pub use crate::http::{HttpRequest, HttpResponse, TracingInfo};
pub use interceptor::{
    HeaderInterceptor, Interceptor, InterceptorChain, RequestBodyFunction, RequestFunction,
    ResponseFunction, StreamFunction, StreamResultFunction, UnaryFunction,
};
pub use method::{Idempotency, MethodSpec, StreamKind};
pub use result::{RawStreamResult, ResponseMessage, StreamResult};
pub use transport::Transport;

// Re-exported so callers need only this crate for the common types.
pub use triwire_core::{
    Code, CompressionPool, ErrorDetail, ErrorDetailParser, GzipPool, RequestCompression,
    RpcError, Serialization, SerializationStrategy, Status,
};
