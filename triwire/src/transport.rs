//! The transport boundary.
//!
//! The engine drives an HTTP transport through these traits and never
//! constructs one; hyper-, reqwest-, or test-backed implementations live
//! outside this crate. The contract: one `unary` exchange resolves to a
//! single [`HttpResponse`] (failures inside it, never panics), and
//! `open_stream` yields a byte-oriented duplex whose incoming side is an
//! event sequence.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::mpsc;
use triwire_core::RpcError;

use crate::http::{HttpRequest, HttpResponse};

/// Boxed future alias used across the transport seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An HTTP transport capable of unary exchanges and byte streams.
pub trait Transport: Send + Sync + 'static {
    /// Perform one HTTP exchange. Transport failures are reported inside the
    /// response (`error` set, empty body), so the future always resolves.
    fn unary(&self, request: HttpRequest) -> BoxFuture<'static, HttpResponse>;

    /// Open a bidirectional byte stream for the given request. The request
    /// carries headers only; the body is written through the returned
    /// [`TransportStream`].
    fn open_stream(
        &self,
        request: HttpRequest,
    ) -> BoxFuture<'static, Result<TransportStream, RpcError>>;
}

/// Incoming events on a transport stream, in wire order.
///
/// `Headers` arrives first; `Data` chunks follow with arbitrary boundaries;
/// `Trailers` (HTTP trailers, gRPC) and `Error` are each followed only by
/// the end of the event channel.
#[derive(Debug)]
pub enum TransportEvent {
    Headers { status: u16, headers: HeaderMap },
    Data(Bytes),
    Trailers(HeaderMap),
    Error(RpcError),
}

/// Write half of a transport stream.
pub trait StreamWriter: Send {
    /// Write framed bytes to the request body.
    fn send(&mut self, frame: Bytes) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Half-close the write side (finish the request body).
    fn send_close(&mut self) -> BoxFuture<'_, Result<(), RpcError>>;
}

/// Cancels the underlying HTTP stream. Cloneable so the receive half can
/// abort independently of the writer.
#[derive(Clone)]
pub struct AbortHandle(Arc<dyn Fn() + Send + Sync>);

impl AbortHandle {
    pub fn new<F: Fn() + Send + Sync + 'static>(abort: F) -> Self {
        Self(Arc::new(abort))
    }

    pub fn abort(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// A live byte-oriented stream handed back by [`Transport::open_stream`].
pub struct TransportStream {
    pub writer: Box<dyn StreamWriter>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub abort: AbortHandle,
}
