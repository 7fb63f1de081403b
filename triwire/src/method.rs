//! Method descriptors.

use std::marker::PhantomData;

/// How many messages flow in each direction for a method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

/// Declared idempotency of a method.
///
/// Methods without side effects may be dispatched as cacheable GET requests
/// under the Connect protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Idempotency {
    #[default]
    Unknown,
    NoSideEffects,
}

/// Identity of one RPC method: its `package.Service/Method` path, its stream
/// kind, and the request/response types it is bound to. Immutable; generated
/// stubs construct one per method.
#[derive(Debug)]
pub struct MethodSpec<Req, Res> {
    path: String,
    stream_kind: StreamKind,
    idempotency: Idempotency,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> MethodSpec<Req, Res> {
    /// Create a spec for a method path such as `ping.v1.PingService/Ping`.
    ///
    /// The path carries no leading slash; the client joins it to the host.
    pub fn new<S: Into<String>>(path: S, stream_kind: StreamKind) -> Self {
        Self {
            path: path.into(),
            stream_kind,
            idempotency: Idempotency::Unknown,
            _marker: PhantomData,
        }
    }

    pub fn with_idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stream_kind(&self) -> StreamKind {
        self.stream_kind
    }

    pub fn idempotency(&self) -> Idempotency {
        self.idempotency
    }
}

impl<Req, Res> Clone for MethodSpec<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            stream_kind: self.stream_kind,
            idempotency: self.idempotency,
            _marker: PhantomData,
        }
    }
}
