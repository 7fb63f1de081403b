//! Interceptors.
//!
//! An interceptor is a bidirectional transform over requests and
//! responses/stream results. The chain holds interceptors in installation
//! order; request functions run in that order, response and stream-result
//! functions run in reverse. The protocol client appends exactly one
//! protocol interceptor after all user interceptors, so the protocol sits
//! nearest the transport: last to shape the outgoing request, first to
//! interpret the incoming response.
//!
//! Interceptor functions are synchronous and must not block on I/O. They
//! never propagate panics or raw errors across the chain: failures become
//! [`RpcError`]s attached to the response or completion.

use bytes::Bytes;
use http::HeaderMap;
use triwire_core::RpcError;

use crate::http::{HttpRequest, HttpResponse};
use crate::result::RawStreamResult;

/// Transform applied to the outgoing request.
pub type RequestFunction =
    Box<dyn FnMut(HttpRequest) -> Result<HttpRequest, RpcError> + Send>;

/// Transform applied to the incoming unary response.
pub type ResponseFunction = Box<dyn FnMut(HttpResponse) -> HttpResponse + Send>;

/// Transform applied to each outgoing stream message (already serialized).
pub type RequestBodyFunction = Box<dyn FnMut(Bytes) -> Result<Bytes, RpcError> + Send>;

/// Transform applied to each incoming stream result.
///
/// `FnMut` on purpose: protocol interceptors carry per-stream state here
/// (the negotiated response pool, whether a completion was produced).
pub type StreamResultFunction =
    Box<dyn FnMut(RawStreamResult) -> RawStreamResult + Send>;

/// Function pair for one unary exchange.
pub struct UnaryFunction {
    pub request: RequestFunction,
    pub response: ResponseFunction,
}

impl UnaryFunction {
    /// A pass-through pair.
    pub fn identity() -> Self {
        Self {
            request: Box::new(Ok),
            response: Box::new(|response| response),
        }
    }
}

/// Function triple for one stream.
pub struct StreamFunction {
    pub request: RequestFunction,
    pub request_body: RequestBodyFunction,
    pub stream_result: StreamResultFunction,
}

impl StreamFunction {
    /// A pass-through triple.
    pub fn identity() -> Self {
        Self {
            request: Box::new(Ok),
            request_body: Box::new(Ok),
            stream_result: Box::new(|result| result),
        }
    }
}

/// A bidirectional transform over calls.
///
/// The factories are invoked once per call; the returned functions live for
/// that call only and may carry per-call state.
pub trait Interceptor: Send + Sync {
    fn unary_function(&self) -> UnaryFunction;

    fn stream_function(&self) -> StreamFunction;
}

/// Ordered composition of interceptors.
///
/// Implements [`Interceptor`] itself, yielding function pairs that run
/// member request functions front to back and member response functions back
/// to front.
pub struct InterceptorChain {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Box<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl Interceptor for InterceptorChain {
    fn unary_function(&self) -> UnaryFunction {
        let mut requests = Vec::with_capacity(self.interceptors.len());
        let mut responses = Vec::with_capacity(self.interceptors.len());
        for interceptor in &self.interceptors {
            let pair = interceptor.unary_function();
            requests.push(pair.request);
            responses.push(pair.response);
        }
        UnaryFunction {
            request: Box::new(move |mut request| {
                for f in requests.iter_mut() {
                    request = f(request)?;
                }
                Ok(request)
            }),
            response: Box::new(move |mut response| {
                for f in responses.iter_mut().rev() {
                    response = f(response);
                }
                response
            }),
        }
    }

    fn stream_function(&self) -> StreamFunction {
        let mut requests = Vec::with_capacity(self.interceptors.len());
        let mut bodies = Vec::with_capacity(self.interceptors.len());
        let mut results = Vec::with_capacity(self.interceptors.len());
        for interceptor in &self.interceptors {
            let triple = interceptor.stream_function();
            requests.push(triple.request);
            bodies.push(triple.request_body);
            results.push(triple.stream_result);
        }
        StreamFunction {
            request: Box::new(move |mut request| {
                for f in requests.iter_mut() {
                    request = f(request)?;
                }
                Ok(request)
            }),
            request_body: Box::new(move |mut body| {
                for f in bodies.iter_mut() {
                    body = f(body)?;
                }
                Ok(body)
            }),
            stream_result: Box::new(move |mut result| {
                for f in results.iter_mut().rev() {
                    result = f(result);
                }
                result
            }),
        }
    }
}

/// An interceptor that sets one header on every outgoing request.
///
/// The smallest useful interceptor, and a template for custom ones.
#[derive(Clone)]
pub struct HeaderInterceptor {
    name: http::header::HeaderName,
    value: http::header::HeaderValue,
}

impl HeaderInterceptor {
    pub fn new(name: http::header::HeaderName, value: http::header::HeaderValue) -> Self {
        Self { name, value }
    }

    pub fn try_new(name: &str, value: &str) -> Result<Self, RpcError> {
        let name = name
            .parse()
            .map_err(|_| RpcError::Protocol(format!("invalid header name: {name}")))?;
        let value = value
            .parse()
            .map_err(|_| RpcError::Protocol(format!("invalid header value: {value}")))?;
        Ok(Self { name, value })
    }

    fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(self.name.clone(), self.value.clone());
    }
}

impl Interceptor for HeaderInterceptor {
    fn unary_function(&self) -> UnaryFunction {
        let this = self.clone();
        UnaryFunction {
            request: Box::new(move |mut request| {
                this.apply(&mut request.headers);
                Ok(request)
            }),
            response: Box::new(|response| response),
        }
    }

    fn stream_function(&self) -> StreamFunction {
        let this = self.clone();
        StreamFunction {
            request: Box::new(move |mut request| {
                this.apply(&mut request.headers);
                Ok(request)
            }),
            request_body: Box::new(Ok),
            stream_result: Box::new(|result| result),
        }
    }
}
