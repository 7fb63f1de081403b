//! The protocol client.
//!
//! Ties everything together: serializes with the configured strategy, runs
//! the interceptor chain, drives the transport, and hands back typed results.
//! Generated service stubs hold one of these plus a [`MethodSpec`] per
//! method.

use std::sync::Arc;

use http::HeaderMap;
use tracing::{info_span, Instrument};
use triwire_core::{RpcError, Serialization, SerializationStrategy};

use crate::config::ProtocolClientConfig;
use crate::duplex::{BidirectionalStream, ClientStream, ServerStream};
use crate::http::{HttpRequest, HttpResponse};
use crate::interceptor::{Interceptor, StreamFunction};
use crate::method::{MethodSpec, StreamKind};
use crate::result::ResponseMessage;
use crate::transport::Transport;

/// A client for one host speaking one protocol with one serialization
/// strategy. Cheap to clone.
pub struct ProtocolClient<S> {
    transport: Arc<dyn Transport>,
    config: ProtocolClientConfig,
    strategy: Arc<S>,
}

impl<S> Clone for ProtocolClient<S> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            strategy: self.strategy.clone(),
        }
    }
}

impl<S: SerializationStrategy> ProtocolClient<S> {
    /// Create a client.
    ///
    /// `strategy` doubles as the config's serialization strategy; the config
    /// field is overwritten so the two can never disagree.
    pub fn new(
        transport: Arc<dyn Transport>,
        strategy: Arc<S>,
        mut config: ProtocolClientConfig,
    ) -> Self {
        config.serialization = strategy.clone();
        Self {
            transport,
            config,
            strategy,
        }
    }

    pub fn config(&self) -> &ProtocolClientConfig {
        &self.config
    }

    /// Join the configured host and a method path. A trailing slash on the
    /// host is tolerated and never doubled.
    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), path)
    }

    /// Issue a unary call.
    pub async fn unary<Req, Res>(
        &self,
        message: &Req,
        headers: HeaderMap,
        method: &MethodSpec<Req, Res>,
    ) -> ResponseMessage<Res>
    where
        S: Serialization<Req> + Serialization<Res>,
    {
        let span = info_span!(
            "rpc.call",
            rpc.method = %method.path(),
            rpc.kind = "unary",
            otel.kind = "client",
        );
        self.unary_inner(message, headers, method).instrument(span).await
    }

    async fn unary_inner<Req, Res>(
        &self,
        message: &Req,
        headers: HeaderMap,
        method: &MethodSpec<Req, Res>,
    ) -> ResponseMessage<Res>
    where
        S: Serialization<Req> + Serialization<Res>,
    {
        // GET dispatch needs byte-stable output; the interceptor decides the
        // verb, but the bytes must already be deterministic.
        let eligible_for_get = method.stream_kind() == StreamKind::Unary
            && self.config.get_configuration.allows(method.idempotency());
        let serialized = if eligible_for_get {
            self.strategy.deterministic_serialize(message)
        } else {
            self.strategy.serialize(message)
        };
        let body = match serialized {
            Ok(body) => body,
            Err(error) => return failure(error),
        };

        let request = HttpRequest::new(
            self.url_for(method.path()),
            headers,
            Some(body),
            method.path().to_string(),
            method.stream_kind(),
            method.idempotency(),
        );

        let mut functions = self.config.interceptor_chain().unary_function();
        let request = match (functions.request)(request) {
            Ok(request) => request,
            Err(error) => return failure(error),
        };

        let exchange = self.transport.unary(request);
        let response = match self.config.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(response) => response,
                Err(_) => HttpResponse::from_error(RpcError::deadline_exceeded()),
            },
            None => exchange.await,
        };

        let response = (functions.response)(response);
        match response.error {
            Some(error) => ResponseMessage::Failure {
                error,
                headers: response.headers,
                trailers: response.trailers,
            },
            None => match self.strategy.deserialize(&response.message) {
                Ok(message) => ResponseMessage::Success {
                    message,
                    headers: response.headers,
                    trailers: response.trailers,
                },
                Err(error) => ResponseMessage::Failure {
                    error,
                    headers: response.headers,
                    trailers: response.trailers,
                },
            },
        }
    }

    /// Open a bidirectional stream.
    pub async fn stream<Req, Res>(
        &self,
        headers: HeaderMap,
        method: &MethodSpec<Req, Res>,
    ) -> Result<BidirectionalStream<Req, Res>, RpcError>
    where
        S: Serialization<Req> + Serialization<Res>,
        Res: Send + 'static,
    {
        let span = info_span!(
            "rpc.call",
            rpc.method = %method.path(),
            rpc.kind = "stream",
            otel.kind = "client",
        );
        self.stream_inner(headers, method).instrument(span).await
    }

    async fn stream_inner<Req, Res>(
        &self,
        headers: HeaderMap,
        method: &MethodSpec<Req, Res>,
    ) -> Result<BidirectionalStream<Req, Res>, RpcError>
    where
        S: Serialization<Req> + Serialization<Res>,
        Res: Send + 'static,
    {
        let request = HttpRequest::new(
            self.url_for(method.path()),
            headers,
            None,
            method.path().to_string(),
            method.stream_kind(),
            method.idempotency(),
        );

        let StreamFunction {
            request: mut request_function,
            request_body,
            stream_result,
        } = self.config.interceptor_chain().stream_function();
        let request = request_function(request)?;

        let transport_stream = self.transport.open_stream(request).await?;

        let encoder = self.strategy.clone();
        let decoder = self.strategy.clone();
        Ok(BidirectionalStream::spawn(
            transport_stream,
            request_body,
            stream_result,
            Arc::new(move |message: &Req| encoder.serialize(message)),
            Arc::new(move |bytes: &[u8]| decoder.deserialize(bytes)),
            self.config.timeout,
        ))
    }

    /// Issue a server-streaming call: one request message, many responses.
    pub async fn server_stream<Req, Res>(
        &self,
        message: &Req,
        headers: HeaderMap,
        method: &MethodSpec<Req, Res>,
    ) -> Result<ServerStream<Res>, RpcError>
    where
        S: Serialization<Req> + Serialization<Res>,
        Res: Send + 'static,
    {
        let mut stream = self.stream(headers, method).await?;
        stream.send(message).await?;
        stream.send_close().await?;
        let (_sender, receiver) = stream.split();
        Ok(ServerStream::new(receiver))
    }

    /// Open a client-streaming call: many request messages, one response.
    pub async fn client_stream<Req, Res>(
        &self,
        headers: HeaderMap,
        method: &MethodSpec<Req, Res>,
    ) -> Result<ClientStream<Req, Res>, RpcError>
    where
        S: Serialization<Req> + Serialization<Res>,
        Res: Send + 'static,
    {
        Ok(ClientStream::new(self.stream(headers, method).await?))
    }
}

fn failure<Res>(error: RpcError) -> ResponseMessage<Res> {
    ResponseMessage::Failure {
        error,
        headers: HeaderMap::new(),
        trailers: HeaderMap::new(),
    }
}
