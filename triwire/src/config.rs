//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use triwire_core::{CompressionPool, GzipPool, RequestCompression, SerializationStrategy};

use crate::interceptor::{Interceptor, InterceptorChain};
use crate::method::Idempotency;
use crate::protocol;

/// The wire protocol a client speaks. Exactly one per client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkProtocol {
    Connect,
    Grpc,
    GrpcWeb,
}

/// When Connect unary calls may be dispatched as GET requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GetConfiguration {
    #[default]
    Disabled,
    /// Only methods declared free of side effects.
    IfNoSideEffects,
    /// Every unary method. Useful against servers known to accept it.
    Always,
}

impl GetConfiguration {
    pub fn allows(&self, idempotency: Idempotency) -> bool {
        match self {
            GetConfiguration::Disabled => false,
            GetConfiguration::IfNoSideEffects => idempotency == Idempotency::NoSideEffects,
            GetConfiguration::Always => true,
        }
    }
}

/// Builds one interceptor for a configured client.
pub type InterceptorFactory =
    Arc<dyn Fn(&ProtocolClientConfig) -> Box<dyn Interceptor> + Send + Sync>;

/// Configuration for a [`ProtocolClient`](crate::client::ProtocolClient).
///
/// Built once, then read-only for the life of the client.
#[derive(Clone)]
pub struct ProtocolClientConfig {
    /// Target host, scheme included, e.g. `https://api.example.com`.
    pub host: String,
    pub serialization: Arc<dyn SerializationStrategy>,
    pub protocol: NetworkProtocol,
    /// Compression applied to outgoing messages, if any.
    pub request_compression: Option<RequestCompression>,
    /// Pools advertised for response compression. Defaults to gzip.
    pub compression_pools: Vec<Arc<dyn CompressionPool>>,
    pub get_configuration: GetConfiguration,
    /// Deadline for each call, propagated to the server and enforced
    /// locally.
    pub timeout: Option<Duration>,
    pub interceptors: Vec<InterceptorFactory>,
}

impl ProtocolClientConfig {
    pub fn new(
        host: impl Into<String>,
        serialization: Arc<dyn SerializationStrategy>,
        protocol: NetworkProtocol,
    ) -> Self {
        Self {
            host: host.into(),
            serialization,
            protocol,
            request_compression: None,
            compression_pools: vec![Arc::new(GzipPool::default())],
            get_configuration: GetConfiguration::Disabled,
            timeout: None,
            interceptors: Vec::new(),
        }
    }

    pub fn with_request_compression(mut self, compression: RequestCompression) -> Self {
        self.request_compression = Some(compression);
        self
    }

    pub fn with_compression_pools(mut self, pools: Vec<Arc<dyn CompressionPool>>) -> Self {
        self.compression_pools = pools;
        self
    }

    pub fn with_get_configuration(mut self, get: GetConfiguration) -> Self {
        self.get_configuration = get;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_interceptor(mut self, factory: InterceptorFactory) -> Self {
        self.interceptors.push(factory);
        self
    }

    /// Instantiate the chain for one call: user interceptors in installation
    /// order, then the protocol interceptor, nearest the transport.
    pub(crate) fn interceptor_chain(&self) -> InterceptorChain {
        let mut interceptors: Vec<Box<dyn Interceptor>> = self
            .interceptors
            .iter()
            .map(|factory| factory(self))
            .collect();
        interceptors.push(protocol::interceptor_for(self));
        InterceptorChain::new(interceptors)
    }
}

impl std::fmt::Debug for ProtocolClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClientConfig")
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("encoding", &self.serialization.encoding_name())
            .field("get_configuration", &self.get_configuration)
            .field("timeout", &self.timeout)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
