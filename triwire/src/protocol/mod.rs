//! Protocol interceptors.
//!
//! One of these is appended to the interceptor chain per client, chosen by
//! [`NetworkProtocol`]. Each one owns the wire-level shape of its protocol:
//! content types, compression signalling, framing, and how errors and
//! trailers are represented.

mod completion;
mod connect;
mod grpc;
mod grpc_web;

pub use connect::ConnectInterceptor;
pub use grpc::GrpcInterceptor;
pub use grpc_web::GrpcWebInterceptor;

use std::time::Duration;

use http::header::{HeaderValue, USER_AGENT};
use http::HeaderMap;
use triwire_core::RpcError;

use crate::config::{NetworkProtocol, ProtocolClientConfig};
use crate::interceptor::Interceptor;

/// User agent sent when the caller supplied none.
pub(crate) const DEFAULT_USER_AGENT: &str = concat!("triwire/", env!("CARGO_PKG_VERSION"));

/// Construct the protocol interceptor for a configured client.
pub(crate) fn interceptor_for(config: &ProtocolClientConfig) -> Box<dyn Interceptor> {
    match config.protocol {
        NetworkProtocol::Connect => Box::new(ConnectInterceptor::new(config)),
        NetworkProtocol::Grpc => Box::new(GrpcInterceptor::new(config)),
        NetworkProtocol::GrpcWeb => Box::new(GrpcWebInterceptor::new(config)),
    }
}

/// Set the library user agent unless the caller provided one.
///
/// The lookup is case-insensitive, so a caller-set `User-Agent` under any
/// casing suppresses the default.
pub(crate) fn ensure_user_agent(headers: &mut HeaderMap) {
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, RpcError> {
    HeaderValue::from_str(value)
        .map_err(|_| RpcError::Protocol(format!("invalid header value: {value:?}")))
}

/// `Connect-Timeout-Ms` value: milliseconds, at most ten digits.
pub(crate) fn connect_timeout_value(timeout: Duration) -> Option<String> {
    let millis = timeout.as_millis();
    if millis == 0 || millis > 9_999_999_999 {
        return None;
    }
    Some(millis.to_string())
}

/// `Grpc-Timeout` value: an eight-digit count plus a unit, smallest unit
/// that fits.
pub(crate) fn grpc_timeout_value(timeout: Duration) -> Option<String> {
    const MAX: u128 = 99_999_999;
    let millis = timeout.as_millis();
    if millis == 0 {
        return None;
    }
    if millis <= MAX {
        return Some(format!("{millis}m"));
    }
    let seconds = millis / 1000;
    if seconds <= MAX {
        return Some(format!("{seconds}S"));
    }
    let minutes = seconds / 60;
    if minutes <= MAX {
        return Some(format!("{minutes}M"));
    }
    let hours = minutes / 60;
    (hours <= MAX).then(|| format!("{hours}H"))
}
