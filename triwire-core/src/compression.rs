//! Compression pools.
//!
//! A pool is a named, symmetric compressor applied to message payloads
//! (per-envelope for streaming, whole-body for Connect unary). Pools a client
//! is configured with are advertised in the accept-encoding headers of each
//! protocol; the response encoding chosen by the server selects the pool used
//! for decompression.

use std::io;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::Compression as GzipLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::RpcError;

/// A named compressor with symmetric encode/decode over byte buffers.
///
/// Implementations must be stateless; a single pool instance is shared by
/// every call the client issues.
pub trait CompressionPool: std::fmt::Debug + Send + Sync + 'static {
    /// The encoding name used in HTTP headers (e.g. `gzip`).
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// Gzip pool backed by flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipPool {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

impl Default for GzipPool {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl GzipPool {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl CompressionPool for GzipPool {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(Bytes::from(decompressed))
    }
}

/// Compression applied to outgoing request messages.
#[derive(Clone)]
pub struct RequestCompression {
    /// Messages shorter than this are sent uncompressed.
    pub min_bytes: usize,
    pub pool: Arc<dyn CompressionPool>,
}

impl RequestCompression {
    pub fn new(min_bytes: usize, pool: Arc<dyn CompressionPool>) -> Self {
        Self { min_bytes, pool }
    }

    /// Whether a payload of `len` bytes should be compressed.
    pub fn applies_to(&self, len: usize) -> bool {
        len >= self.min_bytes
    }
}

impl std::fmt::Debug for RequestCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCompression")
            .field("min_bytes", &self.min_bytes)
            .field("pool", &self.pool.name())
            .finish()
    }
}

/// Find the pool matching an encoding name.
///
/// Encoding tokens are matched case-insensitively.
pub fn pool_named<'a>(
    pools: &'a [Arc<dyn CompressionPool>],
    name: &str,
) -> Option<&'a Arc<dyn CompressionPool>> {
    pools.iter().find(|p| p.name().eq_ignore_ascii_case(name))
}

/// Comma-joined pool names for accept-encoding headers.
///
/// Returns `None` when no pools are configured.
pub fn acceptable_encodings(pools: &[Arc<dyn CompressionPool>]) -> Option<String> {
    if pools.is_empty() {
        return None;
    }
    Some(
        pools
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Resolve the pool for a server-chosen response encoding.
///
/// `None`, the empty string, and `identity` all mean no compression. Any
/// other name must match a configured pool; unknown encodings are a protocol
/// error.
pub fn response_pool(
    encoding: Option<&str>,
    pools: &[Arc<dyn CompressionPool>],
) -> Result<Option<Arc<dyn CompressionPool>>, RpcError> {
    match encoding {
        None | Some("") | Some("identity") => Ok(None),
        Some(name) => pool_named(pools, name).cloned().map(Some).ok_or_else(|| {
            RpcError::Protocol(format!("unknown compression \"{name}\""))
        }),
    }
}
