//! Remote-procedure capability seam.
//!
//! The engine never scans the host environment itself. Discovery policy
//! lives behind [`CandidateProvider`]: an injected, ordered list of
//! candidate handles, each validated through the one uniform contract in
//! [`RemoteHandle`]. The only semantic the engine depends on is "read
//! `limit` bytes of the object at `location` starting at `offset`".

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Remote read location for one media object, derived from its descriptor.
#[derive(Debug, Clone)]
pub struct ChunkLocation {
    pub id: i64,
    pub access_token: i64,
    /// Opaque reference token issued by the remote side.
    pub file_reference: Vec<u8>,
}

/// A callable remote-procedure handle capable of chunked reads.
#[async_trait]
pub trait RemoteHandle: Send + Sync {
    /// Lightweight no-op call used by the probe to validate the handle.
    async fn ping(&self) -> Result<()>;

    /// Read up to `limit` bytes starting at `offset`.
    ///
    /// Short reads are allowed; the caller advances by the bytes actually
    /// returned. An empty payload is treated as a transient failure.
    async fn read_chunk(&self, location: &ChunkLocation, offset: u64, limit: u32) -> Result<Bytes>;
}

/// Ordered discovery of candidate handles.
///
/// Ordering is the provider's contract: put fast-path candidates first.
/// The probe tries them strictly in order and keeps the first that responds.
pub trait CandidateProvider: Send + Sync {
    fn candidates(&self) -> Vec<Arc<dyn RemoteHandle>>;
}
