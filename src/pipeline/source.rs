//! Network receiver boundary.

use async_trait::async_trait;
use rtp::packet::Packet;

use super::types::TrackInfo;
use crate::errors::TrackReadError;

/// Per-track packet feed from the transport layer.
///
/// The transport delivers packets in whatever order they arrived; reordering
/// within the lookahead window is the reassembly buffer's job, not the
/// source's.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Identity and negotiated codec of the track this source reads.
    fn info(&self) -> &TrackInfo;

    /// Next packet in arrival order. Fails with
    /// [`TrackReadError::EndOfStream`] when the track ends; any other failure
    /// is transient and the caller logs and retries.
    async fn read_packet(&self) -> Result<Packet, TrackReadError>;
}
