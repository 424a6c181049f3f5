//! Core data types for the reconstruction pipeline.

use bytes::Bytes;

use crate::codec::CodecKind;

/// Identity of the track an engine reconstructs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// Track identifier, unique within its session.
    pub id: String,
    /// Negotiated codec name or MIME type ("opus", "video/VP8", ...).
    pub codec: String,
}

impl TrackInfo {
    pub fn new(id: impl Into<String>, codec: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            codec: codec.into(),
        }
    }
}

/// One reassembled, decodable unit of media handed to attached stages.
///
/// Samples are shared by reference across every stage of a dispatch pass and
/// must not be mutated by consumers.
#[derive(Clone)]
pub struct Sample {
    /// Payload format this sample was reassembled for.
    pub codec: CodecKind,

    /// Emission number assigned by the engine: counts samples emitted since
    /// the engine started, beginning at 0 and wrapping at `u16::MAX`. Gaps
    /// never appear here; it is unrelated to transport sequence numbers.
    pub sequence: u16,

    /// RTP timestamp of the packets the sample was reassembled from.
    pub timestamp: u32,

    /// Reassembled payload bytes.
    pub payload: Bytes,

    /// Identifier of the source track.
    pub track_id: String,
}

impl Sample {
    /// Size of the payload in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("codec", &self.codec)
            .field("sequence", &self.sequence)
            .field("timestamp", &self.timestamp)
            .field("size", &self.size())
            .field("track_id", &self.track_id)
            .finish()
    }
}
