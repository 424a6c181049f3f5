//! Format-specific payload extraction.
//!
//! Wraps the per-codec depacketizers from the `rtp` crate behind one enum so
//! an engine can hold whichever its track negotiated without generics in the
//! hot path. `Raw` is the permissive fallback for unknown codecs: payloads
//! pass through untouched.

use anyhow::Result;
use bytes::Bytes;
use rtp::codecs::h264::H264Packet;
use rtp::codecs::opus::OpusPacket;
use rtp::codecs::vp8::Vp8Packet;
use rtp::codecs::vp9::Vp9Packet;
use rtp::packetizer::Depacketizer;

/// One reassembly strategy per supported payload format.
#[derive(Debug)]
pub enum CodecDepacketizer {
    Opus(OpusPacket),
    Vp8(Vp8Packet),
    Vp9(Vp9Packet),
    H264(H264Packet),
    Raw,
}

impl CodecDepacketizer {
    pub fn opus() -> Self {
        Self::Opus(OpusPacket::default())
    }

    pub fn vp8() -> Self {
        Self::Vp8(Vp8Packet::default())
    }

    pub fn vp9() -> Self {
        Self::Vp9(Vp9Packet::default())
    }

    pub fn h264() -> Self {
        Self::H264(H264Packet::default())
    }

    pub fn raw() -> Self {
        Self::Raw
    }

    /// Strip the codec's packetization header from one payload, returning the
    /// media fragment it carried. H.264 FU-A fragments accumulate internally
    /// and yield an empty fragment until the closing packet arrives.
    pub fn depacketize(&mut self, payload: &Bytes) -> Result<Bytes> {
        match self {
            Self::Opus(d) => Ok(d.depacketize(payload)?),
            Self::Vp8(d) => Ok(d.depacketize(payload)?),
            Self::Vp9(d) => Ok(d.depacketize(payload)?),
            Self::H264(d) => Ok(d.depacketize(payload)?),
            Self::Raw => Ok(payload.clone()),
        }
    }

    /// Whether this payload opens a new partition (sample).
    pub fn is_partition_head(&self, payload: &Bytes) -> bool {
        match self {
            Self::Opus(d) => d.is_partition_head(payload),
            Self::Vp8(d) => d.is_partition_head(payload),
            Self::Vp9(d) => d.is_partition_head(payload),
            Self::H264(d) => d.is_partition_head(payload),
            Self::Raw => false,
        }
    }

    /// Whether this payload closes the current partition.
    pub fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool {
        match self {
            Self::Opus(d) => d.is_partition_tail(marker, payload),
            Self::Vp8(d) => d.is_partition_tail(marker, payload),
            Self::Vp9(d) => d.is_partition_tail(marker, payload),
            Self::H264(d) => d.is_partition_tail(marker, payload),
            Self::Raw => marker,
        }
    }
}
