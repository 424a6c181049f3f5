//! Codec identification and reassembly strategy selection.
//!
//! A track's negotiated codec name is resolved once, at engine construction,
//! into an immutable [`PayloadStrategy`]: the depacketizer for that payload
//! format plus whether its partition-head signal can be trusted for sample
//! boundary detection. Codecs without a head checker degrade to timestamp and
//! marker based boundaries inside the reassembly buffer.

pub mod depacketizer;

pub use depacketizer::CodecDepacketizer;

use bytes::Bytes;
use log::warn;

/// Payload formats with dedicated reassembly support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Opus,
    Vp8,
    Vp9,
    H264,
    /// Anything else; payloads pass through unchanged.
    Unknown,
}

impl CodecKind {
    /// Resolve a codec name, case-insensitively, with or without a MIME
    /// prefix ("opus", "audio/opus", "video/VP8", ...).
    pub fn from_name(name: &str) -> Self {
        let bare = name.rsplit('/').next().unwrap_or(name);
        match bare.to_ascii_lowercase().as_str() {
            "opus" => CodecKind::Opus,
            "vp8" => CodecKind::Vp8,
            "vp9" => CodecKind::Vp9,
            "h264" => CodecKind::H264,
            _ => CodecKind::Unknown,
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecKind::Opus => write!(f, "opus"),
            CodecKind::Vp8 => write!(f, "VP8"),
            CodecKind::Vp9 => write!(f, "VP9"),
            CodecKind::H264 => write!(f, "H264"),
            CodecKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// The reassembly strategy bound to one engine: a depacketizer and, for
/// partition-aware codecs, a trusted head check.
#[derive(Debug)]
pub struct PayloadStrategy {
    kind: CodecKind,
    depacketizer: CodecDepacketizer,
    has_head_checker: bool,
}

impl PayloadStrategy {
    /// Select the strategy for a codec name. Pure: any number of calls with
    /// the same name yield the same selection. Unknown codecs fall back to
    /// passthrough rather than failing, since upstream negotiation already
    /// constrains the codec set; the fallback is logged.
    pub fn for_codec(name: &str) -> Self {
        let kind = CodecKind::from_name(name);
        let (depacketizer, has_head_checker) = match kind {
            CodecKind::Opus => (CodecDepacketizer::opus(), true),
            CodecKind::Vp8 => (CodecDepacketizer::vp8(), true),
            CodecKind::Vp9 => (CodecDepacketizer::vp9(), true),
            CodecKind::H264 => (CodecDepacketizer::h264(), false),
            CodecKind::Unknown => {
                warn!("no depacketizer for codec `{name}`, passing payloads through unchanged");
                (CodecDepacketizer::raw(), false)
            }
        };
        Self {
            kind,
            depacketizer,
            has_head_checker,
        }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Whether partition-head checks are meaningful for this codec.
    pub fn has_head_checker(&self) -> bool {
        self.has_head_checker
    }

    pub(crate) fn depacketize(&mut self, payload: &Bytes) -> anyhow::Result<Bytes> {
        self.depacketizer.depacketize(payload)
    }

    pub(crate) fn is_partition_head(&self, payload: &Bytes) -> bool {
        self.depacketizer.is_partition_head(payload)
    }

    pub(crate) fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool {
        self.depacketizer.is_partition_tail(marker, payload)
    }
}
