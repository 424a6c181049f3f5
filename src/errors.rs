//! Error types crossing the crate's public boundaries.
//!
//! Internal faults (a malformed payload, a failing stage write) are logged
//! and counted where they occur; only conditions the caller can act on
//! surface as typed errors.

use thiserror::Error;

/// Failures reported by engine construction and the session layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured reorder lookahead is zero; the reassembly buffer would
    /// never hold a packet back.
    #[error("reorder lookahead must be greater than zero")]
    ZeroLookahead,

    /// The engine has already stopped; no further stages can be attached.
    #[error("engine already stopped")]
    EngineStopped,

    /// No stage factory is registered under this identifier.
    #[error("unknown stage `{0}`")]
    UnknownStage(String),

    /// A stage factory refused to build an instance.
    #[error("stage `{id}` failed to initialize: {reason}")]
    StageInit { id: String, reason: String },
}

/// Outcome of reading from a packet source.
#[derive(Debug, Error)]
pub enum TrackReadError {
    /// The track ended cleanly; the engine drains and stops.
    #[error("end of stream")]
    EndOfStream,

    /// A recoverable fault; the engine logs it and keeps reading.
    #[error("{0}")]
    Transient(String),
}
