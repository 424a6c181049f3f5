//! Packet-to-sample media reconstruction.
//!
//! `sampleflow` turns per-track RTP packet feeds into ordered streams of
//! decodable samples and fans them out to pluggable processing stages:
//!
//! - [`codec`] resolves a track's codec into a reassembly strategy;
//! - [`pipeline`] holds the reorder buffer and the per-track engine driving
//!   ingest and dispatch over a bounded queue;
//! - [`session`] routes attach requests and tracks through a hub of
//!   endpoints and sessions, one engine per track.
//!
//! A minimal setup registers stage factories, builds a hub, and feeds it
//! tracks and attach requests:
//!
//! ```no_run
//! use std::sync::Arc;
//! use sampleflow::config::PipelineConfig;
//! use sampleflow::session::{Hub, StageRegistry};
//!
//! # fn stage_factory(_ctx: sampleflow::session::StageContext)
//! #     -> anyhow::Result<Arc<dyn sampleflow::pipeline::Stage>> { unimplemented!() }
//! let mut registry = StageRegistry::new();
//! registry.register("recorder", stage_factory);
//! let hub = Hub::new(Arc::new(registry), PipelineConfig::default());
//! ```

pub mod codec;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod session;

pub use codec::{CodecKind, PayloadStrategy};
pub use config::{Config, PipelineConfig};
pub use errors::{Error, TrackReadError};
pub use pipeline::{Builder, PacketSource, PipelineHealth, Sample, SampleBuffer, Stage, TrackInfo};
pub use session::{Hub, Session, StageContext, StageRegistry};
