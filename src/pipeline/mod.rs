//! Packet-to-sample reconstruction pipeline.
//!
//! The pipeline turns a disordered packet feed into an ordered stream of
//! decodable samples: a [`PacketSource`] supplies packets, the
//! [`SampleBuffer`] reorders and reassembles them within a bounded lookahead
//! window, and the [`Builder`] engine drives both loops and fans completed
//! samples out to every attached [`Stage`].

pub mod builder;
pub mod health;
pub mod sample_buffer;
pub mod source;
pub mod stage;
pub mod types;

pub use builder::Builder;
pub use health::PipelineHealth;
pub use sample_buffer::SampleBuffer;
pub use source::PacketSource;
pub use stage::Stage;
pub use types::{Sample, TrackInfo};
