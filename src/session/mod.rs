//! Session layer: routing attach requests and tracks to engines.
//!
//! The [`Hub`] owns everything: endpoints keyed by peer address, sessions
//! keyed within an endpoint, and one [`crate::pipeline::Builder`] engine per
//! track inside a [`Session`]. Stage identifiers resolve through the shared
//! [`StageRegistry`].

pub mod hub;
pub mod registry;
pub mod session;

pub use hub::Hub;
pub use registry::{StageContext, StageRegistry};
pub use session::Session;
