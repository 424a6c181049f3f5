//! Stage factory registry.
//!
//! Applications register stage constructors under string identifiers before
//! wiring sessions; attach requests then name a stage by identifier and the
//! registry builds a fresh instance per track.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::errors::Error;
use crate::pipeline::Stage;

/// Context handed to a stage factory for one attachment.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Caller-chosen pipeline identifier grouping related attachments.
    pub pipeline_id: String,
    /// Session the track belongs to.
    pub session_id: String,
    /// Track the new stage instance will consume.
    pub track_id: String,
    /// Opaque stage configuration passed through from the attach call.
    pub config: Bytes,
}

type StageFactory = Box<dyn Fn(StageContext) -> anyhow::Result<Arc<dyn Stage>> + Send + Sync>;

/// Maps stage identifiers to constructors. Populated once at startup and
/// shared read-only across sessions.
#[derive(Default)]
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `id`, replacing any previous registration.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        factory: impl Fn(StageContext) -> anyhow::Result<Arc<dyn Stage>> + Send + Sync + 'static,
    ) {
        self.factories.insert(id.into(), Box::new(factory));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Build a stage instance for one attachment.
    pub fn create(&self, id: &str, context: StageContext) -> Result<Arc<dyn Stage>, Error> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| Error::UnknownStage(id.to_string()))?;
        factory(context).map_err(|e| Error::StageInit {
            id: id.to_string(),
            reason: format!("{e:#}"),
        })
    }
}
