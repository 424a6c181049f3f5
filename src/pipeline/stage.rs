//! Stage capability consumed by the engine's dispatch loop.

use anyhow::Result;
use async_trait::async_trait;

use super::types::Sample;

/// Downstream consumer of reconstructed samples (recorder, transcoder,
/// analyzer, ...).
///
/// Stages attached to one engine are invoked synchronously, in attachment
/// order, once per sample; there is no per-stage concurrency or isolation, so
/// a slow stage delays the whole track. A failed `write` is logged by the
/// engine and does not affect the other stages or the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name used in logs and stats reports.
    fn name(&self) -> &'static str;

    /// Consume one sample. The sample is shared with the other stages of the
    /// same dispatch pass and must not be mutated.
    async fn write(&self, sample: &Sample) -> Result<()>;

    /// Release the stage's resources. Called exactly once, when the owning
    /// engine stops; no `write` follows it.
    async fn close(&self);
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name()).finish()
    }
}
