//! Per-track reconstruction engine.
//!
//! One [`Builder`] owns a reassembly buffer and the strategy selected for its
//! track's codec, and runs two concurrent loops over a bounded sample queue:
//!
//! ```text
//! receiver → ingest → SampleBuffer → queue → dispatch → N stages
//! ```
//!
//! Ingest reads packets, feeds the buffer and drains completed samples into
//! the queue, stamping each with the engine's own emission counter. Dispatch
//! drains the queue and fans every sample out to the attached stages in
//! attachment order. If dispatch cannot keep up the queue fills and ingest
//! blocks, which in turn stalls the receiver: backpressure by design.
//!
//! Teardown is idempotent and converges from every trigger (end of stream,
//! external stop, registry close): the stop flag flips once under the state
//! lock, every attached stage is closed exactly once, the stop callback fires
//! once, and both loops observe the cancellation token promptly.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::health::PipelineHealth;
use super::sample_buffer::SampleBuffer;
use super::source::PacketSource;
use super::stage::Stage;
use super::types::{Sample, TrackInfo};
use crate::codec::PayloadStrategy;
use crate::config::PipelineConfig;
use crate::errors::{Error, TrackReadError};

/// State shared between the two loops and external callers, guarded by one
/// lock. `stopped` is monotonic: once true it never reverts.
struct EngineState {
    stopped: bool,
    stages: Vec<Arc<dyn Stage>>,
    on_stop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

/// Reconstruction engine for one track.
pub struct Builder {
    info: TrackInfo,
    state: Arc<RwLock<EngineState>>,
    health: Arc<PipelineHealth>,
    shutdown: CancellationToken,
}

impl Builder {
    /// Create the engine for a track and start its ingest and dispatch loops.
    ///
    /// Fails only on invalid configuration; everything after construction is
    /// contained and logged.
    pub fn new(
        source: Arc<dyn PacketSource>,
        config: &PipelineConfig,
    ) -> Result<Arc<Self>, Error> {
        if config.max_late == 0 {
            return Err(Error::ZeroLookahead);
        }

        let info = source.info().clone();
        let strategy = PayloadStrategy::for_codec(&info.codec);
        let codec = strategy.kind();
        let health = Arc::new(PipelineHealth::new());
        let buffer = SampleBuffer::new(strategy, config.max_late, health.clone());
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let builder = Arc::new(Self {
            info,
            state: Arc::new(RwLock::new(EngineState {
                stopped: false,
                stages: Vec::new(),
                on_stop: None,
            })),
            health,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(ingest_loop(builder.clone(), source, buffer, tx, codec));
        tokio::spawn(dispatch_loop(builder.clone(), rx));

        Ok(builder)
    }

    /// Track this engine reconstructs.
    pub fn track(&self) -> &TrackInfo {
        &self.info
    }

    /// Health counters for this engine.
    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    /// Add a stage to the fan-out set. Safe to call while dispatch is
    /// running; the stage receives only samples emitted after attachment.
    pub async fn attach_stage(&self, stage: Arc<dyn Stage>) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if state.stopped {
            return Err(Error::EngineStopped);
        }
        debug!("track {}: attached stage {}", self.info.id, stage.name());
        state.stages.push(stage);
        Ok(())
    }

    /// Register the callback fired once, after all stages are closed, when
    /// the engine stops. A later registration replaces an earlier one; if the
    /// engine already stopped the callback fires right away.
    pub async fn on_stop(&self, callback: impl FnOnce() + Send + Sync + 'static) {
        let mut state = self.state.write().await;
        if state.stopped {
            drop(state);
            callback();
            return;
        }
        state.on_stop = Some(Box::new(callback));
    }

    /// Whether the engine has stopped.
    pub async fn is_stopped(&self) -> bool {
        self.state.read().await.stopped
    }

    /// Stop the engine: close every attached stage in attachment order, fire
    /// the stop callback, and release both loops. Idempotent; every trigger
    /// path (end of stream, read fault promotion, external call) converges
    /// here.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if state.stopped {
            return;
        }
        state.stopped = true;
        info!("track {}: stopping engine", self.info.id);
        for stage in &state.stages {
            stage.close().await;
        }
        if let Some(callback) = state.on_stop.take() {
            callback();
        }
        self.shutdown.cancel();
    }

    /// One-line stats report for this engine.
    pub async fn describe(&self) -> String {
        let state = self.state.read().await;
        let stages: Vec<&str> = state.stages.iter().map(|s| s.name()).collect();
        format!(
            "track {} [{}] stages=[{}] {}",
            self.info.id,
            self.info.codec,
            stages.join(", "),
            self.health.summary(),
        )
    }
}

/// Reads packets until the track ends or the engine stops; completed samples
/// go to the dispatch queue. Dropping `tx` on a clean end of stream closes
/// the queue, letting dispatch drain everything already emitted before the
/// stages are closed.
async fn ingest_loop(
    builder: Arc<Builder>,
    source: Arc<dyn PacketSource>,
    mut buffer: SampleBuffer,
    tx: mpsc::Sender<Sample>,
    codec: crate::codec::CodecKind,
) {
    debug!("track {}: ingest loop started", builder.info.id);
    let mut sequence: u16 = 0;

    loop {
        let packet = tokio::select! {
            result = source.read_packet() => match result {
                Ok(packet) => packet,
                Err(TrackReadError::EndOfStream) => {
                    info!("track {}: end of stream", builder.info.id);
                    break;
                }
                Err(e) => {
                    builder.health.record_read_error();
                    warn!("track {}: read failed: {e}", builder.info.id);
                    continue;
                }
            },
            _ = builder.shutdown.cancelled() => return,
        };

        buffer.push(packet);

        while let Some((payload, timestamp)) = buffer.pop() {
            let sample = Sample {
                codec,
                sequence,
                timestamp,
                payload,
                track_id: builder.info.id.clone(),
            };
            sequence = sequence.wrapping_add(1);
            builder.health.record_emitted();

            match tx.try_send(sample) {
                Ok(()) => {}
                Err(TrySendError::Full(sample)) => {
                    // dispatch is behind; wait here and let the receiver stall
                    builder.health.record_backpressure();
                    tokio::select! {
                        result = tx.send(sample) => {
                            if result.is_err() {
                                return;
                            }
                        }
                        _ = builder.shutdown.cancelled() => return,
                    }
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}

/// Drains the sample queue and fans each sample out to the attached stages.
/// Runs until the queue closes (drained in full) or the engine stops; the
/// clean-shutdown path goes through `stop` from here so that every emitted
/// sample is delivered before stages close.
async fn dispatch_loop(builder: Arc<Builder>, mut rx: mpsc::Receiver<Sample>) {
    debug!("track {}: dispatch loop started", builder.info.id);

    loop {
        let sample = tokio::select! {
            next = rx.recv() => match next {
                Some(sample) => sample,
                None => break, // queue closed and fully drained
            },
            _ = builder.shutdown.cancelled() => break,
        };

        // holding the read guard across the writes keeps close() out until
        // the pass completes: no stage ever sees a write after its close
        let state = builder.state.read().await;
        if state.stopped {
            break;
        }
        for stage in &state.stages {
            if let Err(e) = stage.write(&sample).await {
                builder.health.record_write_failure();
                error!(
                    "track {}: stage {} failed to write sample {}: {e:#}",
                    builder.info.id,
                    stage.name(),
                    sample.sequence,
                );
            }
        }
        builder.health.record_delivered(sample.size());
    }

    builder.stop().await;
    debug!("track {}: dispatch loop ended", builder.info.id);
}
