//! A session groups the reconstruction engines of one media session.
//!
//! Tracks and attach requests arrive in either order: an attach naming a
//! track that has not appeared yet is parked as pending and flushed the
//! moment the track's engine is built. When the last engine stops and no
//! pending attaches remain the session is empty and fires its close
//! callback, which the hub uses to drop it from the registry maps.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::registry::{StageContext, StageRegistry};
use crate::config::PipelineConfig;
use crate::errors::Error;
use crate::pipeline::{Builder, PacketSource};

/// Attach request waiting for its track to appear.
struct PendingAttach {
    pipeline_id: String,
    stage_id: String,
    config: Bytes,
}

struct SessionState {
    engines: HashMap<String, Arc<Builder>>,
    pending: HashMap<String, Vec<PendingAttach>>,
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

/// One media session: a set of per-track engines plus attach requests that
/// arrived ahead of their track.
pub struct Session {
    id: String,
    registry: Arc<StageRegistry>,
    config: PipelineConfig,
    state: Mutex<SessionState>,
    self_ref: Weak<Session>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        registry: Arc<StageRegistry>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: id.into(),
            registry,
            config,
            state: Mutex::new(SessionState {
                engines: HashMap::new(),
                pending: HashMap::new(),
                on_close: None,
            }),
            self_ref: self_ref.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register the callback fired once, when the session becomes empty.
    /// A later registration replaces an earlier one.
    pub async fn on_close(&self, callback: impl FnOnce() + Send + Sync + 'static) {
        self.state.lock().await.on_close = Some(Box::new(callback));
    }

    /// Build and start an engine for a new track, then flush any attach
    /// requests that were waiting for it.
    pub async fn add_track(&self, source: Arc<dyn PacketSource>) -> Result<(), Error> {
        let engine = Builder::new(source, &self.config)?;
        let track_id = engine.track().id.clone();
        info!(
            "session {}: track {} added ({})",
            self.id,
            track_id,
            engine.track().codec,
        );

        // when the engine stops, for any reason, drop it from the session
        let session = self.self_ref.clone();
        let stopped_engine = Arc::downgrade(&engine);
        let stopped_track = track_id.clone();
        engine
            .on_stop(move || {
                if let Some(session) = session.upgrade() {
                    tokio::spawn(async move {
                        session.finish_track(&stopped_track, stopped_engine).await;
                    });
                }
            })
            .await;

        let mut state = self.state.lock().await;
        if let Some(waiting) = state.pending.remove(&track_id) {
            for attach in waiting {
                if let Err(e) = self.wire_stage(&engine, &track_id, &attach).await {
                    warn!(
                        "session {}: pending stage {} for track {} failed: {e}",
                        self.id, attach.stage_id, track_id,
                    );
                }
            }
        }
        if let Some(previous) = state.engines.insert(track_id.clone(), engine.clone()) {
            warn!("session {}: track {} replaced a live engine", self.id, track_id);
            tokio::spawn(async move { previous.stop().await });
        }
        drop(state);

        // a very short track can stop before its stop hook lands in the map
        if engine.is_stopped().await {
            self.finish_track(&track_id, Arc::downgrade(&engine)).await;
        }
        Ok(())
    }

    /// Attach a stage to a track, or park the request until the track shows
    /// up. The stage identifier is validated against the registry either way.
    pub async fn attach_stage(
        &self,
        pipeline_id: &str,
        track_id: &str,
        stage_id: &str,
        config: Bytes,
    ) -> Result<(), Error> {
        if !self.registry.contains(stage_id) {
            return Err(Error::UnknownStage(stage_id.to_string()));
        }

        let attach = PendingAttach {
            pipeline_id: pipeline_id.to_string(),
            stage_id: stage_id.to_string(),
            config,
        };

        let mut state = self.state.lock().await;
        if let Some(engine) = state.engines.get(track_id) {
            let engine = engine.clone();
            self.wire_stage(&engine, track_id, &attach).await
        } else {
            debug!(
                "session {}: stage {} pending for track {}",
                self.id, attach.stage_id, track_id,
            );
            state
                .pending
                .entry(track_id.to_string())
                .or_default()
                .push(attach);
            Ok(())
        }
    }

    async fn wire_stage(
        &self,
        engine: &Arc<Builder>,
        track_id: &str,
        attach: &PendingAttach,
    ) -> Result<(), Error> {
        let stage = self.registry.create(
            &attach.stage_id,
            StageContext {
                pipeline_id: attach.pipeline_id.clone(),
                session_id: self.id.clone(),
                track_id: track_id.to_string(),
                config: attach.config.clone(),
            },
        )?;
        engine.attach_stage(stage).await
    }

    /// Drop a stopped engine's bookkeeping; fires the close callback when it
    /// was the last one. The weak reference guards against removing a newer
    /// engine that reused the track id.
    async fn finish_track(&self, track_id: &str, stopped: Weak<Builder>) {
        let mut state = self.state.lock().await;
        let is_current = state
            .engines
            .get(track_id)
            .zip(stopped.upgrade())
            .is_some_and(|(current, stopped)| Arc::ptr_eq(current, &stopped));
        if !is_current {
            return;
        }
        state.engines.remove(track_id);
        state.pending.remove(track_id);
        info!("session {}: track {} removed", self.id, track_id);

        if state.engines.is_empty() && state.pending.is_empty() {
            let callback = state.on_close.take();
            drop(state);
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Stop every engine and discard pending attaches. The close callback
    /// fires once the last engine has been torn down.
    pub async fn close(&self) {
        let engines: Vec<Arc<Builder>> = {
            let mut state = self.state.lock().await;
            state.pending.clear();
            if state.engines.is_empty() {
                if let Some(callback) = state.on_close.take() {
                    drop(state);
                    callback();
                }
                return;
            }
            state.engines.values().cloned().collect()
        };
        for engine in engines {
            engine.stop().await;
        }
    }

    /// Engine for a track, if the track is live.
    pub async fn engine(&self, track_id: &str) -> Option<Arc<Builder>> {
        self.state.lock().await.engines.get(track_id).cloned()
    }

    pub async fn track_count(&self) -> usize {
        self.state.lock().await.engines.len()
    }

    /// One stats line per live engine.
    pub async fn describe(&self) -> Vec<String> {
        let engines: Vec<Arc<Builder>> =
            self.state.lock().await.engines.values().cloned().collect();
        let mut lines = Vec::with_capacity(engines.len());
        for engine in engines {
            lines.push(format!("session {}: {}", self.id, engine.describe().await));
        }
        lines
    }
}
