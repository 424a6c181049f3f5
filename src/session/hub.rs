//! Top-level registry of peers and their sessions.
//!
//! The hub is the crate's operational entry point: attach requests arrive as
//! a `(addr, pipeline, session, track, stage, config)` tuple and the hub
//! lazily creates the endpoint and session they name. Sessions remove
//! themselves when their last track ends, and an endpoint disappears with its
//! last session. A periodic stats task logs one line per live engine.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use log::info;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::registry::StageRegistry;
use super::session::Session;
use crate::config::PipelineConfig;
use crate::errors::Error;
use crate::pipeline::PacketSource;

/// Sessions of one remote peer.
#[derive(Default)]
struct Endpoint {
    sessions: HashMap<String, Arc<Session>>,
}

/// Registry of endpoints keyed by peer address.
pub struct Hub {
    registry: Arc<StageRegistry>,
    config: PipelineConfig,
    endpoints: Mutex<HashMap<String, Endpoint>>,
    self_ref: Weak<Hub>,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(registry: Arc<StageRegistry>, config: PipelineConfig) -> Arc<Self> {
        let hub = Arc::new_cyclic(|self_ref| Self {
            registry,
            config,
            endpoints: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(stats_loop(Arc::downgrade(&hub)));
        hub
    }

    /// Attach a stage to a track of a session on an endpoint. Endpoint and
    /// session are created on first reference; if the track has not appeared
    /// yet the attachment waits for it inside the session.
    pub async fn attach_stage(
        &self,
        addr: &str,
        pipeline_id: &str,
        session_id: &str,
        track_id: &str,
        stage_id: &str,
        config: Bytes,
    ) -> Result<(), Error> {
        let session = self.session_or_create(addr, session_id).await;
        session
            .attach_stage(pipeline_id, track_id, stage_id, config)
            .await
    }

    /// Route a new track to its session, creating the session if the track
    /// arrived before any attach request.
    pub async fn add_track(
        &self,
        addr: &str,
        session_id: &str,
        source: Arc<dyn PacketSource>,
    ) -> Result<(), Error> {
        let session = self.session_or_create(addr, session_id).await;
        session.add_track(source).await
    }

    /// Look up a live session.
    pub async fn session(&self, addr: &str, session_id: &str) -> Option<Arc<Session>> {
        self.endpoints
            .lock()
            .await
            .get(addr)
            .and_then(|endpoint| endpoint.sessions.get(session_id))
            .cloned()
    }

    async fn session_or_create(&self, addr: &str, session_id: &str) -> Arc<Session> {
        let mut endpoints = self.endpoints.lock().await;
        let endpoint = endpoints.entry(addr.to_string()).or_default();
        if let Some(session) = endpoint.sessions.get(session_id) {
            return session.clone();
        }

        info!("endpoint {addr}: session {session_id} created");
        let session = Session::new(session_id, self.registry.clone(), self.config.clone());

        let hub = self.self_ref.clone();
        let close_addr = addr.to_string();
        let close_id = session_id.to_string();
        let closed = Arc::downgrade(&session);
        session
            .on_close(move || {
                if let Some(hub) = hub.upgrade() {
                    tokio::spawn(async move {
                        hub.remove_session(&close_addr, &close_id, closed).await;
                    });
                }
            })
            .await;

        endpoint
            .sessions
            .insert(session_id.to_string(), session.clone());
        session
    }

    /// Drop a closed session; the weak reference guards against removing a
    /// newer session that reused the identifier.
    async fn remove_session(&self, addr: &str, session_id: &str, closed: Weak<Session>) {
        let mut endpoints = self.endpoints.lock().await;
        let Some(endpoint) = endpoints.get_mut(addr) else {
            return;
        };
        let is_current = endpoint
            .sessions
            .get(session_id)
            .zip(closed.upgrade())
            .is_some_and(|(current, closed)| Arc::ptr_eq(current, &closed));
        if !is_current {
            return;
        }
        endpoint.sessions.remove(session_id);
        info!("endpoint {addr}: session {session_id} removed");
        if endpoint.sessions.is_empty() {
            endpoints.remove(addr);
            info!("endpoint {addr}: removed");
        }
    }

    /// Close every session and stop the stats task.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let sessions: Vec<Arc<Session>> = {
            let endpoints = self.endpoints.lock().await;
            endpoints
                .values()
                .flat_map(|endpoint| endpoint.sessions.values().cloned())
                .collect()
        };
        for session in sessions {
            session.close().await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.endpoints
            .lock()
            .await
            .values()
            .map(|endpoint| endpoint.sessions.len())
            .sum()
    }

    /// One stats line per live engine, across all endpoints.
    pub async fn describe(&self) -> Vec<String> {
        let sessions: Vec<(String, Arc<Session>)> = {
            let endpoints = self.endpoints.lock().await;
            endpoints
                .iter()
                .flat_map(|(addr, endpoint)| {
                    endpoint
                        .sessions
                        .values()
                        .map(move |session| (addr.clone(), session.clone()))
                })
                .collect()
        };
        let mut lines = Vec::new();
        for (addr, session) in sessions {
            for line in session.describe().await {
                lines.push(format!("endpoint {addr}: {line}"));
            }
        }
        lines
    }
}

async fn stats_loop(hub: Weak<Hub>) {
    let interval_secs = match hub.upgrade() {
        Some(hub) => hub.config.stats_interval_secs.max(1),
        None => return,
    };
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await; // the first tick completes immediately
    loop {
        interval.tick().await;
        let Some(hub) = hub.upgrade() else { return };
        if hub.shutdown.is_cancelled() {
            return;
        }
        for line in hub.describe().await {
            info!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rtp::header::Header;
    use rtp::packet::Packet;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use crate::errors::TrackReadError;
    use crate::pipeline::{Sample, Stage, TrackInfo};

    struct NullStage;

    #[async_trait]
    impl Stage for NullStage {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn write(&self, _sample: &Sample) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    fn null_registry() -> Arc<StageRegistry> {
        let mut registry = StageRegistry::new();
        registry.register("null", |_ctx| Ok(Arc::new(NullStage) as Arc<dyn Stage>));
        Arc::new(registry)
    }

    struct ScriptedSource {
        info: TrackInfo,
        packets: StdMutex<VecDeque<Packet>>,
    }

    impl ScriptedSource {
        fn opus(id: &str, count: u16) -> Arc<Self> {
            let packets = (0..count)
                .map(|seq| Packet {
                    header: Header {
                        sequence_number: seq,
                        timestamp: u32::from(seq) * 960,
                        marker: true,
                        ..Default::default()
                    },
                    payload: Bytes::from_static(&[0xfc]),
                })
                .collect();
            Arc::new(Self {
                info: TrackInfo::new(id, "opus"),
                packets: StdMutex::new(packets),
            })
        }
    }

    #[async_trait]
    impl PacketSource for ScriptedSource {
        fn info(&self) -> &TrackInfo {
            &self.info
        }

        async fn read_packet(&self) -> Result<Packet, TrackReadError> {
            self.packets
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(TrackReadError::EndOfStream)
        }
    }

    async fn wait_for<F>(condition: F, what: &str)
    where
        F: AsyncFn() -> bool,
    {
        for _ in 0..500 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_attach_creates_endpoint_and_session() {
        let hub = Hub::new(null_registry(), PipelineConfig::default());

        hub.attach_stage("10.0.0.1:5000", "p1", "s1", "audio", "null", Bytes::new())
            .await
            .unwrap();

        assert!(hub.session("10.0.0.1:5000", "s1").await.is_some());
        assert!(hub.session("10.0.0.1:5000", "other").await.is_none());
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_stage_does_not_leak_session_state() {
        let hub = Hub::new(null_registry(), PipelineConfig::default());

        let err = hub
            .attach_stage("10.0.0.1:5000", "p1", "s1", "audio", "ghost", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStage(_)));
        // the session itself was still created and stays addressable
        assert!(hub.session("10.0.0.1:5000", "s1").await.is_some());
    }

    #[tokio::test]
    async fn test_session_removed_when_last_track_ends() {
        let hub = Hub::new(null_registry(), PipelineConfig::default());

        hub.attach_stage("10.0.0.2:5000", "p1", "s1", "audio", "null", Bytes::new())
            .await
            .unwrap();
        hub.add_track("10.0.0.2:5000", "s1", ScriptedSource::opus("audio", 3))
            .await
            .unwrap();

        wait_for(
            async || hub.session("10.0.0.2:5000", "s1").await.is_none(),
            "session removal",
        )
        .await;
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_tears_down_all_sessions() {
        let hub = Hub::new(null_registry(), PipelineConfig::default());

        hub.attach_stage("10.0.0.3:5000", "p1", "s1", "audio", "null", Bytes::new())
            .await
            .unwrap();
        hub.attach_stage("10.0.0.4:5000", "p1", "s2", "audio", "null", Bytes::new())
            .await
            .unwrap();
        assert_eq!(hub.session_count().await, 2);

        hub.close().await;
        wait_for(async || hub.session_count().await == 0, "hub close").await;
    }
}
