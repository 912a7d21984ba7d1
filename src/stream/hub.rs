//! Viewer registry and NAL fan-out
//!
//! # Architecture
//!
//! ```text
//! BroadcastHub
//!     |
//!     +-- viewers: HashMap<ViewerId, Viewer>   (queue, gesture state, stats)
//!     +-- cache:   StreamCache                 (latest SPS / PPS / IDR)
//!     +-- device:  Option<DeviceInfo>
//!     |
//!     +-- join()       -> catch-up enqueued, then admitted (one lock)
//!     +-- broadcast()  -> cache updated + targets snapshotted (one lock),
//!                         then concurrent timed sends per unit
//!     +-- leave()
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::DeviceInfo;
use crate::input::GestureTracker;
use crate::protocol::{Outbound, ServerMessage};
use crate::video::nal::{NalUnit, StreamCache};

/// Viewer ID type
pub type ViewerId = String;

/// Everything a connection handler needs after joining
pub struct ViewerHandle {
    pub id: ViewerId,
    /// Sender for replies addressed to this viewer only
    pub tx: mpsc::Sender<Outbound>,
    /// Outbound queue, drained by the connection's writer
    pub rx: mpsc::Receiver<Outbound>,
    /// Cancelled when the hub drops the viewer
    pub evicted: CancellationToken,
}

struct Viewer {
    tx: mpsc::Sender<Outbound>,
    gesture: GestureTracker,
    evicted: CancellationToken,
    connected_at: Instant,
    units_sent: u64,
}

#[derive(Default)]
struct HubInner {
    viewers: HashMap<ViewerId, Viewer>,
    cache: StreamCache,
    device: Option<DeviceInfo>,
}

/// Snapshot for the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub viewers: usize,
    pub has_sps: bool,
    pub has_pps: bool,
    pub has_keyframe: bool,
    pub total_units: u64,
}

/// Live viewer set plus the catch-up cache
pub struct BroadcastHub {
    inner: Mutex<HubInner>,
    queue_capacity: usize,
    send_timeout: Duration,
    total_units: AtomicU64,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize, send_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner::default()),
            queue_capacity,
            send_timeout,
            total_units: AtomicU64::new(0),
        })
    }

    /// Register a viewer
    ///
    /// Device info and cached SPS/PPS/IDR are queued before the viewer becomes
    /// visible to [`broadcast`](Self::broadcast), under the same lock, so no
    /// live unit can precede them.
    pub fn join(&self) -> ViewerHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let evicted = CancellationToken::new();

        let mut inner = self.inner.lock();

        if let Some(ref device) = inner.device {
            let _ = tx.try_send(ServerMessage::DeviceInfo(device.clone()).into());
        }
        let catch_up = inner.cache.catch_up();
        let replayed = catch_up.len();
        for unit in catch_up {
            let _ = tx.try_send(Outbound::Video(unit));
        }

        inner.viewers.insert(
            id.clone(),
            Viewer {
                tx: tx.clone(),
                gesture: GestureTracker::new(),
                evicted: evicted.clone(),
                connected_at: Instant::now(),
                units_sent: replayed as u64,
            },
        );
        info!(
            "Viewer {} connected ({} cached units replayed, total: {})",
            id,
            replayed,
            inner.viewers.len()
        );

        ViewerHandle {
            id,
            tx,
            rx,
            evicted,
        }
    }

    /// Remove a viewer and its pointer state; unknown ids are ignored
    pub fn leave(&self, id: &str) {
        let mut inner = self.inner.lock();
        if let Some(viewer) = inner.viewers.remove(id) {
            viewer.evicted.cancel();
            info!(
                "Viewer {} disconnected after {}s ({} units, remaining: {})",
                id,
                viewer.connected_at.elapsed().as_secs(),
                viewer.units_sent,
                inner.viewers.len()
            );
        }
    }

    /// Fan out freshly parsed units to every admitted viewer, in order
    pub async fn broadcast(&self, units: Vec<NalUnit>) {
        if units.is_empty() {
            return;
        }

        let targets: Vec<(ViewerId, mpsc::Sender<Outbound>)> = {
            let mut inner = self.inner.lock();
            for unit in &units {
                inner.cache.observe(unit);
            }
            inner
                .viewers
                .iter()
                .map(|(id, viewer)| (id.clone(), viewer.tx.clone()))
                .collect()
        };
        self.total_units
            .fetch_add(units.len() as u64, Ordering::Relaxed);

        if targets.is_empty() {
            return;
        }

        let count = units.len() as u64;
        let mut failed: HashSet<&str> = HashSet::new();
        for unit in units {
            let data = unit.into_bytes();
            let live: Vec<&(ViewerId, mpsc::Sender<Outbound>)> = targets
                .iter()
                .filter(|(id, _)| !failed.contains(id.as_str()))
                .collect();
            let sends = live.into_iter().map(|(id, tx)| {
                let frame = Outbound::Video(data.clone());
                async move {
                    let ok = tx.send_timeout(frame, self.send_timeout).await.is_ok();
                    (id.as_str(), ok)
                }
            });
            for (id, ok) in join_all(sends).await {
                if !ok {
                    failed.insert(id);
                }
            }
        }

        let mut inner = self.inner.lock();
        for (id, _) in &targets {
            if failed.contains(id.as_str()) {
                continue;
            }
            if let Some(viewer) = inner.viewers.get_mut(id) {
                viewer.units_sent += count;
            }
        }
        drop(inner);

        for id in failed {
            warn!("Viewer {} is not keeping up, dropping", id);
            self.leave(id);
        }
    }

    /// Queue a JSON message for every viewer without waiting
    pub fn notify_all(&self, message: ServerMessage) {
        let inner = self.inner.lock();
        for (id, viewer) in &inner.viewers {
            if viewer.tx.try_send(Outbound::Json(message.clone())).is_err() {
                debug!("Viewer {} queue full, status message skipped", id);
            }
        }
    }

    /// Scoped access to one viewer's gesture state
    pub fn with_pointer<R>(&self, id: &str, f: impl FnOnce(&mut GestureTracker) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.viewers.get_mut(id).map(|viewer| f(&mut viewer.gesture))
    }

    pub fn set_device_info(&self, info: DeviceInfo) {
        self.inner.lock().device = Some(info);
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.lock().device.clone()
    }

    /// Forget cached units from a previous stream
    pub fn reset_cache(&self) {
        self.inner.lock().cache.clear();
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.lock().viewers.len()
    }

    pub fn status(&self) -> HubStatus {
        let inner = self.inner.lock();
        HubStatus {
            viewers: inner.viewers.len(),
            has_sps: inner.cache.has_sps(),
            has_pps: inner.cache.has_pps(),
            has_keyframe: inner.cache.has_keyframe(),
            total_units: self.total_units.load(Ordering::Relaxed),
        }
    }
}
