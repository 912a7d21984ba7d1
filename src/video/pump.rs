//! Video loop: device socket -> NAL framer -> broadcast hub
//!
//! The loop owns the capture session. When the stream ends (device
//! unplugged, server crashed) the session is torn down and redeployed with
//! backoff until it comes back, the catch-up cache is reset, and viewers are
//! told about the new stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::nal::{NalFramer, NalUnit};
use crate::device::{CaptureSession, SessionStarter};
use crate::protocol::{DeviceState, ServerMessage};
use crate::stream::BroadcastHub;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Read buffer size
const READ_CHUNK: usize = 64 * 1024;

/// Pause after an unexpected read error
const ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Consecutive read errors before the stream is considered dead
const MAX_READ_ERRORS: u32 = 5;

/// Reconnect backoff bounds
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(100);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Units logged individually at stream start
const LOG_FIRST_UNITS: u64 = 10;

/// Afterwards, every Nth unit is logged
const LOG_EVERY_UNITS: u64 = 100;

/// Why [`StreamForwarder::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Shutdown,
    Eof,
    Failed,
}

/// Steady-state read, frame and fan-out for one stream
pub struct StreamForwarder {
    framer: NalFramer,
    hub: Arc<BroadcastHub>,
    units: u64,
    throttler: LogThrottler,
}

impl StreamForwarder {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self {
            framer: NalFramer::new(),
            hub,
            units: 0,
            throttler: LogThrottler::with_secs(5),
        }
    }

    /// Drop buffered bytes from the previous stream
    pub fn reset(&mut self) {
        self.framer.reset();
        self.units = 0;
    }

    pub async fn run<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        reader: &mut R,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> StreamEnd {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let mut errors = 0u32;

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = shutdown.recv() => None,
                r = reader.read_buf(&mut buf) => Some(r),
            };
            let Some(read) = read else {
                return StreamEnd::Shutdown;
            };

            match read {
                Ok(0) => {
                    info!(
                        "Video stream ended after {} units ({} bytes pending)",
                        self.units,
                        self.framer.pending()
                    );
                    return StreamEnd::Eof;
                }
                Ok(_) => {
                    errors = 0;
                    let units = self.framer.ingest(&buf);
                    self.log_units(&units);
                    self.hub.broadcast(units).await;
                }
                Err(e) => {
                    errors += 1;
                    warn_throttled!(self.throttler, "video_read", "Video read error: {}", e);
                    if errors >= MAX_READ_ERRORS {
                        error!("Video stream failed {} times in a row", errors);
                        return StreamEnd::Failed;
                    }
                    tokio::time::sleep(ERROR_PAUSE).await;
                }
            }
        }
    }

    fn log_units(&mut self, units: &[NalUnit]) {
        for unit in units {
            self.units += 1;
            if self.units <= LOG_FIRST_UNITS || self.units % LOG_EVERY_UNITS == 0 {
                debug!(
                    "NAL #{}: type {} ({} bytes), {} viewers",
                    self.units,
                    unit.nal_type().raw(),
                    unit.len(),
                    self.hub.viewer_count()
                );
            }
        }
    }
}

/// Owns the device session for the lifetime of the bridge
pub struct VideoPump<S: SessionStarter> {
    starter: S,
    session: S::Session,
    forwarder: StreamForwarder,
    hub: Arc<BroadcastHub>,
    reconnect_delay: Duration,
}

impl<S: SessionStarter> VideoPump<S> {
    /// Takes a session that has completed its handshake
    pub fn new(
        starter: S,
        session: S::Session,
        hub: Arc<BroadcastHub>,
        reconnect_delay: Duration,
    ) -> Self {
        hub.set_device_info(session.info());
        Self {
            starter,
            session,
            forwarder: StreamForwarder::new(hub.clone()),
            hub,
            reconnect_delay,
        }
    }

    /// Run until shutdown, redeploying the device whenever the stream drops
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Video pump started for {}", self.session.serial());

        loop {
            let end = match self.session.video() {
                Some(video) => self.forwarder.run(video, &mut shutdown).await,
                None => StreamEnd::Eof,
            };

            if end == StreamEnd::Shutdown {
                break;
            }

            warn!("Video stream lost ({:?}), reconnecting", end);
            if !self.reconnect(&mut shutdown).await {
                break;
            }
        }

        info!("Video pump stopping");
        self.hub.notify_all(ServerMessage::DeviceStatus {
            state: DeviceState::Disconnected,
        });
        self.session.teardown().await;
    }

    /// Retry with exponential backoff until a session starts; returns `false`
    /// if shutdown arrived first
    async fn reconnect(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        self.hub.notify_all(ServerMessage::DeviceStatus {
            state: DeviceState::Reconnecting,
        });

        self.session.teardown().await;
        self.hub.reset_cache();
        self.forwarder.reset();

        let mut delay = self.reconnect_delay;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tokio::select! {
                _ = shutdown.recv() => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            let started = tokio::select! {
                _ = shutdown.recv() => return false,
                r = self.starter.start() => r,
            };

            match started {
                Ok(session) => {
                    let info = session.info();
                    self.session = session;

                    self.hub.set_device_info(info.clone());
                    self.hub.notify_all(ServerMessage::DeviceInfo(info));
                    self.hub.notify_all(ServerMessage::DeviceStatus {
                        state: DeviceState::Connected,
                    });
                    info!("Device reconnected after {} attempt(s)", attempt);
                    return true;
                }
                Err(e) => {
                    warn_throttled!(
                        self.forwarder.throttler,
                        "device_reconnect",
                        "Device reconnect attempt {} failed: {}",
                        attempt,
                        e
                    );
                    delay = (delay * 2).clamp(MIN_RECONNECT_DELAY, MAX_RECONNECT_DELAY);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;
    use crate::error::{AppError, Result};
    use crate::protocol::Outbound;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct FakeSession {
        serial: &'static str,
        stream: Option<DuplexStream>,
    }

    #[async_trait]
    impl CaptureSession for FakeSession {
        type Stream = DuplexStream;

        fn serial(&self) -> &str {
            self.serial
        }

        fn info(&self) -> DeviceInfo {
            DeviceInfo {
                name: "fake".into(),
                width: 720,
                height: 1280,
                serial: self.serial.into(),
            }
        }

        fn video(&mut self) -> Option<&mut DuplexStream> {
            self.stream.as_mut()
        }

        async fn teardown(&mut self) {
            self.stream = None;
        }
    }

    /// Fails `failures` times, then hands out sessions whose stream stays open
    struct FlakyStarter {
        failures: AtomicU32,
        starts: Arc<AtomicU32>,
        writers: parking_lot::Mutex<Vec<DuplexStream>>,
    }

    impl FlakyStarter {
        fn new(failures: u32, starts: Arc<AtomicU32>) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                starts,
                writers: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SessionStarter for FlakyStarter {
        type Session = FakeSession;

        async fn start(&self) -> Result<FakeSession> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::DeviceUnavailable("No ADB devices found".into()));
            }
            let (writer, reader) = tokio::io::duplex(64);
            self.writers.lock().push(writer);
            Ok(FakeSession {
                serial: "after",
                stream: Some(reader),
            })
        }
    }

    fn ended_session() -> FakeSession {
        let (writer, reader) = tokio::io::duplex(64);
        drop(writer);
        FakeSession {
            serial: "before",
            stream: Some(reader),
        }
    }

    fn stream() -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f]);
        v.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xce, 0x3c]);
        v.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x21]);
        v.extend_from_slice(&[0, 0, 0, 1, 0x41, 0x9a]);
        v
    }

    #[tokio::test]
    async fn test_forwards_units_until_eof() {
        let hub = BroadcastHub::new(64, Duration::from_millis(100));
        let mut viewer = hub.join();
        let (_shutdown_tx, mut shutdown) = broadcast::channel(1);

        let (mut device, mut reader) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            for chunk in stream().chunks(5) {
                device.write_all(chunk).await.unwrap();
            }
        });

        let mut forwarder = StreamForwarder::new(hub.clone());
        let end = forwarder.run(&mut reader, &mut shutdown).await;
        writer.await.unwrap();

        assert_eq!(end, StreamEnd::Eof);
        // The trailing unit has no successor marker yet
        assert_eq!(forwarder.units, 3);

        let mut headers = Vec::new();
        while let Ok(Outbound::Video(data)) = viewer.rx.try_recv() {
            headers.push(data[4]);
        }
        assert_eq!(headers, vec![0x67, 0x68, 0x65]);
        assert!(hub.status().has_keyframe);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let hub = BroadcastHub::new(64, Duration::from_millis(100));
        let (shutdown_tx, mut shutdown) = broadcast::channel(1);
        let (_device, mut reader) = tokio::io::duplex(16);

        let mut forwarder = StreamForwarder::new(hub);
        let run = forwarder.run(&mut reader, &mut shutdown);
        shutdown_tx.send(()).unwrap();
        assert_eq!(run.await, StreamEnd::Shutdown);
    }

    #[tokio::test]
    async fn test_reset_clears_partial_unit() {
        let hub = BroadcastHub::new(64, Duration::from_millis(100));
        let (_shutdown_tx, mut shutdown) = broadcast::channel(1);
        let mut forwarder = StreamForwarder::new(hub.clone());

        let data = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42]);
        let mut reader: &[u8] = &data;
        assert_eq!(forwarder.run(&mut reader, &mut shutdown).await, StreamEnd::Eof);
        assert_eq!(forwarder.framer.pending(), 6);

        forwarder.reset();
        assert_eq!(forwarder.framer.pending(), 0);
        assert_eq!(forwarder.units, 0);
    }

    #[tokio::test]
    async fn test_reconnect_retries_until_device_returns() {
        let hub = BroadcastHub::new(64, Duration::from_millis(100));
        let starts = Arc::new(AtomicU32::new(0));
        let pump = VideoPump::new(
            FlakyStarter::new(2, starts.clone()),
            ended_session(),
            hub.clone(),
            Duration::from_millis(5),
        );
        let mut viewer = hub.join();
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        let task = tokio::spawn(pump.run(shutdown));

        let mut states = Vec::new();
        let mut serials = Vec::new();
        while states.last() != Some(&DeviceState::Connected) {
            let msg = tokio::time::timeout(Duration::from_secs(3), viewer.rx.recv())
                .await
                .expect("pump should reconnect")
                .unwrap();
            match msg {
                Outbound::Json(ServerMessage::DeviceStatus { state }) => states.push(state),
                Outbound::Json(ServerMessage::DeviceInfo(info)) => serials.push(info.serial),
                _ => {}
            }
        }

        // Failed attempts neither stop the pump nor report a disconnect
        assert_eq!(states, vec![DeviceState::Reconnecting, DeviceState::Connected]);
        assert_eq!(serials, vec!["before", "after"]);
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        assert!(!task.is_finished());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            viewer.rx.recv().await,
            Some(Outbound::Json(ServerMessage::DeviceStatus {
                state: DeviceState::Disconnected
            }))
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reconnect_backoff() {
        let hub = BroadcastHub::new(64, Duration::from_millis(100));
        let starts = Arc::new(AtomicU32::new(0));
        let pump = VideoPump::new(
            FlakyStarter::new(u32::MAX, starts.clone()),
            ended_session(),
            hub,
            Duration::from_millis(5),
        );
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        let task = tokio::spawn(pump.run(shutdown));

        while starts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!task.is_finished());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("shutdown must end the backoff")
            .unwrap();
    }
}
