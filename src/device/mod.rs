//! Device session: deploy scrcpy-server, handshake, raw sockets
//!
//! Architecture:
//! ```text
//! bridge --adb push/shell--> scrcpy-server (on device)
//!        <--tcp:<port> (adb forward)--> localabstract:scrcpy
//!            video socket:   handshake + Annex-B stream
//!            control socket: held open (server requires it with control=true)
//! ```

pub mod adb;
pub mod handshake;
pub mod server;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use adb::Adb;
pub use handshake::StreamMeta;

use crate::config::{ConfigStore, DeviceConfig};
use crate::error::{AppError, Result};
use handshake::Liveness;

/// Device metadata announced to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub serial: String,
}

/// One live connection to the on-device capture process
pub struct DeviceSession {
    adb: Adb,
    meta: StreamMeta,
    forward_port: u16,
    video: Option<TcpStream>,
    control: Option<TcpStream>,
    server: Option<Child>,
}

impl DeviceSession {
    /// Deploy the server, start it and complete the handshake
    pub async fn start(config: &DeviceConfig, artifact: &Path) -> Result<Self> {
        let adb = Adb::connect(&config.adb_path, config.serial.as_deref()).await?;
        info!("Using device {}", adb.serial());

        let server = deploy(&adb, config, artifact).await?;

        adb.forward(config.forward_port, server::SOCKET_NAME).await?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.forward_port));

        let (video, control, meta) =
            match connect(addr, config.connect_attempts, config.connect_interval()).await {
                Ok(parts) => parts,
                Err(e) => {
                    let _ = adb.remove_forward(config.forward_port).await;
                    return Err(e);
                }
            };

        info!(
            "Connected to {} ({}x{}, codec {})",
            meta.device_name,
            meta.width,
            meta.height,
            meta.codec_name()
        );

        Ok(Self {
            adb,
            meta,
            forward_port: config.forward_port,
            video: Some(video),
            control: Some(control),
            server: Some(server),
        })
    }

    pub fn serial(&self) -> &str {
        self.adb.serial()
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.meta.device_name.clone(),
            width: self.meta.width,
            height: self.meta.height,
            serial: self.adb.serial().to_string(),
        }
    }

    /// Raw Annex-B stream; `None` after teardown
    pub fn video(&mut self) -> Option<&mut TcpStream> {
        self.video.as_mut()
    }

    /// Close sockets and stop the remote process (best effort)
    pub async fn teardown(&mut self) {
        info!("Tearing down device session for {}", self.adb.serial());

        for mut socket in [self.video.take(), self.control.take()].into_iter().flatten() {
            let _ = socket.shutdown().await;
        }

        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.kill().await {
                debug!("scrcpy-server already stopped: {}", e);
            }
        }

        if let Err(e) = self.adb.remove_forward(self.forward_port).await {
            warn!("Failed to remove port forward: {}", e);
        }
    }
}

/// A connected capture session as seen by the video loop
#[async_trait]
pub trait CaptureSession: Send {
    type Stream: AsyncRead + Unpin + Send;

    fn serial(&self) -> &str;

    fn info(&self) -> DeviceInfo;

    /// Raw Annex-B stream; `None` after teardown
    fn video(&mut self) -> Option<&mut Self::Stream>;

    async fn teardown(&mut self);
}

/// Opens fresh capture sessions, e.g. after the stream drops
#[async_trait]
pub trait SessionStarter: Send + Sync {
    type Session: CaptureSession;

    async fn start(&self) -> Result<Self::Session>;
}

#[async_trait]
impl CaptureSession for DeviceSession {
    type Stream = TcpStream;

    fn serial(&self) -> &str {
        DeviceSession::serial(self)
    }

    fn info(&self) -> DeviceInfo {
        DeviceSession::info(self)
    }

    fn video(&mut self) -> Option<&mut TcpStream> {
        DeviceSession::video(self)
    }

    async fn teardown(&mut self) {
        DeviceSession::teardown(self).await
    }
}

/// Starts [`DeviceSession`]s from the current device configuration
pub struct AdbLauncher {
    config: ConfigStore,
    artifact: PathBuf,
}

impl AdbLauncher {
    pub fn new(config: ConfigStore, artifact: PathBuf) -> Self {
        Self { config, artifact }
    }
}

#[async_trait]
impl SessionStarter for AdbLauncher {
    type Session = DeviceSession;

    async fn start(&self) -> Result<DeviceSession> {
        let config = self.config.get();
        DeviceSession::start(&config.device, &self.artifact).await
    }
}

async fn deploy(adb: &Adb, config: &DeviceConfig, artifact: &Path) -> Result<Child> {
    info!("Pushing scrcpy-server to device {}...", adb.serial());
    adb.push(artifact, server::REMOTE_PATH).await?;

    info!("Starting scrcpy-server...");
    adb.spawn_shell(&server::launch_args(config))
}

/// Open video and control sockets and read the handshake
///
/// The forward accepts TCP connections before the server listens, so a
/// connection that closes without the liveness byte is retried. The whole
/// exchange is bounded by `attempts * interval`: a socket that stays silent
/// past the window fails with `DeviceUnavailable`, and stalled metadata fails
/// with `Handshake`.
pub async fn connect(
    addr: SocketAddr,
    attempts: u32,
    interval: Duration,
) -> Result<(TcpStream, TcpStream, StreamMeta)> {
    let window = interval * attempts.max(1);
    let deadline = Instant::now() + window;

    let mut video = None;
    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                let wait = deadline.saturating_duration_since(Instant::now()).max(interval);
                match tokio::time::timeout(wait, handshake::read_liveness(&mut stream)).await {
                    Ok(Ok(Liveness::Alive)) => {
                        video = Some(stream);
                        break;
                    }
                    Ok(Ok(Liveness::NotReady)) => {
                        debug!("Server not ready (attempt {})", attempt)
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        warn!("No liveness byte from scrcpy-server within {:?}", wait);
                        break;
                    }
                }
            }
            Err(e) => debug!("Connect attempt {} failed: {}", attempt, e),
        }
        tokio::time::sleep(interval).await;
    }

    let mut video = video.ok_or_else(|| {
        AppError::DeviceUnavailable(format!(
            "Failed to connect to scrcpy-server within {:?} ({} attempts)",
            window, attempts
        ))
    })?;

    let control = tokio::time::timeout(window, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            AppError::DeviceUnavailable("Timed out opening the control socket".to_string())
        })??;
    let meta = tokio::time::timeout(window, handshake::read_stream_meta(&mut video))
        .await
        .map_err(|_| {
            AppError::Handshake(format!("no device metadata within {:?}", window))
        })??;
    video.set_nodelay(true)?;

    Ok((video, control, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_performs_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let device = tokio::spawn(async move {
            // First connection closes early, as the forward does before the
            // server is listening
            let (early, _) = listener.accept().await.unwrap();
            drop(early);

            let (mut video, _) = listener.accept().await.unwrap();
            video.write_all(&[handshake::LIVENESS_BYTE]).await.unwrap();
            let (_control, _) = listener.accept().await.unwrap();
            let bytes = handshake::encode_handshake("emulator", 720, 1280);
            video.write_all(&bytes[1..]).await.unwrap();
            video.write_all(&[0, 0, 0, 1, 0x67]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let (mut video, _control, meta) = connect(addr, 5, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(meta.device_name, "emulator");
        assert_eq!((meta.width, meta.height), (720, 1280));

        let mut rest = [0u8; 5];
        video.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [0, 0, 0, 1, 0x67]);
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_liveness() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut video, _) = listener.accept().await.unwrap();
            video.write_all(&[0x42]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result = connect(addr, 5, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(AppError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let result = connect(addr, 3, Duration::from_millis(5)).await;
        assert!(matches!(result, Err(AppError::DeviceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_connect_bounded_when_liveness_never_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let device = tokio::spawn(async move {
            // Accept and hold the socket open without writing anything
            let (silent, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            drop(silent);
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            connect(addr, 3, Duration::from_millis(10)),
        )
        .await
        .expect("connect must give up within its window");
        assert!(matches!(result, Err(AppError::DeviceUnavailable(_))));
        device.abort();
    }

    #[tokio::test]
    async fn test_connect_bounded_when_metadata_stalls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let device = tokio::spawn(async move {
            let (mut video, _) = listener.accept().await.unwrap();
            video.write_all(&[handshake::LIVENESS_BYTE]).await.unwrap();
            let (_control, _) = listener.accept().await.unwrap();
            // Partial name field, then silence
            video.write_all(b"stuck").await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            connect(addr, 3, Duration::from_millis(10)),
        )
        .await
        .expect("metadata read must be bounded");
        assert!(matches!(result, Err(AppError::Handshake(_))));
        device.abort();
    }
}
