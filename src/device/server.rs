//! scrcpy-server artifact and launch arguments

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::config::DeviceConfig;
use crate::error::{AppError, Result};

/// Where the server artifact lives on the device
pub const REMOTE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";

/// Abstract socket the server listens on when `tunnel_forward=true`
pub const SOCKET_NAME: &str = "localabstract:scrcpy";

const RELEASE_URL: &str = "https://github.com/Genymobile/scrcpy/releases/download";

/// Locate the server artifact, downloading the release build if needed
///
/// Lookup order: configured `server_path`, then a cached
/// `scrcpy-server-v<version>` inside `cache_dir`, then download into it.
pub async fn resolve_artifact(config: &DeviceConfig, cache_dir: &Path) -> Result<PathBuf> {
    if let Some(ref path) = config.server_path {
        let path = PathBuf::from(path);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }
        return Err(AppError::Config(format!(
            "scrcpy-server not found at {}",
            path.display()
        )));
    }

    let cached = cache_dir.join(artifact_name(&config.server_version));
    if tokio::fs::try_exists(&cached).await.unwrap_or(false) {
        return Ok(cached);
    }

    download(&release_url(&config.server_version), &cached).await?;
    Ok(cached)
}

fn artifact_name(version: &str) -> String {
    format!("scrcpy-server-v{}", version)
}

fn release_url(version: &str) -> String {
    format!("{}/v{}/{}", RELEASE_URL, version, artifact_name(version))
}

async fn download(url: &str, dest: &Path) -> Result<()> {
    tracing::info!("Downloading scrcpy-server from {}", url);

    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AppError::DeviceUnavailable(format!("Failed to download {}: {}", url, e)))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Only complete downloads may appear at the cached path
    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(AppError::DeviceUnavailable(format!(
                    "Read download stream failed: {}",
                    e
                )));
            }
        };
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, dest).await?;

    tracing::info!("Saved scrcpy-server ({} bytes) to {}", downloaded, dest.display());
    Ok(())
}

/// Shell arguments that start the server with a raw, video-only stream
pub fn launch_args(config: &DeviceConfig) -> Vec<String> {
    vec![
        format!("CLASSPATH={}", REMOTE_PATH),
        "app_process".to_string(),
        "/".to_string(),
        "com.genymobile.scrcpy.Server".to_string(),
        config.server_version.clone(),
        "log_level=info".to_string(),
        format!("max_size={}", config.max_size),
        format!("max_fps={}", config.max_fps),
        format!("video_bit_rate={}", config.bitrate),
        "video_codec=h264".to_string(),
        "tunnel_forward=true".to_string(),
        // Raw Annex-B without per-frame headers
        "send_frame_meta=false".to_string(),
        "control=true".to_string(),
        "audio=false".to_string(),
        "show_touches=false".to_string(),
        "stay_awake=true".to_string(),
        "power_off_on_close=false".to_string(),
        "clipboard_autosync=false".to_string(),
    ]
}
