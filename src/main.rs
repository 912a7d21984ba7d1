use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrcpy_bridge::agent::{Agent, AgentBridge, DisabledAgent, HttpAgent};
use scrcpy_bridge::config::{AppConfig, ConfigStore};
use scrcpy_bridge::device::{server, Adb, AdbLauncher, DeviceSession};
use scrcpy_bridge::input::{AdbInput, InputController};
use scrcpy_bridge::state::AppState;
use scrcpy_bridge::stream::BroadcastHub;
use scrcpy_bridge::video::VideoPump;
use scrcpy_bridge::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// scrcpy-bridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "scrcpy-bridge")]
#[command(version, about = "Stream an Android device to WebSocket viewers", long_about = None)]
struct CliArgs {
    /// ADB serial of the device (default: first attached device)
    serial: Option<String>,

    /// Max video dimension in pixels (overrides config)
    #[arg(long, value_name = "PIXELS")]
    width: Option<u32>,

    /// Video bitrate in bits per second (overrides config)
    #[arg(long, value_name = "BPS")]
    bitrate: Option<u32>,

    /// Max frames per second (overrides config)
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// Listen address (overrides config)
    #[arg(long, value_name = "ADDRESS")]
    host: Option<String>,

    /// WebSocket / HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Configuration file, created with defaults if missing
    #[arg(short = 'c', long, value_name = "FILE", default_value = "scrcpy-bridge.toml")]
    config: PathBuf,

    /// Base URL of the agent service (enables chat)
    #[arg(long, value_name = "URL")]
    agent_url: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting scrcpy-bridge v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::load(&args.config).await?;
    config_store.update(|config| apply_overrides(config, &args))?;
    let config = config_store.get();

    // Downloaded server artifacts are cached next to the config file
    let cache_dir = args
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let artifact = server::resolve_artifact(&config.device, &cache_dir).await?;
    tracing::info!("Using scrcpy-server {}", artifact.display());

    let session = DeviceSession::start(&config.device, &artifact).await?;

    let input = Arc::new(InputController::new(Arc::new(AdbInput::new(Adb::new(
        &config.device.adb_path,
        session.serial(),
    )))));

    let agent: Arc<dyn Agent> = match config.agent.endpoint {
        Some(ref url) => {
            tracing::info!("Agent endpoint: {}", url);
            Arc::new(HttpAgent::new(
                url,
                Duration::from_secs(config.agent.request_timeout_secs),
            )?)
        }
        None => {
            tracing::info!("No agent endpoint configured, chat disabled");
            Arc::new(DisabledAgent)
        }
    };
    let agent = Arc::new(AgentBridge::new(agent, &config.agent));

    let hub = BroadcastHub::new(config.web.viewer_queue, config.web.send_timeout());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(
        config_store.clone(),
        hub.clone(),
        input,
        agent,
        shutdown_tx.clone(),
    );

    let launcher = AdbLauncher::new(config_store.clone(), artifact);
    let pump = VideoPump::new(launcher, session, hub, config.device.reconnect_delay());
    let pump_task = tokio::spawn(pump.run(shutdown_tx.subscribe()));

    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let addr = SocketAddr::new(ip, config.web.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Viewers can connect to ws://{}/ws", listener.local_addr()?);

    // Setup graceful shutdown
    let mut stopped = shutdown_tx.subscribe();
    let shutdown_signal = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for CTRL+C: {}", e);
                }
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
            _ = stopped.recv() => {}
        }
    };

    let app = web::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if let Err(e) = pump_task.await {
        tracing::error!("Video pump panicked: {}", e);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Fold command line overrides into the loaded configuration
fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(ref serial) = args.serial {
        config.device.serial = Some(serial.clone());
    }
    if let Some(width) = args.width {
        config.device.max_size = width;
    }
    if let Some(bitrate) = args.bitrate {
        config.device.bitrate = bitrate;
    }
    if let Some(fps) = args.fps {
        config.device.max_fps = fps;
    }
    if let Some(ref host) = args.host {
        config.web.bind_address = host.clone();
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(ref url) = args.agent_url {
        config.agent.endpoint = Some(url.clone());
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "scrcpy_bridge=error,tower_http=error",
        LogLevel::Warn => "scrcpy_bridge=warn,tower_http=warn",
        LogLevel::Info => "scrcpy_bridge=info,tower_http=info",
        LogLevel::Verbose => "scrcpy_bridge=debug,tower_http=info",
        LogLevel::Debug => "scrcpy_bridge=debug,tower_http=debug",
        LogLevel::Trace => "scrcpy_bridge=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::parse_from([
            "scrcpy-bridge",
            "emulator-5554",
            "--width",
            "720",
            "--port",
            "9000",
            "--agent-url",
            "http://127.0.0.1:8000",
        ]);
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.device.max_size, 720);
        assert_eq!(config.device.bitrate, 4_000_000);
        assert_eq!(config.web.port, 9000);
        assert_eq!(config.agent.endpoint.as_deref(), Some("http://127.0.0.1:8000"));
    }

    #[test]
    fn test_verbose_flag_counts() {
        let args = CliArgs::parse_from(["scrcpy-bridge", "-vv"]);
        assert_eq!(args.verbose, 2);
        assert!(args.serial.is_none());
    }
}
