//! Thin async wrapper around the `adb` executable

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::error::{AppError, Result};

/// Default timeout for one-shot adb invocations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pushing the server artifact can take a while over slow USB links
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// ADB client bound to one device
#[derive(Debug, Clone)]
pub struct Adb {
    path: String,
    serial: String,
}

impl Adb {
    pub fn new(path: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            serial: serial.into(),
        }
    }

    /// Bind to `serial`, or to the first attached device when `None`
    pub async fn connect(path: &str, serial: Option<&str>) -> Result<Self> {
        let serial = match serial {
            Some(s) => s.to_string(),
            None => {
                let output = run_raw(path, &["devices"], DEFAULT_TIMEOUT).await?;
                parse_device_list(&output).into_iter().next().ok_or_else(|| {
                    AppError::DeviceUnavailable(
                        "No ADB devices found. Connect a device or start an emulator.".into(),
                    )
                })?
            }
        };
        Ok(Self::new(path, serial))
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Run `adb -s <serial> <args...>` and return stdout
    pub async fn run(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let mut full = vec!["-s", self.serial.as_str()];
        full.extend_from_slice(args);
        run_raw(&self.path, &full, timeout).await
    }

    /// Run a shell command on the device
    pub async fn shell(&self, command: &str, timeout: Duration) -> Result<String> {
        self.run(&["shell", command], timeout).await
    }

    pub async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy();
        self.run(&["push", &*local, remote], PUSH_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Forward a local TCP port to a device-side socket
    pub async fn forward(&self, local_port: u16, remote: &str) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        self.run(&["forward", &local, remote], DEFAULT_TIMEOUT)
            .await
            .map(|_| ())
    }

    pub async fn remove_forward(&self, local_port: u16) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        self.run(&["forward", "--remove", &local], DEFAULT_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Start a long-running shell command; its output is forwarded to the log
    pub fn spawn_shell(&self, args: &[String]) -> Result<Child> {
        let mut child = Command::new(&self.path)
            .args(["-s", &self.serial, "shell"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::adb("shell", e))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output("device", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output("device", stderr));
        }

        Ok(child)
    }
}

async fn run_raw(path: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let label = args.join(" ");
    let output = Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| AppError::adb(&label, format!("timed out after {:?}", timeout)))?
        .map_err(|e| AppError::adb(&label, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::adb(
            &label,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn forward_output<R: AsyncRead + Unpin>(tag: &'static str, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!("[{}] {}", tag, line),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("[{}] Error reading output: {}", tag, e);
                break;
            }
        }
    }
}

/// Serials of devices in the `device` state from `adb devices` output
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}
