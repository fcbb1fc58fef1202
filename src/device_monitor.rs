//! Device connectivity monitoring.
//!
//! Polls the bridge for the first attached device on a fixed interval and
//! publishes a `device:status-changed` event only when the status actually
//! changes, so an indefinitely running poll never floods the UI.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::bridge::{shell_args, CommandChannel};
use crate::events::{AppEvent, EventSink};

/// Name used when the device's model cannot be read.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Connectivity of the (first) attached device.
///
/// Equality is variant- and field-aware and is the only input to debouncing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum DeviceStatus {
    #[serde(rename_all = "camelCase")]
    Connected { device_id: String, device_name: String },
    #[serde(rename_all = "camelCase")]
    Unauthorized { device_id: String },
    NoDevice,
    #[serde(rename = "adb-not-installed")]
    BridgeNotInstalled,
    Error { message: String },
}

/// Extracts `(serial, state)` of the first device from `adb devices` output.
pub fn parse_device_list(stdout: &str) -> Option<(String, String)> {
    let lines: Vec<&str> = stdout.lines().collect();
    let body = match lines
        .iter()
        .position(|line| line.trim_start().starts_with("List of devices"))
    {
        Some(header) => &lines[header + 1..],
        None => &lines[..],
    };

    let first = body
        .iter()
        .map(|line| line.trim())
        .find(|line| !line.is_empty() && !line.starts_with('*'))?;

    let mut parts = first.split_whitespace();
    let serial = parts.next()?;
    let state = parts.next()?;
    Some((serial.to_string(), state.to_string()))
}

struct PollLoop {
    running: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
}

/// Polls device connectivity and publishes de-duplicated changes.
pub struct DeviceMonitor {
    channel: Arc<dyn CommandChannel>,
    sink: Arc<dyn EventSink>,
    poll_interval: Duration,
    /// Last status seen by the poll loop or an on-demand query
    last_status: Arc<RwLock<Option<DeviceStatus>>>,
    poll_loop: Mutex<Option<PollLoop>>,
}

impl DeviceMonitor {
    pub fn new(channel: Arc<dyn CommandChannel>, sink: Arc<dyn EventSink>, poll_interval: Duration) -> Self {
        Self {
            channel,
            sink,
            poll_interval,
            last_status: Arc::new(RwLock::new(None)),
            poll_loop: Mutex::new(None),
        }
    }

    /// Queries the current status without touching the last-known value.
    pub async fn query_status(&self) -> DeviceStatus {
        Self::query(self.channel.as_ref()).await
    }

    /// Queries the current status and records it as last known.
    ///
    /// Used for the UI's on-demand request; the caller receives the value
    /// directly, so no change event is emitted.
    pub async fn refresh(&self) -> DeviceStatus {
        let status = self.query_status().await;
        *self.last_status.write() = Some(status.clone());
        status
    }

    pub fn last_status(&self) -> Option<DeviceStatus> {
        self.last_status.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.poll_loop.lock().is_some()
    }

    /// Starts the background poll loop. No-op if it is already running.
    pub fn start(&self) {
        let mut poll_loop = self.poll_loop.lock();
        if poll_loop.is_some() {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        *poll_loop = Some(PollLoop {
            running: running.clone(),
            stop_tx,
        });

        let channel = self.channel.clone();
        let sink = self.sink.clone();
        let last_status = self.last_status.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            Self::watch_loop(channel, sink, last_status, poll_interval, running, stop_rx).await;
        });
        log::info!("Device monitor started ({} ms interval)", poll_interval.as_millis());
    }

    /// Stops the background poll loop. No-op if it is not running.
    pub fn stop(&self) {
        if let Some(poll_loop) = self.poll_loop.lock().take() {
            poll_loop.running.store(false, Ordering::SeqCst);
            let _ = poll_loop.stop_tx.try_send(());
            log::info!("Device monitor stopped");
        }
    }

    async fn watch_loop(
        channel: Arc<dyn CommandChannel>,
        sink: Arc<dyn EventSink>,
        last_status: Arc<RwLock<Option<DeviceStatus>>>,
        poll_interval: Duration,
        running: Arc<AtomicBool>,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                biased;

                _ = stop_rx.recv() => break,

                _ = ticker.tick() => {
                    let status = Self::query(channel.as_ref()).await;
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    Self::publish(&last_status, sink.as_ref(), status);
                }
            }
        }
    }

    /// Records `status` and emits it if it differs from the last known value.
    /// Returns whether an event was emitted.
    fn publish(last_status: &RwLock<Option<DeviceStatus>>, sink: &dyn EventSink, status: DeviceStatus) -> bool {
        // Emit under the lock so consecutive emissions can never be equal.
        let mut last = last_status.write();
        if last.as_ref() == Some(&status) {
            log::debug!("Device status unchanged: {:?}", status);
            return false;
        }

        log::info!("Device status changed: {:?}", status);
        *last = Some(status.clone());
        sink.emit(AppEvent::DeviceStatusChanged(status));
        true
    }

    async fn query(channel: &dyn CommandChannel) -> DeviceStatus {
        if !channel.is_tool_available().await {
            return DeviceStatus::BridgeNotInstalled;
        }

        let output = match channel.run(&["devices".to_string()]).await {
            Ok(output) => output,
            Err(e) => return DeviceStatus::Error { message: e.to_string() },
        };

        if !output.success() {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("adb devices exited with code {:?}", output.exit_code)
            } else {
                stderr.to_string()
            };
            return DeviceStatus::Error { message };
        }

        match parse_device_list(&output.stdout) {
            Some((device_id, state)) if state == "device" => {
                let device_name = Self::device_name(channel, &device_id).await;
                DeviceStatus::Connected { device_id, device_name }
            }
            Some((device_id, state)) if state == "unauthorized" => DeviceStatus::Unauthorized { device_id },
            _ => DeviceStatus::NoDevice,
        }
    }

    async fn device_name(channel: &dyn CommandChannel, device_id: &str) -> String {
        let mut args = vec!["-s".to_string(), device_id.to_string()];
        args.extend(shell_args("getprop ro.product.model"));

        match channel.run(&args).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => output.stdout.trim().to_string(),
            Ok(_) => UNKNOWN_DEVICE_NAME.to_string(),
            Err(e) => {
                log::debug!("Could not read model of {}: {}", device_id, e);
                UNKNOWN_DEVICE_NAME.to_string()
            }
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
