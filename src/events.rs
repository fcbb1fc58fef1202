//! Events pushed from the engine to the UI layer.

use crate::device_monitor::DeviceStatus;
use crate::mirror::MirrorStatus;
use crate::transfer::TransferProgress;

pub const DEVICE_STATUS_CHANGED: &str = "device:status-changed";
pub const MIRROR_STATUS_CHANGED: &str = "mirror:status-changed";
pub const TRANSFER_PROGRESS: &str = "transfer:progress";

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    DeviceStatusChanged(DeviceStatus),
    MirrorStatusChanged(MirrorStatus),
    TransferProgress(TransferProgress),
}

impl AppEvent {
    /// Name the event is published under.
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::DeviceStatusChanged(_) => DEVICE_STATUS_CHANGED,
            AppEvent::MirrorStatusChanged(_) => MIRROR_STATUS_CHANGED,
            AppEvent::TransferProgress(_) => TRANSFER_PROGRESS,
        }
    }
}

/// Receiver of engine events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AppEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: AppEvent) {}
}

impl EventSink for tokio::sync::mpsc::Sender<AppEvent> {
    fn emit(&self, event: AppEvent) {
        let name = event.name();
        if let Err(e) = self.try_send(event) {
            log::warn!("Dropping {} event: {}", name, e);
        }
    }
}

#[cfg(feature = "desktop")]
impl EventSink for tauri::AppHandle {
    fn emit(&self, event: AppEvent) {
        use tauri::Emitter;

        let name = event.name();
        let result = match event {
            AppEvent::DeviceStatusChanged(status) => Emitter::emit(self, name, status),
            AppEvent::MirrorStatusChanged(status) => Emitter::emit(self, name, status),
            AppEvent::TransferProgress(progress) => Emitter::emit(self, name, progress),
        };
        if let Err(e) = result {
            log::error!("Failed to emit {} event: {}", name, e);
        }
    }
}
