//! VideoBridge backend library.
//!
//! Watches for an attached Android device, lists and pulls its videos into a
//! local folder, deletes them afterwards and runs a screen mirror, all through
//! the `adb` and `scrcpy` command-line tools.

pub mod bridge;
pub mod collision;
#[cfg(feature = "desktop")]
mod commands;
pub mod config;
pub mod device_monitor;
pub mod errors;
pub mod events;
pub mod filesystem;
pub mod mirror;
pub mod prescreen;
pub mod process;
pub mod remote_files;
pub mod settings;
pub mod transfer;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use bridge::{AdbChannel, CommandChannel};
use config::EngineConfig;
use device_monitor::DeviceMonitor;
use errors::BridgeResult;
use events::{AppEvent, EventSink};
use filesystem::{describe_destination, DestinationInfo};
use mirror::{MirrorManager, MirrorStatus};
use process::{ProcessBackend, SystemProcessBackend};
use remote_files::{DeleteReport, VideoFile};
use settings::SettingsStore;
use transfer::TransferEngine;

/// Everything the UI commands operate on.
pub struct AppState {
    pub config: EngineConfig,
    pub channel: Arc<dyn CommandChannel>,
    pub monitor: DeviceMonitor,
    pub transfers: Arc<TransferEngine>,
    pub mirror: MirrorManager,
    pub settings: SettingsStore,
    sink: Arc<dyn EventSink>,
}

impl AppState {
    pub fn new(
        config: EngineConfig,
        channel: Arc<dyn CommandChannel>,
        processes: Arc<dyn ProcessBackend>,
        sink: Arc<dyn EventSink>,
        settings: SettingsStore,
    ) -> Self {
        let monitor = DeviceMonitor::new(channel.clone(), sink.clone(), config.device_poll_interval);
        let transfers = Arc::new(TransferEngine::new(
            channel.clone(),
            sink.clone(),
            config.progress_poll_interval,
        ));
        let mirror = MirrorManager::new(processes, config.mirror_program.clone(), config.mirror_args.clone());

        Self {
            config,
            channel,
            monitor,
            transfers,
            mirror,
            settings,
            sink,
        }
    }

    /// State wired to the real tools, configured from the environment.
    pub fn from_env(sink: Arc<dyn EventSink>) -> BridgeResult<Self> {
        let config = EngineConfig::from_env();
        log::info!(
            "Using {} and {}, videos from {}",
            config.bridge_program,
            config.mirror_program,
            config.remote_video_dir
        );
        let channel = Arc::new(AdbChannel::new(&config));
        Ok(Self::new(
            config,
            channel,
            Arc::new(SystemProcessBackend),
            sink,
            SettingsStore::new()?,
        ))
    }

    pub async fn list_videos(&self) -> BridgeResult<Vec<VideoFile>> {
        remote_files::list_videos(self.channel.as_ref(), &self.config).await
    }

    pub async fn delete_videos(&self, paths: &[String]) -> DeleteReport {
        remote_files::delete_remote_files(self.channel.as_ref(), paths).await
    }

    /// Starts the mirror and publishes the outcome. An exit nobody asked for
    /// is published as `inactive`.
    pub fn start_mirror(&self) -> MirrorStatus {
        let sink = self.sink.clone();
        let status = self.mirror.start(move || {
            sink.emit(AppEvent::MirrorStatusChanged(MirrorStatus::Inactive));
        });
        self.sink.emit(AppEvent::MirrorStatusChanged(status.clone()));
        status
    }

    pub fn stop_mirror(&self) -> MirrorStatus {
        self.mirror.stop();
        self.sink.emit(AppEvent::MirrorStatusChanged(MirrorStatus::Inactive));
        MirrorStatus::Inactive
    }

    /// Classifies and remembers a destination folder.
    pub fn choose_destination(&self, path: PathBuf) -> BridgeResult<DestinationInfo> {
        let destination = describe_destination(path);
        self.settings.save_destination(&destination)?;
        log::info!(
            "Destination set to {} ({:?})",
            destination.path.display(),
            destination.filesystem.fs_type
        );
        Ok(destination)
    }

    /// Stops background work before the process exits.
    pub fn shutdown(&self) {
        log::info!("Shutting down");
        self.monitor.stop();
        self.transfers.cancel();
        self.mirror.stop();
    }
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let state = Arc::new(AppState::from_env(Arc::new(app.handle().clone()))?);
            app.manage(state.clone());

            let monitor_state = state.clone();
            tauri::async_runtime::spawn(async move {
                monitor_state.monitor.start();
            });

            if let Some(window) = app.get_webview_window("main") {
                window.on_window_event(move |event| {
                    if let tauri::WindowEvent::Destroyed = event {
                        state.shutdown();
                    }
                });
            }
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_device_status,
            commands::list_videos,
            commands::delete_videos,
            commands::start_mirror,
            commands::stop_mirror,
            commands::get_mirror_status,
            commands::select_destination,
            commands::get_destination,
            commands::start_transfer,
            commands::confirm_transfer,
            commands::cancel_pending_transfer,
            commands::cancel_transfer,
            commands::get_transfer_state,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app, event| {
            if let tauri::RunEvent::Exit = event {
                if let Some(state) = app.try_state::<Arc<AppState>>() {
                    state.shutdown();
                }
            }
        });
}
