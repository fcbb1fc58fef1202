//! Tauri command handlers exposed to the frontend.

use std::path::PathBuf;
use std::sync::Arc;
use tauri::State;
use tauri_plugin_dialog::DialogExt;

use crate::AppState;
use crate::device_monitor::DeviceStatus;
use crate::filesystem::{DestinationInfo, FilesystemType};
use crate::mirror::MirrorStatus;
use crate::prescreen::TransferStartResult;
use crate::remote_files::{DeleteReport, VideoFile};
use crate::transfer::TransferBatchState;

#[tauri::command]
pub async fn get_device_status(state: State<'_, Arc<AppState>>) -> Result<DeviceStatus, String> {
    Ok(state.monitor.refresh().await)
}

#[tauri::command]
pub async fn list_videos(state: State<'_, Arc<AppState>>) -> Result<Vec<VideoFile>, String> {
    state.list_videos().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn delete_videos(state: State<'_, Arc<AppState>>, paths: Vec<String>) -> Result<DeleteReport, String> {
    Ok(state.delete_videos(&paths).await)
}

#[tauri::command]
pub async fn start_mirror(state: State<'_, Arc<AppState>>) -> Result<MirrorStatus, String> {
    Ok(state.start_mirror())
}

#[tauri::command]
pub fn stop_mirror(state: State<'_, Arc<AppState>>) -> MirrorStatus {
    state.stop_mirror()
}

#[tauri::command]
pub fn get_mirror_status(state: State<'_, Arc<AppState>>) -> MirrorStatus {
    state.mirror.status()
}

/// Opens a folder picker; `None` when the user dismisses it.
#[tauri::command]
pub async fn select_destination(
    app: tauri::AppHandle,
    state: State<'_, Arc<AppState>>,
) -> Result<Option<DestinationInfo>, String> {
    let picked = tauri::async_runtime::spawn_blocking(move || app.dialog().file().blocking_pick_folder())
        .await
        .map_err(|e| e.to_string())?;

    let Some(folder) = picked else {
        return Ok(None);
    };
    let path = folder.into_path().map_err(|e| e.to_string())?;
    state.choose_destination(path).map(Some).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_destination(state: State<'_, Arc<AppState>>) -> Option<DestinationInfo> {
    state.settings.load_destination()
}

#[tauri::command]
pub async fn start_transfer(
    state: State<'_, Arc<AppState>>,
    files: Vec<String>,
    dest_path: String,
    filesystem_type: FilesystemType,
) -> Result<TransferStartResult, String> {
    let transfers = state.transfers.clone();
    Ok(transfers
        .request_transfer(files, PathBuf::from(dest_path), filesystem_type)
        .await)
}

#[tauri::command]
pub async fn confirm_transfer(state: State<'_, Arc<AppState>>) -> Result<bool, String> {
    Ok(state.transfers.confirm_pending())
}

#[tauri::command]
pub fn cancel_pending_transfer(state: State<'_, Arc<AppState>>) {
    state.transfers.cancel_pending();
}

#[tauri::command]
pub fn cancel_transfer(state: State<'_, Arc<AppState>>) {
    state.transfers.cancel();
}

#[tauri::command]
pub fn get_transfer_state(state: State<'_, Arc<AppState>>) -> TransferBatchState {
    state.transfers.batch_snapshot()
}
