//! Large-file check ahead of a batch.
//!
//! FAT32 destinations cannot hold files of 4 GiB or more. Before such a batch
//! starts, every file is sized on the device and the oversized ones are
//! reported back so the user can decide; the rest are held as the pending set
//! until the user confirms or abandons the batch.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::filesystem::FilesystemType;
use crate::remote_files::{format_size, remote_basename, remote_file_size};
use crate::transfer::{TransferEngine, TransferProgress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeFile {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub human_size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeFileWarning {
    pub files: Vec<LargeFile>,
    pub filesystem_type: FilesystemType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrescreenResult {
    /// Nothing exceeds the destination's limit
    Proceed { files: Vec<String> },
    /// Some files are too large; `within_limit` is now the pending set
    NeedsWarning {
        warning: LargeFileWarning,
        within_limit: Vec<String>,
    },
    /// The check was cancelled before it finished
    Abandoned,
}

/// Reply to a transfer request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStartResult {
    pub needs_warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_files: Option<LargeFileWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
}

impl TransferStartResult {
    fn started(started: bool) -> Self {
        Self {
            started: Some(started),
            ..Self::default()
        }
    }
}

/// Splits sized files at `limit`. A file of unknown size counts as within the limit.
fn partition_by_limit(sized: Vec<(String, Option<u64>)>, limit: u64) -> (Vec<String>, Vec<LargeFile>) {
    let mut within = Vec::new();
    let mut over = Vec::new();

    for (path, size) in sized {
        match size {
            Some(size) if size > limit => over.push(LargeFile {
                filename: remote_basename(&path).to_string(),
                human_size: format_size(size),
                path,
                size,
            }),
            _ => within.push(path),
        }
    }
    (within, over)
}

impl TransferEngine {
    /// Checks `files` against the destination's size ceiling. When some are
    /// too large, the remainder becomes the pending set for `dest_path`.
    pub async fn prescreen(
        &self,
        files: Vec<String>,
        dest_path: PathBuf,
        filesystem_type: FilesystemType,
    ) -> PrescreenResult {
        let (result, check_id) = self.screen(files, dest_path, filesystem_type).await;
        if let Some(check_id) = check_id {
            self.end_check(check_id);
        }
        result
    }

    /// Runs the check. For a `Proceed` after sizing, the size check stays
    /// registered and its id is returned so the caller can start the batch
    /// only if nobody cancelled in between.
    async fn screen(
        &self,
        files: Vec<String>,
        dest_path: PathBuf,
        filesystem_type: FilesystemType,
    ) -> (PrescreenResult, Option<Uuid>) {
        let Some(limit) = filesystem_type.max_file_size() else {
            return (PrescreenResult::Proceed { files }, None);
        };

        let check_id = Uuid::new_v4();
        {
            let mut state = self.state.lock();
            state.check_id = Some(check_id);
            state.awaiting_confirmation = false;
            state.pending_files.clear();
        }
        self.emit(TransferProgress::Checking {
            total_files: files.len(),
        });

        let mut sized = Vec::with_capacity(files.len());
        for path in files {
            if !self.check_active(check_id) {
                log::info!("Size check abandoned");
                return (PrescreenResult::Abandoned, None);
            }
            let size = match remote_file_size(self.channel.as_ref(), &path).await {
                Ok(size) => Some(size),
                Err(e) => {
                    log::warn!("Could not size {} for {:?} check: {}", path, filesystem_type, e);
                    None
                }
            };
            sized.push((path, size));
        }

        let (within_limit, over_limit) = partition_by_limit(sized, limit);

        let mut state = self.state.lock();
        if state.check_id != Some(check_id) {
            log::info!("Size check abandoned");
            return (PrescreenResult::Abandoned, None);
        }
        if over_limit.is_empty() {
            return (PrescreenResult::Proceed { files: within_limit }, Some(check_id));
        }

        state.check_id = None;
        if state.is_transferring {
            log::warn!("A batch started during the size check; not holding files");
        } else {
            state.pending_files = within_limit.clone();
            state.awaiting_confirmation = true;
            state.dest_path = Some(dest_path);
            state.filesystem_type = Some(filesystem_type);
        }
        drop(state);

        log::info!(
            "{} file(s) exceed the {:?} limit, holding {} for confirmation",
            over_limit.len(),
            filesystem_type,
            within_limit.len()
        );
        (
            PrescreenResult::NeedsWarning {
                warning: LargeFileWarning {
                    files: over_limit,
                    filesystem_type,
                },
                within_limit,
            },
            None,
        )
    }

    fn check_active(&self, check_id: Uuid) -> bool {
        self.state.lock().check_id == Some(check_id)
    }

    fn end_check(&self, check_id: Uuid) {
        let mut state = self.state.lock();
        if state.check_id == Some(check_id) {
            state.check_id = None;
        }
    }

    /// Entry point for a user's transfer request: prescreens, then starts the
    /// batch unless the user must first be warned or cancelled meanwhile.
    pub async fn request_transfer(
        self: &Arc<Self>,
        files: Vec<String>,
        dest_path: PathBuf,
        filesystem_type: FilesystemType,
    ) -> TransferStartResult {
        {
            let state = self.state.lock();
            if state.is_transferring || state.check_id.is_some() {
                return TransferStartResult::started(false);
            }
        }

        match self.screen(files, dest_path.clone(), filesystem_type).await {
            (PrescreenResult::Proceed { files }, check_id) => TransferStartResult::started(self.start_with(
                files,
                dest_path,
                Some(filesystem_type),
                check_id,
            )),
            (PrescreenResult::NeedsWarning { warning, .. }, _) => TransferStartResult {
                needs_warning: true,
                large_files: Some(warning),
                started: None,
            },
            (PrescreenResult::Abandoned, _) => TransferStartResult::started(false),
        }
    }

    /// Starts the held-back files. Returns `false` when nothing is pending or
    /// another batch is active; either way the pending set is consumed.
    pub fn confirm_pending(self: &Arc<Self>) -> bool {
        let (files, dest_path, filesystem_type) = {
            let mut state = self.state.lock();
            let files = std::mem::take(&mut state.pending_files);
            let was_warned = std::mem::take(&mut state.awaiting_confirmation);
            if files.is_empty() && was_warned && !state.is_transferring {
                // Everything was oversized: nothing to start, the request is over.
                self.emit(TransferProgress::Idle);
            }
            (files, state.dest_path.clone(), state.filesystem_type)
        };

        match dest_path {
            Some(dest_path) if !files.is_empty() => self.start_with(files, dest_path, filesystem_type, None),
            _ => false,
        }
    }

    /// Abandons the held-back files.
    pub fn cancel_pending(&self) {
        let mut state = self.state.lock();
        let dropped = std::mem::take(&mut state.pending_files);
        state.awaiting_confirmation = false;
        if !dropped.is_empty() {
            log::info!("Dropped {} pending file(s)", dropped.len());
        }
        if !state.is_transferring {
            self.emit(TransferProgress::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, FakeChannel, PullScript, RecordingSink};
    use std::time::Duration;
    use tokio::sync::Notify;

    const BIG: &str = "/sdcard/DCIM/Camera/big.mp4";
    const SMALL: &str = "/sdcard/DCIM/Camera/small.mp4";

    fn setup() -> (Arc<FakeChannel>, Arc<RecordingSink>, Arc<TransferEngine>) {
        let channel = FakeChannel::new();
        let sink = RecordingSink::new();
        channel.with_size(BIG, 5_000_000_000);
        channel.with_size(SMALL, 100_000_000);
        channel.on_pull(SMALL, PullScript::success(64));
        let engine = Arc::new(TransferEngine::new(channel.clone(), sink.clone(), Duration::from_millis(5)));
        (channel, sink, engine)
    }

    fn both() -> Vec<String> {
        vec![BIG.to_string(), SMALL.to_string()]
    }

    #[test]
    fn test_partition_by_limit() {
        let (within, over) = partition_by_limit(
            vec![
                ("/a/exact.mp4".to_string(), Some(4_294_967_295)),
                ("/a/over.mp4".to_string(), Some(4_294_967_296)),
                ("/a/unknown.mp4".to_string(), None),
            ],
            4_294_967_295,
        );
        assert_eq!(within, vec!["/a/exact.mp4".to_string(), "/a/unknown.mp4".to_string()]);
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].filename, "over.mp4");
        assert_eq!(over[0].human_size, "4.0 GB");
    }

    #[tokio::test]
    async fn test_fat32_warns_and_holds_small_files() {
        let (channel, sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();

        let result = engine
            .request_transfer(both(), dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;

        assert!(result.needs_warning);
        assert_eq!(result.started, None);
        let warning = result.large_files.unwrap();
        assert_eq!(warning.filesystem_type, FilesystemType::Fat32);
        assert_eq!(warning.files.len(), 1);
        assert_eq!(warning.files[0].path, BIG);
        assert_eq!(warning.files[0].size, 5_000_000_000);

        let snapshot = engine.batch_snapshot();
        assert_eq!(snapshot.pending_files, vec![SMALL.to_string()]);
        assert!(!snapshot.is_transferring);
        assert_eq!(channel.calls_matching("pull"), 0);
        assert_eq!(sink.transfer_events(), vec![TransferProgress::Checking { total_files: 2 }]);
    }

    #[tokio::test]
    async fn test_confirm_transfers_only_pending_files() {
        let (channel, sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();
        engine
            .request_transfer(both(), dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;

        assert!(engine.confirm_pending());
        assert!(wait_until(Duration::from_secs(2), || !engine.is_transferring()).await);

        assert_eq!(channel.calls_matching("pull"), 1);
        assert_eq!(channel.calls_matching(&format!("pull {}", SMALL)), 1);
        assert!(dest.path().join("small.mp4").exists());
        assert_eq!(
            sink.last_transfer_event(),
            Some(TransferProgress::Complete {
                total_files: 1,
                completed_files: vec!["small.mp4".to_string()],
                failed_files: vec![],
            })
        );
        assert_eq!(engine.batch_snapshot().filesystem_type, Some(FilesystemType::Fat32));

        assert!(!engine.confirm_pending());
    }

    #[tokio::test]
    async fn test_confirm_with_nothing_pending() {
        let (_channel, _sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();

        assert!(!engine.confirm_pending());

        let result = engine
            .request_transfer(vec![BIG.to_string()], dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;
        assert!(result.needs_warning);
        assert!(engine.batch_snapshot().pending_files.is_empty());
        assert!(!engine.confirm_pending());
        assert!(!engine.is_transferring());
    }

    #[tokio::test]
    async fn test_cancel_pending_drops_held_files() {
        let (channel, sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();
        engine
            .request_transfer(both(), dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;

        engine.cancel_pending();

        assert!(engine.batch_snapshot().pending_files.is_empty());
        assert_eq!(sink.last_transfer_event(), Some(TransferProgress::Idle));
        assert!(!engine.confirm_pending());
        assert_eq!(channel.calls_matching("pull"), 0);
    }

    #[tokio::test]
    async fn test_dismissed_warning_returns_progress_to_idle() {
        let checking_one = TransferProgress::Checking { total_files: 1 };

        // Everything oversized, abandoned from the warning dialog.
        let (_channel, sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();
        engine
            .request_transfer(vec![BIG.to_string()], dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;
        engine.cancel_pending();
        assert_eq!(sink.transfer_events(), vec![checking_one.clone(), TransferProgress::Idle]);

        // Everything oversized, dismissed through the general cancel.
        let (_channel, sink, engine) = setup();
        engine
            .request_transfer(vec![BIG.to_string()], dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;
        engine.cancel();
        assert_eq!(sink.transfer_events(), vec![checking_one.clone(), TransferProgress::Idle]);

        // Everything oversized, "continue" pressed with nothing left to send.
        let (_channel, sink, engine) = setup();
        engine
            .request_transfer(vec![BIG.to_string()], dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;
        assert!(!engine.confirm_pending());
        assert_eq!(sink.transfer_events(), vec![checking_one, TransferProgress::Idle]);
    }

    #[tokio::test]
    async fn test_cancel_dismisses_held_files() {
        let (channel, sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();
        engine
            .request_transfer(both(), dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;

        engine.cancel();
        engine.cancel();

        assert_eq!(
            sink.transfer_events(),
            vec![TransferProgress::Checking { total_files: 2 }, TransferProgress::Idle]
        );
        assert!(!engine.batch_snapshot().awaiting_confirmation);
        assert!(!engine.confirm_pending());
        assert_eq!(channel.calls_matching("pull"), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_size_check_prevents_start() {
        let (channel, sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        channel.hold(&format!("stat -c %s '{}'", SMALL), started.clone(), gate.clone());

        let request = {
            let engine = engine.clone();
            let dest = dest.path().to_path_buf();
            tokio::spawn(async move {
                engine
                    .request_transfer(vec![SMALL.to_string()], dest, FilesystemType::Fat32)
                    .await
            })
        };

        started.notified().await;
        assert!(engine.batch_snapshot().check_id.is_some());
        engine.cancel();
        gate.notify_one();

        let result = request.await.unwrap();
        assert_eq!(result, TransferStartResult::started(false));
        assert!(!engine.is_transferring());
        assert!(engine.batch_snapshot().check_id.is_none());
        assert_eq!(channel.calls_matching("pull"), 0);
        assert_eq!(
            sink.transfer_events(),
            vec![TransferProgress::Checking { total_files: 1 }, TransferProgress::Idle]
        );

        let retry = engine
            .request_transfer(vec![SMALL.to_string()], dest.path().to_path_buf(), FilesystemType::Apfs)
            .await;
        assert_eq!(retry.started, Some(true));
        assert!(wait_until(Duration::from_secs(2), || !engine.is_transferring()).await);
    }

    #[tokio::test]
    async fn test_other_filesystems_start_without_sizing() {
        for fs in [FilesystemType::Apfs, FilesystemType::ExFat, FilesystemType::Unknown] {
            let (channel, _sink, engine) = setup();
            let dest = tempfile::tempdir().unwrap();

            let result = engine
                .request_transfer(both(), dest.path().to_path_buf(), fs)
                .await;

            assert_eq!(result, TransferStartResult::started(true));
            assert!(wait_until(Duration::from_secs(2), || !engine.is_transferring()).await);
            assert_eq!(channel.calls_matching("pull"), 2);
        }
    }

    #[tokio::test]
    async fn test_fat32_without_large_files_starts_directly() {
        let (channel, _sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();
        channel.on_transport_error("stat -c %s '/sdcard/DCIM/Camera/lost.mp4'", "device offline");

        let result = engine
            .request_transfer(
                vec![SMALL.to_string(), "/sdcard/DCIM/Camera/lost.mp4".to_string()],
                dest.path().to_path_buf(),
                FilesystemType::Fat32,
            )
            .await;

        assert_eq!(result, TransferStartResult::started(true));
        assert!(wait_until(Duration::from_secs(2), || !engine.is_transferring()).await);
        assert_eq!(channel.calls_matching(&format!("pull {}", SMALL)), 1);
    }

    #[tokio::test]
    async fn test_requests_rejected_while_batch_active() {
        let (channel, _sink, engine) = setup();
        let dest = tempfile::tempdir().unwrap();
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        channel.on_pull(
            SMALL,
            PullScript {
                started: Some(started.clone()),
                gate: Some(gate.clone()),
                ..PullScript::success(64)
            },
        );

        let first = engine
            .request_transfer(vec![SMALL.to_string()], dest.path().to_path_buf(), FilesystemType::Apfs)
            .await;
        assert_eq!(first.started, Some(true));
        started.notified().await;

        let second = engine
            .request_transfer(both(), dest.path().to_path_buf(), FilesystemType::Fat32)
            .await;
        assert_eq!(second, TransferStartResult::started(false));
        assert!(engine.batch_snapshot().pending_files.is_empty());

        engine.state.lock().pending_files = vec![SMALL.to_string()];
        assert!(!engine.confirm_pending());
        assert!(engine.batch_snapshot().pending_files.is_empty());

        gate.notify_one();
        assert!(wait_until(Duration::from_secs(2), || !engine.is_transferring()).await);
    }

    #[test]
    fn test_start_result_serialization() {
        let json = serde_json::to_value(TransferStartResult::started(true)).unwrap();
        assert_eq!(json, serde_json::json!({ "needsWarning": false, "started": true }));
    }
}
