//! Batch pull orchestration.
//!
//! A batch is a list of remote paths pulled one after another into a local
//! folder. The bridge is a single serial channel to one device, so files never
//! overlap. While a pull runs, the growing destination file is sampled on a
//! fixed interval to report per-file progress. Cancellation is cooperative and
//! takes effect at the next file boundary.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::bridge::CommandChannel;
use crate::collision::unique_destination;
use crate::errors::classify_pull_error;
use crate::events::{AppEvent, EventSink};
use crate::filesystem::FilesystemType;
use crate::remote_files::{remote_basename, remote_file_size, FileFailure};

/// Progress of the active batch, as pushed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TransferProgress {
    Idle,
    #[serde(rename_all = "camelCase")]
    Checking { total_files: usize },
    #[serde(rename_all = "camelCase")]
    Transferring {
        current_file: String,
        current_file_index: usize,
        total_files: usize,
        /// 0-100; polling never reports 100, only a successful pull does
        file_progress: u8,
        completed_files: Vec<String>,
        failed_files: Vec<FileFailure>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        total_files: usize,
        completed_files: Vec<String>,
        failed_files: Vec<FileFailure>,
    },
    #[serde(rename_all = "camelCase")]
    Cancelled {
        current_file_index: usize,
        total_files: usize,
        completed_files: Vec<String>,
        failed_files: Vec<FileFailure>,
    },
    Error { message: String },
}

impl TransferProgress {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferProgress::Complete { .. } | TransferProgress::Cancelled { .. } | TransferProgress::Error { .. }
        )
    }
}

/// Process-wide state of the (single) transfer batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBatchState {
    pub batch_id: Option<Uuid>,
    pub is_transferring: bool,
    pub cancel_requested: bool,
    /// Set while a large-file check is sizing files; cleared to abandon it
    pub check_id: Option<Uuid>,
    /// A large-file warning is waiting for the user's decision
    pub awaiting_confirmation: bool,
    /// Files held back by the prescreen, awaiting confirmation
    pub pending_files: Vec<String>,
    pub dest_path: Option<PathBuf>,
    pub filesystem_type: Option<FilesystemType>,
    pub completed_files: Vec<String>,
    pub failed_files: Vec<FileFailure>,
}

/// `min(99, floor(written / total * 100))`.
pub fn progress_percent(written: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (written as u128 * 100) / total as u128;
    percent.min(99) as u8
}

/// Position of the file being pulled within its batch.
struct FileSlot<'a> {
    filename: &'a str,
    index: usize,
    total: usize,
    completed: &'a [String],
    failed: &'a [FileFailure],
}

impl FileSlot<'_> {
    fn progress(&self, file_progress: u8) -> TransferProgress {
        TransferProgress::Transferring {
            current_file: self.filename.to_string(),
            current_file_index: self.index,
            total_files: self.total,
            file_progress,
            completed_files: self.completed.to_vec(),
            failed_files: self.failed.to_vec(),
        }
    }
}

pub struct TransferEngine {
    pub(crate) channel: Arc<dyn CommandChannel>,
    sink: Arc<dyn EventSink>,
    progress_interval: Duration,
    pub(crate) state: Mutex<TransferBatchState>,
}

impl TransferEngine {
    pub fn new(channel: Arc<dyn CommandChannel>, sink: Arc<dyn EventSink>, progress_interval: Duration) -> Self {
        Self {
            channel,
            sink,
            progress_interval,
            state: Mutex::new(TransferBatchState::default()),
        }
    }

    pub fn is_transferring(&self) -> bool {
        self.state.lock().is_transferring
    }

    /// Copy of the batch state. After a cancellation it still describes the
    /// cancelled batch until the next one starts.
    pub fn batch_snapshot(&self) -> TransferBatchState {
        self.state.lock().clone()
    }

    /// Requests cancellation of the active batch, abandons a running size
    /// check and drops any unconfirmed files.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.is_transferring && !state.cancel_requested {
            log::info!("Cancellation requested for batch {:?}", state.batch_id);
            state.cancel_requested = true;
        }
        state.pending_files.clear();

        let abandoned_check = state.check_id.take().is_some();
        let dismissed_warning = std::mem::take(&mut state.awaiting_confirmation);
        if (abandoned_check || dismissed_warning) && !state.is_transferring {
            log::info!("Transfer request dismissed before starting");
            self.emit(TransferProgress::Idle);
        }
    }

    /// Starts a batch in the background. Returns `false` without queueing if
    /// another batch is active.
    pub fn start(self: &Arc<Self>, files: Vec<String>, dest_path: PathBuf) -> bool {
        self.start_with(files, dest_path, None, None)
    }

    pub(crate) fn start_with(
        self: &Arc<Self>,
        files: Vec<String>,
        dest_path: PathBuf,
        filesystem_type: Option<FilesystemType>,
        check_id: Option<Uuid>,
    ) -> bool {
        if !self.begin(&dest_path, filesystem_type, check_id) {
            return false;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute(files, dest_path).await;
        });
        true
    }

    /// Runs a batch to its terminal event. Returns `None` if another batch is active.
    pub async fn transfer(&self, files: Vec<String>, dest_path: PathBuf) -> Option<TransferProgress> {
        if !self.begin(&dest_path, None, None) {
            return None;
        }
        Some(self.execute(files, dest_path).await)
    }

    /// Atomically claims the single batch slot. With `check_id`, the slot is
    /// only claimed if that size check is still the registered one.
    fn begin(&self, dest_path: &Path, filesystem_type: Option<FilesystemType>, check_id: Option<Uuid>) -> bool {
        let mut state = self.state.lock();
        if let Some(check_id) = check_id {
            if state.check_id != Some(check_id) {
                log::info!("Not starting batch: its size check was cancelled");
                return false;
            }
            state.check_id = None;
        }
        if state.is_transferring {
            log::info!("Rejecting transfer request: batch {:?} is still running", state.batch_id);
            return false;
        }

        let batch_id = Uuid::new_v4();
        *state = TransferBatchState {
            batch_id: Some(batch_id),
            is_transferring: true,
            dest_path: Some(dest_path.to_path_buf()),
            filesystem_type,
            ..TransferBatchState::default()
        };
        log::info!("Batch {} started into {}", batch_id, dest_path.display());
        true
    }

    async fn execute(&self, files: Vec<String>, dest_dir: PathBuf) -> TransferProgress {
        let total = files.len();

        if let Err(e) = tokio::fs::create_dir_all(&dest_dir).await {
            return self.finish(TransferProgress::Error {
                message: format!("Cannot use destination {}: {}", dest_dir.display(), e),
            });
        }

        let mut completed: Vec<String> = Vec::new();
        let mut failed: Vec<FileFailure> = Vec::new();

        for (index, remote) in files.iter().enumerate() {
            if self.state.lock().cancel_requested {
                return self.finish(TransferProgress::Cancelled {
                    current_file_index: index,
                    total_files: total,
                    completed_files: completed,
                    failed_files: failed,
                });
            }

            let filename = remote_basename(remote).to_string();
            let slot = FileSlot {
                filename: &filename,
                index,
                total,
                completed: &completed,
                failed: &failed,
            };
            self.emit(slot.progress(0));

            let outcome = self.transfer_file(remote, &dest_dir, &slot).await;
            match outcome {
                Ok(local) => {
                    log::debug!("Pulled {} to {}", remote, local.display());
                    completed.push(filename.clone());
                    let slot = FileSlot {
                        filename: &filename,
                        index,
                        total,
                        completed: &completed,
                        failed: &failed,
                    };
                    self.emit(slot.progress(100));
                }
                Err(error) => {
                    log::warn!("Failed to pull {}: {}", remote, error);
                    failed.push(FileFailure {
                        path: remote.clone(),
                        error,
                    });
                }
            }

            let mut state = self.state.lock();
            state.completed_files = completed.clone();
            state.failed_files = failed.clone();
        }

        self.finish(TransferProgress::Complete {
            total_files: total,
            completed_files: completed,
            failed_files: failed,
        })
    }

    /// Pulls one file, returning where it landed or a user-facing reason.
    async fn transfer_file(&self, remote: &str, dest_dir: &Path, slot: &FileSlot<'_>) -> Result<PathBuf, String> {
        if slot.filename.is_empty() {
            return Err(format!("Invalid remote path: {}", remote));
        }

        let local = unique_destination(&dest_dir.join(slot.filename));

        let source_size = match remote_file_size(self.channel.as_ref(), remote).await {
            Ok(0) => return Err(format!("Could not determine size of {}", slot.filename)),
            Ok(size) => size,
            Err(e) => return Err(format!("Could not determine size of {}: {}", slot.filename, e)),
        };

        // The pull future and the ticker are dropped at the end of this block,
        // before `local` is handed back.
        let result = {
            let pull = self.channel.pull(remote, &local);
            tokio::pin!(pull);

            let mut ticker = tokio::time::interval_at(Instant::now() + self.progress_interval, self.progress_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut reported: u8 = 0;

            loop {
                tokio::select! {
                    result = &mut pull => break result,
                    _ = ticker.tick() => {
                        let written = tokio::fs::metadata(&local).await.map(|m| m.len()).unwrap_or(0);
                        // Buffered writes can make the file appear to shrink.
                        reported = reported.max(progress_percent(written, source_size));
                        self.emit(slot.progress(reported));
                    }
                }
            }
        };

        let stderr = match result {
            Ok(output) if output.success() => return Ok(local),
            Ok(output) => output.stderr,
            Err(e) => e.to_string(),
        };

        remove_partial(&local).await;
        Err(classify_pull_error(&stderr).to_string())
    }

    /// Releases the batch slot and emits the terminal event.
    fn finish(&self, event: TransferProgress) -> TransferProgress {
        let mut state = self.state.lock();
        state.is_transferring = false;
        match &event {
            TransferProgress::Complete {
                completed_files,
                failed_files,
                ..
            }
            | TransferProgress::Cancelled {
                completed_files,
                failed_files,
                ..
            } => {
                state.completed_files = completed_files.clone();
                state.failed_files = failed_files.clone();
            }
            _ => {}
        }
        if !matches!(event, TransferProgress::Cancelled { .. }) {
            state.cancel_requested = false;
        }
        log::info!("Batch {:?} finished: {:?}", state.batch_id, event);

        // Emitted under the lock so a new batch cannot publish before this one ends.
        self.sink.emit(AppEvent::TransferProgress(event.clone()));
        event
    }

    pub(crate) fn emit(&self, progress: TransferProgress) {
        self.sink.emit(AppEvent::TransferProgress(progress));
    }
}

/// Best-effort removal of a partially pulled file.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove partial file {}: {}", path.display(), e),
    }
}
