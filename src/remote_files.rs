//! Remote file operations: video listing, size queries and batch delete.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::bridge::{shell_args, shell_quote, CommandChannel};
use crate::config::EngineConfig;
use crate::errors::{classify_delete_error, BridgeError, BridgeResult};

/// A video on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    /// Absolute remote path
    pub path: String,
    pub filename: String,
    pub size: u64,
    /// Display only; `size` is authoritative
    pub human_size: String,
    pub modified_at: DateTime<Utc>,
}

/// A file that a batch operation could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<FileFailure>,
}

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with 1024-based units, e.g. `"1.5 GB"`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, SIZE_UNITS[unit])
}

/// Last path component of a remote (always `/`-separated) path.
pub fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Parses `stat -c '%s %Y %n'` lines into videos, skipping anything malformed.
fn parse_listing(stdout: &str, config: &EngineConfig) -> Vec<VideoFile> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim_end().splitn(3, ' ');
            let size = parts.next()?.parse::<u64>().ok()?;
            let mtime = parts.next()?.parse::<i64>().ok()?;
            let path = parts.next()?.to_string();
            let filename = remote_basename(&path).to_string();
            if !config.is_video(&filename) {
                return None;
            }
            Some(VideoFile {
                human_size: format_size(size),
                modified_at: Utc.timestamp_opt(mtime, 0).single()?,
                path,
                filename,
                size,
            })
        })
        .collect()
}

/// Lists videos in the configured remote directory, newest first.
pub async fn list_videos(channel: &dyn CommandChannel, config: &EngineConfig) -> BridgeResult<Vec<VideoFile>> {
    let dir = config.remote_video_dir.trim_end_matches('/');
    let script = format!("stat -c '%s %Y %n' {}/*", shell_quote(dir));
    let output = channel.run(&shell_args(script)).await?;

    let mut videos = parse_listing(&output.stdout, config);
    if !output.success() && videos.is_empty() {
        let lower = output.stderr.to_lowercase();
        if lower.contains("no such file") || output.stderr.trim().is_empty() {
            // Missing directory or nothing matched the glob.
            return Ok(Vec::new());
        }
        return Err(BridgeError::CommandFailed {
            command: "stat".to_string(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    videos.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    log::debug!("Listed {} videos in {}", videos.len(), dir);
    Ok(videos)
}

/// Authoritative size of a remote file in bytes.
pub async fn remote_file_size(channel: &dyn CommandChannel, path: &str) -> BridgeResult<u64> {
    let output = channel
        .run(&shell_args(format!("stat -c %s {}", shell_quote(path))))
        .await?;

    if !output.success() {
        return Err(BridgeError::CommandFailed {
            command: "stat".to_string(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    let text = output.stdout.trim();
    text.parse::<u64>()
        .map_err(|_| BridgeError::InvalidOutput(format!("size of {}: {:?}", path, text)))
}

/// Deletes one remote file. Older adb versions exit 0 even when the shell
/// command fails, so any diagnostic output also counts as failure.
async fn delete_remote_file(channel: &dyn CommandChannel, path: &str) -> Result<(), String> {
    let output = channel
        .run(&shell_args(format!("rm {}", shell_quote(path))))
        .await
        .map_err(|e| e.to_string())?;

    let diagnostics = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };

    if output.success() && diagnostics.is_empty() {
        Ok(())
    } else {
        Err(classify_delete_error(diagnostics).to_string())
    }
}

/// Deletes `paths` one at a time; a failure never stops the rest.
pub async fn delete_remote_files(channel: &dyn CommandChannel, paths: &[String]) -> DeleteReport {
    let mut report = DeleteReport::default();

    for path in paths {
        match delete_remote_file(channel, path).await {
            Ok(()) => report.deleted.push(path.clone()),
            Err(error) => {
                log::warn!("Failed to delete {}: {}", path, error);
                report.failed.push(FileFailure {
                    path: path.clone(),
                    error,
                });
            }
        }
    }

    log::info!("Deleted {} of {} remote files", report.deleted.len(), paths.len());
    report
}
