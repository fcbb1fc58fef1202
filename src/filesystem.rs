//! Destination folder filesystem classification.
//!
//! The only filesystem-imposed limit the engine enforces is FAT32's 4 GiB - 1
//! maximum file size, so classification only needs to be good enough to tell
//! FAT32 apart from everything else.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Largest file FAT32 can hold.
pub const FAT32_MAX_FILE_SIZE: u64 = 4_294_967_295;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilesystemType {
    #[serde(rename = "FAT32")]
    Fat32,
    #[serde(rename = "exFAT")]
    ExFat,
    #[serde(rename = "APFS")]
    Apfs,
    #[serde(rename = "HFS+")]
    HfsPlus,
    #[serde(rename = "NTFS")]
    Ntfs,
    #[serde(rename = "unknown")]
    Unknown,
}

impl FilesystemType {
    /// Maps an OS-reported filesystem name or a UI label to a type.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        if name.contains("exfat") {
            FilesystemType::ExFat
        } else if name.contains("fat32") || name == "vfat" || name == "msdos" || name == "fat" {
            FilesystemType::Fat32
        } else if name.contains("apfs") {
            FilesystemType::Apfs
        } else if name.contains("hfs") {
            FilesystemType::HfsPlus
        } else if name.contains("ntfs") {
            FilesystemType::Ntfs
        } else {
            FilesystemType::Unknown
        }
    }

    /// Largest file this filesystem accepts, when it has a ceiling at all.
    pub fn max_file_size(self) -> Option<u64> {
        match self {
            FilesystemType::Fat32 => Some(FAT32_MAX_FILE_SIZE),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemInfo {
    #[serde(rename = "type")]
    pub fs_type: FilesystemType,
    pub volume_name: String,
    pub max_file_size: Option<u64>,
}

impl FilesystemInfo {
    pub fn new(fs_type: FilesystemType, volume_name: impl Into<String>) -> Self {
        Self {
            fs_type,
            volume_name: volume_name.into(),
            max_file_size: fs_type.max_file_size(),
        }
    }
}

/// A selected local destination folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationInfo {
    pub path: PathBuf,
    pub filesystem: FilesystemInfo,
}

/// Finds the entry whose mount point is the longest prefix of `path`.
fn longest_mount<'a, T, F>(path: &Path, entries: &'a [T], mount_point: F) -> Option<&'a T>
where
    F: Fn(&T) -> &Path,
{
    entries
        .iter()
        .filter(|entry| path.starts_with(mount_point(entry)))
        .max_by_key(|entry| mount_point(entry).as_os_str().len())
}

fn volume_display_name(disk_name: &str, mount_point: &Path) -> String {
    if !disk_name.is_empty() {
        return disk_name.to_string();
    }
    mount_point
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| mount_point.display().to_string())
}

/// Classifies the filesystem holding `path`.
pub fn classify_filesystem(path: &Path) -> FilesystemInfo {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<(PathBuf, String, String)> = disks
        .iter()
        .map(|disk| {
            (
                disk.mount_point().to_path_buf(),
                disk.name().to_string_lossy().to_string(),
                disk.file_system().to_string_lossy().to_string(),
            )
        })
        .collect();

    match longest_mount(&path, &mounts, |(mount, _, _)| mount.as_path()) {
        Some((mount, name, fs_name)) => {
            let info = FilesystemInfo::new(FilesystemType::from_name(fs_name), volume_display_name(name, mount));
            log::debug!("{} is on {:?} ({})", path.display(), info.fs_type, fs_name);
            info
        }
        None => {
            log::warn!("No mounted volume found for {}", path.display());
            FilesystemInfo::new(FilesystemType::Unknown, volume_display_name("", &path))
        }
    }
}

/// Builds the destination record for a chosen folder.
pub fn describe_destination(path: PathBuf) -> DestinationInfo {
    let filesystem = classify_filesystem(&path);
    DestinationInfo { path, filesystem }
}
