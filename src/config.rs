//! Engine configuration: external tool names, polling cadence and remote layout.

use std::time::Duration;

/// Configuration shared by the device monitor, transfer engine and mirror manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bridge executable (looked up on `PATH` unless absolute)
    pub bridge_program: String,
    /// Screen mirroring executable
    pub mirror_program: String,
    /// Extra arguments passed to the mirroring tool
    pub mirror_args: Vec<String>,
    /// How often the device monitor re-queries connectivity
    pub device_poll_interval: Duration,
    /// How often a running pull samples the destination file size
    pub progress_poll_interval: Duration,
    /// Hard-kill timeout for one-shot bridge commands. Pulls are exempt.
    pub command_timeout: Duration,
    /// Remote directory listed for videos
    pub remote_video_dir: String,
    /// Lowercase extensions treated as videos
    pub video_extensions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bridge_program: "adb".to_string(),
            mirror_program: "scrcpy".to_string(),
            mirror_args: Vec::new(),
            device_poll_interval: Duration::from_millis(2000),
            progress_poll_interval: Duration::from_millis(500),
            command_timeout: Duration::from_secs(15),
            remote_video_dir: "/sdcard/DCIM/Camera".to_string(),
            video_extensions: ["mp4", "mov", "mkv", "3gp", "webm", "avi"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `VIDEOBRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(program) = lookup("VIDEOBRIDGE_ADB").filter(|v| !v.trim().is_empty()) {
            self.bridge_program = program;
        }
        if let Some(program) = lookup("VIDEOBRIDGE_SCRCPY").filter(|v| !v.trim().is_empty()) {
            self.mirror_program = program;
        }
        if let Some(dir) = lookup("VIDEOBRIDGE_REMOTE_DIR").filter(|v| !v.trim().is_empty()) {
            self.remote_video_dir = dir.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("VIDEOBRIDGE_POLL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.device_poll_interval = Duration::from_millis(ms),
                _ => log::warn!("Ignoring invalid VIDEOBRIDGE_POLL_MS value {:?}", raw),
            }
        }
        self
    }

    /// Whether `filename` has one of the configured video extensions.
    pub fn is_video(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.video_extensions.iter().any(|known| *known == ext)
            }
            _ => false,
        }
    }
}
