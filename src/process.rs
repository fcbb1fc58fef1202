//! Long-running external process management.
//!
//! The mirroring tool runs detached in its own process group so that stopping
//! it can take down any helper processes it spawned. [`ProcessBackend`] is the
//! seam that lets the kill strategy be exercised without real processes.

use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::errors::{BridgeError, BridgeResult};

/// How a managed process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Process exited; `None` when killed by a signal
    Exited(Option<i32>),
    /// Waiting on the process failed
    Failed(String),
}

/// A freshly spawned process: its pid and a future resolving when it ends.
pub struct SpawnedProcess {
    pub pid: u32,
    pub exited: BoxFuture<'static, ProcessExit>,
}

pub trait ProcessBackend: Send + Sync {
    /// Whether `program` can be found.
    fn is_installed(&self, program: &str) -> bool;

    /// Spawns `program` detached from our session, in a new process group.
    fn spawn_detached(&self, program: &str, args: &[String]) -> BridgeResult<SpawnedProcess>;

    /// Sends SIGTERM to the process group led by `pid`.
    fn signal_group(&self, pid: u32) -> std::io::Result<()>;

    /// Sends SIGTERM to `pid` alone.
    fn signal_process(&self, pid: u32) -> std::io::Result<()>;
}

/// Terminates the process group led by `pid`, falling back to the process itself.
/// A process that is already gone is not an error.
pub fn terminate_process_tree(backend: &dyn ProcessBackend, pid: u32) {
    match backend.signal_group(pid) {
        Ok(()) => log::debug!("Sent SIGTERM to process group {}", pid),
        Err(group_err) => {
            log::debug!("Signalling process group {} failed ({}), signalling process", pid, group_err);
            if let Err(e) = backend.signal_process(pid) {
                log::debug!("Process {} already gone: {}", pid, e);
            }
        }
    }
}

/// Backend that spawns real OS processes through tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessBackend;

impl ProcessBackend for SystemProcessBackend {
    fn is_installed(&self, program: &str) -> bool {
        find_program(program).is_some()
    }

    fn spawn_detached(&self, program: &str, args: &[String]) -> BridgeResult<SpawnedProcess> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::ToolMissing(program.to_string())
            } else {
                BridgeError::Io(e)
            }
        })?;

        let pid = child
            .id()
            .ok_or_else(|| BridgeError::Internal(format!("{} exited immediately", program)))?;

        let exited = async move {
            match child.wait().await {
                Ok(status) => ProcessExit::Exited(status.code()),
                Err(e) => ProcessExit::Failed(e.to_string()),
            }
        }
        .boxed();

        Ok(SpawnedProcess { pid, exited })
    }

    #[cfg(unix)]
    fn signal_group(&self, pid: u32) -> std::io::Result<()> {
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(unix)]
    fn signal_process(&self, pid: u32) -> std::io::Result<()> {
        // SAFETY: kill has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _pid: u32) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process groups are not supported on this platform",
        ))
    }

    #[cfg(not(unix))]
    fn signal_process(&self, pid: u32) -> std::io::Result<()> {
        let status = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "taskkill failed"))
        }
    }
}

/// Resolves `program` to an executable path, searching `PATH` for bare names.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .flat_map(|dir| executable_names(program).into_iter().map(move |name| dir.join(name)))
        .find(|path| is_executable(path))
}

fn executable_names(program: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(program).extension().is_none() {
        vec![format!("{}.exe", program), program.to_string()]
    } else {
        vec![program.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
