//! Screen mirror lifecycle.
//!
//! At most one mirror process is tracked at a time. A watcher task waits for
//! the process to end; if it ends on its own (the user closed the window, the
//! device went away) the owner's exit callback fires exactly once. Stopping
//! through [`MirrorManager::stop`] untracks the process first, so a deliberate
//! stop never reports an unexpected exit.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::errors::BridgeError;
use crate::process::{terminate_process_tree, ProcessBackend, SystemProcessBackend};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MirrorStatus {
    Inactive,
    Starting,
    Active,
    Error { message: String },
    #[serde(rename = "scrcpy-not-installed")]
    ToolNotInstalled,
}

struct Tracked {
    pid: u32,
    /// Distinguishes this process from any later one
    generation: u64,
}

#[derive(Default)]
struct MirrorState {
    tracked: Option<Tracked>,
    generation: u64,
}

pub struct MirrorManager {
    backend: Arc<dyn ProcessBackend>,
    program: String,
    args: Vec<String>,
    state: Arc<Mutex<MirrorState>>,
}

impl MirrorManager {
    pub fn new(backend: Arc<dyn ProcessBackend>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            backend,
            program: program.into(),
            args,
            state: Arc::new(Mutex::new(MirrorState::default())),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(SystemProcessBackend),
            config.mirror_program.clone(),
            config.mirror_args.clone(),
        )
    }

    pub fn status(&self) -> MirrorStatus {
        if self.state.lock().tracked.is_some() {
            MirrorStatus::Active
        } else {
            MirrorStatus::Inactive
        }
    }

    /// Launches the mirror unless one is already running.
    ///
    /// `on_exit` runs once if the process later ends without [`stop`](Self::stop)
    /// being called. Must be called from within a tokio runtime.
    pub fn start<F>(&self, on_exit: F) -> MirrorStatus
    where
        F: FnOnce() + Send + 'static,
    {
        // Held across the spawn so concurrent starts cannot both launch.
        let mut state = self.state.lock();
        if state.tracked.is_some() {
            log::debug!("{} already running", self.program);
            return MirrorStatus::Active;
        }

        if !self.backend.is_installed(&self.program) {
            log::warn!("{} is not installed", self.program);
            return MirrorStatus::ToolNotInstalled;
        }

        let spawned = match self.backend.spawn_detached(&self.program, &self.args) {
            Ok(spawned) => spawned,
            Err(BridgeError::ToolMissing(_)) => return MirrorStatus::ToolNotInstalled,
            Err(e) => {
                log::error!("Failed to start {}: {}", self.program, e);
                return MirrorStatus::Error {
                    message: format!("Failed to start {}: {}", self.program, e),
                };
            }
        };

        state.generation += 1;
        let generation = state.generation;
        state.tracked = Some(Tracked {
            pid: spawned.pid,
            generation,
        });
        drop(state);
        log::info!("Started {} (pid {})", self.program, spawned.pid);

        let shared = self.state.clone();
        let program = self.program.clone();
        let exited = spawned.exited;
        tokio::spawn(async move {
            let exit = exited.await;

            let unexpected = {
                let mut state = shared.lock();
                match &state.tracked {
                    Some(tracked) if tracked.generation == generation => {
                        state.tracked = None;
                        true
                    }
                    _ => false,
                }
            };

            if unexpected {
                log::info!("{} exited on its own: {:?}", program, exit);
                on_exit();
            }
        });

        MirrorStatus::Active
    }

    /// Terminates the tracked mirror and its process group. No-op when idle.
    pub fn stop(&self) {
        let tracked = self.state.lock().tracked.take();
        if let Some(tracked) = tracked {
            log::info!("Stopping {} (pid {})", self.program, tracked.pid);
            terminate_process_tree(self.backend.as_ref(), tracked.pid);
        }
    }
}

impl Drop for MirrorManager {
    fn drop(&mut self) {
        self.stop();
    }
}
