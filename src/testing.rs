//! Fakes shared by the unit tests: a scripted bridge, an event recorder and a
//! process backend that never touches the OS.

use async_trait::async_trait;
use futures::future::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

use crate::bridge::{CommandChannel, CommandOutput};
use crate::device_monitor::DeviceStatus;
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{AppEvent, EventSink};
use crate::process::{ProcessBackend, ProcessExit, SpawnedProcess};
use crate::transfer::TransferProgress;

pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

pub fn failed_output(stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(1),
    }
}

/// Scripted behaviour of one pull.
#[derive(Clone)]
pub struct PullScript {
    /// Bytes written to the destination before the pull finishes
    pub bytes: u64,
    /// Pause after each partial write
    pub delay: Duration,
    /// Sizes written, each followed by `delay`, before the final full write.
    /// Empty means a single write of half the bytes.
    pub stages: Vec<u64>,
    pub output: CommandOutput,
    /// Notified when the pull begins
    pub started: Option<Arc<Notify>>,
    /// When set, the pull waits for a notification before finishing
    pub gate: Option<Arc<Notify>>,
}

impl PullScript {
    pub fn success(bytes: u64) -> Self {
        Self {
            bytes,
            delay: Duration::from_millis(5),
            stages: Vec::new(),
            output: ok_output(""),
            started: None,
            gate: None,
        }
    }

    pub fn failure(bytes: u64, stderr: &str) -> Self {
        Self {
            output: failed_output(stderr),
            ..Self::success(bytes)
        }
    }
}

/// [`CommandChannel`] answering from a script.
///
/// Rules match when their pattern is a substring of the space-joined argv;
/// the most recently added matching rule wins.
pub struct FakeChannel {
    available: AtomicBool,
    rules: Mutex<Vec<(String, Result<CommandOutput, String>)>>,
    pulls: Mutex<HashMap<String, PullScript>>,
    holds: Mutex<Vec<(String, Arc<Notify>, Arc<Notify>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            rules: Mutex::new(Vec::new()),
            pulls: Mutex::new(HashMap::new()),
            holds: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn on(&self, pattern: &str, output: CommandOutput) {
        self.rules.lock().push((pattern.to_string(), Ok(output)));
    }

    pub fn on_transport_error(&self, pattern: &str, message: &str) {
        self.rules.lock().push((pattern.to_string(), Err(message.to_string())));
    }

    /// Scripts `stat -c %s` for `remote` to print `size`.
    pub fn with_size(&self, remote: &str, size: u64) {
        self.on(&format!("stat -c %s '{}'", remote), ok_output(&format!("{}\n", size)));
    }

    pub fn on_pull(&self, remote: &str, script: PullScript) {
        self.pulls.lock().insert(remote.to_string(), script);
    }

    /// Makes commands matching `pattern` notify `started`, then wait on
    /// `gate` before answering.
    pub fn hold(&self, pattern: &str, started: Arc<Notify>, gate: Arc<Notify>) {
        self.holds.lock().push((pattern.to_string(), started, gate));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn is_tool_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn run(&self, args: &[String]) -> BridgeResult<CommandOutput> {
        let joined = args.join(" ");
        self.calls.lock().push(joined.clone());

        let hold = self
            .holds
            .lock()
            .iter()
            .find(|(pattern, _, _)| joined.contains(pattern.as_str()))
            .map(|(_, started, gate)| (started.clone(), gate.clone()));
        if let Some((started, gate)) = hold {
            started.notify_one();
            gate.notified().await;
        }

        let rule = self
            .rules
            .lock()
            .iter()
            .rev()
            .find(|(pattern, _)| joined.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());

        match rule {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                message,
            ))),
            None => Ok(failed_output(&format!("unscripted command: {}", joined))),
        }
    }

    async fn pull(&self, remote: &str, local: &Path) -> BridgeResult<CommandOutput> {
        self.calls.lock().push(format!("pull {} {}", remote, local.display()));

        let script = self
            .pulls
            .lock()
            .get(remote)
            .cloned()
            .unwrap_or_else(|| PullScript::success(1024));

        if let Some(started) = &script.started {
            started.notify_one();
        }

        if script.bytes > 0 {
            let stages = if script.stages.is_empty() {
                vec![script.bytes / 2]
            } else {
                script.stages.clone()
            };
            for size in stages {
                tokio::fs::write(local, vec![0u8; size as usize]).await?;
                tokio::time::sleep(script.delay).await;
            }
            tokio::fs::write(local, vec![0u8; script.bytes as usize]).await?;
        }

        if let Some(gate) = &script.gate {
            gate.notified().await;
        }

        Ok(script.output)
    }
}

/// Sink that keeps every event for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AppEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().clone()
    }

    pub fn device_statuses(&self) -> Vec<DeviceStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::DeviceStatusChanged(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn transfer_events(&self) -> Vec<TransferProgress> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::TransferProgress(progress) => Some(progress),
                _ => None,
            })
            .collect()
    }

    pub fn last_transfer_event(&self) -> Option<TransferProgress> {
        self.transfer_events().pop()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AppEvent) {
        self.events.lock().push(event);
    }
}

/// Process backend with scripted exits and recorded signals.
pub struct FakeProcessBackend {
    installed: AtomicBool,
    next_pid: AtomicU32,
    spawned: Mutex<Vec<u32>>,
    exits: Mutex<HashMap<u32, oneshot::Sender<ProcessExit>>>,
    group_signals: Mutex<Vec<u32>>,
    process_signals: Mutex<Vec<u32>>,
    group_fails: AtomicBool,
    process_fails: AtomicBool,
}

impl FakeProcessBackend {
    pub fn new() -> Self {
        Self {
            installed: AtomicBool::new(true),
            next_pid: AtomicU32::new(1000),
            spawned: Mutex::new(Vec::new()),
            exits: Mutex::new(HashMap::new()),
            group_signals: Mutex::new(Vec::new()),
            process_signals: Mutex::new(Vec::new()),
            group_fails: AtomicBool::new(false),
            process_fails: AtomicBool::new(false),
        }
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }

    pub fn fail_group_signals(&self) {
        self.group_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_process_signals(&self) {
        self.process_fails.store(true, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> Vec<u32> {
        self.spawned.lock().clone()
    }

    pub fn group_signals(&self) -> Vec<u32> {
        self.group_signals.lock().clone()
    }

    pub fn process_signals(&self) -> Vec<u32> {
        self.process_signals.lock().clone()
    }

    /// Makes process `pid` report `exit`, as if it ended on its own.
    pub fn finish(&self, pid: u32, exit: ProcessExit) {
        if let Some(tx) = self.exits.lock().remove(&pid) {
            let _ = tx.send(exit);
        }
    }
}

impl ProcessBackend for FakeProcessBackend {
    fn is_installed(&self, _program: &str) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    fn spawn_detached(&self, _program: &str, _args: &[String]) -> BridgeResult<SpawnedProcess> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.spawned.lock().push(pid);
        self.exits.lock().insert(pid, tx);

        let exited = async move {
            rx.await
                .unwrap_or_else(|_| ProcessExit::Failed("exit sender dropped".to_string()))
        }
        .boxed();

        Ok(SpawnedProcess { pid, exited })
    }

    fn signal_group(&self, pid: u32) -> std::io::Result<()> {
        self.group_signals.lock().push(pid);
        if self.group_fails.load(Ordering::SeqCst) {
            return Err(std::io::Error::from_raw_os_error(1));
        }
        self.finish(pid, ProcessExit::Exited(None));
        Ok(())
    }

    fn signal_process(&self, pid: u32) -> std::io::Result<()> {
        self.process_signals.lock().push(pid);
        if self.process_fails.load(Ordering::SeqCst) {
            return Err(std::io::Error::from_raw_os_error(3));
        }
        self.finish(pid, ProcessExit::Exited(None));
        Ok(())
    }
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
