//! Command channel to the device bridge tool.
//!
//! Everything the engine does on the device goes through [`CommandChannel`]:
//! one-shot commands with captured output, and long-running pulls. The real
//! implementation shells out to `adb`; tests substitute a scripted fake.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::EngineConfig;
use crate::errors::{BridgeError, BridgeResult};
use crate::process::find_program;

/// Captured result of a finished bridge command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn from_std(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }
    }
}

#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Whether the bridge executable can be found.
    async fn is_tool_available(&self) -> bool;

    /// Runs a one-shot bridge command (`adb <args>`) and captures its output.
    async fn run(&self, args: &[String]) -> BridgeResult<CommandOutput>;

    /// Pulls `remote` into `local`. Runs until the bridge exits; never timed out.
    async fn pull(&self, remote: &str, local: &Path) -> BridgeResult<CommandOutput>;
}

/// Quotes `value` for the device-side POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Arguments running `script` through `adb shell`.
pub fn shell_args(script: impl Into<String>) -> Vec<String> {
    vec!["shell".to_string(), script.into()]
}

/// [`CommandChannel`] backed by the real `adb` executable.
pub struct AdbChannel {
    program: String,
    timeout: Duration,
}

impl AdbChannel {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.bridge_program.clone(),
            timeout: config.command_timeout,
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    fn spawn_error(&self, e: std::io::Error) -> BridgeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            BridgeError::ToolMissing(self.program.clone())
        } else {
            BridgeError::Io(e)
        }
    }
}

#[async_trait]
impl CommandChannel for AdbChannel {
    async fn is_tool_available(&self) -> bool {
        let program = self.program.clone();
        tokio::task::spawn_blocking(move || find_program(&program).is_some())
            .await
            .unwrap_or(false)
    }

    async fn run(&self, args: &[String]) -> BridgeResult<CommandOutput> {
        log::debug!("Running `{}`", self.describe(args));

        // Dropping the output future on timeout kills the child (kill_on_drop).
        let output = tokio::time::timeout(self.timeout, self.command(args).output())
            .await
            .map_err(|_| BridgeError::Timeout(self.describe(args)))?
            .map_err(|e| self.spawn_error(e))?;

        Ok(CommandOutput::from_std(output))
    }

    async fn pull(&self, remote: &str, local: &Path) -> BridgeResult<CommandOutput> {
        let args = vec![
            "pull".to_string(),
            remote.to_string(),
            local.to_string_lossy().into_owned(),
        ];
        log::debug!("Running `{}`", self.describe(&args));

        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        Ok(CommandOutput::from_std(output))
    }
}
