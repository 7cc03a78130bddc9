//! SafeCommandExecutor: whitelisted, shell-free external command execution
//!
//! # Security Features
//!
//! - **Whitelist-based validation**: Only pre-approved commands can execute
//! - **Injection prevention**: Arguments are passed as a vector, never through a shell
//! - **Working directory validation**: Validates existence before execution
//! - **Timeout control**: Hanging processes are killed once the timeout expires
//!
//! # Example
//!
//! ```rust,no_run
//! use layer_publisher::SafeCommandExecutor;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), layer_publisher::CommandError> {
//! let mut executor = SafeCommandExecutor::new(std::env::temp_dir())?;
//! executor.set_timeout(Duration::from_secs(30));
//!
//! let output = executor.execute("docker", &["--version"]).await?;
//! println!("{}", String::from_utf8_lossy(&output.stdout));
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Commands the pipeline is allowed to run by default
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &["docker", "podman", "aws"];

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowed whitelist
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Command could not be started (e.g., binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),
}

/// Safe command executor with security controls
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    /// Working directory where commands will be executed
    working_dir: PathBuf,
    /// Optional timeout for command execution
    timeout: Option<Duration>,
    /// Binaries this executor may run
    allowed: Vec<String>,
}

impl SafeCommandExecutor {
    /// Create an executor for [`DEFAULT_ALLOWED_COMMANDS`].
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidWorkingDirectory` if the directory does not exist.
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Result<Self, CommandError> {
        Self::with_allowlist(working_dir, DEFAULT_ALLOWED_COMMANDS)
    }

    /// Create an executor with an explicit whitelist
    pub fn with_allowlist<P: AsRef<Path>>(
        working_dir: P,
        allowed: &[&str],
    ) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.exists() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            timeout: None,
            allowed: allowed.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Set command execution timeout.
    ///
    /// Commands exceeding this duration are killed.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Builder-style variant of [`set_timeout`](Self::set_timeout)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Execute a whitelisted command and capture its output.
    ///
    /// A non-zero exit status is not an error here; callers inspect
    /// `output.status`.
    ///
    /// # Errors
    ///
    /// - `CommandError::CommandNotAllowed` - Command not in whitelist
    /// - `CommandError::ExecutionFailed` - Binary not found or execution error
    /// - `CommandError::Timeout` - The process outlived the timeout and was killed
    pub async fn execute<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<Output, CommandError> {
        if !self.allowed.iter().any(|c| c == command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }

        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        debug!(command, args = ?args, "executing");

        let child = Command::new(command)
            .args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| CommandError::Timeout(timeout))?
                .map_err(|e| CommandError::ExecutionFailed(e.to_string())),
            None => child
                .wait_with_output()
                .await
                .map_err(|e| CommandError::ExecutionFailed(e.to_string())),
        }
    }
}
