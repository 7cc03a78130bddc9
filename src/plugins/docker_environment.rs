//! Docker Plugin - build environments backed by the docker CLI
//!
//! Each instance is a detached container kept alive with `sleep infinity`.
//! Commands run through `docker exec`, the installed tree comes back as a
//! `tar` stream on stdout, and `docker rm -f` removes the container.

use crate::core::traits::{BuildEnvironment, EnvironmentHandle, ExecOutput};
use crate::security::SafeCommandExecutor;
use async_trait::async_trait;
use std::process::Output;
use tracing::debug;

/// Container-runtime build environment
pub struct DockerEnvironment {
    executor: SafeCommandExecutor,
    binary: String,
}

impl DockerEnvironment {
    /// Create a provider using the `docker` binary
    pub fn new(executor: SafeCommandExecutor) -> Self {
        Self::with_binary(executor, "docker")
    }

    /// Create a provider for a docker-compatible CLI (e.g., "podman")
    pub fn with_binary(executor: SafeCommandExecutor, binary: &str) -> Self {
        Self {
            executor,
            binary: binary.to_string(),
        }
    }

    async fn run(&self, args: &[String]) -> anyhow::Result<Output> {
        Ok(self.executor.execute(&self.binary, args).await?)
    }
}

fn run_args(handle: &EnvironmentHandle) -> Vec<String> {
    [
        "run",
        "-d",
        "--rm",
        "--name",
        handle.id.as_str(),
        handle.image.as_str(),
        "sleep",
        "infinity",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn exec_args(handle: &EnvironmentHandle, workdir: &str, argv: &[String]) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "-w".to_string(),
        workdir.to_string(),
        handle.id.clone(),
    ];
    args.extend(argv.iter().cloned());
    args
}

fn export_args(handle: &EnvironmentHandle, workdir: &str, dir: &str) -> Vec<String> {
    let tar = ["tar", "cf", "-", dir].map(String::from);
    exec_args(handle, workdir, &tar)
}

fn remove_args(handle: &EnvironmentHandle) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), handle.id.clone()]
}

/// `docker rm -f` on a container that is already gone is not a failure
fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container")
}

#[async_trait]
impl BuildEnvironment for DockerEnvironment {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn instantiate(&self, handle: &EnvironmentHandle) -> anyhow::Result<()> {
        let output = self.run(&run_args(handle)).await?;
        if !output.status.success() {
            anyhow::bail!(
                "{} run {} failed: {}",
                self.binary,
                handle.image,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        debug!(
            instance = %handle.id,
            container = %String::from_utf8_lossy(&output.stdout).trim(),
            "container started"
        );
        Ok(())
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        workdir: &str,
        argv: &[String],
    ) -> anyhow::Result<ExecOutput> {
        let output = self.run(&exec_args(handle, workdir, argv)).await?;

        Ok(ExecOutput {
            // None means the process was killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn export_tree(
        &self,
        handle: &EnvironmentHandle,
        workdir: &str,
        dir: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let output = self.run(&export_args(handle, workdir, dir)).await?;
        if !output.status.success() {
            anyhow::bail!(
                "tar export of {}/{} failed: {}",
                workdir,
                dir,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output.stdout)
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> anyhow::Result<()> {
        let output = self.run(&remove_args(handle)).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() && !is_missing_container(&stderr) {
            anyhow::bail!("{} rm {} failed: {}", self.binary, handle.id, stderr.trim());
        }

        Ok(())
    }
}
