//! Core traits and types for layer building and publishing
//!
//! The pipeline talks to two external capabilities: an isolated build
//! environment and a per-region layer registry. Both are traits so the
//! pipeline can be driven by fakes in tests.

use crate::core::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Build environment
// ============================================================================

/// Handle to one running build environment instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Unique instance name
    pub id: String,
    /// Image the instance was created from
    pub image: String,
}

/// Captured result of a command run inside a build environment
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Provider of isolated build environments
///
/// Implementations may use a container runtime, a VM or a chroot, as long as
/// each instance is isolated from every other instance.
#[async_trait]
pub trait BuildEnvironment: Send + Sync {
    /// Provider name (e.g., "docker")
    fn name(&self) -> &str;

    /// Start a fresh instance named `handle.id` from `handle.image`
    async fn instantiate(&self, handle: &EnvironmentHandle) -> anyhow::Result<()>;

    /// Run `argv` inside the instance, from `workdir`
    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        workdir: &str,
        argv: &[String],
    ) -> anyhow::Result<ExecOutput>;

    /// Export the directory `dir` (relative to `workdir`) as a tar stream
    async fn export_tree(
        &self,
        handle: &EnvironmentHandle,
        workdir: &str,
        dir: &str,
    ) -> anyhow::Result<Vec<u8>>;

    /// Destroy the instance; must be safe to call when instantiation failed
    async fn teardown(&self, handle: &EnvironmentHandle) -> anyhow::Result<()>;
}

// ============================================================================
// Layer registry
// ============================================================================

/// Request to publish one archive as a new layer version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishVersionRequest {
    pub layer_name: String,
    pub description: String,
    pub archive_path: PathBuf,
    pub region: String,
    pub compatible_runtimes: Vec<String>,
}

/// Request to grant access to exactly one published version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantPermissionRequest {
    pub layer_name: String,
    pub region: String,
    pub version: String,
    pub statement_id: String,
    pub principal: String,
    pub action: String,
}

/// Raw response of a remote call, surfaced verbatim in logs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub raw: String,
}

/// How the registry answered a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// A new statement was recorded
    Granted,
    /// The statement id already existed for this version
    AlreadyGranted,
}

/// Response of a grant call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantResponse {
    pub status: GrantStatus,
    pub raw: String,
}

/// One regional layer registry
///
/// Publishing always creates a new version. Granting with a statement id that
/// already exists for the version must report [`GrantStatus::AlreadyGranted`]
/// rather than an error.
#[async_trait]
pub trait LayerRegistry: Send + Sync {
    /// Registry name (e.g., "aws-lambda")
    fn name(&self) -> &str;

    async fn publish_version(
        &self,
        request: &PublishVersionRequest,
    ) -> Result<RemoteResponse, PipelineError>;

    async fn grant_permission(
        &self,
        request: &GrantPermissionRequest,
    ) -> Result<GrantResponse, PipelineError>;
}
