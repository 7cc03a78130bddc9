//! Artifact builder: installs the package for one variant inside a fresh
//! build environment and stages the installed tree on the host.
//!
//! Every call gets its own temporary workspace and its own uniquely named
//! environment instance. The instance is torn down on every exit path,
//! including failed steps and Ctrl-C.

use crate::core::config::BuildConfig;
use crate::core::error::PipelineError;
use crate::core::interrupt::interrupted;
use crate::core::traits::{BuildEnvironment, EnvironmentHandle};
use crate::core::variant::VariantSpec;
use std::future::Future;
use std::io::Cursor;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Build settings shared by every variant
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub base_image_template: String,
    pub workdir: String,
    pub export_dir: String,
    pub timeout: Duration,
}

impl From<&BuildConfig> for BuildOptions {
    fn from(config: &BuildConfig) -> Self {
        Self {
            base_image_template: config.base_image_template.clone(),
            workdir: config.workdir.clone(),
            export_dir: config.export_dir.clone(),
            timeout: config.timeout(),
        }
    }
}

impl BuildOptions {
    /// Image for a runtime version, substituting `{version}` in the template
    pub fn base_image(&self, runtime_version: &str) -> String {
        self.base_image_template.replace("{version}", runtime_version)
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&BuildConfig::default())
    }
}

/// Staged file tree of one variant
///
/// The tree lives in a temporary workspace that is deleted when the artifact
/// is dropped.
#[derive(Debug)]
pub struct BuildArtifact {
    variant: String,
    workspace: TempDir,
    file_count: usize,
}

impl BuildArtifact {
    /// Variant label the artifact was built for
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Root of the staged tree; archive entries are relative to it
    pub fn root(&self) -> &Path {
        self.workspace.path()
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }
}

/// Builds variant artifacts through a [`BuildEnvironment`]
pub struct ArtifactBuilder {
    environment: Arc<dyn BuildEnvironment>,
    options: BuildOptions,
}

impl ArtifactBuilder {
    pub fn new(environment: Arc<dyn BuildEnvironment>, options: BuildOptions) -> Self {
        Self {
            environment,
            options,
        }
    }

    /// Build one variant into a staged file tree
    ///
    /// # Errors
    ///
    /// - `PipelineError::BuildFailure` - environment or install step failed
    /// - `PipelineError::ExtractionFailure` - the installed tree could not be staged
    /// - `PipelineError::Interrupted` - Ctrl-C arrived mid-build
    pub async fn build(&self, spec: &VariantSpec) -> Result<BuildArtifact, PipelineError> {
        let workspace = tempfile::Builder::new()
            .prefix("layer-build-")
            .tempdir()
            .map_err(|e| build_failure(spec, format!("failed to create workspace: {}", e)))?;

        let handle = EnvironmentHandle {
            id: instance_name(spec),
            image: self.options.base_image(spec.runtime_version()),
        };

        info!(
            variant = %spec,
            image = %handle.image,
            instance = %handle.id,
            provider = self.environment.name(),
            "building layer"
        );

        let outcome = tokio::select! {
            result = self.run_steps(spec, &handle, workspace.path()) => result,
            _ = interrupted() => Err(PipelineError::Interrupted {
                scope: spec.display_name().to_string(),
            }),
        };

        if let Err(e) = self.environment.teardown(&handle).await {
            warn!(instance = %handle.id, error = %e, "failed to tear down build environment");
        } else {
            debug!(instance = %handle.id, "build environment removed");
        }

        let file_count = outcome?;
        info!(variant = %spec, files = file_count, "layer built");

        Ok(BuildArtifact {
            variant: spec.display_name().to_string(),
            workspace,
            file_count,
        })
    }

    /// Instantiate, install, export and unpack; returns the staged file count
    async fn run_steps(
        &self,
        spec: &VariantSpec,
        handle: &EnvironmentHandle,
        staging: &Path,
    ) -> Result<usize, PipelineError> {
        let workdir = self.options.workdir.as_str();

        self.bounded(spec, "instantiate", self.environment.instantiate(handle))
            .await?
            .map_err(|e| build_failure(spec, format!("instantiate failed: {:#}", e)))?;

        for argv in install_commands(spec) {
            let output = self
                .bounded(spec, &argv[0], self.environment.execute(handle, workdir, &argv))
                .await?
                .map_err(|e| build_failure(spec, format!("{} failed: {:#}", argv[0], e)))?;

            debug!(variant = %spec, command = ?argv, stdout = %output.stdout_text(), "step finished");
            if !output.success() {
                return Err(build_failure(
                    spec,
                    format!(
                        "`{}` exited with {}: {}",
                        argv.join(" "),
                        output.exit_code,
                        output.stderr_text().trim()
                    ),
                ));
            }
        }

        let stream = self
            .bounded(
                spec,
                "export",
                self.environment
                    .export_tree(handle, workdir, &self.options.export_dir),
            )
            .await?
            .map_err(|e| extraction_failure(spec, format!("export failed: {:#}", e)))?;

        let file_count = unpack_tree(&stream, staging).map_err(|e| extraction_failure(spec, e))?;
        if file_count == 0 {
            return Err(extraction_failure(
                spec,
                format!("exported directory '{}' contains no files", self.options.export_dir),
            ));
        }

        Ok(file_count)
    }

    /// Apply the per-step timeout
    async fn bounded<T>(
        &self,
        spec: &VariantSpec,
        step: &str,
        future: impl Future<Output = T>,
    ) -> Result<T, PipelineError> {
        tokio::time::timeout(self.options.timeout, future)
            .await
            .map_err(|_| {
                build_failure(
                    spec,
                    format!("{} timed out after {:?}", step, self.options.timeout),
                )
            })
    }
}

/// Commands run inside the environment, in order
///
/// The package source is passed as a single argument, exactly as configured.
pub fn install_commands(spec: &VariantSpec) -> Vec<Vec<String>> {
    let site_packages = spec.site_packages_dir();
    vec![
        vec!["mkdir".to_string(), "-p".to_string(), site_packages.clone()],
        vec![
            "pip".to_string(),
            "install".to_string(),
            spec.package_source().to_string(),
            "-t".to_string(),
            site_packages,
        ],
    ]
}

fn instance_name(spec: &VariantSpec) -> String {
    let version: String = spec
        .runtime_version()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!("layer-build-py{}-{}", version, uuid::Uuid::new_v4().simple())
}

/// Unpack a tar stream into `dest`, returning the number of regular files
fn unpack_tree(stream: &[u8], dest: &Path) -> Result<usize, String> {
    let mut archive = tar::Archive::new(Cursor::new(stream));
    let mut files = 0;

    let entries = archive
        .entries()
        .map_err(|e| format!("unreadable tar stream: {}", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("unreadable tar entry: {}", e))?;
        let path = entry
            .path()
            .map_err(|e| format!("invalid entry path: {}", e))?
            .into_owned();

        validate_entry_path(&path)?;

        if entry.header().entry_type().is_file() {
            files += 1;
        }
        entry
            .unpack_in(dest)
            .map_err(|e| format!("failed to unpack {}: {}", path.display(), e))?;
    }

    Ok(files)
}

/// Reject entries that would land outside the staging directory
fn validate_entry_path(path: &Path) -> Result<(), String> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });

    if escapes {
        Err(format!("path traversal detected: {}", path.display()))
    } else {
        Ok(())
    }
}

fn build_failure(spec: &VariantSpec, message: String) -> PipelineError {
    PipelineError::BuildFailure {
        variant: spec.display_name().to_string(),
        message,
    }
}

fn extraction_failure(spec: &VariantSpec, message: String) -> PipelineError {
    PipelineError::ExtractionFailure {
        variant: spec.display_name().to_string(),
        message,
    }
}
