//! Build stage: produce and package one archive per variant
//!
//! [`ArtifactBuilder`] installs the package inside an isolated environment
//! and stages the resulting tree on the host; [`ArchivePacker`] turns that
//! tree into the durable zip archive the publish stage uploads.

pub mod archive_packer;
pub mod artifact_builder;

pub use archive_packer::ArchivePacker;
pub use artifact_builder::{ArtifactBuilder, BuildArtifact, BuildOptions};

use std::path::PathBuf;

/// A packaged archive on disk, one per variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    /// Archive file name, unique per variant
    pub name: String,
    /// Absolute location of the archive
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}
