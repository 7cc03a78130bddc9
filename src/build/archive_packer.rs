//! Archive packer: zips a staged tree into the output directory
//!
//! Archives are written to a temporary file next to the destination and
//! renamed into place, so a reader never observes a truncated archive.
//! Entries are sorted and carry a fixed timestamp, so packing the same tree
//! twice yields identical bytes.

use super::PackagedArchive;
use super::artifact_builder::BuildArtifact;
use crate::core::error::PipelineError;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Writes one zip archive per variant into `output_dir`
#[derive(Debug, Clone)]
pub struct ArchivePacker {
    output_dir: PathBuf,
}

impl ArchivePacker {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Location of the archive named `dest_name`
    pub fn archive_path(&self, dest_name: &str) -> PathBuf {
        self.output_dir.join(dest_name)
    }

    /// Pack `artifact` into `<output_dir>/<dest_name>`, replacing any previous archive
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::PackingFailure` on any I/O or zip error; the
    /// destination is left as it was.
    pub fn pack(
        &self,
        artifact: &BuildArtifact,
        dest_name: &str,
    ) -> Result<PackagedArchive, PipelineError> {
        let failure = |message: String| PipelineError::PackingFailure {
            variant: dest_name.to_string(),
            message,
        };

        if dest_name.is_empty() || dest_name.contains('/') || dest_name.contains('\\') {
            return Err(failure(format!("invalid archive name '{}'", dest_name)));
        }

        fs::create_dir_all(&self.output_dir).map_err(|e| {
            failure(format!(
                "cannot create output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let dest = self.archive_path(dest_name);
        let mut staged = tempfile::Builder::new()
            .prefix(&format!(".{}.", dest_name))
            .suffix(".partial")
            .tempfile_in(&self.output_dir)
            .map_err(|e| failure(format!("cannot create temporary archive: {}", e)))?;

        let entries = write_zip(artifact.root(), staged.as_file_mut())
            .map_err(|e| failure(format!("cannot write archive: {}", e)))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| failure(format!("cannot flush archive: {}", e)))?;

        staged
            .persist(&dest)
            .map_err(|e| failure(format!("cannot move archive into place: {}", e.error)))?;

        let size = fs::metadata(&dest)
            .map_err(|e| failure(format!("cannot stat archive: {}", e)))?
            .len();

        info!(archive = %dest.display(), entries, size, "archive packed");
        Ok(PackagedArchive {
            name: dest_name.to_string(),
            path: dest,
            size,
        })
    }

    /// Archives already present for `names`, in the given order
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::PackingFailure` for the first missing or empty archive.
    pub fn existing(&self, names: &[&str]) -> Result<Vec<PackagedArchive>, PipelineError> {
        names
            .iter()
            .map(|name| {
                let path = self.archive_path(name);
                match fs::metadata(&path) {
                    Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(PackagedArchive {
                        name: name.to_string(),
                        path,
                        size: meta.len(),
                    }),
                    _ => Err(PipelineError::PackingFailure {
                        variant: name.to_string(),
                        message: format!("archive not found: {}", path.display()),
                    }),
                }
            })
            .collect()
    }

    /// Remove the archives for `names`; returns the paths actually removed
    pub fn clean(&self, names: &[&str]) -> io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for name in names {
            let path = self.archive_path(name);
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// Zip every entry under `root` into `file`; returns the number of entries
fn write_zip(root: &Path, file: &mut File) -> zip::result::ZipResult<usize> {
    let mut writer = ZipWriter::new(file);
    let mut count = 0;

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(permissions(&entry)?);

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name.as_str(), options)?;
            io::copy(&mut File::open(entry.path())?, &mut writer)?;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular entry");
            continue;
        }
        count += 1;
    }

    writer.finish()?;
    Ok(count)
}

#[cfg(unix)]
fn permissions(entry: &walkdir::DirEntry) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(entry.metadata().map_err(io::Error::from)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permissions(entry: &walkdir::DirEntry) -> io::Result<u32> {
    Ok(if entry.file_type().is_dir() { 0o755 } else { 0o644 })
}
