use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Scoped output for an archive being written.
///
/// Bytes go to a temporary file next to the destination. [`ArchiveSink::commit`]
/// renames it over the destination; dropping the sink without committing
/// removes the temporary file and leaves any previous archive untouched.
pub struct ArchiveSink {
    destination: PathBuf,
    temp: NamedTempFile,
}

impl ArchiveSink {
    /// Creates the destination directory if needed and opens the temporary file.
    pub fn create<P: AsRef<Path>>(destination: P) -> Result<Self> {
        let destination = destination.as_ref().to_path_buf();
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        fs::create_dir_all(&dir)
            .with_context(|| format!("creating destination directory {}", dir.display()))?;

        let temp = tempfile::Builder::new()
            .prefix(".rootpack-")
            .suffix(".zip.part")
            .tempfile_in(&dir)
            .with_context(|| format!("creating temporary archive in {}", dir.display()))?;

        Ok(Self { destination, temp })
    }

    /// An async handle onto the temporary file.
    pub fn writer(&self) -> Result<tokio::fs::File> {
        let file = self
            .temp
            .as_file()
            .try_clone()
            .context("cloning temporary archive handle")?;
        Ok(tokio::fs::File::from_std(file))
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Moves the finished archive into place, replacing any existing file.
    pub fn commit(self) -> Result<PathBuf> {
        let destination = self.destination;
        self.temp
            .persist(&destination)
            .map_err(|e| e.error)
            .with_context(|| format!("moving archive into {}", destination.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&destination, fs::Permissions::from_mode(0o644))
                .with_context(|| format!("setting permissions on {}", destination.display()))?;
        }

        Ok(destination)
    }
}
