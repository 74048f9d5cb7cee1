use anyhow::{Context, Result};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Builder;

use crate::fs_utils::{SourceFile, SourceWalker, archive_name, check_size_limit};
use crate::packaging::zip::write_zip;
use crate::sink::ArchiveSink;

pub mod zip;

/// What to package and where to put it.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub source_root: PathBuf,
    pub destination_path: PathBuf,
    pub skip: Vec<Pattern>,
    /// Zero or `None` means unlimited.
    pub max_size: Option<u64>,
}

impl ArchiveJob {
    pub fn new(source_root: impl Into<PathBuf>, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_path: destination_path.into(),
            skip: Vec::new(),
            max_size: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub destination: PathBuf,
    pub entries: usize,
    pub bytes: u64,
}

/// Lists the files `build_archive` would package, without writing anything.
pub fn plan_archive(job: &ArchiveJob) -> Result<Vec<SourceFile>> {
    let files = source_walker(job)?.collect::<Result<Vec<_>>>()?;
    if let Some(limit) = job.max_size {
        check_size_limit(files.iter().map(|f| f.len).sum(), limit)?;
    }
    Ok(files)
}

/// Packages the source root into a deflate ZIP at the destination path.
///
/// The destination directory is created when missing and an existing archive
/// is replaced only once the new one is complete. On failure the partial
/// output is removed.
pub fn build_archive(job: &ArchiveJob) -> Result<ArchiveSummary> {
    log::info!(
        "packaging {} into {}",
        job.source_root.display(),
        job.destination_path.display()
    );

    let mut walker = source_walker(job)?;
    // with a limit the whole tree is listed and checked before anything is created
    let planned = match job.max_size {
        Some(_) => Some(plan_archive(job)?),
        None => None,
    };

    let sink = ArchiveSink::create(&job.destination_path)?;
    let out = sink.writer()?;
    let rt = Builder::new_current_thread().enable_all().build()?;
    let totals = match planned {
        Some(files) => rt.block_on(write_zip(files.into_iter().map(Ok), out))?,
        None => {
            if let Some(pattern) = exclusion_for(&job.source_root, sink.temp_path())? {
                walker.exclude(pattern);
            }
            rt.block_on(write_zip(walker, out))?
        }
    };

    let destination = sink.commit()?;
    log::info!(
        "wrote {} entries ({} bytes) to {}",
        totals.entries,
        totals.bytes,
        destination.display()
    );

    Ok(ArchiveSummary {
        destination,
        entries: totals.entries,
        bytes: totals.bytes,
    })
}

/// Walker over the job's source that never yields the job's own destination.
fn source_walker(job: &ArchiveJob) -> Result<SourceWalker> {
    let mut walker = SourceWalker::new(&job.source_root, job.skip.clone())?;
    if let Some(pattern) = exclusion_for(&job.source_root, &job.destination_path)? {
        walker.exclude(pattern);
    }
    Ok(walker)
}

/// Pattern matching `path` by its entry name when it lies inside the source
/// root. `None` when it lies elsewhere or its directory does not exist yet.
fn exclusion_for(source_root: &Path, path: &Path) -> Result<Option<Pattern>> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Ok(None);
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let Ok(parent) = fs::canonicalize(parent) else {
        return Ok(None);
    };

    let root = fs::canonicalize(source_root)
        .with_context(|| format!("resolving {}", source_root.display()))?;
    match archive_name(&root, &parent.join(name)) {
        Ok(entry) => Ok(Some(Pattern::new(&Pattern::escape(&entry))?)),
        Err(_) => Ok(None),
    }
}
