use anyhow::{Context, Result};
use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipDateTime, ZipEntryBuilder};
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::fs_utils::SourceFile;

/// Totals for a finished archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryTotals {
    pub entries: usize,
    pub bytes: u64,
}

/// Streams every file from `files` into a deflate ZIP on `out`, one at a time,
/// then writes the central directory and syncs the handle.
pub async fn write_zip<I>(files: I, out: File) -> Result<EntryTotals>
where
    I: IntoIterator<Item = Result<SourceFile>>,
{
    let mut writer = ZipFileWriter::with_tokio(out);
    let mut totals = EntryTotals::default();

    for file in files {
        let file = file?;
        let input = File::open(&file.path)
            .await
            .with_context(|| format!("opening {}", file.path.display()))?;
        let meta = input
            .metadata()
            .await
            .with_context(|| format!("reading metadata of {}", file.path.display()))?;

        let entry = entry_builder(file.name_in_archive.clone(), &meta);
        let mut entry_writer = writer
            .write_entry_stream(entry)
            .await
            .with_context(|| format!("adding {} to archive", file.name_in_archive))?;
        let copied = futures::io::copy(input.compat(), &mut entry_writer)
            .await
            .with_context(|| format!("compressing {}", file.path.display()))?;
        entry_writer
            .close()
            .await
            .with_context(|| format!("finishing entry {}", file.name_in_archive))?;

        log::debug!("added {} ({} bytes)", file.name_in_archive, copied);
        totals.entries += 1;
        totals.bytes += copied;
    }

    let mut out = writer
        .close()
        .await
        .context("writing archive central directory")?
        .into_inner();
    out.flush().await?;
    out.sync_all().await?;

    Ok(totals)
}

fn entry_builder(name: String, meta: &Metadata) -> ZipEntryBuilder {
    let mut builder = ZipEntryBuilder::new(name.into(), Compression::Deflate);

    if let Ok(modified) = meta.modified() {
        let modified: DateTime<Utc> = modified.into();
        builder = builder.last_modification_date(ZipDateTime::from_chrono(&modified));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder = builder.unix_permissions((meta.permissions().mode() & 0xFFFF) as u16);
    }

    builder
}
