use anyhow::{Context, Result, bail};
use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use glob::Pattern;

/// A regular file found under the source root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name_in_archive: String,
    pub len: u64,
}

enum Pending {
    Dir(PathBuf),
    File(PathBuf, u64),
}

/// Lazily walks a source root, yielding every regular file below it.
///
/// Directory entries are visited in name order, so two walks over an
/// unchanged tree yield the same sequence. Symlinks to files are followed,
/// symlinks to directories are not. The walker stops after the first error.
pub struct SourceWalker {
    root: PathBuf,
    skip: Vec<Pattern>,
    pending: Vec<Pending>,
    failed: bool,
}

impl SourceWalker {
    pub fn new(root: impl Into<PathBuf>, skip: Vec<Pattern>) -> Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root)
            .with_context(|| format!("source root {} is not accessible", root.display()))?;
        if !meta.is_dir() {
            bail!("source root {} is not a directory", root.display());
        }
        Ok(Self {
            pending: vec![Pending::Dir(root.clone())],
            root,
            skip,
            failed: false,
        })
    }

    /// Adds a pattern after construction; only affects directories not yet read.
    pub fn exclude(&mut self, pattern: Pattern) {
        self.skip.push(pattern);
    }

    fn is_skipped(&self, name: &str) -> bool {
        self.skip.iter().any(|p| p.matches(name))
    }

    fn expand(&mut self, dir: &Path) -> Result<()> {
        let mut children = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("reading directory {dir:?}"))? {
            let entry = entry.with_context(|| format!("reading directory {dir:?}"))?;
            let path = entry.path();
            let name = archive_name(&self.root, &path)?;
            if self.is_skipped(&name) {
                log::debug!("skipping {name}");
                continue;
            }

            let file_type = entry
                .file_type()
                .with_context(|| format!("reading file type of {}", path.display()))?;
            if file_type.is_dir() {
                children.push(Pending::Dir(path));
            } else if file_type.is_file() {
                let len = entry
                    .metadata()
                    .with_context(|| format!("reading metadata of {}", path.display()))?
                    .len();
                children.push(Pending::File(path, len));
            } else if file_type.is_symlink() {
                match fs::metadata(&path) {
                    Ok(meta) if meta.is_file() => children.push(Pending::File(path, meta.len())),
                    Ok(_) => log::debug!("not following directory link {name}"),
                    Err(e) => log::warn!("skipping dangling link {name}: {e}"),
                }
            }
        }

        children.sort_by(|a, b| pending_path(a).cmp(pending_path(b)));
        // stack: pushed in reverse so the smallest name pops first
        self.pending.extend(children.into_iter().rev());
        Ok(())
    }
}

fn pending_path(p: &Pending) -> &Path {
    match p {
        Pending::Dir(path) | Pending::File(path, _) => path,
    }
}

impl Iterator for SourceWalker {
    type Item = Result<SourceFile>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(item) = self.pending.pop() {
            match item {
                Pending::Dir(dir) => {
                    if let Err(e) = self.expand(&dir) {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
                Pending::File(path, len) => {
                    return Some(archive_name(&self.root, &path).map(|name_in_archive| {
                        SourceFile {
                            path,
                            name_in_archive,
                            len,
                        }
                    }));
                }
            }
        }
        None
    }
}

/// Entry name of `path` relative to `root`, components joined with `/`.
pub fn archive_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(s) = component {
            // entry names must map back to exactly one file
            let part = s
                .to_str()
                .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
            parts.push(part);
        }
    }

    if parts.is_empty() {
        bail!("{} has no name relative to {}", path.display(), root.display());
    }
    Ok(parts.join("/"))
}

pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("invalid skip pattern: {p}")))
        .collect()
}

/// Fails when `total` exceeds a non-zero `limit`.
pub fn check_size_limit(total: u64, limit: u64) -> Result<()> {
    if limit > 0 && total > limit {
        bail!(
            "total size {} ({} bytes) exceeds limit {} ({} bytes)",
            encode_size(total),
            total,
            encode_size(limit),
            limit
        );
    }
    Ok(())
}

/// Parse human-readable sizes in both binary (Ki/Mi/Gi) and decimal (KB/MB/GB) units.
/// Examples: "512Mi", "10Gi", "1MB", "500kb", "1024", "2.5GB"
pub fn parse_size(s: &str) -> Result<u64> {
    const SUFFIXES: [(&str, u64); 8] = [
        ("ki", 1 << 10),
        ("mi", 1 << 20),
        ("gi", 1 << 30),
        ("ti", 1 << 40),
        ("kb", 1_000),
        ("mb", 1_000_000),
        ("gb", 1_000_000_000),
        ("tb", 1_000_000_000_000),
    ];

    let lower = s.trim().to_ascii_lowercase();
    let (multiplier, number_str) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| lower.strip_suffix(suffix).map(|n| (*mult, n)))
        .unwrap_or((1, lower.as_str()));

    let number: f64 = number_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid size format: {}", s))?;
    if number < 0.0 {
        bail!("Invalid size format: {}", s);
    }

    Ok((number * multiplier as f64) as u64)
}

/// Convert bytes into a human-friendly string using binary (KiB, MiB, GiB...) units.
pub fn encode_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if size.fract() == 0.0 {
        format!("{:.0} {}", size, UNITS[unit])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn names(walker: SourceWalker) -> Vec<String> {
        walker
            .map(|f| f.unwrap().name_in_archive)
            .collect::<Vec<_>>()
    }

    #[test]
    fn walks_nested_tree_in_name_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "b.txt", b"b");
        touch(dir.path(), "a.txt", b"a");
        touch(dir.path(), "sub/c.txt", b"c");
        touch(dir.path(), "x/y/z/deep.bin", &[0, 1, 2]);

        let found = names(SourceWalker::new(dir.path(), Vec::new()).unwrap());
        assert_eq!(found, vec!["a.txt", "b.txt", "sub/c.txt", "x/y/z/deep.bin"]);
    }

    #[test]
    fn reports_file_lengths() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "data.bin", &[7u8; 300]);

        let files: Vec<SourceFile> = SourceWalker::new(dir.path(), Vec::new())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].len, 300);
        assert_eq!(files[0].path, dir.path().join("data.bin"));
    }

    #[test]
    fn empty_directories_yield_nothing() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("empty/inner")).unwrap();

        assert!(names(SourceWalker::new(dir.path(), Vec::new()).unwrap()).is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(SourceWalker::new(dir.path().join("nope"), Vec::new()).is_err());
    }

    #[test]
    fn file_root_is_an_error() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "plain.txt", b"x");
        assert!(SourceWalker::new(dir.path().join("plain.txt"), Vec::new()).is_err());
    }

    #[test]
    fn skip_patterns_match_relative_names() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "index.html", b"<html>");
        touch(dir.path(), "js/app.js", b"1");
        touch(dir.path(), "js/app.js.map", b"2");
        touch(dir.path(), ".git/HEAD", b"ref");

        let skip = compile_patterns(&["*.map".to_string(), ".git".to_string()]).unwrap();
        let found = names(SourceWalker::new(dir.path(), skip).unwrap());
        assert_eq!(found, vec!["index.html", "js/app.js"]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(compile_patterns(&["[".to_string()]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn follows_file_links_but_not_directory_links() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "real/file.txt", b"x");
        std::os::unix::fs::symlink(dir.path().join("real/file.txt"), dir.path().join("alias.txt"))
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("linked")).unwrap();

        let found = names(SourceWalker::new(dir.path(), Vec::new()).unwrap());
        assert_eq!(found, vec!["alias.txt", "real/file.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_links_are_skipped() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "kept.txt", b"x");
        std::os::unix::fs::symlink(dir.path().join("gone.txt"), dir.path().join("broken.txt"))
            .unwrap();

        let found = names(SourceWalker::new(dir.path(), Vec::new()).unwrap());
        assert_eq!(found, vec!["kept.txt"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_names_are_an_error() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xff")), b"1").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xfe")), b"2").unwrap();

        let results: Vec<Result<SourceFile>> =
            SourceWalker::new(dir.path(), Vec::new()).unwrap().collect();
        assert_eq!(results.len(), 1);
        let err = results.into_iter().next().unwrap().unwrap_err();
        assert!(format!("{err:#}").contains("not valid UTF-8"));
    }

    #[test]
    fn archive_name_uses_forward_slashes() {
        let root = Path::new("site");
        let path = root.join("x").join("y").join("deep.bin");
        assert_eq!(archive_name(root, &path).unwrap(), "x/y/deep.bin");
        assert!(archive_name(root, Path::new("elsewhere/file")).is_err());
    }

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("10Mi").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("2.5GB").unwrap(), 2_500_000_000);
        assert_eq!(parse_size(" 500kb ").unwrap(), 500_000);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn size_limit_zero_means_unlimited() {
        assert!(check_size_limit(u64::MAX, 0).is_ok());
        assert!(check_size_limit(2048, 1024).is_err());
        assert!(check_size_limit(1024, 1024).is_ok());
    }

    #[test]
    fn encodes_sizes() {
        assert_eq!(encode_size(0), "0 B");
        assert_eq!(encode_size(1024), "1 KiB");
        assert_eq!(encode_size(1536), "1.5 KiB");
        assert_eq!(encode_size(5 * 1024 * 1024), "5 MiB");
    }
}
