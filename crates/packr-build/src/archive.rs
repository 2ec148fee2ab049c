//! Deterministic zip archive construction.
//!
//! Archives built from the same files and contents are byte-identical:
//! entries are sorted by archive name, every entry carries the same fixed
//! timestamp (1980-01-01 00:00:00, the zip epoch), and modes come from the
//! source files rather than from the build host's umask.
//!
//! Workspace packages are namespaced under `packages/<name>/`, and each
//! package-to-package dependency becomes a symlink entry
//! `<dependent>/node_modules/<dep> -> <relative path to packages/<dep>>` so
//! Node's resolution still finds the package inside the archive.

use packr_core::path::{DEPENDENCY_ROOT, classify, link_target};
use packr_core::RequestedPackageMap;
use packr_core::package::PACKAGES_DIR;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Mode of symlink entries.
const SYMLINK_MODE: u32 = 0o777;

/// Mode used where the host cannot report one.
#[cfg(not(unix))]
const DEFAULT_FILE_MODE: u32 = 0o644;

/// A file to store, with its final in-archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
    /// Unix permission bits.
    pub mode: u32,
}

/// A synthetic symlink entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SymlinkEntry {
    pub name: String,
    pub target: String,
}

/// Writes one archive in a single pass.
///
/// Implementations must write `entries` then `links` in the order given;
/// ordering is decided by the caller. [`ZipArchiver`] is the real writer.
pub trait ArchiveWriter: Send + Sync {
    fn write_archive(
        &self,
        destination: &Path,
        entries: &[ArchiveEntry],
        links: &[SymlinkEntry],
    ) -> Result<(), ArchiveError>;
}

/// [`ArchiveWriter`] producing deflated zip files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiver;

impl ArchiveWriter for ZipArchiver {
    fn write_archive(
        &self,
        destination: &Path,
        entries: &[ArchiveEntry],
        links: &[SymlinkEntry],
    ) -> Result<(), ArchiveError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = std::fs::File::create(destination).map_err(|e| ArchiveError::Create {
            path: destination.to_path_buf(),
            source: e,
        })?;

        let zip_err = |e: zip::result::ZipError| ArchiveError::Zip {
            path: destination.to_path_buf(),
            source: e,
        };
        let base = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default());

        let mut zip = ZipWriter::new(file);
        for entry in entries {
            zip.start_file(entry.name.as_str(), base.unix_permissions(entry.mode))
                .map_err(zip_err)?;
            zip.write_all(&entry.data).map_err(|e| ArchiveError::Write {
                path: destination.to_path_buf(),
                source: e,
            })?;
        }
        for link in links {
            zip.add_symlink(
                link.name.as_str(),
                link.target.as_str(),
                base.unix_permissions(SYMLINK_MODE),
            )
            .map_err(zip_err)?;
        }
        zip.finish().map_err(zip_err)?;

        tracing::debug!(
            path = %destination.display(),
            entries = entries.len(),
            links = links.len(),
            "wrote archive"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to read {path}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write archive {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("zip error in {path}")]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    #[error("archive task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// In-archive name of `file` (relative to the working directory).
///
/// Files inside a requested workspace package are rewritten to
/// `packages/<name>/<path within package>`; everything else keeps its
/// logical path, which drops leading `../` segments.
pub fn archive_name(file: &str, packages: &RequestedPackageMap) -> String {
    if let Some(owner) = packages.owner_of(file) {
        let inner = file
            .strip_prefix(owner.relative_path.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(file);
        return format!("{}/{inner}", owner.archive_dir());
    }
    classify(file).map_or_else(|| file.to_owned(), |parts| parts.logical_path())
}

/// Read `files` concurrently into archive entries sorted by name.
///
/// When two files map to the same name (a collapse), the one whose physical
/// path sorts first wins. Any read failure fails the whole set.
pub async fn read_entries(
    cwd: &Path,
    files: &[String],
    packages: &RequestedPackageMap,
) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut named: Vec<(String, &String)> = files
        .iter()
        .map(|file| (archive_name(file, packages), file))
        .collect();
    named.sort();

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut unique: Vec<(String, PathBuf)> = Vec::with_capacity(named.len());
    for (name, file) in &named {
        if !seen.insert(name.as_str()) {
            tracing::debug!(file = %file, name = %name, "duplicate archive name; keeping first");
            continue;
        }
        unique.push((name.clone(), cwd.join(file.as_str())));
    }

    let mut tasks = JoinSet::new();
    for (index, (name, path)) in unique.into_iter().enumerate() {
        tasks.spawn(async move {
            let entry = read_entry(name, &path).await;
            (index, entry)
        });
    }

    let mut indexed = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let (index, entry) = joined?;
        indexed.push((index, entry?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, entry)| entry).collect())
}

async fn read_entry(name: String, path: &Path) -> Result<ArchiveEntry, ArchiveError> {
    let read_err = |e: std::io::Error| ArchiveError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    };
    let data = tokio::fs::read(path).await.map_err(read_err)?;
    let metadata = tokio::fs::metadata(path).await.map_err(read_err)?;
    Ok(ArchiveEntry {
        name,
        data,
        mode: file_mode(&metadata),
    })
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    DEFAULT_FILE_MODE
}

/// Symlinks from each package's `node_modules/<dep>` to the namespaced
/// location of every workspace package it depends on, sorted by name.
pub fn symlink_entries(packages: &RequestedPackageMap) -> Vec<SymlinkEntry> {
    let mut links: BTreeSet<SymlinkEntry> = BTreeSet::new();
    for package in packages.iter() {
        let Some(deps) = &package.deps else {
            continue;
        };
        let base = package.archive_dir();
        for dep in &deps.packages {
            let name = if base.is_empty() {
                format!("{DEPENDENCY_ROOT}/{dep}")
            } else {
                format!("{base}/{DEPENDENCY_ROOT}/{dep}")
            };
            let target = link_target(&name, &format!("{PACKAGES_DIR}/{dep}"));
            links.insert(SymlinkEntry { name, target });
        }
    }
    links.into_iter().collect()
}
