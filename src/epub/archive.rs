//! Archive I/O
//!
//! Unpacks an EPUB container into a working area and zips a working area
//! back into a fresh container.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the OCF mimetype entry, which must lead the container uncompressed
const MIMETYPE_ENTRY: &str = "mimetype";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to read ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the working area: {0}")]
    UnsafeEntry(String),

    #[error("Working area already in use: {}", .0.display())]
    WorkingAreaBusy(PathBuf),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Destination directory does not exist: {}", .0.display())]
    DestinationParent(PathBuf),

    #[error("Failed to remove working area {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Working area allocation
// ============================================================================

/// Chooses where an archive gets unpacked
pub trait WorkspaceProvider: Send + Sync {
    fn allocate(&self, archive: &Path) -> Result<PathBuf, ArchiveError>;
}

/// Allocates `<root>/<stem>-<uuid>` so concurrent runs never share a directory
#[derive(Debug, Clone)]
pub struct TempWorkspace {
    root: PathBuf,
}

impl TempWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl WorkspaceProvider for TempWorkspace {
    fn allocate(&self, archive: &Path) -> Result<PathBuf, ArchiveError> {
        let token = Uuid::new_v4().simple().to_string();
        Ok(self.root.join(format!("{}-{}", archive_stem(archive), token)))
    }
}

/// Unpacks next to the archive, named after it without the extension.
///
/// Two archives with the same stem in the same directory collide; `extract`
/// reports that as [`ArchiveError::WorkingAreaBusy`] instead of sharing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SiblingWorkspace;

impl WorkspaceProvider for SiblingWorkspace {
    fn allocate(&self, archive: &Path) -> Result<PathBuf, ArchiveError> {
        let absolute = std::path::absolute(archive)?;
        Ok(absolute.with_extension(""))
    }
}

fn archive_stem(archive: &Path) -> String {
    archive
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("epub")
        .to_string()
}

/// Extracted archive tree, removed when dropped
#[derive(Debug)]
pub struct WorkingArea {
    root: PathBuf,
    released: bool,
}

impl WorkingArea {
    fn create(root: PathBuf) -> Result<Self, ArchiveError> {
        if root.exists() {
            return Err(ArchiveError::WorkingAreaBusy(root));
        }
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Remove the tree now and report whether that worked
    pub fn close(mut self) -> Result<(), ArchiveError> {
        self.released = true;
        fs::remove_dir_all(&self.root).map_err(|source| ArchiveError::Cleanup {
            path: self.root.clone(),
            source,
        })
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove working area {}: {}", self.root.display(), e);
            }
        }
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Unpack the archive at `archive_path` into a freshly allocated working area
pub fn extract(
    archive_path: &Path,
    provider: &dyn WorkspaceProvider,
) -> Result<WorkingArea, ArchiveError> {
    let file = File::open(archive_path)?;
    let root = provider.allocate(archive_path)?;
    extract_reader(file, root)
}

/// Unpack any ZIP byte source into `root`, which must not exist yet
pub fn extract_reader<R: Read + Seek>(reader: R, root: PathBuf) -> Result<WorkingArea, ArchiveError> {
    let mut archive = ZipArchive::new(reader)?;
    let area = WorkingArea::create(root)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
        let target = area.path().join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
    }

    tracing::debug!(
        entries = archive.len(),
        "Extracted archive into {}",
        area.path().display()
    );

    Ok(area)
}

// ============================================================================
// Repackaging
// ============================================================================

/// Zip every file under `working_area` into a new archive at `destination`.
///
/// The archive is assembled in a partial file beside the destination and
/// renamed into place only once complete.
pub fn repackage(working_area: &Path, destination: &Path, overwrite: bool) -> Result<(), ArchiveError> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        return Err(ArchiveError::DestinationParent(parent));
    }
    if destination.exists() && !overwrite {
        return Err(ArchiveError::DestinationExists(destination.to_path_buf()));
    }

    let entries = collect_entries(working_area)?;

    let file_name = destination
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let mut partial = PartialFile {
        path: parent.join(format!(".{}.{}.partial", file_name, Uuid::new_v4().simple())),
        armed: true,
    };

    let mut writer = ZipWriter::new(File::create(&partial.path)?);
    for name in &entries {
        let method = if name == MIMETYPE_ENTRY {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default().compression_method(method);
        writer.start_file(name.as_str(), options)?;
        let mut source = File::open(working_area.join(name))?;
        io::copy(&mut source, &mut writer)?;
    }

    let mut file = writer.finish()?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    fs::rename(&partial.path, destination)?;
    partial.armed = false;

    tracing::debug!(
        entries = entries.len(),
        "Wrote archive {}",
        destination.display()
    );

    Ok(())
}

/// Relative `/`-separated names of every file under `root`, `mimetype` first
fn collect_entries(root: &Path) -> Result<Vec<String>, ArchiveError> {
    let mut entries = Vec::new();
    walk(root, root, &mut entries)?;
    entries.sort();
    if let Some(pos) = entries.iter().position(|e| e == MIMETYPE_ENTRY) {
        let mimetype = entries.remove(pos);
        entries.insert(0, mimetype);
    }
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, entries: &mut Vec<String>) -> Result<(), ArchiveError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, entries)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|_| ArchiveError::UnsafeEntry(path.display().to_string()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(name);
        }
    }
    Ok(())
}

/// Deletes the partial output unless the rename went through
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}
