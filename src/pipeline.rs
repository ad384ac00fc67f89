//! Cleaning pipeline
//!
//! extract -> locate package document -> resolve spine -> sanitize each page
//! in spine order -> repackage -> remove the working area.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;

use crate::epub::{
    extract, list_content_pages, locate_package_document, repackage, ArchiveError,
    DescriptorError, TempWorkspace, WorkspaceProvider,
};
use crate::html::{SanitizeConfig, SanitizeError, Sanitizer};

/// Pipeline stage, reported with every failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Descriptor,
    Sanitize,
    Repackage,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "extract",
            Stage::Descriptor => "descriptor",
            Stage::Sanitize => "sanitize",
            Stage::Repackage => "repackage",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Invalid sanitizer configuration: {0}")]
    Config(#[source] SanitizeError),

    #[error("{stage} stage failed for {}: {source}", .archive.display())]
    Archive {
        stage: Stage,
        archive: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error("descriptor stage failed for {}: {source}", .archive.display())]
    Descriptor {
        archive: PathBuf,
        #[source]
        source: DescriptorError,
    },

    #[error("sanitize stage failed for {} on page {page}: {source}", .archive.display())]
    Sanitize {
        archive: PathBuf,
        page: String,
        #[source]
        source: SanitizeError,
    },
}

impl CleanError {
    /// Stage the error came from, `None` for configuration errors
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CleanError::Config(_) => None,
            CleanError::Archive { stage, .. } => Some(*stage),
            CleanError::Descriptor { .. } => Some(Stage::Descriptor),
            CleanError::Sanitize { .. } => Some(Stage::Sanitize),
        }
    }
}

/// Rewrites one content page in place
pub trait PageTransform: Send + Sync {
    fn transform(&self, page: &Path) -> Result<(), SanitizeError>;
}

impl PageTransform for Sanitizer {
    fn transform(&self, page: &Path) -> Result<(), SanitizeError> {
        self.sanitize(page)
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct CleanConfig {
    pub sanitize: SanitizeConfig,
    /// Replace an existing destination archive
    pub overwrite: bool,
    /// Directory under which working areas are allocated (system temp dir if unset)
    pub work_root: Option<PathBuf>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            sanitize: SanitizeConfig::default(),
            overwrite: true,
            work_root: None,
        }
    }
}

/// The EPUB cleaning pipeline
pub struct Pipeline {
    overwrite: bool,
    workspace: Box<dyn WorkspaceProvider>,
    transform: Box<dyn PageTransform>,
}

impl Pipeline {
    pub fn new(config: CleanConfig) -> Result<Self, CleanError> {
        let sanitizer = Sanitizer::new(config.sanitize).map_err(CleanError::Config)?;
        let workspace = match config.work_root {
            Some(root) => TempWorkspace::new(root),
            None => TempWorkspace::default(),
        };

        Ok(Self {
            overwrite: config.overwrite,
            workspace: Box::new(workspace),
            transform: Box::new(sanitizer),
        })
    }

    /// Replace the working area provider
    pub fn with_workspace(mut self, workspace: impl WorkspaceProvider + 'static) -> Self {
        self.workspace = Box::new(workspace);
        self
    }

    /// Replace the per-page transform
    pub fn with_transform(mut self, transform: impl PageTransform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    /// Clean `source` into `destination`.
    ///
    /// The working area is removed before returning, whether or not the run
    /// succeeded. Nothing is written to `destination` unless every stage
    /// succeeds.
    pub fn clean(&self, source: &Path, destination: &Path) -> Result<PathBuf, CleanError> {
        let start = Instant::now();
        tracing::info!("Cleaning {} -> {}", source.display(), destination.display());

        let area = extract(source, self.workspace.as_ref()).map_err(|e| CleanError::Archive {
            stage: Stage::Extract,
            archive: source.to_path_buf(),
            source: e,
        })?;

        let outcome = self.process(area.path(), source, destination);
        let cleanup = area.close();

        match (outcome, cleanup) {
            (Ok(pages), Ok(())) => {
                tracing::info!(
                    "Cleaned {} ({} pages) in {:?}",
                    source.display(),
                    pages,
                    start.elapsed()
                );
                Ok(destination.to_path_buf())
            }
            (Ok(_), Err(e)) => Err(CleanError::Archive {
                stage: Stage::Cleanup,
                archive: source.to_path_buf(),
                source: e,
            }),
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    tracing::warn!("{}", cleanup_err);
                }
                Err(e)
            }
        }
    }

    /// Stages that run inside the working area; returns the page count
    fn process(&self, root: &Path, source: &Path, destination: &Path) -> Result<usize, CleanError> {
        let descriptor_error = |e| CleanError::Descriptor {
            archive: source.to_path_buf(),
            source: e,
        };

        let package = locate_package_document(root).map_err(descriptor_error)?;
        let pages = list_content_pages(root, &package).map_err(descriptor_error)?;
        tracing::debug!(pages = pages.len(), "Resolved spine of {}", package);

        for page in &pages {
            tracing::debug!(idref = %page.idref, "Sanitizing {}", page.path);
            self.transform
                .transform(&root.join(&page.path))
                .map_err(|e| CleanError::Sanitize {
                    archive: source.to_path_buf(),
                    page: page.path.clone(),
                    source: e,
                })?;
        }

        repackage(root, destination, self.overwrite).map_err(|e| CleanError::Archive {
            stage: Stage::Repackage,
            archive: source.to_path_buf(),
            source: e,
        })?;

        Ok(pages.len())
    }
}
