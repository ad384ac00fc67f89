//! Batch mode: clean every regular file directly inside a directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pipeline::{CleanError, Pipeline};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Source is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to prepare destination {}: {source}", .path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to list {}: {source}", .path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of one batch run
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Cleaned archives, by destination path
    pub cleaned: Vec<PathBuf>,
    /// Source archives that failed, with the error that stopped them
    pub failed: Vec<(PathBuf, CleanError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Clean each regular file in `source_dir` into a same-named file in
/// `destination_dir`. A failing file is logged and the rest still run.
pub fn clean_directory(
    pipeline: &Pipeline,
    source_dir: &Path,
    destination_dir: &Path,
) -> Result<BatchReport, BatchError> {
    if !source_dir.is_dir() {
        return Err(BatchError::NotADirectory(source_dir.to_path_buf()));
    }
    fs::create_dir_all(destination_dir).map_err(|source| BatchError::Destination {
        path: destination_dir.to_path_buf(),
        source,
    })?;

    let listing_error = |source| BatchError::Listing {
        path: source_dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(source_dir).map_err(listing_error)? {
        let entry = entry.map_err(listing_error)?;
        if entry.file_type().map_err(listing_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    tracing::info!("Batch cleaning {} files from {}", files.len(), source_dir.display());

    let mut report = BatchReport::default();
    for source in files {
        let Some(name) = source.file_name() else {
            continue;
        };
        let destination = destination_dir.join(name);

        tracing::info!("Processing {}", source.display());
        match pipeline.clean(&source, &destination) {
            Ok(path) => report.cleaned.push(path),
            Err(e) => {
                tracing::error!("Failed to clean {}: {}", source.display(), e);
                report.failed.push((source, e));
            }
        }
    }

    tracing::info!(
        "Batch complete: {} cleaned, {} failed",
        report.cleaned.len(),
        report.failed.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::TempWorkspace;
    use crate::pipeline::{CleanConfig, Stage};
    use crate::test_support::build_epub;
    use tempfile::TempDir;

    #[test]
    fn test_batch_continues_after_failure() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("in");
        let destination = temp.path().join("out");
        let work = temp.path().join("work");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::create_dir(&work).unwrap();

        build_epub(&source.join("1.epub"), &[("p", "p.xhtml", "<p><span>1</span></p>")], &["p"]);
        fs::write(source.join("2.epub"), b"not a zip").unwrap();
        build_epub(&source.join("3.epub"), &[("p", "p.xhtml", "<p>3</p>")], &["p"]);
        build_epub(&source.join("nested/4.epub"), &[("p", "p.xhtml", "<p>4</p>")], &["p"]);

        let pipeline = Pipeline::new(CleanConfig::default())
            .unwrap()
            .with_workspace(TempWorkspace::new(&work));
        let report = clean_directory(&pipeline, &source, &destination).unwrap();

        assert!(!report.is_success());
        assert_eq!(report.cleaned, vec![destination.join("1.epub"), destination.join("3.epub")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, source.join("2.epub"));
        assert_eq!(report.failed[0].1.stage(), Some(Stage::Extract));

        assert!(destination.join("1.epub").is_file());
        assert!(!destination.join("2.epub").exists());
        assert!(destination.join("3.epub").is_file());
        assert!(!destination.join("4.epub").exists());
        assert_eq!(fs::read_dir(&work).unwrap().count(), 0);
    }

    #[test]
    fn test_batch_requires_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("single.epub");
        fs::write(&file, b"x").unwrap();

        let pipeline = Pipeline::new(CleanConfig::default()).unwrap();
        let result = clean_directory(&pipeline, &file, &temp.path().join("out"));
        assert!(matches!(result, Err(BatchError::NotADirectory(_))));
    }
}
