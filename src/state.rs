//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::pipeline::{CleanError, Pipeline};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to build cleaning pipeline: {0}")]
    Pipeline(#[from] CleanError),

    #[error("Failed to create storage directory: {0}")]
    Storage(#[from] std::io::Error),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    pipeline: Pipeline,
}

impl AppState {
    /// Create a new application state
    ///
    /// Creates the upload and cleaned directories if they are missing.
    pub fn new(config: Config, db: SqlitePool) -> Result<Self, StateError> {
        let pipeline = Pipeline::new(config.clean.clone())?;

        std::fs::create_dir_all(&config.storage.upload_dir)?;
        std::fs::create_dir_all(&config.storage.cleaned_dir)?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                pipeline,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the cleaning pipeline
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }
}
