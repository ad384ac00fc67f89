//! Clean EPUB
//!
//! Removes presentation clutter (`span` and `font` tags by default) from the
//! content pages of an EPUB and writes a new archive.
//!
//! # Modules
//!
//! - `epub`: archive extraction/repackaging and package descriptor parsing
//! - `html`: page sanitizer
//! - `pipeline`: the end-to-end cleaning run
//! - `batch`: directory mode used by the `clean` binary
//! - `config`, `db`, `routes`, `state`, `worker`: the upload queue server

pub mod batch;
pub mod config;
pub mod db;
pub mod epub;
pub mod error;
pub mod html;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use batch::{clean_directory, BatchError, BatchReport};
pub use pipeline::{CleanConfig, CleanError, PageTransform, Pipeline, Stage};
