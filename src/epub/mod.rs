//! EPUB container handling
//!
//! Archive I/O for the zipped container and parsing of the package
//! descriptors that locate the content pages.

pub mod archive;
pub mod descriptor;

pub use archive::{
    extract, extract_reader, repackage, ArchiveError, SiblingWorkspace, TempWorkspace,
    WorkingArea, WorkspaceProvider,
};
pub use descriptor::{
    list_content_pages, locate_package_document, ContentPage, DescriptorError, CONTAINER_PATH,
};
