//! Package descriptor reading
//!
//! Follows `META-INF/container.xml` to the package document and resolves the
//! spine into an ordered list of content pages.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::de::from_str;
use serde::Deserialize;
use thiserror::Error;

/// Location of the container descriptor inside every EPUB
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Container descriptor not found: {}", .0.display())]
    MissingContainer(PathBuf),

    #[error("Package document not found: {}", .0.display())]
    MissingPackage(PathBuf),

    #[error("Malformed XML in {path}: {source}")]
    Xml {
        path: String,
        #[source]
        source: quick_xml::de::DeError,
    },

    #[error("Container descriptor lists no rootfile")]
    NoRootfile,

    #[error("Package document has no <{0}> element")]
    MissingElement(&'static str),

    #[error("<{element}> is missing its {attribute} attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("Spine itemref '{0}' has no manifest item")]
    DanglingReference(String),

    #[error("Manifest href is not valid UTF-8 once decoded: {0}")]
    InvalidHref(String),

    #[error("Manifest href escapes the container root: {0}")]
    HrefEscapesRoot(String),

    #[error("Package document path escapes the container root: {0}")]
    PackagePathEscapesRoot(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One spine entry resolved through the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPage {
    /// Spine idref
    pub idref: String,
    /// Manifest href, relative to the package document
    pub href: String,
    /// `/`-separated path relative to the working area root
    pub path: String,
}

/// Read the container descriptor and return the package document's `full-path`.
///
/// When several rootfiles are listed the first one wins.
pub fn locate_package_document(working_area: &Path) -> Result<String, DescriptorError> {
    let container_file = working_area.join(CONTAINER_PATH);
    let xml = read_xml(&container_file)
        .map_err(|e| not_found_as(e, DescriptorError::MissingContainer(container_file.clone())))?;

    let container: Container = from_str(&xml).map_err(|source| DescriptorError::Xml {
        path: CONTAINER_PATH.to_string(),
        source,
    })?;

    let rootfiles = container.rootfiles.map(|r| r.rootfile).unwrap_or_default();
    if rootfiles.len() > 1 {
        tracing::warn!(
            "Container lists {} rootfiles, using the first",
            rootfiles.len()
        );
    }

    let rootfile = rootfiles.into_iter().next().ok_or(DescriptorError::NoRootfile)?;
    match rootfile.full_path {
        Some(path) if !path.trim().is_empty() => contained_package_path(path.trim()),
        _ => Err(DescriptorError::MissingAttribute {
            element: "rootfile",
            attribute: "full-path",
        }),
    }
}

/// Resolve the spine of the package document into content pages, in spine order
pub fn list_content_pages(
    working_area: &Path,
    package_document: &str,
) -> Result<Vec<ContentPage>, DescriptorError> {
    let package_document = contained_package_path(package_document)?;
    let package_file = working_area.join(&package_document);
    let xml = read_xml(&package_file)
        .map_err(|e| not_found_as(e, DescriptorError::MissingPackage(package_file.clone())))?;

    let package: Package = from_str(&xml).map_err(|source| DescriptorError::Xml {
        path: package_document.clone(),
        source,
    })?;

    let manifest = package.manifest.ok_or(DescriptorError::MissingElement("manifest"))?;
    let spine = package.spine.ok_or(DescriptorError::MissingElement("spine"))?;

    let hrefs: HashMap<String, String> = manifest
        .item
        .into_iter()
        .filter_map(|item| match (item.id, item.href) {
            (Some(id), Some(href)) => Some((id, href)),
            _ => None,
        })
        .collect();

    let base_dir = package_dir(&package_document);

    spine
        .itemref
        .into_iter()
        .map(|itemref| {
            let idref = itemref.idref.ok_or(DescriptorError::MissingAttribute {
                element: "itemref",
                attribute: "idref",
            })?;
            let href = hrefs
                .get(&idref)
                .cloned()
                .ok_or_else(|| DescriptorError::DanglingReference(idref.clone()))?;
            let path = resolve_href(base_dir, &href)?;
            Ok(ContentPage { idref, href, path })
        })
        .collect()
}

/// Directory part of a `/`-separated package document path
pub fn package_dir(package_document: &str) -> &str {
    package_document
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or("")
}

/// Resolve a manifest href against the package directory
fn resolve_href(base_dir: &str, href: &str) -> Result<String, DescriptorError> {
    let without_fragment = href.split('#').next().unwrap_or("");
    let decoded = urlencoding::decode(without_fragment)
        .map_err(|_| DescriptorError::InvalidHref(href.to_string()))?;

    let joined = if decoded.starts_with('/') {
        decoded.into_owned()
    } else {
        format!("{}/{}", base_dir, decoded)
    };

    normalize(&joined).ok_or_else(|| DescriptorError::HrefEscapesRoot(href.to_string()))
}

/// Package document path, normalized and confined to the working area
fn contained_package_path(path: &str) -> Result<String, DescriptorError> {
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(DescriptorError::PackagePathEscapesRoot(path.to_string()));
    }
    match normalize(path) {
        Some(normalized) if !normalized.is_empty() => Ok(normalized),
        _ => Err(DescriptorError::PackagePathEscapesRoot(path.to_string())),
    }
}

/// Collapse `.` and `..` segments of a `/`-separated path.
/// `None` when a `..` would climb above the root.
fn normalize(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

fn read_xml(path: &Path) -> io::Result<String> {
    let xml = fs::read_to_string(path)?;
    Ok(xml.trim_start_matches('\u{feff}').to_string())
}

fn not_found_as(e: io::Error, missing: DescriptorError) -> DescriptorError {
    if e.kind() == io::ErrorKind::NotFound {
        missing
    } else {
        DescriptorError::Io(e)
    }
}

// container.xml structures for deserialization

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(default)]
    rootfiles: Option<RootFiles>,
}

#[derive(Debug, Deserialize)]
struct RootFiles {
    #[serde(default)]
    rootfile: Vec<RootFile>,
}

#[derive(Debug, Deserialize)]
struct RootFile {
    #[serde(rename = "@full-path", default)]
    full_path: Option<String>,
}

// Package document structures for deserialization

#[derive(Debug, Deserialize)]
struct Package {
    #[serde(default)]
    manifest: Option<Manifest>,
    #[serde(default)]
    spine: Option<Spine>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    item: Vec<ManifestItem>,
}

#[derive(Debug, Deserialize)]
struct ManifestItem {
    #[serde(rename = "@id", default)]
    id: Option<String>,

    #[serde(rename = "@href", default)]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Spine {
    #[serde(default)]
    itemref: Vec<SpineItemRef>,
}

#[derive(Debug, Deserialize)]
struct SpineItemRef {
    #[serde(rename = "@idref", default)]
    idref: Option<String>,
}
