//! Fixture builders shared by the unit tests

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::Config;
use crate::db::create_pool;
use crate::state::AppState;

/// Write a ZIP archive with the given entries, in order
pub fn build_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, content) in entries {
        let method = if *name == "mimetype" {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        writer
            .start_file(*name, SimpleFileOptions::default().compression_method(method))
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

/// Entry names in archive order
pub fn zip_entries(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Raw bytes of one entry
pub fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    data
}

pub fn container_xml(package_path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="{}" media-type="application/oebps-package+xml"/>
    </rootfiles>
</container>"#,
        package_path
    )
}

/// Package document with `(id, href)` manifest items and a spine of idrefs
pub fn package_xml(items: &[(&str, &str)], spine: &[&str]) -> String {
    let manifest: String = items
        .iter()
        .map(|(id, href)| {
            let media_type = if href.ends_with(".css") {
                "text/css"
            } else if href.ends_with(".png") {
                "image/png"
            } else {
                "application/xhtml+xml"
            };
            format!(
                "        <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                id, href, media_type
            )
        })
        .collect();
    let itemrefs: String = spine
        .iter()
        .map(|idref| format!("        <itemref idref=\"{}\"/>\n", idref))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="uid" version="2.0">
    <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
        <dc:title>Fixture</dc:title>
        <dc:identifier id="uid">urn:uuid:fixture</dc:identifier>
    </metadata>
    <manifest>
{}        <item id="css" href="Styles/main.css" media-type="text/css"/>
        <item id="pic" href="Images/pic.png" media-type="image/png"/>
    </manifest>
    <spine>
{}    </spine>
</package>"#,
        manifest, itemrefs
    )
}

/// Minimal EPUB with pages `(id, href, content)` under `OEBPS/`, plus a
/// stylesheet and an image that are never sanitized
pub fn build_epub(path: &Path, pages: &[(&str, &str, &str)], spine: &[&str]) {
    let items: Vec<(&str, &str)> = pages.iter().map(|(id, href, _)| (*id, *href)).collect();
    let container = container_xml("OEBPS/content.opf");
    let package = package_xml(&items, spine);
    let page_paths: Vec<String> = pages.iter().map(|(_, href, _)| format!("OEBPS/{}", href)).collect();

    let mut entries: Vec<(&str, &str)> = vec![
        ("mimetype", "application/epub+zip"),
        ("META-INF/container.xml", container.as_str()),
        ("OEBPS/content.opf", package.as_str()),
        ("OEBPS/Styles/main.css", "p { margin: 0; }"),
        ("OEBPS/Images/pic.png", "\u{89}PNG fake image"),
    ];
    for (page_path, (_, _, content)) in page_paths.iter().zip(pages) {
        entries.push((page_path.as_str(), *content));
    }

    build_zip(path, &entries);
}

/// Server state rooted in `temp`, with its own SQLite file and storage dirs
pub async fn test_state(temp: &TempDir, max_upload_bytes: u64) -> AppState {
    let mut config = Config::default();
    config.database.url = format!("sqlite://{}", temp.path().join("queue.db").display());
    config.storage.upload_dir = temp.path().join("uploads");
    config.storage.cleaned_dir = temp.path().join("cleaned");
    config.storage.max_upload_bytes = max_upload_bytes;
    config.clean.work_root = Some(temp.path().to_path_buf());

    let pool = create_pool(&config.database.url).await.unwrap();
    AppState::new(config, pool).unwrap()
}

pub const MULTIPART_BOUNDARY: &str = "clean-epub-test-boundary";

/// Multipart form body with a single file field
pub fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/epub+zip\r\n\r\n",
        MULTIPART_BOUNDARY, field, file_name
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}
