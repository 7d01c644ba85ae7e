//! EPUB reader: locate the package document, extract metadata and the
//! ordered spine, and find the cover image.

use tracing::{debug, warn};

use crate::dom;
use crate::error::{MutarjimError, Result};

use super::{parent_dir, read_entry_bytes, read_entry_string, resolve_href, ContentDoc, CONTAINER_PATH};

#[derive(Debug, Clone)]
pub struct BookMeta {
    pub title: String,
    pub author: String,
    pub cover_path: Option<String>,
    pub cover_image: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ParsedBook {
    pub meta: BookMeta,
    pub opf_path: String,
    pub docs: Vec<ContentDoc>,
}

#[derive(Debug, Clone)]
struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

/// Open the archive and resolve metadata, cover, and spine documents.
///
/// Metadata elements are matched on local name only, so namespace
/// prefix variation between EPUB 2 and 3 packages does not matter.
pub fn read_book(archive_bytes: &[u8]) -> Result<ParsedBook> {
    let container = read_entry_string(archive_bytes, CONTAINER_PATH)
        .map_err(|_| MutarjimError::MissingContainer)?;

    let opf_path = locate_opf_path(&container).ok_or(MutarjimError::MissingOpf)?;
    let opf_source =
        read_entry_string(archive_bytes, &opf_path).map_err(|_| MutarjimError::MissingOpf)?;

    let opf_dom = dom::parse_xml_document(&opf_source);
    let package = dom::find_first_by_name(&opf_dom.document, "package")
        .ok_or_else(|| MutarjimError::UnparsableOpf("no <package> element".to_string()))?;

    let title = dom::find_first_by_name(&package, "title")
        .map(|node| dom::text_content(&node).trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Book".to_string());
    let author = dom::find_first_by_name(&package, "creator")
        .map(|node| dom::text_content(&node).trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    let opf_dir = parent_dir(&opf_path);
    let items = manifest_items(&package);

    let cover_path = locate_cover(&items).map(|item| resolve_href(opf_dir, &item.href));
    let cover_image = cover_path.as_deref().and_then(|path| {
        match read_entry_bytes(archive_bytes, path) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                warn!("Cover entry {} listed in manifest but unreadable", path);
                None
            }
        }
    });

    let docs = spine_docs(&package, &items, opf_dir)?;
    debug!("Parsed package {}: {} spine documents", opf_path, docs.len());

    Ok(ParsedBook {
        meta: BookMeta {
            title,
            author,
            cover_path,
            cover_image,
        },
        opf_path,
        docs,
    })
}

/// `full-path` of the first `rootfile` element in the container manifest.
fn locate_opf_path(container_source: &str) -> Option<String> {
    let dom = dom::parse_xml_document(container_source);
    let rootfile = dom::find_first_by_name(&dom.document, "rootfile")?;
    dom::get_node_attr(&rootfile, "full-path").filter(|p| !p.is_empty())
}

fn manifest_items(package: &markup5ever_rcdom::Handle) -> Vec<ManifestItem> {
    let mut nodes = Vec::new();
    dom::find_all_by_name(package, "item", &mut nodes);

    nodes
        .iter()
        .filter_map(|node| {
            let href = dom::get_node_attr(node, "href")?;
            Some(ManifestItem {
                id: dom::get_node_attr(node, "id").unwrap_or_default(),
                href,
                media_type: dom::get_node_attr(node, "media-type").unwrap_or_default(),
                properties: dom::get_node_attr(node, "properties").unwrap_or_default(),
            })
        })
        .collect()
}

/// Find the manifest item recognised as the cover: a `cover-image`
/// property wins, otherwise an item whose id contains "cover"
/// (case-insensitive), preferring image media types.
fn locate_cover(items: &[ManifestItem]) -> Option<&ManifestItem> {
    if let Some(item) = items.iter().find(|i| i.properties.contains("cover-image")) {
        return Some(item);
    }

    let by_id: Vec<&ManifestItem> = items
        .iter()
        .filter(|i| i.id.to_lowercase().contains("cover"))
        .collect();
    by_id
        .iter()
        .find(|i| i.media_type.starts_with("image/"))
        .copied()
        .or_else(|| by_id.first().copied())
}

fn spine_docs(
    package: &markup5ever_rcdom::Handle,
    items: &[ManifestItem],
    opf_dir: &str,
) -> Result<Vec<ContentDoc>> {
    let mut itemrefs = Vec::new();
    dom::find_all_by_name(package, "itemref", &mut itemrefs);
    if itemrefs.is_empty() {
        return Err(MutarjimError::EmptySpine);
    }

    let mut docs = Vec::new();
    for itemref in &itemrefs {
        let Some(idref) = dom::get_node_attr(itemref, "idref") else {
            continue;
        };
        let Some(item) = items.iter().find(|i| i.id == idref) else {
            warn!("Spine itemref {} has no manifest entry, skipping", idref);
            continue;
        };
        if !item.media_type.is_empty() && !item.media_type.contains("html") {
            warn!(
                "Spine entry {} has non-document media type {}, skipping",
                item.href, item.media_type
            );
            continue;
        }
        docs.push(ContentDoc {
            href: item.href.clone(),
            path: resolve_href(opf_dir, &item.href),
        });
    }

    if docs.is_empty() {
        return Err(MutarjimError::EmptySpine);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::testkit::TestEpub;

    #[test]
    fn test_read_minimal_book() {
        let epub = TestEpub::new("A Tale")
            .doc("ch1.xhtml", "<body><p>One</p></body>")
            .doc("ch2.xhtml", "<body><p>Two</p></body>")
            .build();

        let book = read_book(&epub).unwrap();
        assert_eq!(book.meta.title, "A Tale");
        assert_eq!(book.meta.author, "Test Author");
        assert_eq!(book.opf_path, "OEBPS/content.opf");
        assert_eq!(book.docs.len(), 2);
        assert_eq!(book.docs[0].path, "OEBPS/ch1.xhtml");
        assert_eq!(book.docs[1].path, "OEBPS/ch2.xhtml");
        assert!(book.meta.cover_path.is_none());
    }

    #[test]
    fn test_cover_detection_by_properties() {
        let epub = TestEpub::new("Covered")
            .doc("ch1.xhtml", "<body><p>One</p></body>")
            .cover(&[0xFF, 0xD8, 0xFF])
            .build();

        let book = read_book(&epub).unwrap();
        assert_eq!(book.meta.cover_path.as_deref(), Some("OEBPS/cover.jpg"));
        assert_eq!(book.meta.cover_image.as_deref(), Some(&[0xFF, 0xD8, 0xFF][..]));
    }

    #[test]
    fn test_missing_container_is_fatal() {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("mimetype", zip::write::FileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut zip, super::super::EPUB_MIME.as_bytes()).unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        assert!(matches!(
            read_book(&bytes),
            Err(MutarjimError::MissingContainer)
        ));
    }

    #[test]
    fn test_empty_spine_is_fatal() {
        let epub = TestEpub::new("Empty").build();
        assert!(matches!(read_book(&epub), Err(MutarjimError::EmptySpine)));
    }

    #[test]
    fn test_cover_by_id_prefers_images() {
        // Manifest has both cover.xhtml (id contains "cover") and an image
        // whose id contains "cover"; the image must win.
        let mut epub = TestEpub::new("IdCover").doc("ch1.xhtml", "<body><p>x</p></body>");
        epub.docs.push((
            "cover.xhtml".to_string(),
            "<html><body><p>cover page</p></body></html>".to_string(),
        ));
        let mut bytes = epub.build();

        // Rewrite the OPF to carry an id-only cover image entry.
        let opf = crate::epub::read_entry_string(&bytes, "OEBPS/content.opf").unwrap();
        let patched = opf.replace(
            "<item id=\"doc1\" href=\"cover.xhtml\" media-type=\"application/xhtml+xml\"/>",
            "<item id=\"doc-cover\" href=\"cover.xhtml\" media-type=\"application/xhtml+xml\"/>\
             <item id=\"cover-img\" href=\"cover.jpg\" media-type=\"image/jpeg\"/>",
        );
        let mut replacements = std::collections::HashMap::new();
        replacements.insert("OEBPS/content.opf".to_string(), patched.into_bytes());
        replacements.insert("OEBPS/cover.jpg".to_string(), vec![1, 2, 3]);
        bytes = crate::epub::writer::repackage(&bytes, &replacements).unwrap();

        let book = read_book(&bytes).unwrap();
        assert_eq!(book.meta.cover_path.as_deref(), Some("OEBPS/cover.jpg"));
    }
}
