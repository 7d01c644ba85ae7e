// EPUB container handling
//
// - reader: open the archive, resolve the package document and spine
// - writer: repackage the archive with replaced entries

pub mod reader;
pub mod writer;

use std::io::{Cursor, Read};

use crate::error::Result;

pub const EPUB_MIME: &str = "application/epub+zip";
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// A spine entry: the manifest href and its resolved archive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDoc {
    pub href: String,
    pub path: String,
}

/// Read one archive entry as raw bytes.
pub fn read_entry_bytes(archive_bytes: &[u8], path: &str) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))?;
    let mut entry = archive.by_name(path)?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read one archive entry as UTF-8 text (lossy on invalid sequences).
pub fn read_entry_string(archive_bytes: &[u8], path: &str) -> Result<String> {
    let bytes = read_entry_bytes(archive_bytes, path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// List every file entry in the archive.
pub fn entry_names(archive_bytes: &[u8]) -> Result<Vec<String>> {
    let archive = zip::ZipArchive::new(Cursor::new(archive_bytes))?;
    Ok(archive.file_names().map(|n| n.to_string()).collect())
}

/// Resolve a manifest href against the package document's directory,
/// collapsing `.`/`..` components and dropping any fragment.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split(['#', '?']).next().unwrap_or(href);

    let mut parts: Vec<&str> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').filter(|p| !p.is_empty()).collect()
    };

    for component in href.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join("/")
}

/// Directory portion of an archive path ("" for top-level entries).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS", "chapter1.xhtml"), "OEBPS/chapter1.xhtml");
        assert_eq!(resolve_href("OEBPS", "../images/a.png"), "images/a.png");
        assert_eq!(resolve_href("", "text/ch1.xhtml"), "text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS", "ch1.xhtml#part2"), "OEBPS/ch1.xhtml");
        assert_eq!(resolve_href("a/b", "./c.xhtml"), "a/b/c.xhtml");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("OEBPS/content.opf"), "OEBPS");
        assert_eq!(parent_dir("content.opf"), "");
        assert_eq!(parent_dir("a/b/c.xhtml"), "a/b");
    }

    #[test]
    fn test_read_entry() {
        let epub = testkit::TestEpub::new("Book")
            .doc("ch1.xhtml", "<body><p>Hello</p></body>")
            .build();
        let text = read_entry_string(&epub, "OEBPS/ch1.xhtml").unwrap();
        assert!(text.contains("<p>Hello</p>"));
        assert!(matches!(
            read_entry_bytes(&epub, "missing.txt"),
            Err(crate::error::MutarjimError::Zip(_))
        ));
    }
}
