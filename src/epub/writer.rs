//! Repackage an EPUB archive, replacing selected entries.
//!
//! The original archive is never modified; a fresh zip is produced with
//! the `mimetype` entry first and stored uncompressed, as the container
//! format requires.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::Result;

use super::EPUB_MIME;

/// Copy `original` into a new archive, substituting the bodies of any
/// entries named in `replacements`. Replacement paths not present in
/// the original are appended as new entries.
pub fn repackage(original: &[u8], replacements: &HashMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(original))?;
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));

    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    out.start_file("mimetype", stored)?;
    out.write_all(EPUB_MIME.as_bytes())?;

    let mut seen: Vec<String> = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if name == "mimetype" || entry.is_dir() {
            continue;
        }

        out.start_file(name.clone(), deflated)?;
        match replacements.get(&name) {
            Some(data) => out.write_all(data)?,
            None => {
                let mut buf = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut buf)?;
                out.write_all(&buf)?;
            }
        }
        seen.push(name);
    }

    for (name, data) in replacements {
        if name != "mimetype" && !seen.contains(name) {
            out.start_file(name.clone(), deflated)?;
            out.write_all(data)?;
        }
    }

    Ok(out.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::testkit::TestEpub;
    use crate::epub::{entry_names, read_entry_bytes, read_entry_string};

    #[test]
    fn test_repackage_replaces_and_preserves() {
        let epub = TestEpub::new("Book")
            .doc("ch1.xhtml", "<body><p>old</p></body>")
            .doc("ch2.xhtml", "<body><p>keep</p></body>")
            .build();

        let mut replacements = HashMap::new();
        replacements.insert(
            "OEBPS/ch1.xhtml".to_string(),
            b"<html><body><p>new</p></body></html>".to_vec(),
        );

        let rebuilt = repackage(&epub, &replacements).unwrap();
        assert!(read_entry_string(&rebuilt, "OEBPS/ch1.xhtml")
            .unwrap()
            .contains("new"));
        assert!(read_entry_string(&rebuilt, "OEBPS/ch2.xhtml")
            .unwrap()
            .contains("keep"));
        assert_eq!(
            read_entry_bytes(&rebuilt, "mimetype").unwrap(),
            EPUB_MIME.as_bytes()
        );
    }

    #[test]
    fn test_mimetype_is_first_entry() {
        let epub = TestEpub::new("Book")
            .doc("ch1.xhtml", "<body><p>a</p></body>")
            .build();
        let rebuilt = repackage(&epub, &HashMap::new()).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(rebuilt.as_slice())).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_new_entries_are_appended() {
        let epub = TestEpub::new("Book")
            .doc("ch1.xhtml", "<body><p>a</p></body>")
            .build();

        let mut replacements = HashMap::new();
        replacements.insert("OEBPS/extra.css".to_string(), b"body{}".to_vec());
        let rebuilt = repackage(&epub, &replacements).unwrap();

        assert!(entry_names(&rebuilt)
            .unwrap()
            .contains(&"OEBPS/extra.css".to_string()));
    }
}
