//! Self-contained `.mtj` backup bundles.
//!
//! A bundle is a zip holding the immutable source archive, the optional
//! replacement cover, the project record, and the full segment list.
//! Restore is wipe-then-load and validates the bundle before touching
//! the store, so a bad bundle leaves existing state intact.

use std::io::{Cursor, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use zip::write::FileOptions;
use zip::CompressionMethod;

use crate::error::{MutarjimError, Result};
use crate::events::epoch_ms;
use crate::store::{Project, Segment, SegmentStatus, SegmentStore};

pub const BACKUP_VERSION: u32 = 1;

const SOURCE_ENTRY: &str = "source.epub";
const COVER_ENTRY: &str = "custom-cover.bin";
const PROJECT_ENTRY: &str = "project.json";
const SEGMENTS_ENTRY: &str = "segments.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupManifest {
    version: u32,
    timestamp: u64,
    project_data: Project,
}

/// Bundle the current project into a `.mtj` archive.
pub async fn write_backup(store: &dyn SegmentStore) -> Result<Vec<u8>> {
    let project = store
        .project()
        .await?
        .ok_or_else(|| MutarjimError::Backup("no project to back up".to_string()))?;
    let source_book = store
        .source_book()
        .await?
        .ok_or_else(|| MutarjimError::Backup("source archive missing".to_string()))?;
    let segments = store.segments().await?;
    let cover = store.custom_cover().await?;

    let manifest = BackupManifest {
        version: BACKUP_VERSION,
        timestamp: epoch_ms(),
        project_data: project,
    };

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    // The source EPUB is itself a zip; recompressing it buys nothing.
    zip.start_file(SOURCE_ENTRY, stored)?;
    zip.write_all(&source_book)?;

    if let Some(cover) = &cover {
        zip.start_file(COVER_ENTRY, stored)?;
        zip.write_all(cover)?;
    }

    zip.start_file(PROJECT_ENTRY, deflated)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

    zip.start_file(SEGMENTS_ENTRY, deflated)?;
    zip.write_all(&serde_json::to_vec(&segments)?)?;

    Ok(zip.finish()?.into_inner())
}

/// Validate a bundle and atomically replace the store's contents.
///
/// The translated count is recomputed from the segment statuses, not
/// trusted from the stored project record.
pub async fn restore_backup(store: &dyn SegmentStore, bundle: &[u8]) -> Result<Project> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bundle))
        .map_err(|e| MutarjimError::Backup(format!("not a readable bundle: {e}")))?;

    let source_book = read_bundle_entry(&mut archive, SOURCE_ENTRY)?;
    let project_json = read_bundle_entry(&mut archive, PROJECT_ENTRY)?;
    let segments_json = read_bundle_entry(&mut archive, SEGMENTS_ENTRY)?;
    let cover = read_bundle_entry(&mut archive, COVER_ENTRY).ok();

    let mut project = parse_project(&project_json)?;
    let segments: Vec<Segment> = serde_json::from_slice(&segments_json)
        .map_err(|e| MutarjimError::Backup(format!("segments.json unreadable: {e}")))?;

    project.total_segments = segments.len();
    project.translated_segments = segments
        .iter()
        .filter(|s| s.status == SegmentStatus::Translated)
        .count();

    debug!(
        "Restoring {}: {} segments, {} translated",
        project.title, project.total_segments, project.translated_segments
    );

    store
        .replace_all(project.clone(), segments, source_book, cover)
        .await?;
    Ok(project)
}

fn read_bundle_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| MutarjimError::Backup(format!("bundle is missing {name}")))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Current bundles wrap the project in `{version, timestamp,
/// projectData}`; legacy bundles stored the project object directly.
fn parse_project(payload: &[u8]) -> Result<Project> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| MutarjimError::Backup(format!("project.json unreadable: {e}")))?;

    let project_value = match value.get("projectData") {
        Some(inner) => inner.clone(),
        None => value,
    };

    serde_json::from_value(project_value)
        .map_err(|e| MutarjimError::Backup(format!("project.json has wrong shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testkit::{test_project, test_segments};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_backup_round_trip() {
        let store = MemoryStore::new();
        let mut segments = test_segments(4);
        segments[0].status = SegmentStatus::Translated;
        segments[0].translated_html = "<p>تم</p>".to_string();
        segments[1].status = SegmentStatus::Translated;
        segments[1].translated_html = "<p>كذلك</p>".to_string();

        store
            .replace_all(
                test_project(4),
                segments,
                b"original epub bytes".to_vec(),
                Some(vec![7, 7]),
            )
            .await
            .unwrap();

        let bundle = write_backup(&store).await.unwrap();

        let restored_store = MemoryStore::new();
        let project = restore_backup(&restored_store, &bundle).await.unwrap();

        assert_eq!(project.title, "Test Book");
        assert_eq!(project.total_segments, 4);
        assert_eq!(project.translated_segments, 2, "recomputed from statuses");
        assert_eq!(
            restored_store.source_book().await.unwrap().unwrap(),
            b"original epub bytes"
        );
        assert_eq!(
            restored_store.custom_cover().await.unwrap().unwrap(),
            vec![7, 7]
        );

        let restored_segments = restored_store.segments().await.unwrap();
        assert_eq!(restored_segments[0].translated_html, "<p>تم</p>");
        assert_eq!(restored_segments[2].status, SegmentStatus::Pending);
    }

    #[tokio::test]
    async fn test_legacy_unwrapped_project_json() {
        let store = MemoryStore::new();
        store
            .replace_all(test_project(1), test_segments(1), b"book".to_vec(), None)
            .await
            .unwrap();
        let bundle = write_backup(&store).await.unwrap();

        // Rewrite project.json as a bare project object.
        let mut archive = zip::ZipArchive::new(Cursor::new(bundle.as_slice())).unwrap();
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).unwrap();
            let name = entry.name().to_string();
            zip.start_file(name.clone(), FileOptions::default()).unwrap();
            if name == PROJECT_ENTRY {
                let bare = serde_json::to_vec(&test_project(1)).unwrap();
                zip.write_all(&bare).unwrap();
            } else {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).unwrap();
                zip.write_all(&buf).unwrap();
            }
        }
        let legacy_bundle = zip.finish().unwrap().into_inner();

        let restored_store = MemoryStore::new();
        let project = restore_backup(&restored_store, &legacy_bundle).await.unwrap();
        assert_eq!(project.title, "Test Book");
    }

    #[tokio::test]
    async fn test_missing_entry_leaves_store_untouched() {
        let target = MemoryStore::new();
        target
            .replace_all(test_project(2), test_segments(2), b"keep me".to_vec(), None)
            .await
            .unwrap();

        // A zip with no segments.json is structurally invalid.
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(SOURCE_ENTRY, FileOptions::default()).unwrap();
        zip.write_all(b"x").unwrap();
        zip.start_file(PROJECT_ENTRY, FileOptions::default()).unwrap();
        zip.write_all(b"{}").unwrap();
        let broken = zip.finish().unwrap().into_inner();

        assert!(restore_backup(&target, &broken).await.is_err());
        assert_eq!(
            target.source_book().await.unwrap().unwrap(),
            b"keep me",
            "failed restore must not wipe the store"
        );
    }
}
