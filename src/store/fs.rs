//! Filesystem store: a project directory holding JSON state next to
//! the immutable source archive.
//!
//! Layout:
//!   project.json   - project record
//!   segments.json  - full segment list
//!   book.epub      - original archive bytes, never rewritten
//!   cover.bin      - optional replacement cover
//!
//! Writes go through a tmp-file-then-rename so a crash mid-write never
//! leaves a torn file. On open, segments stuck in TRANSLATING (an
//! interrupted run) are reverted to PENDING so they are re-offered.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{MutarjimError, Result};

use super::{Project, Segment, SegmentStatus, SegmentStore};

const PROJECT_FILE: &str = "project.json";
const SEGMENTS_FILE: &str = "segments.json";
const BOOK_FILE: &str = "book.epub";
const COVER_FILE: &str = "cover.bin";

#[derive(Default)]
struct Inner {
    project: Option<Project>,
    segments: Vec<Segment>,
}

pub struct JsonStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonStore {
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut inner = Inner::default();

        let project_path = dir.join(PROJECT_FILE);
        if let Ok(content) = tokio::fs::read_to_string(&project_path).await {
            inner.project = Some(serde_json::from_str(&content)?);
        }

        let segments_path = dir.join(SEGMENTS_FILE);
        if let Ok(content) = tokio::fs::read_to_string(&segments_path).await {
            inner.segments = serde_json::from_str(&content)?;
        }

        // Segments left TRANSLATING by an interrupted run are re-offered.
        let interrupted = inner
            .segments
            .iter_mut()
            .filter(|s| s.status == SegmentStatus::Translating)
            .map(|s| s.status = SegmentStatus::Pending)
            .count();

        let store = Self {
            dir,
            inner: Mutex::new(inner),
        };

        if interrupted > 0 {
            info!("Reverted {} interrupted segment(s) to pending", interrupted);
            let inner = store.inner.lock().await;
            store.persist_segments(&inner.segments).await?;
        }

        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        debug!("Wrote {} ({} bytes)", target.display(), bytes.len());
        Ok(())
    }

    async fn persist_project(&self, project: &Project) -> Result<()> {
        let json = serde_json::to_vec_pretty(project)?;
        self.write_atomic(PROJECT_FILE, &json).await
    }

    async fn persist_segments(&self, segments: &[Segment]) -> Result<()> {
        let json = serde_json::to_vec(segments)?;
        self.write_atomic(SEGMENTS_FILE, &json).await
    }

    async fn remove_if_present(&self, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SegmentStore for JsonStore {
    async fn replace_all(
        &self,
        project: Project,
        segments: Vec<Segment>,
        source_book: Vec<u8>,
        custom_cover: Option<Vec<u8>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        self.write_atomic(BOOK_FILE, &source_book).await?;
        match &custom_cover {
            Some(cover) => self.write_atomic(COVER_FILE, cover).await?,
            None => self.remove_if_present(COVER_FILE).await?,
        }
        self.persist_project(&project).await?;
        self.persist_segments(&segments).await?;

        inner.project = Some(project);
        inner.segments = segments;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for name in [PROJECT_FILE, SEGMENTS_FILE, BOOK_FILE, COVER_FILE] {
            self.remove_if_present(name).await?;
        }
        *inner = Inner::default();
        Ok(())
    }

    async fn project(&self) -> Result<Option<Project>> {
        Ok(self.inner.lock().await.project.clone())
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.project.is_none() {
            return Err(MutarjimError::Store("no project loaded".to_string()));
        }
        self.persist_project(project).await?;
        inner.project = Some(project.clone());
        Ok(())
    }

    async fn source_book(&self) -> Result<Option<Vec<u8>>> {
        let _guard = self.inner.lock().await;
        match tokio::fs::read(self.dir.join(BOOK_FILE)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn custom_cover(&self) -> Result<Option<Vec<u8>>> {
        let _guard = self.inner.lock().await;
        match tokio::fs::read(self.dir.join(COVER_FILE)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_custom_cover(&self, cover: Option<Vec<u8>>) -> Result<()> {
        let _guard = self.inner.lock().await;
        match cover {
            Some(bytes) => self.write_atomic(COVER_FILE, &bytes).await,
            None => self.remove_if_present(COVER_FILE).await,
        }
    }

    async fn segment(&self, id: &str) -> Result<Option<Segment>> {
        Ok(self
            .inner
            .lock()
            .await
            .segments
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn segments(&self) -> Result<Vec<Segment>> {
        Ok(self.inner.lock().await.segments.clone())
    }

    async fn update_segment(&self, segment: &Segment) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(existing) = inner.segments.iter_mut().find(|s| s.id == segment.id) else {
            return Err(MutarjimError::Store(format!(
                "unknown segment {}",
                segment.id
            )));
        };
        *existing = segment.clone();
        let segments = inner.segments.clone();
        self.persist_segments(&segments).await
    }

    async fn claim_next(&self) -> Result<Option<Segment>> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .segments
            .iter()
            .position(|s| s.status == SegmentStatus::Pending)
            .or_else(|| {
                inner
                    .segments
                    .iter()
                    .position(|s| s.status == SegmentStatus::Failed)
            });

        let Some(index) = position else {
            return Ok(None);
        };
        inner.segments[index].status = SegmentStatus::Translating;
        let claimed = inner.segments[index].clone();
        let segments = inner.segments.clone();
        self.persist_segments(&segments).await?;
        Ok(Some(claimed))
    }

    async fn count_by_status(&self, status: SegmentStatus) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .await
            .segments
            .iter()
            .filter(|s| s.status == status)
            .count())
    }
}
