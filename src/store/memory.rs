//! In-memory store, used by tests and as the injection seam for the
//! engine. Same transition semantics as the filesystem store.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{MutarjimError, Result};

use super::{Project, Segment, SegmentStatus, SegmentStore};

#[derive(Default)]
struct Inner {
    project: Option<Project>,
    segments: Vec<Segment>,
    source_book: Option<Vec<u8>>,
    custom_cover: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SegmentStore for MemoryStore {
    async fn replace_all(
        &self,
        project: Project,
        segments: Vec<Segment>,
        source_book: Vec<u8>,
        custom_cover: Option<Vec<u8>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        *inner = Inner {
            project: Some(project),
            segments,
            source_book: Some(source_book),
            custom_cover,
        };
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
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
        inner.project = Some(project.clone());
        Ok(())
    }

    async fn source_book(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().await.source_book.clone())
    }

    async fn custom_cover(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().await.custom_cover.clone())
    }

    async fn set_custom_cover(&self, cover: Option<Vec<u8>>) -> Result<()> {
        self.inner.lock().await.custom_cover = cover;
        Ok(())
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
        match inner.segments.iter_mut().find(|s| s.id == segment.id) {
            Some(existing) => {
                *existing = segment.clone();
                Ok(())
            }
            None => Err(MutarjimError::Store(format!(
                "unknown segment {}",
                segment.id
            ))),
        }
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

        Ok(position.map(|index| {
            inner.segments[index].status = SegmentStatus::Translating;
            inner.segments[index].clone()
        }))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testkit::{test_project, test_segments};

    #[tokio::test]
    async fn test_claim_prefers_pending_over_failed() {
        let store = MemoryStore::new();
        let mut segments = test_segments(3);
        segments[0].status = SegmentStatus::Failed;
        store
            .replace_all(test_project(3), segments, vec![], None)
            .await
            .unwrap();

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.batch_index, 1, "pending segment claimed first");
        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.batch_index, 2);
        let third = store.claim_next().await.unwrap().unwrap();
        assert_eq!(third.batch_index, 0, "failed segment claimed last");
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_marks_translating() {
        let store = MemoryStore::new();
        store
            .replace_all(test_project(1), test_segments(1), vec![], None)
            .await
            .unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.status, SegmentStatus::Translating);
        assert_eq!(
            store
                .count_by_status(SegmentStatus::Translating)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_unknown_segment_errors() {
        let store = MemoryStore::new();
        store
            .replace_all(test_project(1), test_segments(1), vec![], None)
            .await
            .unwrap();

        let mut ghost = test_segments(1).remove(0);
        ghost.id = "nope::0".to_string();
        assert!(store.update_segment(&ghost).await.is_err());
    }
}
