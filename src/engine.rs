//! Translation engine: owns the durable store, the translator client,
//! the engine state machine, and the bounded worker pool.
//!
//! Workers coordinate exclusively through the store (which serialises
//! claims) and the engine state variable. Pause is cooperative: an
//! in-flight translation that finishes after a pause or quota stop is
//! still written, since the effort is already spent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backup;
use crate::config::{Config, ExportSettings};
use crate::epub::{self, reader};
use crate::error::{MutarjimError, Result};
use crate::events::{LogBuffer, LogLevel, LogRecord, ProjectStats, SegmentEvent};
use crate::reassemble;
use crate::segmenter;
use crate::store::{Project, SchemaVersion, Segment, SegmentStatus, SegmentStore};
use crate::translate::{TranslateError, Translator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Analyzing,
    Translating,
    Paused,
    QuotaPaused,
    Completed,
    Error,
}

struct Shared {
    state_tx: watch::Sender<EngineState>,
    stats_tx: watch::Sender<ProjectStats>,
    events_tx: broadcast::Sender<SegmentEvent>,
    logs: LogBuffer,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active_workers: AtomicUsize,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn SegmentStore>,
    translator: Arc<dyn Translator>,
    config: Config,
    shared: Arc<Shared>,
}

impl Engine {
    pub async fn new(
        store: Arc<dyn SegmentStore>,
        translator: Arc<dyn Translator>,
        config: Config,
    ) -> Result<Self> {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        let (stats_tx, _) = watch::channel(ProjectStats::default());
        let (events_tx, _) = broadcast::channel(256);

        let engine = Self {
            store,
            translator,
            config,
            shared: Arc::new(Shared {
                state_tx,
                stats_tx,
                events_tx,
                logs: LogBuffer::new(),
                workers: Mutex::new(Vec::new()),
                active_workers: AtomicUsize::new(0),
            }),
        };
        engine.publish_stats().await?;
        Ok(engine)
    }

    // === Subscriptions (consumed by UI surfaces) ===

    pub fn state(&self) -> EngineState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<ProjectStats> {
        self.shared.stats_tx.subscribe()
    }

    pub fn subscribe_segments(&self) -> broadcast::Receiver<SegmentEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        self.shared.logs.subscribe()
    }

    pub fn log_snapshot(&self) -> Vec<LogRecord> {
        self.shared.logs.snapshot()
    }

    // === Project lifecycle ===

    /// Import an EPUB: read the package, segment every spine document,
    /// and replace whatever the store held before.
    pub async fn import_project(&self, archive_bytes: Vec<u8>) -> Result<Project> {
        self.set_state(EngineState::Analyzing);
        match self.import_inner(archive_bytes).await {
            Ok(project) => {
                self.set_state(EngineState::Idle);
                Ok(project)
            }
            Err(err) => {
                self.log(LogLevel::Error, format!("Import failed: {err}"));
                self.set_state(EngineState::Error);
                Err(err)
            }
        }
    }

    async fn import_inner(&self, archive_bytes: Vec<u8>) -> Result<Project> {
        let parsed = reader::read_book(&archive_bytes)?;
        let schema = SchemaVersion::V2;
        let char_limit = self.config.engine.batch_char_limit;

        let mut segments: Vec<Segment> = Vec::new();
        for doc in &parsed.docs {
            let source = match epub::read_entry_string(&archive_bytes, &doc.path) {
                Ok(source) => source,
                Err(err) => {
                    warn!("Spine entry {} unreadable, skipping: {}", doc.path, err);
                    continue;
                }
            };
            let doc_segments =
                segmenter::segment_document(&source, &doc.path, schema, char_limit);
            debug!("Segmented {}: {} segment(s)", doc.path, doc_segments.len());
            segments.extend(doc_segments);
        }

        if segments.is_empty() {
            return Err(MutarjimError::NoSegments);
        }

        let project = Project {
            id: generate_project_id(&parsed.meta.title, &parsed.meta.author),
            title: parsed.meta.title.clone(),
            author: parsed.meta.author.clone(),
            translated_title: None,
            total_segments: segments.len(),
            translated_segments: 0,
            schema_version: schema,
            batch_char_limit: char_limit,
            export: self.config.export,
        };

        let total = segments.len();
        self.store
            .replace_all(project.clone(), segments, archive_bytes, None)
            .await?;
        self.publish_stats().await?;
        self.log(
            LogLevel::Info,
            format!(
                "Imported \"{}\" ({}): {} segments across {} documents",
                project.title,
                project.author,
                total,
                parsed.docs.len()
            ),
        );
        Ok(project)
    }

    /// Update mutable project fields through the engine, never directly.
    pub async fn set_translated_title(&self, title: Option<String>) -> Result<()> {
        let mut project = self.require_project().await?;
        project.translated_title = title;
        self.store.update_project(&project).await
    }

    pub async fn set_export_settings(&self, settings: ExportSettings) -> Result<()> {
        let mut project = self.require_project().await?;
        project.export = settings;
        self.store.update_project(&project).await
    }

    pub async fn set_custom_cover(&self, cover: Option<Vec<u8>>) -> Result<()> {
        self.store.set_custom_cover(cover).await
    }

    pub async fn project(&self) -> Result<Option<Project>> {
        self.store.project().await
    }

    pub async fn segments(&self) -> Result<Vec<Segment>> {
        self.store.segments().await
    }

    async fn require_project(&self) -> Result<Project> {
        self.store
            .project()
            .await?
            .ok_or_else(|| MutarjimError::Engine("no project imported".to_string()))
    }

    // === Scheduling ===

    pub async fn start(&self) -> Result<()> {
        let project = self.require_project().await?;
        if project.total_segments == 0 {
            return Err(MutarjimError::Engine("project has no segments".to_string()));
        }

        match self.state() {
            EngineState::Idle => {}
            EngineState::Translating => return Ok(()),
            other => {
                return Err(MutarjimError::Engine(format!(
                    "cannot start from {other:?}; use resume"
                )))
            }
        }

        self.set_state(EngineState::Translating);
        self.log(LogLevel::Info, "Translation started");
        self.spawn_workers().await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        match self.state() {
            EngineState::Paused | EngineState::QuotaPaused => {}
            EngineState::Translating => return Ok(()),
            EngineState::Idle => return self.start().await,
            other => {
                return Err(MutarjimError::Engine(format!(
                    "cannot resume from {other:?}"
                )))
            }
        }

        self.set_state(EngineState::Translating);
        self.log(LogLevel::Info, "Translation resumed");
        self.spawn_workers().await;
        Ok(())
    }

    /// Cooperative pause: workers stop claiming; in-flight calls finish
    /// and their results are written.
    pub fn pause(&self) {
        if self.state() == EngineState::Translating {
            self.set_state(EngineState::Paused);
            self.log(LogLevel::Info, "Translation paused");
        } else {
            debug!("Pause requested outside TRANSLATING, ignoring");
        }
    }

    /// Put every skipped segment back in the queue with a fresh retry
    /// budget. The only path from a terminal status back to PENDING.
    pub async fn retry_skipped(&self) -> Result<usize> {
        let segments = self.store.segments().await?;
        let mut reset = 0usize;
        for segment in segments {
            if segment.status != SegmentStatus::Skipped {
                continue;
            }
            let mut updated = segment;
            updated.status = SegmentStatus::Pending;
            updated.retry_count = 0;
            updated.error = None;
            self.store.update_segment(&updated).await?;
            self.emit_segment(&updated.id, SegmentStatus::Pending, None);
            reset += 1;
        }
        if reset > 0 {
            self.log(
                LogLevel::Info,
                format!("Requeued {reset} skipped segment(s)"),
            );
        }
        Ok(reset)
    }

    /// (total, translated, failed)
    pub async fn stats(&self) -> Result<(usize, usize, usize)> {
        let total = self
            .store
            .project()
            .await?
            .map(|p| p.total_segments)
            .unwrap_or(0);
        let translated = self.store.count_by_status(SegmentStatus::Translated).await?;
        let failed = self.store.count_by_status(SegmentStatus::Failed).await?;
        Ok((total, translated, failed))
    }

    /// Wait for the worker pool to drain.
    pub async fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.shared.workers.lock().await;
            workers.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                error!("Worker task panicked: {err}");
            }
        }
    }

    async fn spawn_workers(&self) {
        if self.shared.active_workers.load(Ordering::SeqCst) > 0 {
            debug!("Worker pool already running");
            return;
        }

        let count = self.config.engine.worker_concurrency.max(1);
        let mut workers = self.shared.workers.lock().await;
        for worker_id in 0..count {
            self.shared.active_workers.fetch_add(1, Ordering::SeqCst);
            let engine = self.clone();
            workers.push(tokio::spawn(async move {
                engine.worker_loop(worker_id).await;
            }));
        }
        debug!("Spawned {count} translation workers");
    }

    async fn worker_loop(self, worker_id: usize) {
        loop {
            if self.state() != EngineState::Translating {
                break;
            }

            let claimed = match self.store.claim_next().await {
                Ok(claimed) => claimed,
                Err(err) => {
                    error!("Worker {worker_id}: claim failed: {err}");
                    break;
                }
            };
            let Some(segment) = claimed else {
                break;
            };

            self.emit_segment(&segment.id, SegmentStatus::Translating, None);
            debug!("Worker {worker_id} translating {}", segment.id);

            let outcome = self.translator.translate(&segment.original_html).await;
            let applied = match outcome {
                Ok(translated) => self.complete_segment(segment, translated).await,
                Err(err) if err.is_quota() => self.quota_pause(segment, &err).await,
                Err(err) => self.fail_segment(segment, &err).await,
            };
            if let Err(err) = applied {
                error!("Worker {worker_id}: store update failed: {err}");
                break;
            }
        }

        let remaining = self.shared.active_workers.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Worker {worker_id} exiting, {remaining} still active");
        if remaining == 0 {
            self.finalize_drain().await;
        }
    }

    async fn complete_segment(&self, segment: Segment, translated: String) -> Result<()> {
        let mut updated = segment;
        updated.status = SegmentStatus::Translated;
        updated.translated_html = translated;
        updated.error = None;
        self.store.update_segment(&updated).await?;

        self.publish_stats().await?;
        self.emit_segment(&updated.id, SegmentStatus::Translated, None);
        self.log(LogLevel::Success, format!("Translated {}", updated.id));
        Ok(())
    }

    async fn fail_segment(&self, segment: Segment, err: &TranslateError) -> Result<()> {
        let mut updated = segment;
        updated.retry_count += 1;
        updated.status = if updated.retry_count >= self.config.engine.max_retries {
            SegmentStatus::Skipped
        } else {
            SegmentStatus::Failed
        };
        updated.error = Some(err.to_string());
        self.store.update_segment(&updated).await?;

        self.emit_segment(&updated.id, updated.status, updated.error.as_deref());
        match updated.status {
            SegmentStatus::Skipped => self.log(
                LogLevel::Error,
                format!(
                    "Skipping {} after {} attempts: {err}",
                    updated.id, updated.retry_count
                ),
            ),
            _ => self.log(
                LogLevel::Warning,
                format!(
                    "Attempt {} failed for {}: {err}",
                    updated.retry_count, updated.id
                ),
            ),
        }
        Ok(())
    }

    /// Quota failures revert the segment to PENDING without touching its
    /// retry budget and pause the whole engine.
    async fn quota_pause(&self, segment: Segment, err: &TranslateError) -> Result<()> {
        let mut updated = segment;
        updated.status = SegmentStatus::Pending;
        updated.error = None;
        self.store.update_segment(&updated).await?;
        self.emit_segment(&updated.id, SegmentStatus::Pending, None);

        if self.state() == EngineState::Translating {
            self.set_state(EngineState::QuotaPaused);
            self.log(
                LogLevel::Error,
                format!("Quota exhausted, translation paused: {err}"),
            );
        }
        Ok(())
    }

    /// Last worker out checks for completion.
    async fn finalize_drain(&self) {
        let stats = match self.stats().await {
            Ok(stats) => stats,
            Err(err) => {
                error!("Completion check failed: {err}");
                return;
            }
        };
        let (total, translated, _) = stats;

        let state = self.state();
        let running = matches!(
            state,
            EngineState::Translating | EngineState::Paused | EngineState::QuotaPaused
        );
        if running && total > 0 && translated == total {
            self.set_state(EngineState::Completed);
            self.log(
                LogLevel::Success,
                format!("Translation completed: {translated}/{total} segments"),
            );
            return;
        }

        if state == EngineState::Translating {
            // Queue drained with skipped segments left over.
            self.set_state(EngineState::Paused);
            self.log(
                LogLevel::Warning,
                format!(
                    "Queue drained with {translated}/{total} translated; remaining segments were skipped"
                ),
            );
        }
    }

    // === Export / backup ===

    pub async fn export_book(&self) -> Result<Vec<u8>> {
        let project = self.require_project().await?;
        let source_book = self
            .store
            .source_book()
            .await?
            .ok_or_else(|| MutarjimError::Engine("source archive missing".to_string()))?;
        let segments = self.store.segments().await?;
        let cover = self.store.custom_cover().await?;

        let options = reassemble::ExportOptions {
            target_language: self.config.translate.target_language.clone(),
            target_direction: self.config.translate.target_direction,
            settings: project.export,
            translated_title: project.translated_title.clone(),
        };

        let exported = reassemble::reassemble_book(
            &source_book,
            &segments,
            project.schema_version,
            project.batch_char_limit,
            cover.as_deref(),
            &options,
        )?;
        self.log(
            LogLevel::Success,
            format!("Exported translated book ({} bytes)", exported.len()),
        );
        Ok(exported)
    }

    pub async fn backup(&self) -> Result<Vec<u8>> {
        let bytes = backup::write_backup(self.store.as_ref()).await?;
        self.log(
            LogLevel::Info,
            format!("Backup bundle written ({} bytes)", bytes.len()),
        );
        Ok(bytes)
    }

    pub async fn restore(&self, bundle: &[u8]) -> Result<Project> {
        let project = backup::restore_backup(self.store.as_ref(), bundle).await?;
        self.publish_stats().await?;
        self.set_state(EngineState::Idle);
        self.log(
            LogLevel::Info,
            format!(
                "Restored \"{}\": {}/{} segments translated",
                project.title, project.translated_segments, project.total_segments
            ),
        );
        Ok(project)
    }

    // === Internals ===

    fn set_state(&self, state: EngineState) {
        let previous = self.state();
        if previous != state {
            debug!("Engine state {previous:?} -> {state:?}");
            self.shared.state_tx.send_replace(state);
        }
    }

    /// The published translated count is always derived from the store,
    /// never incremented blindly.
    async fn publish_stats(&self) -> Result<()> {
        let total = self
            .store
            .project()
            .await?
            .map(|p| p.total_segments)
            .unwrap_or(0);
        let translated = self.store.count_by_status(SegmentStatus::Translated).await?;

        if let Some(mut project) = self.store.project().await? {
            if project.translated_segments != translated {
                project.translated_segments = translated;
                self.store.update_project(&project).await?;
            }
        }

        self.shared
            .stats_tx
            .send_replace(ProjectStats { total, translated });
        Ok(())
    }

    fn emit_segment(&self, id: &str, status: SegmentStatus, error: Option<&str>) {
        let _ = self.shared.events_tx.send(SegmentEvent {
            id: id.to_string(),
            status,
            error: error.map(String::from),
        });
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Error => warn!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            _ => info!("{message}"),
        }
        self.shared.logs.push(level, message);
    }
}

fn generate_project_id(title: &str, author: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    title.hash(&mut hasher);
    author.hash(&mut hasher);
    crate::events::epoch_ms().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testkit::{test_project, test_segments};
    use crate::store::MemoryStore;
    use crate::translate::{TranslateResult, Translator};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Echoes the original markup, so tag integrity trivially holds.
    struct EchoTranslator;

    #[async_trait]
    impl Translator for EchoTranslator {
        async fn translate(&self, markup: &str) -> TranslateResult<String> {
            Ok(markup.to_string())
        }
    }

    /// Sleeps a markup-dependent interval and records overlapping calls
    /// on the same input.
    struct SleepyTranslator {
        active: std::sync::Mutex<HashSet<String>>,
        overlap: AtomicBool,
    }

    impl SleepyTranslator {
        fn new() -> Self {
            Self {
                active: std::sync::Mutex::new(HashSet::new()),
                overlap: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Translator for SleepyTranslator {
        async fn translate(&self, markup: &str) -> TranslateResult<String> {
            {
                let mut active = self.active.lock().unwrap();
                if !active.insert(markup.to_string()) {
                    self.overlap.store(true, Ordering::SeqCst);
                }
            }
            let jitter = {
                use std::collections::hash_map::DefaultHasher;
                use std::hash::{Hash, Hasher};
                let mut hasher = DefaultHasher::new();
                markup.hash(&mut hasher);
                hasher.finish() % 15
            };
            tokio::time::sleep(Duration::from_millis(jitter)).await;
            self.active.lock().unwrap().remove(markup);
            Ok(markup.to_string())
        }
    }

    /// Raises a quota error exactly once, for the segment containing
    /// the marker; succeeds otherwise.
    struct QuotaOnceTranslator {
        marker: String,
        triggered: AtomicBool,
    }

    #[async_trait]
    impl Translator for QuotaOnceTranslator {
        async fn translate(&self, markup: &str) -> TranslateResult<String> {
            if markup.contains(&self.marker)
                && !self.triggered.swap(true, Ordering::SeqCst)
            {
                return Err(TranslateError::Quota("simulated 429".to_string()));
            }
            Ok(markup.to_string())
        }
    }

    struct AlwaysFailsTranslator;

    #[async_trait]
    impl Translator for AlwaysFailsTranslator {
        async fn translate(&self, _markup: &str) -> TranslateResult<String> {
            Err(TranslateError::Transport("connection refused".to_string()))
        }
    }

    struct SlowTranslator;

    #[async_trait]
    impl Translator for SlowTranslator {
        async fn translate(&self, markup: &str) -> TranslateResult<String> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(markup.to_string())
        }
    }

    async fn engine_with(
        translator: Arc<dyn Translator>,
        segment_count: usize,
    ) -> Engine {
        let store = Arc::new(MemoryStore::new());
        store
            .replace_all(
                test_project(segment_count),
                test_segments(segment_count),
                b"fake epub".to_vec(),
                None,
            )
            .await
            .unwrap();
        Engine::new(store, translator, Config::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let engine = engine_with(Arc::new(EchoTranslator), 8).await;
        engine.start().await.unwrap();
        engine.wait_idle().await;

        assert_eq!(engine.state(), EngineState::Completed);
        let (total, translated, failed) = engine.stats().await.unwrap();
        assert_eq!((total, translated, failed), (8, 8, 0));

        let project = engine.project().await.unwrap().unwrap();
        assert_eq!(project.translated_segments, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_segment_is_claimed_twice_concurrently() {
        let translator = Arc::new(SleepyTranslator::new());
        let engine = engine_with(translator.clone(), 40).await;
        engine.start().await.unwrap();
        engine.wait_idle().await;

        assert!(!translator.overlap.load(Ordering::SeqCst));
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[tokio::test]
    async fn test_quota_pauses_and_reverts_segment() {
        let translator = Arc::new(QuotaOnceTranslator {
            marker: "paragraph 7".to_string(),
            triggered: AtomicBool::new(false),
        });
        let engine = engine_with(translator, 20).await;
        engine.start().await.unwrap();
        engine.wait_idle().await;

        assert_eq!(engine.state(), EngineState::QuotaPaused);
        let segments = engine.store.segments().await.unwrap();
        let victim = segments.iter().find(|s| s.batch_index == 7).unwrap();
        assert_eq!(victim.status, SegmentStatus::Pending);
        assert_eq!(victim.retry_count, 0, "quota must not consume retries");

        engine.resume().await.unwrap();
        engine.wait_idle().await;
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[tokio::test]
    async fn test_retries_then_skips_then_requeue() {
        let engine = engine_with(Arc::new(AlwaysFailsTranslator), 2).await;
        engine.start().await.unwrap();
        engine.wait_idle().await;

        // Drained without completing: the engine settles into PAUSED.
        assert_eq!(engine.state(), EngineState::Paused);
        for segment in engine.store.segments().await.unwrap() {
            assert_eq!(segment.status, SegmentStatus::Skipped);
            assert_eq!(segment.retry_count, 3);
            assert!(segment.error.as_deref().unwrap().contains("connection refused"));
        }

        let reset = engine.retry_skipped().await.unwrap();
        assert_eq!(reset, 2);
        for segment in engine.store.segments().await.unwrap() {
            assert_eq!(segment.status, SegmentStatus::Pending);
            assert_eq!(segment.retry_count, 0);
            assert!(segment.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_pause_is_cooperative_and_writes_inflight() {
        let engine = engine_with(Arc::new(SlowTranslator), 25).await;
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.pause();
        engine.wait_idle().await;

        assert_eq!(engine.state(), EngineState::Paused);
        let (total, translated, _) = engine.stats().await.unwrap();
        assert!(translated < total, "pause must stop before completion");
        // Claims made before the pause still wrote their results.
        assert!(translated > 0, "in-flight work is written after pause");

        engine.resume().await.unwrap();
        engine.wait_idle().await;
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[tokio::test]
    async fn test_start_requires_project() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store, Arc::new(EchoTranslator), Config::default())
            .await
            .unwrap();
        assert!(engine.start().await.is_err());
    }

    #[tokio::test]
    async fn test_completion_count_is_derived_from_store() {
        let engine = engine_with(Arc::new(EchoTranslator), 3).await;
        engine.start().await.unwrap();
        engine.wait_idle().await;

        let mut stats_rx = engine.subscribe_stats();
        let stats = *stats_rx.borrow_and_update();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.translated, 3);
    }
}
