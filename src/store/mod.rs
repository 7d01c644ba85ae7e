//! Durable project/segment storage.
//!
//! The store is the single source of truth for segment state; every
//! status transition goes through it. `MemoryStore` backs tests,
//! `JsonStore` is the on-disk store used by the CLI.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ExportSettings;
use crate::error::Result;

pub use fs::JsonStore;
pub use memory::MemoryStore;

/// Segmentation strategy version. v1 captured element leaves only;
/// v2 additionally captures orphan text nodes in mixed content and
/// treats tables as blocks. New imports are always v2; v1 survives for
/// projects restored from old backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SchemaVersion {
    V1,
    V2,
}

impl SchemaVersion {
    fn legacy_default() -> Self {
        SchemaVersion::V1
    }
}

impl From<SchemaVersion> for u32 {
    fn from(version: SchemaVersion) -> u32 {
        match version {
            SchemaVersion::V1 => 1,
            SchemaVersion::V2 => 2,
        }
    }
}

impl TryFrom<u32> for SchemaVersion {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, String> {
        match value {
            1 => Ok(SchemaVersion::V1),
            2 => Ok(SchemaVersion::V2),
            other => Err(format!("unknown schema version {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    Pending,
    Translating,
    Translated,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub translated_title: Option<String>,
    #[serde(default)]
    pub total_segments: usize,
    #[serde(default)]
    pub translated_segments: usize,
    #[serde(default = "SchemaVersion::legacy_default")]
    pub schema_version: SchemaVersion,
    /// Budget used at import time; export must re-walk with the same
    /// value or batch boundaries stop lining up.
    #[serde(default = "default_char_limit")]
    pub batch_char_limit: usize,
    #[serde(default, alias = "exportSettings")]
    pub export: ExportSettings,
}

fn default_char_limit() -> usize {
    6000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// `"<content-doc-path>::<batch-index>"`, globally unique
    pub id: String,
    pub doc_path: String,
    pub batch_index: usize,
    pub original_html: String,
    #[serde(default)]
    pub translated_html: String,
    pub status: SegmentStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

/// Durable store contract. Implementations must make `claim_next`
/// atomic: no two concurrent callers may receive the same segment.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    // === Project lifecycle ===

    /// Wipe the store, then write the project, its segments, the
    /// immutable source archive, and the optional replacement cover.
    async fn replace_all(
        &self,
        project: Project,
        segments: Vec<Segment>,
        source_book: Vec<u8>,
        custom_cover: Option<Vec<u8>>,
    ) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn project(&self) -> Result<Option<Project>>;

    async fn update_project(&self, project: &Project) -> Result<()>;

    // === Blobs ===

    async fn source_book(&self) -> Result<Option<Vec<u8>>>;

    async fn custom_cover(&self) -> Result<Option<Vec<u8>>>;

    async fn set_custom_cover(&self, cover: Option<Vec<u8>>) -> Result<()>;

    // === Segments ===

    async fn segment(&self, id: &str) -> Result<Option<Segment>>;

    /// All segments in insertion order (document order, then batch index).
    async fn segments(&self) -> Result<Vec<Segment>>;

    async fn update_segment(&self, segment: &Segment) -> Result<()>;

    /// Atomically pick one claimable segment, preferring PENDING over
    /// FAILED, mark it TRANSLATING and return it. `None` when no work
    /// is available.
    async fn claim_next(&self) -> Result<Option<Segment>>;

    async fn count_by_status(&self, status: SegmentStatus) -> Result<usize>;
}
