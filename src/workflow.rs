//! CLI-facing facade over the engine: one project directory, one book.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{Engine, EngineState};
use crate::error::{MutarjimError, Result};
use crate::store::{JsonStore, SegmentStatus};
use crate::translate::GeminiTranslator;

pub struct Workflow {
    engine: Engine,
}

impl Workflow {
    pub async fn open(config: Config, project_dir: &Path) -> Result<Self> {
        let store = Arc::new(JsonStore::open(project_dir).await?);
        let translator = Arc::new(GeminiTranslator::new(config.translate.clone()));
        let engine = Engine::new(store, translator, config).await?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Import an EPUB into the project directory, replacing any
    /// previous project.
    pub async fn import<P: AsRef<Path>>(&self, input: P) -> Result<()> {
        let input = input.as_ref();
        info!("Importing {}", input.display());

        let bytes = fs::read(input).await?;
        let project = self.engine.import_project(bytes).await?;

        println!(
            "Imported \"{}\" by {}: {} segments",
            project.title, project.author, project.total_segments
        );
        Ok(())
    }

    /// Run translation until the queue drains or the engine pauses.
    pub async fn translate(&self, config: &Config) -> Result<()> {
        if config.translate.resolve_api_key().is_none() {
            warn!("No API key configured; set translate.api_key or GEMINI_API_KEY");
        }

        match self.engine.state() {
            EngineState::Completed => {
                println!("Project is already fully translated.");
                return Ok(());
            }
            _ => self.engine.start().await?,
        }

        self.engine.wait_idle().await;

        let (total, translated, failed) = self.engine.stats().await?;
        match self.engine.state() {
            EngineState::Completed => {
                println!("Translation completed: {translated}/{total} segments.");
            }
            EngineState::QuotaPaused => {
                println!(
                    "Quota exhausted at {translated}/{total} segments; run `translate` again later."
                );
            }
            other => {
                println!(
                    "Stopped in state {other:?}: {translated}/{total} translated, {failed} failed. \
                     Use `retry` to requeue skipped segments."
                );
            }
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<()> {
        let Some(project) = self.engine.project().await? else {
            println!("No project imported yet.");
            return Ok(());
        };

        let segments = self.engine.segments().await?;
        let count = |status: SegmentStatus| segments.iter().filter(|s| s.status == status).count();

        println!("Project:    {} by {}", project.title, project.author);
        if let Some(translated_title) = &project.translated_title {
            println!("Translated: {}", translated_title);
        }
        println!("Schema:     v{}", u32::from(project.schema_version));
        println!();
        println!("{:<12} {:>6}", "Status", "Count");
        println!("{}", "-".repeat(20));
        println!("{:<12} {:>6}", "pending", count(SegmentStatus::Pending));
        println!("{:<12} {:>6}", "translating", count(SegmentStatus::Translating));
        println!("{:<12} {:>6}", "translated", count(SegmentStatus::Translated));
        println!("{:<12} {:>6}", "failed", count(SegmentStatus::Failed));
        println!("{:<12} {:>6}", "skipped", count(SegmentStatus::Skipped));
        println!();
        println!(
            "Progress:   {}/{} segments",
            project.translated_segments, project.total_segments
        );

        let troubled: Vec<_> = segments
            .iter()
            .filter(|s| matches!(s.status, SegmentStatus::Failed | SegmentStatus::Skipped))
            .collect();
        if !troubled.is_empty() {
            println!();
            println!("Problem segments:");
            for segment in troubled {
                println!(
                    "  {} ({:?}, {} attempts): {}",
                    segment.id,
                    segment.status,
                    segment.retry_count,
                    segment.error.as_deref().unwrap_or("no error recorded")
                );
            }
        }
        Ok(())
    }

    pub async fn retry(&self) -> Result<()> {
        let requeued = self.engine.retry_skipped().await?;
        if requeued == 0 {
            println!("No skipped segments to requeue.");
        } else {
            println!("Requeued {requeued} skipped segment(s); run `translate` to process them.");
        }
        Ok(())
    }

    pub async fn export(
        &self,
        output: Option<PathBuf>,
        translated_title: Option<String>,
        cover: Option<PathBuf>,
    ) -> Result<PathBuf> {
        if translated_title.is_some() {
            self.engine.set_translated_title(translated_title).await?;
        }
        if let Some(cover_path) = cover {
            let bytes = fs::read(&cover_path).await?;
            self.engine.set_custom_cover(Some(bytes)).await?;
        }

        let project = self
            .engine
            .project()
            .await?
            .ok_or_else(|| MutarjimError::Engine("no project imported".to_string()))?;
        let bytes = self.engine.export_book().await?;

        let output = output.unwrap_or_else(|| {
            PathBuf::from(format!("{}.translated.epub", sanitize_filename(&project.title)))
        });
        fs::write(&output, bytes).await?;
        println!("Exported {}", output.display());
        Ok(output)
    }

    pub async fn backup(&self, output: Option<PathBuf>) -> Result<PathBuf> {
        let project = self
            .engine
            .project()
            .await?
            .ok_or_else(|| MutarjimError::Engine("no project imported".to_string()))?;
        let bytes = self.engine.backup().await?;

        let output = output
            .unwrap_or_else(|| PathBuf::from(format!("{}.mtj", sanitize_filename(&project.title))));
        fs::write(&output, bytes).await?;
        println!("Backup written to {}", output.display());
        Ok(output)
    }

    pub async fn restore<P: AsRef<Path>>(&self, input: P) -> Result<()> {
        let bytes = fs::read(input.as_ref()).await?;
        let project = self.engine.restore(&bytes).await?;
        println!(
            "Restored \"{}\": {}/{} segments translated",
            project.title, project.translated_segments, project.total_segments
        );
        Ok(())
    }
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "book".to_string()
    } else {
        cleaned
    }
}
