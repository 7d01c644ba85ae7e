use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, MutarjimError};

// Default values kept in functions so partial config files pick them up
fn default_worker_concurrency() -> usize {
    5
}

fn default_batch_char_limit() -> usize {
    6000
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    600_000
}

fn default_models() -> Vec<String> {
    vec![
        "gemini-2.0-flash".to_string(),
        "gemini-1.5-pro".to_string(),
        "gemini-1.5-flash".to_string(),
    ]
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub translate: TranslateConfig,
    pub export: ExportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent translation workers
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Soft character budget for one translation segment
    #[serde(default = "default_batch_char_limit")]
    pub batch_char_limit: usize,
    /// Failures before a segment is skipped (the first failure counts as 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Gemini API base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key; falls back to the GEMINI_API_KEY environment variable
    #[serde(default)]
    pub api_key: String,
    /// Model fallback chain, tried in order per segment attempt
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Hard timeout for a single model attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Source language code (e.g. "en")
    pub source_language: String,
    /// Target language code (e.g. "ar")
    pub target_language: String,
    /// Writing direction of the target language
    pub target_direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ltr => "ltr",
            Direction::Rtl => "rtl",
        }
    }
}

/// Export-time styling, also stored on the project record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    pub text_alignment: TextAlignment,
    /// When set, alignment rules target block elements with !important
    pub force_alignment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlignment {
    Left,
    Center,
    Right,
    Justify,
}

impl TextAlignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextAlignment::Left => "left",
            TextAlignment::Center => "center",
            TextAlignment::Right => "right",
            TextAlignment::Justify => "justify",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                worker_concurrency: default_worker_concurrency(),
                batch_char_limit: default_batch_char_limit(),
                max_retries: default_max_retries(),
            },
            translate: TranslateConfig {
                endpoint: default_endpoint(),
                api_key: String::new(),
                models: default_models(),
                timeout_ms: default_timeout_ms(),
                source_language: "en".to_string(),
                target_language: "ar".to_string(),
                target_direction: Direction::Rtl,
            },
            export: ExportSettings {
                text_alignment: TextAlignment::Right,
                force_alignment: false,
            },
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            text_alignment: TextAlignment::Right,
            force_alignment: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MutarjimError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| MutarjimError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MutarjimError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| MutarjimError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

impl TranslateConfig {
    /// Configured key, or the GEMINI_API_KEY environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty())
    }
}
