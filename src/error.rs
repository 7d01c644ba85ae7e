use thiserror::Error;

use crate::translate::TranslateError;

#[derive(Error, Debug)]
pub enum MutarjimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("EPUB has no META-INF/container.xml")]
    MissingContainer,

    #[error("EPUB container does not reference a package document")]
    MissingOpf,

    #[error("Package document could not be parsed: {0}")]
    UnparsableOpf(String),

    #[error("Package document has an empty spine")]
    EmptySpine,

    #[error("No translatable segments were found in the book")]
    NoSegments,

    #[error("Translation error: {0}")]
    Translate(#[from] TranslateError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Backup bundle error: {0}")]
    Backup(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MutarjimError>;
