use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Project directory holding the durable translation state
    #[arg(short, long, default_value = ".mutarjim")]
    pub project_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import an EPUB file into the project, segmenting every spine document
    Import {
        /// Input EPUB file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Translate pending segments until the queue drains or pauses
    Translate,

    /// Show project progress and problem segments
    Status,

    /// Requeue skipped segments with a fresh retry budget
    Retry,

    /// Export the translated EPUB
    Export {
        /// Output file (defaults to "<title>.translated.epub")
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Translated book title for the package metadata
        #[arg(short, long)]
        title: Option<String>,

        /// Replacement cover image file
        #[arg(long)]
        cover: Option<PathBuf>,
    },

    /// Write a self-contained backup bundle (.mtj)
    Backup {
        /// Output file (defaults to "<title>.mtj")
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Restore a backup bundle, replacing the current project
    Restore {
        /// Input .mtj bundle
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Write a default configuration file to mutarjim.toml
    InitConfig,
}
