//! Mutarjim - EPUB Translation Engine
//!
//! A Rust implementation of an automated workflow for translating
//! EPUB books between natural languages with an LLM, preserving the
//! structural markup exactly: segment the spine documents, drive a
//! persistent translation queue, and splice the results back in.

pub mod backup;
pub mod cli;
pub mod config;
pub mod dom;
pub mod engine;
pub mod epub;
pub mod error;
pub mod events;
pub mod reassemble;
pub mod segmenter;
pub mod store;
pub mod translate;
pub mod workflow;
