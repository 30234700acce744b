//! Core types for the myna speech recognition runtime
//!
//! This crate provides the foundational types shared by the pipeline and
//! server crates:
//! - Audio sample rates and PCM conversion
//! - Recognition results and word-level timestamps
//! - Error types

pub mod audio;
pub mod error;
pub mod result;

pub use audio::{pcm16le_to_f32, SampleRate};
pub use error::{Error, Result};
pub use result::{RecognitionResult, WordPiece};
