//! Speech recognition pipeline
//!
//! Feature extraction, model execution and CTC decoding:
//! - [`features`]: fbank extraction and the buffered feature pipeline
//! - [`model`]: the model executor seam and its ONNX adapter
//! - [`dict`]: unit dictionary and word-piece joining
//! - [`decode`]: prefix beam search, context biasing, attention rescoring,
//!   the streaming decoder and the batch recognizer

pub mod decode;
pub mod dict;
pub mod features;
pub mod model;

pub use decode::{
    BatchRecognizer, ContextGraph, CtcPrefixBeamSearch, DecodeEvent, DecodedHypothesis,
    SearchConfig, StreamingDecoder, StreamingDecoderConfig,
};
pub use dict::UnitDict;
pub use features::{FbankExtractor, FeaturePipeline};
#[cfg(feature = "onnx")]
pub use model::OnnxExecutor;
pub use model::{EncoderCache, ModelExecutor, ModelMetadata};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(String),
}
