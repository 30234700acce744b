//! Model executor seam
//!
//! The decoder drives a neural acoustic model through the [`ModelExecutor`]
//! trait; concrete adapters (the ONNX adapter in [`onnx`]) are constructed
//! once at startup and shared read-only across sessions. Per-session state
//! (encoder caches) never lives inside the executor: the streaming decoder
//! owns an [`EncoderCache`] and threads it through every chunk call.

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxExecutor;

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3};
use serde::Deserialize;

use crate::PipelineError;

/// Immutable model metadata
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    /// Encoder frame-rate reduction factor
    pub subsampling_rate: usize,
    /// Future frames required before a frame can be encoded
    pub right_context: usize,
    /// Start-of-sentence id for the attention decoder
    pub sos_id: i64,
    /// End-of-sentence id for the attention decoder
    pub eos_id: i64,
    /// Whether a right-to-left decoder pass is available
    pub is_bidirectional_decoder: bool,
    /// Input feature dimension
    pub feature_dim: usize,
    /// Output vocabulary size (including blank)
    pub vocab_size: usize,
    /// Shape of the attention cache tensor, zeros at utterance start
    #[serde(default)]
    pub att_cache_shape: [usize; 3],
    /// Shape of the convolution cache tensor, zeros at utterance start
    #[serde(default)]
    pub cnn_cache_shape: [usize; 3],
}

/// Session-private streaming encoder state
///
/// Owned by the streaming decoder, passed into every
/// [`ModelExecutor::forward_encoder_chunk`] call and replaced by the
/// returned cache.
#[derive(Debug, Clone)]
pub struct EncoderCache {
    pub att_cache: Array3<f32>,
    pub cnn_cache: Array3<f32>,
    /// Subsampled frames already encoded in this utterance
    pub offset: usize,
}

impl EncoderCache {
    /// Empty cache for the start of an utterance
    pub fn new(metadata: &ModelMetadata) -> Self {
        let [a0, a1, a2] = metadata.att_cache_shape;
        let [c0, c1, c2] = metadata.cnn_cache_shape;
        Self {
            att_cache: Array3::zeros((a0, a1, a2)),
            cnn_cache: Array3::zeros((c0, c1, c2)),
            offset: 0,
        }
    }
}

/// The five inference entry points the decoder needs.
///
/// All operations are pure with respect to their inputs; implementations
/// must be safe to call concurrently from many sessions.
pub trait ModelExecutor: Send + Sync {
    fn metadata(&self) -> &ModelMetadata;

    /// Encode one chunk of feature frames.
    ///
    /// `chunk_feats` has shape (T, D); the result is the encoded chunk of
    /// shape (T', H) plus the updated cache for the next call.
    fn forward_encoder_chunk(
        &self,
        chunk_feats: ArrayView2<f32>,
        cache: &EncoderCache,
    ) -> Result<(Array2<f32>, EncoderCache), PipelineError>;

    /// CTC log-probabilities (log-softmax semantics) for encoded frames.
    ///
    /// `encoder_out` has shape (T', H); the result has shape (T', V).
    fn ctc_activation(&self, encoder_out: ArrayView2<f32>) -> Result<Array2<f32>, PipelineError>;

    /// Score hypotheses with the attention decoder.
    ///
    /// `hyps` has shape (N, L), sos-prefixed and eos-padded; `encoder_out`
    /// has shape (N, T', H), one row of encoder output per hypothesis.
    /// Returns left-to-right log-probabilities of shape (N, L, V) and the
    /// right-to-left counterpart when the decoder is bidirectional and
    /// `reverse_weight > 0`.
    fn forward_attention_decoder(
        &self,
        hyps: ArrayView2<i64>,
        hyps_lens: ArrayView1<i64>,
        encoder_out: ArrayView3<f32>,
        reverse_weight: f32,
    ) -> Result<(Array3<f32>, Option<Array3<f32>>), PipelineError>;

    /// Encode a padded batch of whole utterances.
    ///
    /// `feats` has shape (B, T, D) with true lengths in `feats_lens`.
    /// Returns encoder output (B, T', H), true encoded lengths, and CTC
    /// log-probabilities (B, T', V).
    fn batch_forward_encoder(
        &self,
        feats: ArrayView3<f32>,
        feats_lens: ArrayView1<i64>,
    ) -> Result<(Array3<f32>, Vec<usize>, Array3<f32>), PipelineError>;
}
