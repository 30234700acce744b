//! Shared test fixtures: a deterministic model executor and a small
//! word-piece dictionary.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use std::sync::Arc;

use myna_config::Settings;
use myna_pipeline::{EncoderCache, ModelExecutor, ModelMetadata, PipelineError, UnitDict};

/// Vocabulary: 0 = blank, 1..=3 words, 4 = filler piece, 5 = sos/eos
pub const VOCAB_SIZE: usize = 6;

/// Deterministic executor: the "encoder" is the identity over feature
/// frames, CTC activation is a log-softmax over each frame, and the
/// attention decoder returns a flat distribution so rescoring preserves
/// CTC ranking.
pub struct MockExecutor {
    metadata: ModelMetadata,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            metadata: ModelMetadata {
                subsampling_rate: 1,
                right_context: 0,
                sos_id: 5,
                eos_id: 5,
                is_bidirectional_decoder: false,
                feature_dim: VOCAB_SIZE,
                vocab_size: VOCAB_SIZE,
                att_cache_shape: [0, 0, 0],
                cnn_cache_shape: [0, 0, 0],
            },
        })
    }

    fn log_softmax_rows(rows: ArrayView2<f32>) -> Array2<f32> {
        let mut out = rows.to_owned();
        for mut row in out.rows_mut() {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let lse = max + row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
            row.mapv_inplace(|x| x - lse);
        }
        out
    }
}

impl ModelExecutor for MockExecutor {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn forward_encoder_chunk(
        &self,
        chunk_feats: ArrayView2<f32>,
        cache: &EncoderCache,
    ) -> Result<(Array2<f32>, EncoderCache), PipelineError> {
        let out = chunk_feats.to_owned();
        let mut cache = cache.clone();
        cache.offset += out.nrows();
        Ok((out, cache))
    }

    fn ctc_activation(&self, encoder_out: ArrayView2<f32>) -> Result<Array2<f32>, PipelineError> {
        Ok(Self::log_softmax_rows(encoder_out))
    }

    fn forward_attention_decoder(
        &self,
        hyps: ArrayView2<i64>,
        _hyps_lens: ArrayView1<i64>,
        _encoder_out: ArrayView3<f32>,
        _reverse_weight: f32,
    ) -> Result<(Array3<f32>, Option<Array3<f32>>), PipelineError> {
        let (n, l) = hyps.dim();
        let flat = -(VOCAB_SIZE as f32).ln();
        Ok((Array3::from_elem((n, l, VOCAB_SIZE), flat), None))
    }

    fn batch_forward_encoder(
        &self,
        feats: ArrayView3<f32>,
        feats_lens: ArrayView1<i64>,
    ) -> Result<(Array3<f32>, Vec<usize>, Array3<f32>), PipelineError> {
        let encoder_out = feats.to_owned();
        let mut ctc_logp = Array3::zeros(feats.raw_dim());
        for (b, utt) in feats.axis_iter(Axis(0)).enumerate() {
            ctc_logp
                .index_axis_mut(Axis(0), b)
                .assign(&Self::log_softmax_rows(utt));
        }
        let lens = feats_lens.iter().map(|&l| l as usize).collect();
        Ok((encoder_out, lens, ctc_logp))
    }
}

/// Dictionary matching the mock vocabulary
pub fn dict() -> Arc<UnitDict> {
    Arc::new(UnitDict::from_tokens(
        ["<blank>", "▁one", "▁two", "▁three", "s", "<sos/eos>"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    ))
}

/// Settings tuned for short test utterances
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.decode.chunk_size = 4;
    settings.decode.nbest = 3;
    settings.decode.beam_size = 5;
    settings.decode.first_beam_size = VOCAB_SIZE;
    // One decoded frame covers 10ms; endpoint after 5 silent frames
    settings.endpoint.min_trailing_silence_ms = 50;
    settings.endpoint.max_since_last_token_ms = 10_000;
    settings
}

/// Frames whose CTC distribution confidently favors `token`
pub fn tok_frames(token: usize, n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| {
            let mut frame = vec![0.0f32; VOCAB_SIZE];
            frame[token] = 8.0;
            frame
        })
        .collect()
}

/// A frame where `a` and `b` are nearly tied (`b` slightly ahead)
pub fn tied_frame(a: usize, b: usize) -> Vec<f32> {
    let mut frame = vec![0.0f32; VOCAB_SIZE];
    frame[a] = 4.0;
    frame[b] = 4.1;
    frame
}

/// Stack frames into an utterance matrix
pub fn to_utterance(frames: &[Vec<f32>]) -> Array2<f32> {
    let mut out = Array2::zeros((frames.len(), VOCAB_SIZE));
    for (t, frame) in frames.iter().enumerate() {
        for (d, &v) in frame.iter().enumerate() {
            out[[t, d]] = v;
        }
    }
    out
}
