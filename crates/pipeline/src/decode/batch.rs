//! Batch recognizer
//!
//! Non-streaming path: whole utterances are padded into one batched encoder
//! forward, each utterance's CTC log-probabilities are searched
//! independently, and a single batched attention-decoder call rescores the
//! concatenated (batch x beam) hypotheses.

use ndarray::{s, Array1, Array2, Array3, Axis};
use std::sync::Arc;

use myna_config::Settings;
use myna_core::RecognitionResult;

use crate::dict::UnitDict;
use crate::model::ModelExecutor;
use crate::PipelineError;

use super::rescore::score_hypotheses;
use super::search::{CtcPrefixBeamSearch, DecodedHypothesis, SearchConfig};
use super::ContextGraph;

/// Batch decoding configuration
#[derive(Debug, Clone)]
struct BatchConfig {
    nbest: usize,
    ctc_weight: f32,
    reverse_weight: f32,
    rescoring: bool,
    timestamp: bool,
    frame_ms: u64,
    search: SearchConfig,
}

/// Multi-utterance recognizer over the shared executor
pub struct BatchRecognizer {
    executor: Arc<dyn ModelExecutor>,
    dict: Arc<UnitDict>,
    context: Option<Arc<ContextGraph>>,
    config: BatchConfig,
}

impl BatchRecognizer {
    pub fn new(
        executor: Arc<dyn ModelExecutor>,
        dict: Arc<UnitDict>,
        context: Option<Arc<ContextGraph>>,
        settings: &Settings,
    ) -> Self {
        let frame_ms = settings.feature.frame_shift_ms as u64
            * executor.metadata().subsampling_rate as u64;
        let config = BatchConfig {
            nbest: settings.decode.nbest,
            ctc_weight: settings.decode.ctc_weight,
            reverse_weight: settings.decode.reverse_weight,
            rescoring: settings.decode.rescoring,
            timestamp: settings.decode.timestamp,
            frame_ms,
            search: SearchConfig::from(&settings.decode),
        };
        Self {
            executor,
            dict,
            context,
            config,
        }
    }

    /// Decode a batch of utterances, returning one N-best list per
    /// utterance in input order.
    pub fn recognize(
        &self,
        utterances: &[Array2<f32>],
    ) -> Result<Vec<Vec<RecognitionResult>>, PipelineError> {
        if utterances.is_empty() {
            return Ok(Vec::new());
        }

        let feature_dim = self.executor.metadata().feature_dim;
        for (i, utt) in utterances.iter().enumerate() {
            if utt.ncols() != feature_dim {
                return Err(PipelineError::InvalidInput(format!(
                    "utterance {} has feature dim {}, expected {}",
                    i,
                    utt.ncols(),
                    feature_dim
                )));
            }
        }

        let (feats, feats_lens) = pad_features(utterances);
        let (encoder_out, encoder_lens, ctc_logp) = self
            .executor
            .batch_forward_encoder(feats.view(), feats_lens.view())?;

        if encoder_lens.len() != utterances.len() {
            return Err(PipelineError::Model(format!(
                "batch encoder returned {} lengths for {} utterances",
                encoder_lens.len(),
                utterances.len()
            )));
        }

        // Per-utterance prefix beam search over the true-length slice
        let mut all_hyps: Vec<Vec<DecodedHypothesis>> = Vec::with_capacity(utterances.len());
        for (b, &len) in encoder_lens.iter().enumerate() {
            let mut search =
                CtcPrefixBeamSearch::new(self.config.search.clone(), self.context.clone());
            search.search(ctc_logp.slice(s![b, ..len, ..]));
            all_hyps.push(search.finalize(self.config.nbest));
        }

        let attention = if self.config.rescoring {
            Some(self.rescore_batch(&all_hyps, &encoder_out)?)
        } else {
            None
        };

        let mut results = Vec::with_capacity(utterances.len());
        let mut offset = 0;
        for hyps in &all_hyps {
            let mut ranked: Vec<RecognitionResult> = hyps
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    let score = match &attention {
                        Some(scores) => {
                            let w = self.config.ctc_weight;
                            w * h.score + (1.0 - w) * scores[offset + i]
                        }
                        None => h.score,
                    };
                    let mut result = RecognitionResult::new(self.dict.join(&h.tokens), score);
                    if self.config.timestamp {
                        result.word_pieces = self.dict.word_pieces(
                            &h.tokens,
                            &h.times,
                            &h.end_times,
                            self.config.frame_ms,
                        );
                    }
                    result
                })
                .collect();
            ranked.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            offset += hyps.len();
            results.push(ranked);
        }

        Ok(results)
    }

    /// One attention-decoder call over all hypotheses, encoder rows
    /// repeated per hypothesis.
    fn rescore_batch(
        &self,
        all_hyps: &[Vec<DecodedHypothesis>],
        encoder_out: &Array3<f32>,
    ) -> Result<Vec<f32>, PipelineError> {
        let total: usize = all_hyps.iter().map(|h| h.len()).sum();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (_, t, h) = encoder_out.dim();
        let mut repeated = Array3::zeros((total, t, h));
        let mut seqs: Vec<&[u32]> = Vec::with_capacity(total);
        let mut row = 0;
        for (b, hyps) in all_hyps.iter().enumerate() {
            for hyp in hyps {
                repeated
                    .index_axis_mut(Axis(0), row)
                    .assign(&encoder_out.index_axis(Axis(0), b));
                seqs.push(&hyp.tokens);
                row += 1;
            }
        }

        score_hypotheses(
            self.executor.as_ref(),
            &seqs,
            repeated,
            self.config.reverse_weight,
        )
    }
}

/// Pad utterances to the batch's max frame count, recording true lengths.
fn pad_features(utterances: &[Array2<f32>]) -> (Array3<f32>, Array1<i64>) {
    let batch = utterances.len();
    let max_t = utterances.iter().map(|u| u.nrows()).max().unwrap_or(0);
    let dim = utterances.first().map(|u| u.ncols()).unwrap_or(0);

    let mut feats = Array3::zeros((batch, max_t, dim));
    let mut lens = Array1::zeros(batch);
    for (b, utt) in utterances.iter().enumerate() {
        feats
            .slice_mut(s![b, ..utt.nrows(), ..])
            .assign(&utt.view());
        lens[b] = utt.nrows() as i64;
    }
    (feats, lens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_features() {
        let a = Array2::from_elem((3, 2), 1.0f32);
        let b = Array2::from_elem((5, 2), 2.0f32);

        let (feats, lens) = pad_features(&[a, b]);
        assert_eq!(feats.dim(), (2, 5, 2));
        assert_eq!(lens.to_vec(), vec![3, 5]);
        // Padding region is zero
        assert_eq!(feats[[0, 4, 0]], 0.0);
        assert_eq!(feats[[0, 2, 1]], 1.0);
        assert_eq!(feats[[1, 4, 1]], 2.0);
    }
}
