//! Attention rescoring
//!
//! Re-ranks CTC N-best hypotheses by the attention decoder's likelihood of
//! each hypothesis given the encoder output. With a bidirectional decoder a
//! right-to-left pass is fused in by `reverse_weight`.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

use crate::model::ModelExecutor;
use crate::PipelineError;

use super::search::DecodedHypothesis;

/// Attention scores for token sequences, one encoder-output row per
/// hypothesis.
pub(crate) fn score_hypotheses(
    executor: &dyn ModelExecutor,
    hyps: &[&[u32]],
    encoder_out: Array3<f32>,
    reverse_weight: f32,
) -> Result<Vec<f32>, PipelineError> {
    if hyps.is_empty() {
        return Ok(Vec::new());
    }
    debug_assert_eq!(hyps.len(), encoder_out.shape()[0]);

    let meta = executor.metadata();
    let max_len = hyps.iter().map(|h| h.len()).max().unwrap_or(0) + 1;

    let mut hyps_pad = Array2::from_elem((hyps.len(), max_len), meta.eos_id);
    let mut hyps_lens = Array1::zeros(hyps.len());
    for (i, h) in hyps.iter().enumerate() {
        hyps_pad[[i, 0]] = meta.sos_id;
        for (j, &t) in h.iter().enumerate() {
            hyps_pad[[i, j + 1]] = t as i64;
        }
        hyps_lens[i] = (h.len() + 1) as i64;
    }

    let (l2r, r2l) = executor.forward_attention_decoder(
        hyps_pad.view(),
        hyps_lens.view(),
        encoder_out.view(),
        reverse_weight,
    )?;

    let eos = meta.eos_id as usize;
    let mut scores = Vec::with_capacity(hyps.len());
    for (i, h) in hyps.iter().enumerate() {
        let mut forward = 0.0f32;
        for (j, &t) in h.iter().enumerate() {
            forward += l2r[[i, j, t as usize]];
        }
        forward += l2r[[i, h.len(), eos]];

        let combined = match &r2l {
            Some(r2l) if reverse_weight > 0.0 => {
                let mut backward = 0.0f32;
                for (j, &t) in h.iter().rev().enumerate() {
                    backward += r2l[[i, j, t as usize]];
                }
                backward += r2l[[i, h.len(), eos]];
                (1.0 - reverse_weight) * forward + reverse_weight * backward
            }
            _ => forward,
        };
        scores.push(combined);
    }

    Ok(scores)
}

/// Rescore one utterance's N-best against its retained encoder output.
///
/// `encoder_out` has shape (T', H); it is repeated across the hypotheses
/// for the decoder call.
pub fn attention_rescore(
    executor: &dyn ModelExecutor,
    hyps: &[DecodedHypothesis],
    encoder_out: ArrayView2<f32>,
    reverse_weight: f32,
) -> Result<Vec<f32>, PipelineError> {
    if hyps.is_empty() {
        return Ok(Vec::new());
    }

    let (t, h) = encoder_out.dim();
    let mut repeated = Array3::zeros((hyps.len(), t, h));
    for mut row in repeated.axis_iter_mut(Axis(0)) {
        row.assign(&encoder_out);
    }

    let seqs: Vec<&[u32]> = hyps.iter().map(|h| h.tokens.as_slice()).collect();
    score_hypotheses(executor, &seqs, repeated, reverse_weight)
}
