//! Streaming decoder
//!
//! Pulls feature frames from the [`FeaturePipeline`], drives the chunked
//! encoder forward, feeds CTC activations to the prefix beam search, and
//! detects endpoints. An explicit state machine keeps cancellation and
//! continuous-mode rearming as visible transitions:
//!
//! `WaitingFeats -> Decoding -> EndpointReached -> (WaitingFeats | Terminated)`

use ndarray::{Array2, Axis};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use myna_config::Settings;
use myna_core::RecognitionResult;

use crate::dict::UnitDict;
use crate::features::FeaturePipeline;
use crate::model::{EncoderCache, ModelExecutor};
use crate::PipelineError;

use super::rescore::attention_rescore;
use super::search::{CtcPrefixBeamSearch, DecodedHypothesis, SearchConfig};
use super::ContextGraph;

/// Results published by the decoder worker
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// Intermediate hypothesis list for the current utterance
    Partial(Vec<RecognitionResult>),
    /// Terminal result for the utterance
    Final(Vec<RecognitionResult>),
    /// The utterance was abandoned
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    WaitingFeats,
    Decoding,
    EndpointReached,
    Terminated,
}

/// Streaming decoder configuration, derived from settings and model metadata
#[derive(Debug, Clone)]
pub struct StreamingDecoderConfig {
    /// Encoder chunk size in subsampled frames
    pub chunk_size: usize,
    pub nbest: usize,
    pub ctc_weight: f32,
    pub reverse_weight: f32,
    pub rescoring: bool,
    pub timestamp: bool,
    pub continuous: bool,
    /// Milliseconds covered by one decoded frame
    pub frame_ms: u64,
    /// Endpoint rule: consecutive trailing blank frames
    pub min_trailing_silence_frames: usize,
    /// Endpoint rule: frames since the last emitted token
    pub max_since_last_token_frames: usize,
    pub search: SearchConfig,
}

impl StreamingDecoderConfig {
    pub fn from_settings(settings: &Settings, subsampling_rate: usize) -> Self {
        let frame_ms = settings.feature.frame_shift_ms as u64 * subsampling_rate as u64;
        Self {
            chunk_size: settings.decode.chunk_size,
            nbest: settings.decode.nbest,
            ctc_weight: settings.decode.ctc_weight,
            reverse_weight: settings.decode.reverse_weight,
            rescoring: settings.decode.rescoring,
            timestamp: settings.decode.timestamp,
            continuous: settings.decode.continuous_decoding,
            frame_ms,
            min_trailing_silence_frames: (settings.endpoint.min_trailing_silence_ms / frame_ms.max(1))
                as usize,
            max_since_last_token_frames: (settings.endpoint.max_since_last_token_ms / frame_ms.max(1))
                as usize,
            search: SearchConfig::from(&settings.decode),
        }
    }
}

/// Per-session streaming decoder
pub struct StreamingDecoder {
    executor: Arc<dyn ModelExecutor>,
    features: Arc<FeaturePipeline>,
    dict: Arc<UnitDict>,
    config: StreamingDecoderConfig,
    search: CtcPrefixBeamSearch,
    cache: EncoderCache,
    /// Encoder output retained until the utterance is rescored
    encoder_chunks: Vec<Array2<f32>>,
    stop: Arc<AtomicBool>,
    events: UnboundedSender<DecodeEvent>,
    state: DecodeState,
    last_partial: String,
    first_chunk: bool,
    input_exhausted: bool,
    pending_frames: Vec<Vec<f32>>,
}

impl StreamingDecoder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<dyn ModelExecutor>,
        features: Arc<FeaturePipeline>,
        dict: Arc<UnitDict>,
        context: Option<Arc<ContextGraph>>,
        config: StreamingDecoderConfig,
        stop: Arc<AtomicBool>,
        events: UnboundedSender<DecodeEvent>,
    ) -> Self {
        let cache = EncoderCache::new(executor.metadata());
        let search = CtcPrefixBeamSearch::new(config.search.clone(), context);
        Self {
            executor,
            features,
            dict,
            config,
            search,
            cache,
            encoder_chunks: Vec::new(),
            stop,
            events,
            state: DecodeState::WaitingFeats,
            last_partial: String::new(),
            first_chunk: true,
            input_exhausted: false,
            pending_frames: Vec::new(),
        }
    }

    /// Run the decode loop until the stream ends or the session stops.
    ///
    /// Blocking; intended for a dedicated worker thread.
    pub fn run(&mut self) {
        while self.state != DecodeState::Terminated {
            if self.stop.load(Ordering::Acquire) {
                tracing::debug!("Stop observed, unwinding without a final result");
                self.state = DecodeState::Terminated;
                break;
            }

            match self.state {
                DecodeState::WaitingFeats => self.wait_for_features(),
                DecodeState::Decoding => self.decode_pending(),
                DecodeState::EndpointReached => self.finish_utterance(),
                DecodeState::Terminated => {}
            }
        }
    }

    fn required_frames(&self) -> usize {
        let meta = self.executor.metadata();
        let base = self.config.chunk_size * meta.subsampling_rate;
        if self.first_chunk {
            base + meta.right_context
        } else {
            base
        }
    }

    fn wait_for_features(&mut self) {
        let (frames, more) = self.features.read(self.required_frames());
        if self.stop.load(Ordering::Acquire) {
            self.state = DecodeState::Terminated;
            return;
        }

        self.input_exhausted = !more;
        if frames.is_empty() && !more {
            // Stream ended with nothing left to feed the model
            self.state = DecodeState::EndpointReached;
        } else {
            self.pending_frames = frames;
            self.state = DecodeState::Decoding;
        }
    }

    fn decode_pending(&mut self) {
        let frames = std::mem::take(&mut self.pending_frames);
        match self.decode_chunk(&frames) {
            Ok(()) => {
                self.emit_partial();
                if self.input_exhausted || self.endpoint_detected() {
                    self.state = DecodeState::EndpointReached;
                } else {
                    self.state = DecodeState::WaitingFeats;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chunk decode failed, abandoning utterance");
                let _ = self.events.send(DecodeEvent::Failed(e.to_string()));
                if self.config.continuous && !self.input_exhausted {
                    self.rearm();
                    self.state = DecodeState::WaitingFeats;
                } else {
                    self.state = DecodeState::Terminated;
                }
            }
        }
    }

    fn decode_chunk(&mut self, frames: &[Vec<f32>]) -> Result<(), PipelineError> {
        if frames.is_empty() {
            return Ok(());
        }

        let dim = frames[0].len();
        let mut chunk = Array2::zeros((frames.len(), dim));
        for (t, frame) in frames.iter().enumerate() {
            if frame.len() != dim {
                return Err(PipelineError::InvalidInput(
                    "inconsistent feature dimension within chunk".to_string(),
                ));
            }
            for (d, &v) in frame.iter().enumerate() {
                chunk[[t, d]] = v;
            }
        }

        let (encoder_out, cache) = self.executor.forward_encoder_chunk(chunk.view(), &self.cache)?;
        self.cache = cache;

        let logp = self.executor.ctc_activation(encoder_out.view())?;
        self.search.search(logp.view());
        self.encoder_chunks.push(encoder_out);
        self.first_chunk = false;

        tracing::trace!(
            frames = frames.len(),
            decoded_frames = self.search.frames_decoded(),
            best_len = self.search.best_tokens().len(),
            "Chunk decoded"
        );
        Ok(())
    }

    fn endpoint_detected(&self) -> bool {
        if self.search.best_tokens().is_empty() {
            return false;
        }
        self.search.trailing_blank_frames() > self.config.min_trailing_silence_frames
            || self.search.frames_since_last_token() > self.config.max_since_last_token_frames
    }

    fn emit_partial(&mut self) {
        if self.search.best_tokens().is_empty() {
            return;
        }

        let sentence = self.dict.join(self.search.best_tokens());
        if sentence == self.last_partial {
            return;
        }
        self.last_partial = sentence;

        let hyps = self.search.finalize(self.config.nbest);
        let results = self.results_from(&hyps, None);
        let _ = self.events.send(DecodeEvent::Partial(results));
    }

    fn finish_utterance(&mut self) {
        let input_done = self.input_exhausted;
        let outcome = self.final_results();

        // Rearm before publishing so a client reacting to the final result
        // immediately streams into the fresh utterance.
        if self.config.continuous && !input_done {
            self.rearm();
            self.state = DecodeState::WaitingFeats;
        } else {
            self.state = DecodeState::Terminated;
        }

        match outcome {
            Ok(results) => {
                let _ = self.events.send(DecodeEvent::Final(results));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rescoring failed, abandoning utterance");
                let _ = self.events.send(DecodeEvent::Failed(e.to_string()));
            }
        }
    }

    fn final_results(&mut self) -> Result<Vec<RecognitionResult>, PipelineError> {
        let hyps = self.search.finalize(self.config.nbest);

        let rescored = if self.config.rescoring && !self.encoder_chunks.is_empty() {
            let views: Vec<_> = self.encoder_chunks.iter().map(|c| c.view()).collect();
            let encoder_out = ndarray::concatenate(Axis(0), &views)
                .map_err(|e| PipelineError::Decode(e.to_string()))?;
            let attention = attention_rescore(
                self.executor.as_ref(),
                &hyps,
                encoder_out.view(),
                self.config.reverse_weight,
            )?;
            let w = self.config.ctc_weight;
            Some(
                hyps.iter()
                    .zip(&attention)
                    .map(|(h, &a)| w * h.score + (1.0 - w) * a)
                    .collect::<Vec<f32>>(),
            )
        } else {
            None
        };

        let mut results = self.results_from(&hyps, rescored.as_deref());
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // EncoderOutput is released once rescoring for the utterance is done
        self.encoder_chunks.clear();
        Ok(results)
    }

    fn results_from(
        &self,
        hyps: &[DecodedHypothesis],
        scores: Option<&[f32]>,
    ) -> Vec<RecognitionResult> {
        hyps.iter()
            .enumerate()
            .map(|(i, h)| {
                let score = scores.and_then(|s| s.get(i).copied()).unwrap_or(h.score);
                let mut result = RecognitionResult::new(self.dict.join(&h.tokens), score);
                if self.config.timestamp {
                    result.word_pieces =
                        self.dict
                            .word_pieces(&h.tokens, &h.times, &h.end_times, self.config.frame_ms);
                }
                result
            })
            .collect()
    }

    fn rearm(&mut self) {
        self.features.reset();
        self.search.reset();
        self.cache = EncoderCache::new(self.executor.metadata());
        self.encoder_chunks.clear();
        self.last_partial.clear();
        self.first_chunk = true;
        self.input_exhausted = false;
    }
}
