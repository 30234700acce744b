//! CTC prefix beam search
//!
//! Tracks the top-K label prefixes over frame-level log-probabilities,
//! merging paths that collapse to the same prefix under the CTC rules
//! (repeated labels collapse unless separated by blank). Each prefix keeps
//! separate probabilities for paths ending in blank and paths ending in its
//! last label, per-token emission frames, and an optional context-biasing
//! state.

use ndarray::ArrayView2;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use myna_config::DecodeConfig;

use super::ContextGraph;

const NEG_INF: f32 = f32::NEG_INFINITY;

/// log(exp(a) + exp(b)) without leaving log space
fn log_add(a: f32, b: f32) -> f32 {
    if a == NEG_INF {
        return b;
    }
    if b == NEG_INF {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Search configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Prefixes kept after each frame
    pub beam_size: usize,
    /// Candidate tokens considered per frame
    pub first_beam_size: usize,
    /// The CTC blank label
    pub blank_id: u32,
    /// Skip frames whose blank probability exceeds this
    pub blank_skip_threshold: f32,
}

impl From<&DecodeConfig> for SearchConfig {
    fn from(cfg: &DecodeConfig) -> Self {
        Self {
            beam_size: cfg.beam_size,
            first_beam_size: cfg.first_beam_size,
            blank_id: cfg.blank_id,
            blank_skip_threshold: cfg.blank_skip_threshold,
        }
    }
}

/// Score bookkeeping for one prefix
#[derive(Debug, Clone)]
struct PrefixScore {
    /// Log probability of paths ending in blank
    blank: f32,
    /// Log probability of paths ending in the prefix's last label
    non_blank: f32,
    context_state: usize,
    context_score: f32,
    /// First-emission frame per token
    times: Vec<usize>,
    /// Last frame each token was still being emitted
    end_times: Vec<usize>,
}

impl PrefixScore {
    fn root() -> Self {
        Self {
            blank: 0.0,
            non_blank: NEG_INF,
            context_state: 0,
            context_score: 0.0,
            times: Vec::new(),
            end_times: Vec::new(),
        }
    }

    /// Composite CTC probability of the prefix
    fn score(&self) -> f32 {
        log_add(self.blank, self.non_blank)
    }

    /// Ranking score including the context bonus
    fn total(&self) -> f32 {
        self.score() + self.context_score
    }

    /// Merge emission times of an equal prefix reached by another path:
    /// emission time is the earliest frame a token appeared, the end time
    /// the latest frame it was still active.
    fn merge_times(&mut self, times: &[usize], end_times: &[usize]) {
        debug_assert_eq!(self.times.len(), times.len());
        for (a, b) in self.times.iter_mut().zip(times) {
            *a = (*a).min(*b);
        }
        for (a, b) in self.end_times.iter_mut().zip(end_times) {
            *a = (*a).max(*b);
        }
    }
}

/// One ranked CTC hypothesis
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedHypothesis {
    pub tokens: Vec<u32>,
    /// Composite CTC score including any context bonus
    pub score: f32,
    /// First-emission frame per token
    pub times: Vec<usize>,
    /// Last frame each token was actively emitted
    pub end_times: Vec<usize>,
}

/// CTC prefix beam searcher
pub struct CtcPrefixBeamSearch {
    config: SearchConfig,
    context: Option<Arc<ContextGraph>>,
    /// Current beam, sorted by descending total score
    hyps: Vec<(Vec<u32>, PrefixScore)>,
    frames_decoded: usize,
    /// Consecutive frames whose argmax was blank
    trailing_blanks: usize,
}

impl CtcPrefixBeamSearch {
    pub fn new(config: SearchConfig, context: Option<Arc<ContextGraph>>) -> Self {
        Self {
            config,
            context,
            hyps: vec![(Vec::new(), PrefixScore::root())],
            frames_decoded: 0,
            trailing_blanks: 0,
        }
    }

    /// Advance the beam over a chunk of CTC log-probabilities (T, V).
    pub fn search(&mut self, logp: ArrayView2<f32>) {
        for row in logp.rows() {
            let frame = self.frames_decoded;
            self.frames_decoded += 1;

            let (argmax, max_lp) = row.iter().copied().enumerate().fold(
                (0usize, NEG_INF),
                |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) },
            );

            // Frame-level silence bookkeeping for endpoint detection
            if argmax as u32 == self.config.blank_id {
                self.trailing_blanks += 1;
            } else {
                self.trailing_blanks = 0;
            }

            // Confident-blank frames carry no information for the beam
            if argmax as u32 == self.config.blank_id
                && max_lp.exp() > self.config.blank_skip_threshold
            {
                continue;
            }

            let mut candidates: Vec<(u32, f32)> = row
                .iter()
                .copied()
                .enumerate()
                .map(|(i, v)| (i as u32, v))
                .collect();
            candidates
                .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            candidates.truncate(self.config.first_beam_size);

            let mut next: HashMap<Vec<u32>, PrefixScore> =
                HashMap::with_capacity(self.hyps.len() * (candidates.len() + 1));

            for (prefix, ps) in &self.hyps {
                for &(token, lp) in &candidates {
                    if lp == NEG_INF {
                        continue;
                    }

                    if token == self.config.blank_id {
                        let entry = Self::entry_same(&mut next, prefix, ps);
                        entry.blank = log_add(entry.blank, ps.score() + lp);
                    } else if prefix.last() == Some(&token) {
                        // Repeat without separating blank collapses into the
                        // same prefix...
                        let entry = Self::entry_same(&mut next, prefix, ps);
                        entry.non_blank = log_add(entry.non_blank, ps.non_blank + lp);
                        if let Some(e) = entry.end_times.last_mut() {
                            *e = (*e).max(frame);
                        }
                        // ...while the blank-separated path starts a new one.
                        let entry = self.entry_extend(&mut next, prefix, ps, token, frame);
                        entry.non_blank = log_add(entry.non_blank, ps.blank + lp);
                    } else {
                        let entry = self.entry_extend(&mut next, prefix, ps, token, frame);
                        entry.non_blank = log_add(entry.non_blank, ps.score() + lp);
                    }
                }
            }

            let mut new_hyps: Vec<(Vec<u32>, PrefixScore)> = next.into_iter().collect();
            // Tie-break on the token sequence so equal scores still order
            // deterministically
            new_hyps.sort_by(|a, b| {
                b.1.total()
                    .partial_cmp(&a.1.total())
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            new_hyps.truncate(self.config.beam_size);
            self.hyps = new_hyps;
        }
    }

    /// Entry for an unchanged prefix, initialized from its current score.
    fn entry_same<'m>(
        next: &'m mut HashMap<Vec<u32>, PrefixScore>,
        prefix: &[u32],
        ps: &PrefixScore,
    ) -> &'m mut PrefixScore {
        match next.entry(prefix.to_vec()) {
            Entry::Occupied(entry) => {
                // Also reachable as an extension this frame: keep the
                // earliest emission times.
                let entry = entry.into_mut();
                entry.merge_times(&ps.times, &ps.end_times);
                entry
            }
            Entry::Vacant(slot) => slot.insert(PrefixScore {
                blank: NEG_INF,
                non_blank: NEG_INF,
                context_state: ps.context_state,
                context_score: ps.context_score,
                times: ps.times.clone(),
                end_times: ps.end_times.clone(),
            }),
        }
    }

    /// Entry for `prefix ++ [token]`, walking the context graph on creation.
    fn entry_extend<'m>(
        &self,
        next: &'m mut HashMap<Vec<u32>, PrefixScore>,
        prefix: &[u32],
        ps: &PrefixScore,
        token: u32,
        frame: usize,
    ) -> &'m mut PrefixScore {
        let mut new_prefix = Vec::with_capacity(prefix.len() + 1);
        new_prefix.extend_from_slice(prefix);
        new_prefix.push(token);

        match next.entry(new_prefix) {
            Entry::Occupied(entry) => {
                let entry = entry.into_mut();
                let mut times = ps.times.clone();
                times.push(frame);
                let mut end_times = ps.end_times.clone();
                end_times.push(frame);
                entry.merge_times(&times, &end_times);
                entry
            }
            Entry::Vacant(slot) => {
                let (context_state, delta) = match &self.context {
                    Some(graph) => graph.forward(ps.context_state, token),
                    None => (0, 0.0),
                };
                let mut times = ps.times.clone();
                times.push(frame);
                let mut end_times = ps.end_times.clone();
                end_times.push(frame);
                slot.insert(PrefixScore {
                    blank: NEG_INF,
                    non_blank: NEG_INF,
                    context_state,
                    context_score: ps.context_score + delta,
                    times,
                    end_times,
                })
            }
        }
    }

    /// Up to `n` hypotheses sorted by composite score. Does not mutate the
    /// beam.
    pub fn finalize(&self, n: usize) -> Vec<DecodedHypothesis> {
        self.hyps
            .iter()
            .take(n)
            .map(|(tokens, ps)| DecodedHypothesis {
                tokens: tokens.clone(),
                score: ps.total(),
                times: ps.times.clone(),
                end_times: ps.end_times.clone(),
            })
            .collect()
    }

    /// Clear the beam back to the single empty prefix.
    pub fn reset(&mut self) {
        self.hyps = vec![(Vec::new(), PrefixScore::root())];
        self.frames_decoded = 0;
        self.trailing_blanks = 0;
    }

    /// Frames consumed so far in this utterance (skipped frames included)
    pub fn frames_decoded(&self) -> usize {
        self.frames_decoded
    }

    /// Tokens of the current best prefix
    pub fn best_tokens(&self) -> &[u32] {
        self.hyps
            .first()
            .map(|(tokens, _)| tokens.as_slice())
            .unwrap_or(&[])
    }

    /// Consecutive frames whose argmax was blank
    pub fn trailing_blank_frames(&self) -> usize {
        self.trailing_blanks
    }

    /// Frames since the best prefix last grew by a token
    pub fn frames_since_last_token(&self) -> usize {
        match self.hyps.first() {
            Some((tokens, ps)) if !tokens.is_empty() => {
                let last_emitted = ps.times.last().copied().unwrap_or(0);
                self.frames_decoded.saturating_sub(last_emitted + 1)
            }
            _ => self.frames_decoded,
        }
    }
}
