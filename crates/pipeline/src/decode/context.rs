//! Context-phrase biasing graph
//!
//! A trie over token ids walked alongside the beam search. Every matched
//! token earns an incremental bonus; completing a phrase commits the
//! accumulated bonus and returns to the root; a mismatch refunds whatever
//! the current partial match had accumulated.

use std::collections::HashMap;
use std::path::Path;

use crate::dict::UnitDict;
use crate::PipelineError;

#[derive(Debug, Default)]
struct Node {
    trans: HashMap<u32, usize>,
    /// Tokens accumulated on the path from the root
    depth: usize,
    is_end: bool,
}

/// Deterministic automaton awarding bonuses for matched context phrases
pub struct ContextGraph {
    nodes: Vec<Node>,
    context_score: f32,
    num_phrases: usize,
}

impl ContextGraph {
    pub fn new(context_score: f32) -> Self {
        Self {
            nodes: vec![Node::default()],
            context_score,
            num_phrases: 0,
        }
    }

    /// Load phrases from a file (one phrase per line), tokenized against the
    /// dictionary. Phrases the dictionary cannot cover are skipped.
    pub fn load(
        path: impl AsRef<Path>,
        dict: &UnitDict,
        context_score: f32,
    ) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Io(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut graph = Self::new(context_score);
        for line in content.lines() {
            let phrase = line.trim();
            if phrase.is_empty() {
                continue;
            }
            match dict.tokenize_phrase(phrase) {
                Some(tokens) => graph.add_phrase(&tokens),
                None => {
                    tracing::warn!(phrase = %phrase, "Context phrase not covered by dictionary, skipping")
                }
            }
        }

        tracing::info!(
            phrases = graph.num_phrases,
            states = graph.nodes.len(),
            context_score = context_score,
            "Built context graph"
        );
        Ok(graph)
    }

    /// Insert one tokenized phrase into the trie.
    pub fn add_phrase(&mut self, tokens: &[u32]) {
        if tokens.is_empty() {
            return;
        }
        let mut state = 0;
        for &token in tokens {
            state = match self.nodes[state].trans.get(&token) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    let depth = self.nodes[state].depth + 1;
                    self.nodes.push(Node {
                        trans: HashMap::new(),
                        depth,
                        is_end: false,
                    });
                    self.nodes[state].trans.insert(token, next);
                    next
                }
            };
        }
        self.nodes[state].is_end = true;
        self.num_phrases += 1;
    }

    pub fn num_phrases(&self) -> usize {
        self.num_phrases
    }

    /// Advance the automaton by one token.
    ///
    /// Returns the new state and the score delta: a per-token bonus on a
    /// match, a refund of the partial accumulation on a mismatch. Reaching
    /// an accepting state commits the bonus and resets to the root, so a
    /// committed phrase is never refunded.
    pub fn forward(&self, state: usize, token: u32) -> (usize, f32) {
        if let Some(&next) = self.nodes[state].trans.get(&token) {
            return (self.committed(next), self.context_score);
        }

        // Mismatch: refund the partial match, then retry from the root so a
        // phrase can start at any position.
        let refund = -(self.context_score * self.nodes[state].depth as f32);
        match self.nodes[0].trans.get(&token) {
            Some(&next) => (self.committed(next), refund + self.context_score),
            None => (0, refund),
        }
    }

    fn committed(&self, state: usize) -> usize {
        if self.nodes[state].is_end {
            0
        } else {
            state
        }
    }
}
