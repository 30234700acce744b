//! Recognition results and word-level timestamps

use serde::{Deserialize, Serialize};

/// A word with its time span within the utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordPiece {
    /// The word text (word-piece markers stripped)
    pub word: String,
    /// Start of the word in milliseconds from utterance start
    pub start: u64,
    /// End of the word in milliseconds from utterance start
    pub end: u64,
}

/// One ranked hypothesis for an utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// The decoded sentence
    pub sentence: String,
    /// Combined score used for ranking
    pub score: f32,
    /// Word-level timestamps, empty unless timestamping is enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub word_pieces: Vec<WordPiece>,
}

impl RecognitionResult {
    /// Create a result without word timestamps
    pub fn new(sentence: impl Into<String>, score: f32) -> Self {
        Self {
            sentence: sentence.into(),
            score,
            word_pieces: Vec::new(),
        }
    }
}
