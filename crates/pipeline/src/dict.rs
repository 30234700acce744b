//! Unit dictionary
//!
//! Symbol table mapping model output ids to token strings (`<token> <id>`
//! per line, the `units.txt` convention). Handles SentencePiece word-piece
//! joining: tokens starting with `▁` (U+2581) open a new word, everything
//! else continues the current word.

use std::collections::HashMap;
use std::path::Path;

use myna_core::WordPiece;

use crate::PipelineError;

const WORD_BOUNDARY: char = '\u{2581}';

/// Unit dictionary with id and token lookup
pub struct UnitDict {
    tokens: Vec<String>,
    ids: HashMap<String, u32>,
}

impl UnitDict {
    /// Load a dictionary from a `<token> <id>` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Io(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut entries: Vec<(String, u32)> = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let token = parts.next().ok_or_else(|| {
                PipelineError::InvalidInput(format!("{}:{}: empty entry", path.display(), line_no + 1))
            })?;
            let id: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    PipelineError::InvalidInput(format!(
                        "{}:{}: expected '<token> <id>'",
                        path.display(),
                        line_no + 1
                    ))
                })?;
            entries.push((token.to_string(), id));
        }

        if entries.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "{}: empty dictionary",
                path.display()
            )));
        }

        let size = entries.iter().map(|(_, id)| *id as usize).max().unwrap_or(0) + 1;
        let mut tokens = vec![String::new(); size];
        let mut ids = HashMap::with_capacity(entries.len());
        for (token, id) in entries {
            ids.insert(token.clone(), id);
            tokens[id as usize] = token;
        }

        tracing::info!(size = tokens.len(), "Loaded unit dictionary");
        Ok(Self { tokens, ids })
    }

    /// Build a dictionary from an id-ordered token list.
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        let ids = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        Self { tokens, ids }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(|s| s.as_str())
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }

    /// Join token ids into a sentence, applying word-piece boundaries.
    pub fn join(&self, ids: &[u32]) -> String {
        let mut sentence = String::new();
        for &id in ids {
            let Some(token) = self.token(id) else { continue };
            if let Some(rest) = token.strip_prefix(WORD_BOUNDARY) {
                if !sentence.is_empty() {
                    sentence.push(' ');
                }
                sentence.push_str(rest);
            } else {
                sentence.push_str(token);
            }
        }
        sentence
    }

    /// Group tokens into words with millisecond time spans.
    ///
    /// `starts` and `ends` are per-token frame indices; `frame_ms` is the
    /// duration one decoded frame covers.
    pub fn word_pieces(
        &self,
        ids: &[u32],
        starts: &[usize],
        ends: &[usize],
        frame_ms: u64,
    ) -> Vec<WordPiece> {
        debug_assert_eq!(ids.len(), starts.len());
        debug_assert_eq!(ids.len(), ends.len());

        let mut pieces: Vec<WordPiece> = Vec::new();
        let mut current: Option<(String, usize, usize)> = None;

        for (i, &id) in ids.iter().enumerate() {
            let Some(token) = self.token(id) else { continue };
            if let Some(rest) = token.strip_prefix(WORD_BOUNDARY) {
                if let Some((word, start, end)) = current.take() {
                    pieces.push(Self::piece(word, start, end, frame_ms));
                }
                current = Some((rest.to_string(), starts[i], ends[i]));
            } else {
                match current.as_mut() {
                    Some((word, _, end)) => {
                        word.push_str(token);
                        *end = ends[i];
                    }
                    // No boundary marker yet: treat as word start
                    None => current = Some((token.to_string(), starts[i], ends[i])),
                }
            }
        }
        if let Some((word, start, end)) = current {
            pieces.push(Self::piece(word, start, end, frame_ms));
        }

        pieces
    }

    fn piece(word: String, start_frame: usize, end_frame: usize, frame_ms: u64) -> WordPiece {
        let start = start_frame as u64 * frame_ms;
        let end = (end_frame as u64 * frame_ms).max(start + frame_ms);
        WordPiece { word, start, end }
    }

    /// Tokenize a context phrase against the dictionary.
    ///
    /// Each whitespace-separated word is matched greedily: the first piece
    /// carries the `▁` boundary marker, continuations do not. Returns `None`
    /// when some part of the phrase has no covering tokens.
    pub fn tokenize_phrase(&self, phrase: &str) -> Option<Vec<u32>> {
        let mut ids = Vec::new();
        for word in phrase.split_whitespace() {
            let chars: Vec<char> = word.chars().collect();
            let mut pos = 0;
            let mut at_word_start = true;
            while pos < chars.len() {
                let mut matched = None;
                for end in (pos + 1..=chars.len()).rev() {
                    let piece: String = chars[pos..end].iter().collect();
                    let candidate = if at_word_start {
                        format!("{}{}", WORD_BOUNDARY, piece)
                    } else {
                        piece
                    };
                    if let Some(id) = self.id(&candidate) {
                        matched = Some((id, end));
                        break;
                    }
                }
                let (id, end) = matched?;
                ids.push(id);
                pos = end;
                at_word_start = false;
            }
        }
        if ids.is_empty() {
            None
        } else {
            Some(ids)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> UnitDict {
        UnitDict::from_tokens(
            ["<blank>", "▁he", "llo", "▁wor", "ld", "▁a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    #[test]
    fn test_lookup() {
        let d = dict();
        assert_eq!(d.token(1), Some("▁he"));
        assert_eq!(d.id("ld"), Some(4));
        assert_eq!(d.id("missing"), None);
        assert_eq!(d.len(), 6);
    }

    #[test]
    fn test_join_word_pieces() {
        let d = dict();
        assert_eq!(d.join(&[1, 2, 3, 4]), "hello world");
        assert_eq!(d.join(&[5]), "a");
        assert_eq!(d.join(&[]), "");
    }

    #[test]
    fn test_word_pieces_grouping() {
        let d = dict();
        let pieces = d.word_pieces(&[1, 2, 3, 4], &[0, 3, 10, 12], &[2, 8, 11, 15], 40);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].word, "hello");
        assert_eq!(pieces[0].start, 0);
        assert_eq!(pieces[0].end, 8 * 40);
        assert_eq!(pieces[1].word, "world");
        assert_eq!(pieces[1].start, 10 * 40);
        assert_eq!(pieces[1].end, 15 * 40);
    }

    #[test]
    fn test_word_piece_end_not_before_start() {
        let d = dict();
        let pieces = d.word_pieces(&[1], &[5], &[5], 40);
        assert!(pieces[0].end > pieces[0].start);
    }

    #[test]
    fn test_tokenize_phrase() {
        let d = dict();
        assert_eq!(d.tokenize_phrase("hello world"), Some(vec![1, 2, 3, 4]));
        assert_eq!(d.tokenize_phrase("a"), Some(vec![5]));
        assert_eq!(d.tokenize_phrase("xyz"), None);
        assert_eq!(d.tokenize_phrase(""), None);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = std::env::temp_dir().join("myna_dict_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad_units.txt");
        std::fs::write(&path, "token_without_id\n").unwrap();
        assert!(UnitDict::load(&path).is_err());

        let path = dir.join("good_units.txt");
        std::fs::write(&path, "<blank> 0\n▁he 1\nllo 2\n").unwrap();
        let d = UnitDict::load(&path).unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(d.id("llo"), Some(2));
    }
}
