//! CTC decoding
//!
//! Prefix beam search over frame-level label probabilities, optional
//! context-phrase biasing, attention rescoring of the N-best, and the two
//! drivers built on top: the streaming decoder and the batch recognizer.

mod batch;
mod context;
mod rescore;
mod search;
mod streaming;

pub use batch::BatchRecognizer;
pub use context::ContextGraph;
pub use rescore::attention_rescore;
pub use search::{CtcPrefixBeamSearch, DecodedHypothesis, SearchConfig};
pub use streaming::{DecodeEvent, StreamingDecoder, StreamingDecoderConfig};
