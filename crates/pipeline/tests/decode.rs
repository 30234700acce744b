//! End-to-end decoding tests over a deterministic mock executor.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use common::{dict, settings, tied_frame, to_utterance, tok_frames, MockExecutor};
use myna_config::Settings;
use myna_pipeline::{
    BatchRecognizer, ContextGraph, DecodeEvent, FeaturePipeline, StreamingDecoder,
    StreamingDecoderConfig,
};

struct Harness {
    features: Arc<FeaturePipeline>,
    stop: Arc<AtomicBool>,
    events: UnboundedReceiver<DecodeEvent>,
    handle: std::thread::JoinHandle<()>,
}

impl Harness {
    fn spawn(settings: &Settings, context: Option<Arc<ContextGraph>>) -> Self {
        let executor = MockExecutor::new();
        let features = Arc::new(FeaturePipeline::new(&settings.feature));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded_channel();

        let config = StreamingDecoderConfig::from_settings(settings, 1);
        let mut decoder = StreamingDecoder::new(
            executor,
            features.clone(),
            dict(),
            context,
            config,
            stop.clone(),
            tx,
        );
        let handle = std::thread::spawn(move || decoder.run());

        Self {
            features,
            stop,
            events: rx,
            handle,
        }
    }

    /// Join the decoder thread and drain everything it published.
    fn finish(mut self) -> Vec<DecodeEvent> {
        self.handle.join().unwrap();
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Poll for the next event while the decoder is still running.
    fn next_event(&mut self, timeout: Duration) -> Option<DecodeEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(event) = self.events.try_recv() {
                return Some(event);
            }
            if Instant::now() > deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

fn finals(events: &[DecodeEvent]) -> Vec<&Vec<myna_core::RecognitionResult>> {
    events
        .iter()
        .filter_map(|e| match e {
            DecodeEvent::Final(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn partials(events: &[DecodeEvent]) -> Vec<&Vec<myna_core::RecognitionResult>> {
    events
        .iter()
        .filter_map(|e| match e {
            DecodeEvent::Partial(r) => Some(r),
            _ => None,
        })
        .collect()
}

#[test]
fn test_streaming_single_utterance() {
    let mut settings = settings();
    settings.decode.timestamp = true;
    let harness = Harness::spawn(&settings, None);

    let mut frames = tok_frames(0, 2);
    frames.extend(tok_frames(1, 4));
    frames.extend(tok_frames(0, 2));
    harness.features.accept_frames(frames);
    harness.features.set_input_finished();

    let events = harness.finish();
    let finals = finals(&events);
    assert_eq!(finals.len(), 1, "exactly one terminal result");
    assert_eq!(finals[0][0].sentence, "one");

    // At least one partial, all of them before the final
    assert!(!partials(&events).is_empty());
    assert!(matches!(events.last().unwrap(), DecodeEvent::Final(_)));

    // Timestamps inside the utterance (8 frames x 10ms)
    let pieces = &finals[0][0].word_pieces;
    assert_eq!(pieces.len(), 1);
    assert_eq!(pieces[0].word, "one");
    assert!(pieces[0].start >= 10);
    assert!(pieces[0].end <= 80);
}

#[test]
fn test_empty_utterance() {
    let harness = Harness::spawn(&settings(), None);
    harness.features.set_input_finished();

    let events = harness.finish();
    assert!(partials(&events).is_empty());
    let finals = finals(&events);
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0][0].sentence, "");
}

#[test]
fn test_partials_are_deduplicated() {
    let harness = Harness::spawn(&settings(), None);

    // Two chunks with the same transcription
    let mut frames = tok_frames(1, 4);
    frames.extend(tok_frames(0, 4));
    harness.features.accept_frames(frames);
    harness.features.set_input_finished();

    let events = harness.finish();
    assert_eq!(partials(&events).len(), 1);
}

#[test]
fn test_continuous_endpoint_two_utterances() {
    let mut settings = settings();
    settings.decode.continuous_decoding = true;
    let mut harness = Harness::spawn(&settings, None);

    // "one" followed by enough silence to trip the endpoint rule
    // (threshold is 5 silent frames; 12 spans chunk boundaries)
    let mut frames = tok_frames(1, 4);
    frames.extend(tok_frames(0, 12));
    harness.features.accept_frames(frames);

    let mut first_events = Vec::new();
    loop {
        let event = harness
            .next_event(Duration::from_secs(5))
            .expect("timed out waiting for first final");
        let is_final = matches!(event, DecodeEvent::Final(_));
        first_events.push(event);
        if is_final {
            break;
        }
    }
    assert!(!partials(&first_events).is_empty());
    assert_eq!(finals(&first_events)[0][0].sentence, "one");

    // Decoder has rearmed: stream the next utterance
    harness.features.accept_frames(tok_frames(2, 4));
    harness.features.set_input_finished();

    let rest = harness.finish();
    let rest_finals = finals(&rest);
    assert_eq!(rest_finals.len(), 1);
    assert_eq!(rest_finals[0][0].sentence, "two");
}

#[test]
fn test_cancellation_no_final() {
    let harness = Harness::spawn(&settings(), None);

    // Less than a chunk: the decoder blocks in read
    harness.features.accept_frames(tok_frames(1, 2));
    std::thread::sleep(Duration::from_millis(20));

    harness.stop.store(true, Ordering::Release);
    harness.features.cancel();

    let events = harness.finish();
    assert!(finals(&events).is_empty(), "no final after cancellation");
}

#[test]
fn test_context_biasing_flips_top_hypothesis() {
    let settings = settings();
    let executor = MockExecutor::new();
    let utterance = to_utterance(&[tied_frame(1, 2)]);

    let plain = BatchRecognizer::new(executor.clone(), dict(), None, &settings);
    let results = plain.recognize(&[utterance.clone()]).unwrap();
    assert_eq!(results[0][0].sentence, "two");

    let mut graph = ContextGraph::new(5.0);
    graph.add_phrase(&[1]);
    let biased = BatchRecognizer::new(executor, dict(), Some(Arc::new(graph)), &settings);
    let results = biased.recognize(&[utterance]).unwrap();
    assert_eq!(results[0][0].sentence, "one");
}

#[test]
fn test_batch_matches_streaming() {
    let utterances: Vec<Vec<Vec<f32>>> = vec![
        {
            let mut f = tok_frames(1, 3);
            f.extend(tok_frames(0, 2));
            f
        },
        {
            let mut f = tok_frames(1, 2);
            f.extend(tok_frames(0, 2));
            f.extend(tok_frames(2, 3));
            f
        },
        tok_frames(3, 4),
    ];

    // Batch path
    let settings = settings();
    let recognizer = BatchRecognizer::new(MockExecutor::new(), dict(), None, &settings);
    let matrices: Vec<_> = utterances.iter().map(|f| to_utterance(f)).collect();
    let batch_results = recognizer.recognize(&matrices).unwrap();
    assert_eq!(batch_results.len(), 3);

    // Streaming path, whole utterance in a single chunk
    let mut streaming_settings = settings.clone();
    streaming_settings.decode.chunk_size = 64;

    for (frames, batch_nbest) in utterances.iter().zip(&batch_results) {
        let harness = Harness::spawn(&streaming_settings, None);
        harness.features.accept_frames(frames.clone());
        harness.features.set_input_finished();
        let events = harness.finish();

        let stream_final = finals(&events)[0].clone();
        assert_eq!(stream_final[0].sentence, batch_nbest[0].sentence);
        assert!((stream_final[0].score - batch_nbest[0].score).abs() < 1e-3);
    }

    assert_eq!(batch_results[0][0].sentence, "one");
    assert_eq!(batch_results[1][0].sentence, "one two");
    assert_eq!(batch_results[2][0].sentence, "three");
}
