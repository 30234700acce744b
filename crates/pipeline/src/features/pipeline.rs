//! Buffered feature pipeline
//!
//! Producer/consumer seam between the audio-accepting transport task and the
//! decoder: the transport side appends PCM, the decoder side blocks on
//! [`FeaturePipeline::read`] until enough frames are available or the input
//! is finished. One reader per pipeline.

use parking_lot::{Condvar, Mutex};

use myna_config::FeatureConfig;

use super::FbankExtractor;

struct BufferState {
    frames: Vec<Vec<f32>>,
    num_consumed: usize,
    input_finished: bool,
    cancelled: bool,
}

/// Buffered producer/consumer of acoustic frames
pub struct FeaturePipeline {
    fbank: FbankExtractor,
    state: Mutex<BufferState>,
    available: Condvar,
    /// Signalled when the reader frees buffer room
    space: Condvar,
    max_pending: usize,
}

impl FeaturePipeline {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            fbank: FbankExtractor::new(config),
            state: Mutex::new(BufferState {
                frames: Vec::new(),
                num_consumed: 0,
                input_finished: false,
                cancelled: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            max_pending: config.max_pending_frames,
        }
    }

    /// Feature dimension of frames this pipeline emits
    pub fn feature_dim(&self) -> usize {
        self.fbank.feature_dim()
    }

    /// Append PCM samples, extract complete frames and wake the reader.
    pub fn accept_waveform(&self, samples: &[f32]) {
        let frames = self.fbank.accept(samples);
        if frames.is_empty() {
            return;
        }
        self.accept_frames(frames);
    }

    /// Append pre-extracted feature frames directly.
    ///
    /// Used by frontends that compute their own features; `accept_waveform`
    /// goes through the built-in fbank extractor. Blocks while the buffer
    /// holds `max_pending_frames` unconsumed frames (backpressure onto the
    /// transport).
    pub fn accept_frames(&self, frames: Vec<Vec<f32>>) {
        let mut state = self.state.lock();
        while !state.input_finished
            && !state.cancelled
            && state.frames.len() - state.num_consumed >= self.max_pending
        {
            self.space.wait(&mut state);
        }
        if state.input_finished || state.cancelled {
            tracing::warn!(
                dropped = frames.len(),
                "Frames received after input finished, dropping"
            );
            return;
        }
        state.frames.extend(frames);
        self.available.notify_all();
    }

    /// Mark the end of the input stream and wake all waiters.
    pub fn set_input_finished(&self) {
        let mut state = self.state.lock();
        state.input_finished = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    /// Blocking read of up to `n` frames past the consumed position.
    ///
    /// Blocks until `n` frames are available, the input is finished, or the
    /// pipeline is cancelled. Returns `ok = false` iff the buffer is drained
    /// and no more input will arrive (finished or cancelled).
    pub fn read(&self, n: usize) -> (Vec<Vec<f32>>, bool) {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return (Vec::new(), false);
            }

            let available = state.frames.len() - state.num_consumed;
            if available >= n {
                let start = state.num_consumed;
                state.num_consumed += n;
                self.space.notify_all();
                return (state.frames[start..start + n].to_vec(), true);
            }

            if state.input_finished {
                let start = state.num_consumed;
                state.num_consumed = state.frames.len();
                self.space.notify_all();
                return (state.frames[start..].to_vec(), false);
            }

            self.available.wait(&mut state);
        }
    }

    /// Discard buffered state between utterances in continuous mode.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.frames.clear();
        state.num_consumed = 0;
        state.input_finished = false;
        self.fbank.reset();
        self.space.notify_all();
    }

    /// Unblock all waiters permanently; subsequent calls return immediately.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    /// Total frames appended so far in this utterance
    pub fn num_frames(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Frames already handed to the reader
    pub fn num_consumed(&self) -> usize {
        self.state.lock().num_consumed
    }

    pub fn input_finished(&self) -> bool {
        self.state.lock().input_finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(v: f32) -> Vec<f32> {
        vec![v; 4]
    }

    #[test]
    fn test_producer_blocks_when_full() {
        let mut config = FeatureConfig::default();
        config.max_pending_frames = 4;
        let pipeline = Arc::new(FeaturePipeline::new(&config));
        pipeline.accept_frames(vec![frame(0.0); 4]);

        let producer = pipeline.clone();
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = done.clone();
        let handle = std::thread::spawn(move || {
            producer.accept_frames(vec![frame(1.0)]);
            done_flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(30));
        assert!(!done.load(Ordering::SeqCst), "producer should be blocked");

        // Consuming frees room and unblocks the producer
        let _ = pipeline.read(2);
        handle.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(pipeline.num_frames(), 5);
    }

    #[test]
    fn test_read_returns_when_enough_frames() {
        let pipeline = FeaturePipeline::new(&FeatureConfig::default());
        pipeline.accept_frames(vec![frame(1.0), frame(2.0), frame(3.0)]);

        let (frames, ok) = pipeline.read(2);
        assert!(ok);
        assert_eq!(frames.len(), 2);
        assert_eq!(pipeline.num_consumed(), 2);
    }

    #[test]
    fn test_read_drains_on_finish() {
        let pipeline = FeaturePipeline::new(&FeatureConfig::default());
        pipeline.accept_frames(vec![frame(1.0)]);
        pipeline.set_input_finished();

        let (frames, ok) = pipeline.read(5);
        assert!(!ok);
        assert_eq!(frames.len(), 1);

        // Drained and finished: immediately (empty, false)
        let (frames, ok) = pipeline.read(5);
        assert!(!ok);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_frames_after_finish_dropped() {
        let pipeline = FeaturePipeline::new(&FeatureConfig::default());
        pipeline.set_input_finished();
        pipeline.accept_frames(vec![frame(1.0)]);
        assert_eq!(pipeline.num_frames(), 0);
    }

    #[test]
    fn test_producer_consumer_conservation() {
        let pipeline = Arc::new(FeaturePipeline::new(&FeatureConfig::default()));
        let producer = pipeline.clone();

        let handle = std::thread::spawn(move || {
            for batch in 0..10 {
                producer.accept_frames((0..7).map(|i| frame((batch * 7 + i) as f32)).collect());
                std::thread::sleep(Duration::from_millis(1));
            }
            producer.set_input_finished();
        });

        let mut total = 0;
        loop {
            let (frames, ok) = pipeline.read(4);
            total += frames.len();
            if !ok {
                break;
            }
        }
        handle.join().unwrap();

        assert_eq!(total, 70);
        assert_eq!(pipeline.num_consumed(), pipeline.num_frames());
    }

    #[test]
    fn test_cancel_unblocks_reader() {
        let pipeline = Arc::new(FeaturePipeline::new(&FeatureConfig::default()));
        let canceller = pipeline.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let (frames, ok) = pipeline.read(100);
        assert!(!ok);
        assert!(frames.is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn test_reset_rewinds() {
        let pipeline = FeaturePipeline::new(&FeatureConfig::default());
        pipeline.accept_frames(vec![frame(1.0), frame(2.0)]);
        pipeline.set_input_finished();
        let _ = pipeline.read(2);

        pipeline.reset();
        assert_eq!(pipeline.num_frames(), 0);
        assert_eq!(pipeline.num_consumed(), 0);
        assert!(!pipeline.input_finished());
    }

    #[test]
    fn test_waveform_to_frames() {
        let pipeline = FeaturePipeline::new(&FeatureConfig::default());
        // 1600 samples = 100ms at 16kHz -> 8 frames of dim 80
        let audio: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.02).sin() * 0.3).collect();
        pipeline.accept_waveform(&audio);
        assert_eq!(pipeline.num_frames(), 8);
        assert_eq!(pipeline.feature_dim(), 80);
    }
}
