//! Log-mel filterbank extraction
//!
//! Sliding-window FFT over incoming PCM using realfft. Streaming-first: each
//! call returns the complete frames the buffered audio allows and keeps the
//! remainder for the next call.

use parking_lot::Mutex;
use realfft::num_complex::Complex;
use std::sync::Arc;

use myna_config::FeatureConfig;

/// Streaming log-mel filterbank extractor
pub struct FbankExtractor {
    n_fft: usize,
    num_bins: usize,
    hop_length: usize,
    win_length: usize,
    mel_filters: Vec<Vec<f32>>,
    hann_window: Vec<f32>,
    fft: Arc<dyn realfft::RealToComplex<f32>>,
    /// Remainder samples awaiting a full window
    buffer: Mutex<Vec<f32>>,
}

impl FbankExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        let sample_rate = config.sample_rate.as_u32() as usize;
        let win_length = sample_rate * config.frame_length_ms as usize / 1000;
        let hop_length = sample_rate * config.frame_shift_ms as usize / 1000;
        let n_fft = win_length.next_power_of_two();

        // Periodic Hann window over win_length, zero-padded to n_fft at use
        let hann_window: Vec<f32> = (0..win_length)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / win_length as f32;
                0.5 * (1.0 - x.cos())
            })
            .collect();

        let mel_filters = Self::create_mel_filters(sample_rate, n_fft, config.num_mel_bins);

        let mut planner = realfft::RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            n_fft,
            num_bins: config.num_mel_bins,
            hop_length,
            win_length,
            mel_filters,
            hann_window,
            fft,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Feature dimension of emitted frames
    pub fn feature_dim(&self) -> usize {
        self.num_bins
    }

    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }

    fn mel_to_hz(mel: f32) -> f32 {
        700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
    }

    fn create_mel_filters(sample_rate: usize, n_fft: usize, num_bins: usize) -> Vec<Vec<f32>> {
        let mel_min = Self::hz_to_mel(0.0);
        let mel_max = Self::hz_to_mel(sample_rate as f32 / 2.0);

        let mel_points: Vec<f32> = (0..num_bins + 2)
            .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (num_bins + 1) as f32)
            .collect();

        let bin_points: Vec<usize> = mel_points
            .iter()
            .map(|&m| ((n_fft + 1) as f32 * Self::mel_to_hz(m) / sample_rate as f32).floor() as usize)
            .collect();

        let n_freq = n_fft / 2 + 1;
        let mut filters = vec![vec![0.0f32; n_freq]; num_bins];

        for i in 0..num_bins {
            let start = bin_points[i];
            let center = bin_points[i + 1];
            let end = bin_points[i + 2];

            for j in start..center {
                if center > start && j < n_freq {
                    filters[i][j] = (j - start) as f32 / (center - start) as f32;
                }
            }
            for j in center..end {
                if end > center && j < n_freq {
                    filters[i][j] = (end - j) as f32 / (end - center) as f32;
                }
            }
        }

        filters
    }

    fn compute_frame(&self, windowed: &mut [f32]) -> Vec<f32> {
        let n_freq = self.n_fft / 2 + 1;
        let mut spectrum = vec![Complex::new(0.0f32, 0.0f32); n_freq];

        let magnitudes: Vec<f32> = if self.fft.process(windowed, &mut spectrum).is_ok() {
            spectrum.iter().map(|c| c.norm()).collect()
        } else {
            vec![0.0f32; n_freq]
        };

        self.mel_filters
            .iter()
            .map(|filter| {
                let mut energy = 0.0f32;
                for (j, &mag) in magnitudes.iter().enumerate() {
                    energy += (mag * mag) * filter[j];
                }
                (energy + 1e-10).ln()
            })
            .collect()
    }

    /// Append samples and return all newly complete frames.
    pub fn accept(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut buffer = self.buffer.lock();
        buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while buffer.len() >= self.win_length {
            let mut windowed = vec![0.0f32; self.n_fft];
            for i in 0..self.win_length {
                windowed[i] = buffer[i] * self.hann_window[i];
            }
            frames.push(self.compute_frame(&mut windowed));
            buffer.drain(..self.hop_length);
        }

        frames
    }

    /// Discard buffered samples
    pub fn reset(&self) {
        self.buffer.lock().clear();
    }

    /// Samples waiting for a complete window
    pub fn pending_samples(&self) -> usize {
        self.buffer.lock().len()
    }
}
