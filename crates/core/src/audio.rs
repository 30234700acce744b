//! Audio sample rates and PCM conversion

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Standard speech recognition
    #[default]
    Hz16000,
}

impl SampleRate {
    /// Map a raw rate in Hz to a supported sample rate.
    pub fn from_hz(hz: u32) -> Result<Self> {
        match hz {
            8000 => Ok(SampleRate::Hz8000),
            16000 => Ok(SampleRate::Hz16000),
            other => Err(Error::UnsupportedSampleRate(other)),
        }
    }

    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
        }
    }

    /// Get samples per millisecond
    pub fn samples_per_ms(&self) -> usize {
        self.as_u32() as usize / 1000
    }
}

/// Convert little-endian 16-bit PCM bytes to f32 samples in [-1.0, 1.0].
///
/// A trailing odd byte is ignored.
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate() {
        assert_eq!(SampleRate::Hz16000.as_u32(), 16000);
        assert_eq!(SampleRate::Hz16000.samples_per_ms(), 16);
        assert_eq!(SampleRate::default(), SampleRate::Hz16000);
    }

    #[test]
    fn test_from_hz() {
        assert_eq!(SampleRate::from_hz(16000).unwrap(), SampleRate::Hz16000);
        assert_eq!(SampleRate::from_hz(8000).unwrap(), SampleRate::Hz8000);
        assert!(matches!(
            SampleRate::from_hz(44100),
            Err(Error::UnsupportedSampleRate(44100))
        ));
    }

    #[test]
    fn test_pcm_conversion() {
        let bytes = [0x00, 0x00, 0xff, 0x7f, 0x00, 0x80];
        let samples = pcm16le_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn test_pcm_conversion_odd_byte() {
        let bytes = [0x01, 0x00, 0x7f];
        assert_eq!(pcm16le_to_f32(&bytes).len(), 1);
    }
}
