//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;
use myna_core::SampleRate;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Model paths and executor options
    #[serde(default)]
    pub model: ModelConfig,

    /// Acoustic feature extraction
    #[serde(default)]
    pub feature: FeatureConfig,

    /// Decoding configuration
    #[serde(default)]
    pub decode: DecodeConfig,

    /// Endpoint detection thresholds
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Intra-op threads for model inference
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

fn default_port() -> u16 {
    10086
}

fn default_num_threads() -> usize {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            num_threads: default_num_threads(),
        }
    }
}

/// Model paths
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelConfig {
    /// Directory holding the exported model files
    #[serde(default)]
    pub model_path: String,

    /// Path to the unit dictionary (`<token> <id>` per line)
    #[serde(default)]
    pub dict_path: String,
}

/// Acoustic feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Input sample rate (binary frames must match)
    #[serde(default)]
    pub sample_rate: SampleRate,

    /// Number of mel filterbank bins
    #[serde(default = "default_num_mel_bins")]
    pub num_mel_bins: usize,

    /// Analysis window length in milliseconds
    #[serde(default = "default_frame_length_ms")]
    pub frame_length_ms: u32,

    /// Hop between successive frames in milliseconds
    #[serde(default = "default_frame_shift_ms")]
    pub frame_shift_ms: u32,

    /// Unconsumed frames buffered before the producer blocks
    #[serde(default = "default_max_pending_frames")]
    pub max_pending_frames: usize,
}

fn default_num_mel_bins() -> usize {
    80
}

fn default_frame_length_ms() -> u32 {
    25
}

fn default_frame_shift_ms() -> u32 {
    10
}

fn default_max_pending_frames() -> usize {
    10_000
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::default(),
            num_mel_bins: default_num_mel_bins(),
            frame_length_ms: default_frame_length_ms(),
            frame_shift_ms: default_frame_shift_ms(),
            max_pending_frames: default_max_pending_frames(),
        }
    }
}

/// Decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Encoder chunk size in subsampled frames
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Beam width kept after each frame
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,

    /// Candidate token pool considered per frame before pruning
    #[serde(default = "default_first_beam_size")]
    pub first_beam_size: usize,

    /// Number of hypotheses returned per utterance
    #[serde(default = "default_nbest")]
    pub nbest: usize,

    /// CTC blank label id
    #[serde(default)]
    pub blank_id: u32,

    /// Frames whose blank probability exceeds this are skipped
    #[serde(default = "default_blank_skip_threshold")]
    pub blank_skip_threshold: f32,

    /// Weight of the CTC score in the final fusion
    #[serde(default = "default_ctc_weight")]
    pub ctc_weight: f32,

    /// Weight of the right-to-left attention pass
    #[serde(default)]
    pub reverse_weight: f32,

    /// Rescore the N-best with the attention decoder on finalization
    #[serde(default = "default_rescoring")]
    pub rescoring: bool,

    /// Optional context phrase list, one phrase per line
    #[serde(default)]
    pub context_path: Option<String>,

    /// Score bonus per matched context token
    #[serde(default = "default_context_score")]
    pub context_score: f32,

    /// Attach word-level timestamps to results
    #[serde(default)]
    pub timestamp: bool,

    /// Rearm for the next utterance after every endpoint
    #[serde(default)]
    pub continuous_decoding: bool,
}

fn default_chunk_size() -> usize {
    16
}

fn default_beam_size() -> usize {
    10
}

fn default_first_beam_size() -> usize {
    64
}

fn default_nbest() -> usize {
    10
}

fn default_blank_skip_threshold() -> f32 {
    0.98
}

fn default_ctc_weight() -> f32 {
    0.5
}

fn default_rescoring() -> bool {
    true
}

fn default_context_score() -> f32 {
    3.0
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            beam_size: default_beam_size(),
            first_beam_size: default_first_beam_size(),
            nbest: default_nbest(),
            blank_id: 0,
            blank_skip_threshold: default_blank_skip_threshold(),
            ctc_weight: default_ctc_weight(),
            reverse_weight: 0.0,
            rescoring: default_rescoring(),
            context_path: None,
            context_score: default_context_score(),
            timestamp: false,
            continuous_decoding: false,
        }
    }
}

/// Endpoint detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Trailing silence after which an utterance with at least one token ends
    #[serde(default = "default_min_trailing_silence_ms")]
    pub min_trailing_silence_ms: u64,

    /// Hard limit on time since the last emitted token
    #[serde(default = "default_max_since_last_token_ms")]
    pub max_since_last_token_ms: u64,
}

fn default_min_trailing_silence_ms() -> u64 {
    800
}

fn default_max_since_last_token_ms() -> u64 {
    2000
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            min_trailing_silence_ms: default_min_trailing_silence_ms(),
            max_since_last_token_ms: default_max_since_last_token_ms(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decode.beam_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "decode.beam_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.decode.first_beam_size < self.decode.beam_size {
            return Err(ConfigError::InvalidValue {
                field: "decode.first_beam_size".to_string(),
                message: format!(
                    "must be >= beam_size ({})",
                    self.decode.beam_size
                ),
            });
        }

        if self.decode.nbest == 0 {
            return Err(ConfigError::InvalidValue {
                field: "decode.nbest".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.decode.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "decode.chunk_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        for (field, value) in [
            ("decode.ctc_weight", self.decode.ctc_weight),
            ("decode.reverse_weight", self.decode.reverse_weight),
            (
                "decode.blank_skip_threshold",
                self.decode.blank_skip_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be between 0.0 and 1.0, got {}", value),
                });
            }
        }

        if self.feature.frame_shift_ms == 0 || self.feature.frame_length_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feature.frame_shift_ms".to_string(),
                message: "frame length and shift must be non-zero".to_string(),
            });
        }

        if self.feature.frame_shift_ms > self.feature.frame_length_ms {
            return Err(ConfigError::InvalidValue {
                field: "feature.frame_shift_ms".to_string(),
                message: "frame shift must not exceed frame length".to_string(),
            });
        }

        if self.feature.max_pending_frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feature.max_pending_frames".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from configuration files and environment variables.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env)).required(false));
    }

    let settings: Settings = builder
        .add_source(Environment::with_prefix("MYNA").separator("__"))
        .build()?
        .try_deserialize()?;

    settings.validate()?;
    Ok(settings)
}
