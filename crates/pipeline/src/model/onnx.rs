//! ONNX Runtime model executor
//!
//! Loads an exported model directory:
//! - `encoder.onnx` - streaming chunk encoder with explicit caches
//! - `ctc.onnx` - CTC activation head (log-softmax output)
//! - `decoder.onnx` - attention decoder (L2R, optionally R2L)
//! - `encoder_batch.onnx` - whole-utterance batch encoder (optional)
//! - `meta.json` - [`ModelMetadata`]

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::DynValue, value::Tensor};
use parking_lot::Mutex;
use std::path::Path;

use crate::PipelineError;

use super::{EncoderCache, ModelExecutor, ModelMetadata};

/// ONNX Runtime backed model executor
pub struct OnnxExecutor {
    encoder: Mutex<Session>,
    ctc: Mutex<Session>,
    decoder: Mutex<Session>,
    batch_encoder: Option<Mutex<Session>>,
    metadata: ModelMetadata,
}

impl OnnxExecutor {
    /// Load all sessions from a model directory.
    pub fn new(model_dir: impl AsRef<Path>, num_threads: usize) -> Result<Self, PipelineError> {
        let model_dir = model_dir.as_ref();

        let metadata = Self::load_metadata(&model_dir.join("meta.json"))?;
        let encoder = Self::load_session(&model_dir.join("encoder.onnx"), num_threads)?;
        let ctc = Self::load_session(&model_dir.join("ctc.onnx"), num_threads)?;
        let decoder = Self::load_session(&model_dir.join("decoder.onnx"), num_threads)?;

        let batch_path = model_dir.join("encoder_batch.onnx");
        let batch_encoder = if batch_path.exists() {
            Some(Mutex::new(Self::load_session(&batch_path, num_threads)?))
        } else {
            None
        };

        tracing::info!(
            model_dir = %model_dir.display(),
            subsampling_rate = metadata.subsampling_rate,
            right_context = metadata.right_context,
            vocab_size = metadata.vocab_size,
            bidirectional = metadata.is_bidirectional_decoder,
            batch_encoder = batch_encoder.is_some(),
            "Loaded ONNX model"
        );

        Ok(Self {
            encoder: Mutex::new(encoder),
            ctc: Mutex::new(ctc),
            decoder: Mutex::new(decoder),
            batch_encoder,
            metadata,
        })
    }

    fn load_metadata(path: &Path) -> Result<ModelMetadata, PipelineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::Model(format!("Invalid model metadata: {}", e)))
    }

    fn load_session(path: &Path, num_threads: usize) -> Result<Session, PipelineError> {
        Session::builder()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_intra_threads(num_threads.max(1))
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| PipelineError::Model(format!("Failed to load {}: {}", path.display(), e)))
    }

    fn extract2(value: Option<&DynValue>, name: &str) -> Result<Array2<f32>, PipelineError> {
        Self::extract_f32(value, name)?
            .into_dimensionality()
            .map_err(|e| PipelineError::Model(format!("'{}' has unexpected rank: {}", name, e)))
    }

    fn extract3(value: Option<&DynValue>, name: &str) -> Result<Array3<f32>, PipelineError> {
        Self::extract_f32(value, name)?
            .into_dimensionality()
            .map_err(|e| PipelineError::Model(format!("'{}' has unexpected rank: {}", name, e)))
    }

    fn extract_f32(
        value: Option<&DynValue>,
        name: &str,
    ) -> Result<ndarray::ArrayD<f32>, PipelineError> {
        Ok(value
            .ok_or_else(|| PipelineError::Model(format!("Missing '{}' output", name)))?
            .try_extract_array::<f32>()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .to_owned())
    }
}

impl ModelExecutor for OnnxExecutor {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn forward_encoder_chunk(
        &self,
        chunk_feats: ArrayView2<f32>,
        cache: &EncoderCache,
    ) -> Result<(Array2<f32>, EncoderCache), PipelineError> {
        let (frames_in, dim) = chunk_feats.dim();
        if dim != self.metadata.feature_dim {
            return Err(PipelineError::InvalidInput(format!(
                "expected feature dim {}, got {}",
                self.metadata.feature_dim, dim
            )));
        }

        let chunk = Tensor::from_array(chunk_feats.to_owned().insert_axis(Axis(0)))
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let offset = Tensor::from_array(Array1::from_vec(vec![cache.offset as i64]))
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let att_cache = Tensor::from_array(cache.att_cache.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let cnn_cache = Tensor::from_array(cache.cnn_cache.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = self.encoder.lock();
        let outputs = session
            .run(ort::inputs![
                "chunk" => chunk,
                "offset" => offset,
                "att_cache" => att_cache,
                "cnn_cache" => cnn_cache,
            ])
            .map_err(|e| PipelineError::Model(format!("Encoder failed: {}", e)))?;

        let chunk_out = Self::extract3(outputs.get("output"), "output")?.index_axis_move(Axis(0), 0);
        let att_cache = Self::extract3(outputs.get("r_att_cache"), "r_att_cache")?;
        let cnn_cache = Self::extract3(outputs.get("r_cnn_cache"), "r_cnn_cache")?;

        let encoded = chunk_out.nrows();
        tracing::trace!(
            frames_in = frames_in,
            frames_out = encoded,
            offset = cache.offset,
            "Encoder chunk"
        );

        Ok((
            chunk_out,
            EncoderCache {
                att_cache,
                cnn_cache,
                offset: cache.offset + encoded,
            },
        ))
    }

    fn ctc_activation(&self, encoder_out: ArrayView2<f32>) -> Result<Array2<f32>, PipelineError> {
        let hidden = Tensor::from_array(encoder_out.to_owned().insert_axis(Axis(0)))
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = self.ctc.lock();
        let outputs = session
            .run(ort::inputs!["hidden" => hidden])
            .map_err(|e| PipelineError::Model(format!("CTC activation failed: {}", e)))?;

        Ok(Self::extract3(outputs.get("probs"), "probs")?.index_axis_move(Axis(0), 0))
    }

    fn forward_attention_decoder(
        &self,
        hyps: ArrayView2<i64>,
        hyps_lens: ArrayView1<i64>,
        encoder_out: ArrayView3<f32>,
        reverse_weight: f32,
    ) -> Result<(Array3<f32>, Option<Array3<f32>>), PipelineError> {
        let hyps_tensor = Tensor::from_array(hyps.to_owned())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let lens_tensor = Tensor::from_array(hyps_lens.to_owned())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let encoder_tensor = Tensor::from_array(encoder_out.to_owned())
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = self.decoder.lock();
        let outputs = session
            .run(ort::inputs![
                "hyps" => hyps_tensor,
                "hyps_lens" => lens_tensor,
                "encoder_out" => encoder_tensor,
            ])
            .map_err(|e| PipelineError::Model(format!("Attention decoder failed: {}", e)))?;

        let l2r = Self::extract3(outputs.get("score"), "score")?;
        let r2l = if self.metadata.is_bidirectional_decoder && reverse_weight > 0.0 {
            Some(Self::extract3(outputs.get("r_score"), "r_score")?)
        } else {
            None
        };

        Ok((l2r, r2l))
    }

    fn batch_forward_encoder(
        &self,
        feats: ArrayView3<f32>,
        feats_lens: ArrayView1<i64>,
    ) -> Result<(Array3<f32>, Vec<usize>, Array3<f32>), PipelineError> {
        let batch_encoder = self.batch_encoder.as_ref().ok_or_else(|| {
            PipelineError::Model("Model exported without a batch encoder".to_string())
        })?;

        let speech = Tensor::from_array(feats.to_owned())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let speech_lengths = Tensor::from_array(feats_lens.to_owned())
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = batch_encoder.lock();
        let outputs = session
            .run(ort::inputs![
                "speech" => speech,
                "speech_lengths" => speech_lengths,
            ])
            .map_err(|e| PipelineError::Model(format!("Batch encoder failed: {}", e)))?;

        let encoder_out = Self::extract3(outputs.get("encoder_out"), "encoder_out")?;
        let ctc_logp = Self::extract3(outputs.get("ctc_log_probs"), "ctc_log_probs")?;

        let lens = outputs
            .get("encoder_out_lens")
            .ok_or_else(|| PipelineError::Model("Missing 'encoder_out_lens' output".to_string()))?
            .try_extract_array::<i64>()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .iter()
            .map(|&l| l as usize)
            .collect();

        Ok((encoder_out, lens, ctc_logp))
    }
}
