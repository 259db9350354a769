pub mod audio;
pub mod model;
pub mod onnx;

use std::path::Path;
use std::sync::Arc;

use crate::config::ModelSettings;
use crate::error::AppError;

pub use onnx::OnnxVoiceModel;

/// One synthesis call: what to say, whose voice, which language.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub speaker_wav: &'a Path,
    pub language: &'a str,
}

/// Mono f32 audio in [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct Speech {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A loaded text-to-speech model.
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the reference audio actually shapes the output voice.
    fn supports_cloning(&self) -> bool;

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Speech, AppError>;
}

pub struct TtsService {
    model: Option<Arc<dyn Synthesizer>>,
}

impl TtsService {
    /// Load the voice-cloning model, falling back to a plain model if it
    /// cannot be loaded. With neither available the service still starts,
    /// and reports itself as not loaded.
    pub fn load(settings: &ModelSettings) -> Self {
        match OnnxVoiceModel::load(&settings.model_dir, settings.intra_threads) {
            Ok(model) => {
                tracing::info!(
                    "Loaded {} model successfully (voice cloning: {})",
                    model.name(),
                    model.supports_cloning()
                );
                return Self::with_model(Arc::new(model));
            }
            Err(e) => tracing::error!(
                "Failed to load model from {}: {}",
                settings.model_dir.display(),
                e
            ),
        }

        let Some(fallback_dir) = &settings.fallback_model_dir else {
            return Self::unloaded();
        };

        match OnnxVoiceModel::load(fallback_dir, settings.intra_threads) {
            Ok(model) => {
                tracing::info!("Loaded fallback model {}", model.name());
                if !model.supports_cloning() {
                    tracing::warn!("Fallback model cannot clone voices; reference audio will be ignored");
                }
                Self::with_model(Arc::new(model))
            }
            Err(e) => {
                tracing::error!(
                    "Failed to load fallback model from {}: {}",
                    fallback_dir.display(),
                    e
                );
                Self::unloaded()
            }
        }
    }

    pub fn with_model(model: Arc<dyn Synthesizer>) -> Self {
        Self { model: Some(model) }
    }

    pub fn unloaded() -> Self {
        Self { model: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().map(|m| m.name())
    }

    pub fn supports_cloning(&self) -> bool {
        self.model
            .as_deref()
            .map(|m| m.supports_cloning())
            .unwrap_or(false)
    }

    /// Synthesize `text` in the voice of `speaker_wav` and write the result
    /// as a WAV file at `output_path`. Blocks for the duration of inference.
    pub fn synthesize_to_file(
        &self,
        text: &str,
        speaker_wav: &Path,
        language: &str,
        output_path: &Path,
    ) -> Result<(), AppError> {
        let model = self.model.as_deref().ok_or(AppError::ModelNotLoaded)?;

        let speech = model.synthesize(&SynthesisRequest {
            text,
            speaker_wav,
            language,
        })?;

        if speech.samples.is_empty() {
            return Err(AppError::TtsError("Model produced no audio".to_string()));
        }

        let wav = audio::samples_to_wav(&speech.samples, speech.sample_rate)?;
        std::fs::write(output_path, wav)?;

        tracing::debug!(
            "Wrote {:.2}s of audio to {}",
            speech.samples.len() as f32 / speech.sample_rate.max(1) as f32,
            output_path.display()
        );

        Ok(())
    }
}
