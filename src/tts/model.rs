use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::AppError;

pub const MODEL_FILE: &str = "model.onnx";
pub const CONFIG_FILE: &str = "model.onnx.json";
pub const SPEAKER_ENCODER_FILE: &str = "speaker_encoder.onnx";

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub audio: AudioConfig,
    pub espeak: Option<EspeakConfig>,
    #[serde(default)]
    pub phoneme_id_map: HashMap<String, Vec<i64>>,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
    /// Request language code -> language embedding index.
    /// Empty for single-language models.
    #[serde(default)]
    pub language_id_map: HashMap<String, i64>,
    #[serde(default)]
    pub speaker_encoder: Option<SpeakerEncoderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EspeakConfig {
    pub voice: String,
    /// Request language code -> espeak-ng voice, e.g. "en" -> "en-us".
    #[serde(default)]
    pub voices: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
    #[serde(default = "default_noise_w")]
    pub noise_w: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerEncoderConfig {
    #[serde(default = "default_encoder_sample_rate")]
    pub sample_rate: u32,
}

fn default_noise_scale() -> f32 {
    0.667
}

fn default_length_scale() -> f32 {
    1.0
}

fn default_noise_w() -> f32 {
    0.8
}

fn default_encoder_sample_rate() -> u32 {
    16000
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            noise_scale: default_noise_scale(),
            length_scale: default_length_scale(),
            noise_w: default_noise_w(),
        }
    }
}

impl Default for SpeakerEncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_encoder_sample_rate(),
        }
    }
}

impl ModelConfig {
    /// espeak-ng voice to phonemize `language` with.
    ///
    /// Single-language models use their own voice unless `voices` maps the
    /// language explicitly.
    pub fn espeak_voice<'a>(&'a self, language: &'a str) -> &'a str {
        let Some(espeak) = &self.espeak else {
            return language;
        };

        if let Some(voice) = espeak.voices.get(language) {
            voice
        } else if self.language_id_map.is_empty() {
            &espeak.voice
        } else {
            language
        }
    }

    /// Language embedding index, `None` for single-language models.
    pub fn language_id(&self, language: &str) -> Result<Option<i64>, AppError> {
        if self.language_id_map.is_empty() {
            return Ok(None);
        }

        self.language_id_map
            .get(language)
            .copied()
            .map(Some)
            .ok_or_else(|| {
                let mut supported: Vec<&str> =
                    self.language_id_map.keys().map(String::as_str).collect();
                supported.sort_unstable();
                AppError::TtsError(format!(
                    "Language '{}' is not supported by this model (supported: {})",
                    language,
                    supported.join(", ")
                ))
            })
    }
}

/// A model directory on disk.
#[derive(Debug)]
pub struct ModelFiles {
    pub name: String,
    pub config: ModelConfig,
    pub model_path: PathBuf,
    pub speaker_encoder_path: Option<PathBuf>,
}

impl ModelFiles {
    pub fn load(model_dir: &Path) -> Result<Self, AppError> {
        let model_path = model_dir.join(MODEL_FILE);
        let config_path = model_dir.join(CONFIG_FILE);

        if !model_path.exists() {
            return Err(AppError::TtsError(format!(
                "Model not found: {}",
                model_path.display()
            )));
        }

        if !config_path.exists() {
            return Err(AppError::TtsError(format!(
                "Model config not found: {}",
                config_path.display()
            )));
        }

        let config: ModelConfig = serde_json::from_reader(File::open(&config_path)?)?;

        let encoder_path = model_dir.join(SPEAKER_ENCODER_FILE);
        let speaker_encoder_path = encoder_path.exists().then_some(encoder_path);

        let name = config.name.clone().unwrap_or_else(|| {
            model_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| model_dir.display().to_string())
        });

        Ok(Self {
            name,
            config,
            model_path,
            speaker_encoder_path,
        })
    }
}
