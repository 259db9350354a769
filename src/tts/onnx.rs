use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::{Mutex, MutexGuard};

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Value};

use crate::error::AppError;
use crate::tts::audio;
use crate::tts::model::{InferenceConfig, ModelConfig, ModelFiles};
use crate::tts::{Speech, SynthesisRequest, Synthesizer};

const SPEAKER_INPUTS: &[&str] = &["g", "speaker_embedding", "d_vector"];
const LANGUAGE_INPUTS: &[&str] = &["lid", "language_id"];
const AUDIO_OUTPUTS: &[&str] = &["output", "audio"];

/// VITS-family model exported to ONNX, optionally paired with a speaker
/// encoder for zero-shot voice cloning.
pub struct OnnxVoiceModel {
    name: String,
    config: ModelConfig,
    inference: InferenceConfig,
    decoder: Mutex<Session>,
    decoder_output: String,
    speaker_input: Option<String>,
    language_input: Option<String>,
    encoder: Option<SpeakerEncoder>,
}

struct SpeakerEncoder {
    session: Mutex<Session>,
    input: String,
    output: String,
    sample_rate: u32,
}

impl OnnxVoiceModel {
    pub fn load(model_dir: &Path, intra_threads: usize) -> Result<Self, AppError> {
        let files = ModelFiles::load(model_dir)?;

        let decoder = create_session(&files.model_path, intra_threads)?;
        let input_names: Vec<String> = decoder.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = decoder.outputs.iter().map(|o| o.name.clone()).collect();

        let speaker_input = find_name(&input_names, SPEAKER_INPUTS);
        let language_input = find_name(&input_names, LANGUAGE_INPUTS);
        let decoder_output = find_name(&output_names, AUDIO_OUTPUTS)
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| AppError::TtsError("Model has no outputs".to_string()))?;

        let encoder = match &files.speaker_encoder_path {
            Some(path) => {
                let sample_rate = files
                    .config
                    .speaker_encoder
                    .clone()
                    .unwrap_or_default()
                    .sample_rate;
                Some(SpeakerEncoder::load(path, intra_threads, sample_rate)?)
            }
            None => None,
        };

        match (&encoder, &speaker_input) {
            (Some(_), None) => {
                return Err(AppError::TtsError(format!(
                    "{} has a speaker encoder but no speaker input (expected one of {:?})",
                    files.name, SPEAKER_INPUTS
                )))
            }
            (None, Some(input)) => {
                return Err(AppError::TtsError(format!(
                    "{} expects a speaker embedding on '{}' but has no {}",
                    files.name,
                    input,
                    crate::tts::model::SPEAKER_ENCODER_FILE
                )))
            }
            _ => {}
        }

        if !files.config.language_id_map.is_empty() && language_input.is_none() {
            tracing::warn!(
                "{} lists languages but takes no language input; language ids will be ignored",
                files.name
            );
        }

        let inference = files.config.inference.clone().unwrap_or_default();

        Ok(Self {
            name: files.name,
            config: files.config,
            inference,
            decoder: Mutex::new(decoder),
            decoder_output,
            speaker_input,
            language_input,
            encoder,
        })
    }

    fn run_decoder(
        &self,
        phoneme_ids: &[i64],
        speaker_embedding: Option<Vec<f32>>,
        language_id: Option<i64>,
    ) -> Result<Vec<f32>, AppError> {
        if phoneme_ids.is_empty() {
            return Ok(Vec::new());
        }

        let input_len = phoneme_ids.len();
        let mut inputs: Vec<(String, DynValue)> = Vec::with_capacity(5);

        // input: [batch, sequence] = [1, phoneme_count]
        inputs.push((
            "input".to_string(),
            Value::from_array((vec![1, input_len], phoneme_ids.to_vec()))
                .map_err(tensor_error)?
                .into_dyn(),
        ));

        // input_lengths: [batch] = [1]
        inputs.push((
            "input_lengths".to_string(),
            Value::from_array((vec![1_usize], vec![input_len as i64]))
                .map_err(tensor_error)?
                .into_dyn(),
        ));

        // scales: [3] = [noise_scale, length_scale, noise_w]
        inputs.push((
            "scales".to_string(),
            Value::from_array((
                vec![3_usize],
                vec![
                    self.inference.noise_scale,
                    self.inference.length_scale,
                    self.inference.noise_w,
                ],
            ))
            .map_err(tensor_error)?
            .into_dyn(),
        ));

        if let (Some(name), Some(embedding)) = (&self.speaker_input, speaker_embedding) {
            let dim = embedding.len();
            let value = Value::from_array((vec![1, dim], embedding)).map_err(tensor_error)?;
            inputs.push((name.clone(), value.into_dyn()));
        }

        if let (Some(name), Some(id)) = (&self.language_input, language_id) {
            let value = Value::from_array((vec![1_usize], vec![id])).map_err(tensor_error)?;
            inputs.push((name.clone(), value.into_dyn()));
        }

        let mut session = lock(&self.decoder)?;
        let outputs = session
            .run(inputs)
            .map_err(|e| AppError::TtsError(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get(self.decoder_output.as_str())
            .ok_or_else(|| AppError::TtsError("Missing output tensor".to_string()))?;

        let output_view = output
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::TtsError(format!("Failed to extract output tensor: {}", e)))?;

        Ok(output_view.1.to_vec())
    }
}

impl Synthesizer for OnnxVoiceModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_cloning(&self) -> bool {
        self.encoder.is_some()
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Speech, AppError> {
        let language_id = self.config.language_id(request.language)?;

        let speaker_embedding = match &self.encoder {
            Some(encoder) => Some(encoder.embed(request.speaker_wav)?),
            None => {
                tracing::debug!(
                    "{} cannot clone voices, ignoring {}",
                    self.name,
                    request.speaker_wav.display()
                );
                None
            }
        };

        let phonemes = phonemize(request.text, self.config.espeak_voice(request.language))?;
        let ids = phonemes_to_ids(&phonemes, &self.config.phoneme_id_map);

        let samples = self.run_decoder(&ids, speaker_embedding, language_id)?;

        Ok(Speech {
            samples,
            sample_rate: self.config.audio.sample_rate,
        })
    }
}

impl SpeakerEncoder {
    fn load(path: &Path, intra_threads: usize, sample_rate: u32) -> Result<Self, AppError> {
        let session = create_session(path, intra_threads)?;

        let input = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| AppError::TtsError("Speaker encoder has no inputs".to_string()))?;
        let output = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| AppError::TtsError("Speaker encoder has no outputs".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            input,
            output,
            sample_rate,
        })
    }

    /// Speaker embedding of the reference clip, L2-normalized.
    fn embed(&self, speaker_wav: &Path) -> Result<Vec<f32>, AppError> {
        let samples = audio::load_reference(speaker_wav, self.sample_rate)?;
        let input = Value::from_array((vec![1, samples.len()], samples)).map_err(tensor_error)?;

        let mut session = lock(&self.session)?;
        let outputs = session
            .run(vec![(self.input.clone(), input.into_dyn())])
            .map_err(|e| AppError::TtsError(format!("Speaker encoder failed: {}", e)))?;

        let output = outputs
            .get(self.output.as_str())
            .ok_or_else(|| AppError::TtsError("Missing speaker embedding".to_string()))?;

        let mut embedding = output
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::TtsError(format!("Failed to extract speaker embedding: {}", e)))?
            .1
            .to_vec();

        audio::l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

fn create_session(path: &Path, intra_threads: usize) -> Result<Session, AppError> {
    Session::builder()
        .map_err(|e| AppError::TtsError(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| AppError::TtsError(format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(intra_threads)
        .map_err(|e| AppError::TtsError(format!("Failed to set threads: {}", e)))?
        .commit_from_file(path)
        .map_err(|e| AppError::TtsError(format!("Failed to load model {}: {}", path.display(), e)))
}

fn tensor_error(e: ort::Error) -> AppError {
    AppError::TtsError(format!("Failed to create input tensor: {}", e))
}

fn lock(session: &Mutex<Session>) -> Result<MutexGuard<'_, Session>, AppError> {
    session
        .lock()
        .map_err(|_| AppError::TtsError("Model session lock poisoned".to_string()))
}

fn find_name(names: &[String], candidates: &[&str]) -> Option<String> {
    names
        .iter()
        .find(|name| candidates.contains(&name.as_str()))
        .cloned()
}

/// Convert text to phonemes using espeak-ng
pub fn phonemize(text: &str, voice: &str) -> Result<String, AppError> {
    run_phonemizer(Path::new("espeak-ng"), text, voice)
}

fn espeak_args<'a>(text: &'a str, voice: &'a str) -> [&'a str; 6] {
    // "--" ends option parsing; text starting with '-' is still text
    ["--ipa", "-q", "-v", voice, "--", text]
}

fn run_phonemizer(program: &Path, text: &str, voice: &str) -> Result<String, AppError> {
    if text.is_empty() {
        return Ok(String::new());
    }

    let output = Command::new(program)
        .args(espeak_args(text, voice))
        .output()
        .map_err(|e| {
            AppError::TtsError(format!(
                "Failed to run espeak-ng (is it installed?): {}",
                e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::TtsError(format!("espeak-ng failed: {}", stderr)));
    }

    // espeak-ng prints one line per clause
    let phonemes = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(phonemes)
}

/// Convert phonemes to IDs using the model's phoneme map
pub fn phonemes_to_ids(phonemes: &str, id_map: &HashMap<String, Vec<i64>>) -> Vec<i64> {
    let mut ids = Vec::new();

    // BOS
    if let Some(bos) = id_map.get("^") {
        ids.extend(bos);
    } else {
        ids.push(0);
    }

    let pad = id_map.get("_");
    for ch in phonemes.chars() {
        // Symbols missing from the map are dropped
        if let Some(mapped) = id_map.get(&ch.to_string()) {
            ids.extend(mapped);
            if let Some(pad) = pad {
                ids.extend(pad);
            }
        }
    }

    // EOS
    if let Some(eos) = id_map.get("$") {
        ids.extend(eos);
    } else {
        ids.push(0);
    }

    ids
}
