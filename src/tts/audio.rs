use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use audioadapter_buffers::direct::InterleavedSlice;
use ndarray::{Array2, Axis};
use rubato::{Fft, FixedSync, Resampler};

use crate::error::AppError;

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Decode a reference clip into mono f32 samples at `target_rate`.
pub fn load_reference(path: &Path, target_rate: u32) -> Result<Vec<f32>, AppError> {
    let mut reader = WavReader::open(path).map_err(|e| {
        AppError::TtsError(format!(
            "Failed to read reference audio {}: {}",
            path.display(),
            e
        ))
    })?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::TtsError(format!("Failed to decode reference audio: {}", e)))?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| {
                    AppError::TtsError(format!("Failed to decode reference audio: {}", e))
                })?
        }
    };

    let mono = downmix(interleaved, spec.channels)?;
    if mono.is_empty() {
        return Err(AppError::TtsError("Reference audio is empty".to_string()));
    }

    resample(&mono, spec.sample_rate, target_rate)
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: Vec<f32>, channels: u16) -> Result<Vec<f32>, AppError> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return Ok(interleaved);
    }

    // Drop a trailing partial frame
    let frames = interleaved.len() / channels;
    let mut interleaved = interleaved;
    interleaved.truncate(frames * channels);

    let frames = Array2::from_shape_vec((frames, channels), interleaved)
        .map_err(|e| AppError::TtsError(format!("Invalid audio layout: {}", e)))?;

    Ok(frames
        .mean_axis(Axis(1))
        .map(|mono| mono.to_vec())
        .unwrap_or_default())
}

/// Resample mono audio with rubato's FFT resampler.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AppError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = Fft::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1, // mono
        FixedSync::Input,
    )
    .map_err(|e| AppError::TtsError(format!("Failed to create resampler: {}", e)))?;

    let chunk_size = resampler.input_frames_next();
    let output_frames_max = resampler.output_frames_max();
    let mut output_buffer = vec![0.0f32; output_frames_max];

    let expected_len =
        (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(delay + expected_len + output_frames_max);

    // Keep feeding (zeros once the input runs out) until the delayed
    // signal has been flushed through the filter.
    let mut pos = 0;
    while output.len() < delay + expected_len {
        let end = (pos + chunk_size).min(samples.len());
        let mut input_chunk = samples[pos..end].to_vec();
        input_chunk.resize(chunk_size, 0.0);
        pos = end;

        let input_adapter = InterleavedSlice::new(&input_chunk, 1, chunk_size)
            .map_err(|e| AppError::TtsError(format!("Failed to create input adapter: {}", e)))?;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut output_buffer, 1, output_frames_max).map_err(|e| {
                AppError::TtsError(format!("Failed to create output adapter: {}", e))
            })?;

        let (_, frames_written) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, None)
            .map_err(|e| AppError::TtsError(format!("Resampling error: {}", e)))?;
        if frames_written == 0 {
            break;
        }
        output.extend_from_slice(&output_buffer[..frames_written]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected_len);
    Ok(output)
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Convert audio samples to 16-bit mono WAV
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AppError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Vec::new();
    {
        let cursor = Cursor::new(&mut buffer);
        let mut writer = WavWriter::new(cursor, spec)
            .map_err(|e| AppError::TtsError(format!("Failed to create WAV writer: {}", e)))?;

        for sample in samples {
            let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| AppError::TtsError(format!("Failed to write sample: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| AppError::TtsError(format!("Failed to finalize WAV: {}", e)))?;
    }

    Ok(buffer)
}
