use std::path::Path;
use std::process::Command;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("WAV decode error: {0}")]
    Wav(String),
    #[error("Unsupported sample format: {0} bits per sample")]
    UnsupportedFormat(u16),
    #[error("ffmpeg not found — required for non-WAV takes")]
    FfmpegNotFound,
    #[error("ffmpeg decode error: {0}")]
    Ffmpeg(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One loaded take: mono samples at a known rate. Immutable input to the
/// alignment core; the loader owns the only decode step in the pipeline.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl Track {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Load a take as mono f32, using hound for WAV and an ffmpeg subprocess
/// (decoding to a temporary WAV at `target_rate`) for everything else.
pub fn load_track(name: &str, path: &Path, target_rate: u32) -> Result<Track, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let (samples, sample_rate) = if ext == "wav" {
        let (samples, rate) = read_wav_mono(path)?;
        if rate != target_rate {
            // descriptor frames are only comparable across tracks when
            // every take shares the analysis rate
            log::debug!("resampling {name} from {rate} Hz to {target_rate} Hz");
            (resample_linear(&samples, rate, target_rate), target_rate)
        } else {
            (samples, rate)
        }
    } else {
        load_via_ffmpeg(path, target_rate)?
    };

    log::debug!(
        "loaded {}: {} samples at {} Hz ({:.1}s)",
        name,
        samples.len(),
        sample_rate,
        samples.len() as f64 / sample_rate as f64
    );

    Ok(Track {
        name: name.to_string(),
        sample_rate,
        samples,
    })
}

/// Read a WAV file and downmix to mono by averaging channels.
fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32), LoadError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| LoadError::Wav(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|e| LoadError::Wav(e.to_string()))?,
        (hound::SampleFormat::Int, bits @ (16 | 24 | 32)) => {
            let scale = 1.0 / (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| LoadError::Wav(e.to_string()))?
        }
        (_, bits) => return Err(LoadError::UnsupportedFormat(bits)),
    };

    if channels <= 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mono: Vec<f32> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Linear-interpolation resampling. Crude next to a windowed-sinc
/// resampler, but the descriptor hop is ~10 ms and alignment only needs
/// envelope shape, not audio fidelity.
fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if samples.len() < 2 || from == to {
        return samples.to_vec();
    }
    let n_out = (samples.len() as f64 * to as f64 / from as f64).round() as usize;
    let step = from as f64 / to as f64;
    (0..n_out)
        .map(|i| {
            let pos = i as f64 * step;
            let i0 = (pos as usize).min(samples.len() - 1);
            let i1 = (i0 + 1).min(samples.len() - 1);
            let frac = (pos - i0 as f64) as f32;
            samples[i0] * (1.0 - frac) + samples[i1] * frac
        })
        .collect()
}

/// Decode any non-WAV container by shelling out to ffmpeg, writing a mono
/// WAV at the canonical analysis rate into a temp file.
fn load_via_ffmpeg(path: &Path, target_rate: u32) -> Result<(Vec<f32>, u32), LoadError> {
    let ffmpeg_check = Command::new("ffmpeg").arg("-version").output();
    if ffmpeg_check.is_err() {
        return Err(LoadError::FfmpegNotFound);
    }

    let tmp_dir = std::env::temp_dir();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("take");
    let tmp_wav = tmp_dir.join(format!("choirsync_{}_{}.wav", std::process::id(), stem));

    let output = Command::new("ffmpeg")
        .args([
            "-y",
            "-i",
            &path.to_string_lossy(),
            "-vn",
            "-ac",
            "1",
            "-ar",
            &target_rate.to_string(),
            "-f",
            "wav",
            "-acodec",
            "pcm_s16le",
            &tmp_wav.to_string_lossy(),
        ])
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        std::fs::remove_file(&tmp_wav).ok();
        return Err(LoadError::Ffmpeg(stderr.to_string()));
    }

    let result = read_wav_mono(&tmp_wav);
    std::fs::remove_file(&tmp_wav).ok();
    result
}
