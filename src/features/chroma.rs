//! Pitch-class energy profiles and the clarity score.
//!
//! Each descriptor frame gets a 12-bin pitch-class energy distribution by
//! folding STFT bins onto the chromatic scale. A frame sounding one clear
//! pitch concentrates its energy into few bins; broadband noise spreads it
//! across all twelve. Clarity exploits this: sparsity (count of quiet bins
//! on the max-normalized profile) times the frame's intensity. Clear,
//! strongly pitched notes score high; noise and silence score low, which
//! makes clarity the primary cross-track sync feature.

use super::onset::stft_magnitudes;

/// STFT window size for the pitch-class analysis. Larger than the onset
/// window: at 48 kHz a 4096-point FFT resolves ~11.7 Hz, enough to
/// separate semitones down to the bottom of the vocal range.
const N_FFT: usize = 4096;

/// Frequency range folded onto pitch classes (roughly C2..C7).
const FOLD_LOW_HZ: f64 = 65.0;
const FOLD_HIGH_HZ: f64 = 2100.0;

/// Middle C, the pitch-class fold reference.
const C4_HZ: f64 = 261.6256;

/// A profile bin below this value (after max-normalization) counts toward
/// the sparsity score.
const SPARSITY_THRESHOLD: f64 = 0.2;

/// Compute the clarity series: per-frame pitch-class sparsity times the
/// frame's intensity. Output length is the shorter of the profile count
/// and the intensity series.
pub fn clarity_series(
    samples: &[f32],
    sample_rate: u32,
    hop_length: usize,
    intensity: &[f64],
) -> Vec<f64> {
    let profiles = pitch_class_profiles(samples, sample_rate, hop_length);
    profiles
        .iter()
        .zip(intensity.iter())
        .map(|(profile, &intensity)| sparsity(profile) as f64 * intensity)
        .collect()
}

/// Fold STFT magnitudes onto the 12 pitch classes, one profile per frame.
pub(crate) fn pitch_class_profiles(
    samples: &[f32],
    sample_rate: u32,
    hop_length: usize,
) -> Vec<[f64; 12]> {
    let frames = stft_magnitudes(samples, N_FFT, hop_length);
    let bin_hz = sample_rate as f64 / N_FFT as f64;

    // bin index -> pitch class, computed once
    let classes: Vec<Option<usize>> = (0..N_FFT / 2 + 1)
        .map(|k| {
            let freq = k as f64 * bin_hz;
            if freq < FOLD_LOW_HZ || freq > FOLD_HIGH_HZ {
                return None;
            }
            let semitones = (12.0 * (freq / C4_HZ).log2()).round() as i64;
            Some(semitones.rem_euclid(12) as usize)
        })
        .collect();

    frames
        .iter()
        .map(|mags| {
            let mut profile = [0.0f64; 12];
            for (mag, class) in mags.iter().zip(classes.iter()) {
                if let Some(pc) = class {
                    profile[*pc] += mag;
                }
            }
            profile
        })
        .collect()
}

/// Count of pitch-class bins below the low-energy threshold after
/// normalizing the profile to its own maximum. A silent frame counts all
/// twelve, but its zero intensity zeroes the clarity anyway.
fn sparsity(profile: &[f64; 12]) -> usize {
    let max = profile.iter().cloned().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return 12;
    }
    profile
        .iter()
        .filter(|&&v| v / max < SPARSITY_THRESHOLD)
        .count()
}
