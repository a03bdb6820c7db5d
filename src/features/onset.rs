//! Spectral-flux onset strength.
//!
//! A Hann-windowed STFT is taken at the descriptor hop rate and the
//! half-wave-rectified bin-wise magnitude difference between consecutive
//! frames is summed into a non-negative novelty curve. High values mark
//! note attacks and other transients.

use std::f64::consts::PI;

use rustfft::{num_complex::Complex, FftPlanner};

/// STFT window size for the onset spectrogram.
const N_FFT: usize = 2048;

/// Compute the onset-strength curve at the given hop rate.
///
/// One value per descriptor frame; frame 0 has no predecessor and is 0.
pub fn onset_strength(samples: &[f32], hop_length: usize) -> Vec<f64> {
    let frames = stft_magnitudes(samples, N_FFT, hop_length);
    let mut onset = vec![0.0; frames.len()];
    for i in 1..frames.len() {
        let mut flux = 0.0;
        for (cur, prev) in frames[i].iter().zip(frames[i - 1].iter()) {
            let d = cur - prev;
            if d > 0.0 {
                flux += d;
            }
        }
        onset[i] = flux;
    }
    onset
}

/// Hann-windowed STFT magnitude frames, one frame per hop, each centered
/// on its hop position and zero-padded at the signal edges. Shared by the
/// onset and pitch-class analyses (they use different window sizes).
pub(crate) fn stft_magnitudes(samples: &[f32], n_fft: usize, hop_length: usize) -> Vec<Vec<f64>> {
    if samples.is_empty() {
        return Vec::new();
    }
    let num_frames = samples.len().div_ceil(hop_length);
    let num_bins = n_fft / 2 + 1;
    let half = (n_fft / 2) as isize;

    let window: Vec<f64> = (0..n_fft)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n_fft as f64).cos()))
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut frames = Vec::with_capacity(num_frames);
    let mut buf = vec![Complex::new(0.0, 0.0); n_fft];
    for frame in 0..num_frames {
        let center = (frame * hop_length) as isize;
        for (k, slot) in buf.iter_mut().enumerate() {
            let idx = center - half + k as isize;
            let s = if idx >= 0 && (idx as usize) < samples.len() {
                samples[idx as usize] as f64
            } else {
                0.0
            };
            *slot = Complex::new(s * window[k], 0.0);
        }
        fft.process(&mut buf);
        frames.push(buf[..num_bins].iter().map(|c| c.norm()).collect());
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zero() {
        let onset = onset_strength(&vec![0.0; 8192], 512);
        assert_eq!(onset.len(), 16);
        assert!(onset.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_attack_produces_peak() {
        // silence, then a tone starting at sample 8192 (frame 16)
        let mut samples = vec![0.0f32; 16384];
        for (i, s) in samples.iter_mut().enumerate().skip(8192) {
            *s = (2.0 * PI * 440.0 * i as f64 / 48000.0).sin() as f32;
        }
        let onset = onset_strength(&samples, 512);
        let peak = onset
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!(
            (14..=18).contains(&peak),
            "onset peak at frame {peak}, expected near 16"
        );
    }

    #[test]
    fn test_non_negative() {
        let samples: Vec<f32> = (0..16384)
            .map(|i| ((i * 2654435761u64 as usize) as f32).sin())
            .collect();
        assert!(onset_strength(&samples, 512).iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_empty_input() {
        assert!(onset_strength(&[], 512).is_empty());
    }
}
