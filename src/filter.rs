//! Band-pass conditioning applied before feature extraction.
//!
//! Keeps the vocal fundamental range (roughly C3–C5 by default) and drops
//! rumble and hiss that would otherwise dominate the intensity envelope.

use std::f32::consts::PI;

/// First-order low-pass followed by first-order high-pass, run forward
/// over the buffer. Phase shift is identical for every track, so relative
/// offsets are unaffected.
pub fn band_pass(samples: &[f32], sample_rate: u32, low_hz: f32, high_hz: f32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / sample_rate as f32;

    // low-pass at the high corner
    let rc_lp = 1.0 / (2.0 * PI * high_hz);
    let alpha_lp = dt / (rc_lp + dt);
    let mut lp = Vec::with_capacity(samples.len());
    let mut y = samples[0];
    for &x in samples {
        y += alpha_lp * (x - y);
        lp.push(y);
    }

    // high-pass at the low corner
    let rc_hp = 1.0 / (2.0 * PI * low_hz);
    let alpha_hp = rc_hp / (rc_hp + dt);
    let mut out = Vec::with_capacity(samples.len());
    let mut prev_x = lp[0];
    let mut prev_y = 0.0_f32;
    out.push(0.0);
    for &x in &lp[1..] {
        let y = alpha_hp * (prev_y + x - prev_x);
        out.push(y);
        prev_x = x;
        prev_y = y;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, secs: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_passband_survives() {
        let x = sine(261.0, 8000, 1.0); // C4, middle of the band
        let y = band_pass(&x, 8000, 130.0, 523.0);
        // settle time: skip the first 10%
        let tail = &y[800..];
        assert!(rms(tail) > 0.3, "passband tone attenuated too much");
    }

    #[test]
    fn test_stopband_attenuated() {
        let lo = sine(10.0, 8000, 1.0);
        let hi = sine(3500.0, 8000, 1.0);
        let in_band = sine(261.0, 8000, 1.0);
        let r_in = rms(&band_pass(&in_band, 8000, 130.0, 523.0)[800..]);
        let r_lo = rms(&band_pass(&lo, 8000, 130.0, 523.0)[800..]);
        let r_hi = rms(&band_pass(&hi, 8000, 130.0, 523.0)[800..]);
        assert!(r_lo < r_in * 0.5);
        assert!(r_hi < r_in * 0.5);
    }

    #[test]
    fn test_empty_input() {
        assert!(band_pass(&[], 8000, 130.0, 523.0).is_empty());
    }
}
