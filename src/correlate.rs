//! Pairwise cross-correlation of descriptor series.
//!
//! The full linear cross-correlation of two series is computed in the
//! frequency domain, the peak index is converted to a signed time offset,
//! and a peak-sharpness confidence is derived so callers can see when the
//! lock was ambiguous. `correlate(a, b)` returns how far b's content lags
//! a's content: positive means b starts later.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

/// Result of correlating one ordered pair of series.
#[derive(Debug, Clone, Copy)]
pub struct Correlation {
    /// Seconds by which the second series' content lags the first's.
    pub offset_secs: f64,
    /// Peak sharpness in [0, 1]: 1 − (next-highest local maximum / peak).
    /// 0 for flat or degenerate correlations.
    pub confidence: f64,
    /// True when the peak was tied or the correlation was degenerate; the
    /// offset is still reported (first peak index wins) but should be
    /// treated with suspicion.
    pub ambiguous: bool,
}

impl Correlation {
    fn degenerate() -> Self {
        Self {
            offset_secs: 0.0,
            confidence: 0.0,
            ambiguous: true,
        }
    }
}

/// Skew-symmetric matrix of pairwise offset estimates plus per-pair
/// confidence. Built once per run; the solver reads it unchanged.
#[derive(Debug, Clone)]
pub struct OffsetMatrix {
    /// `offsets[i][j]` = seconds by which track j's content lags track
    /// i's. Skew-symmetric, zero diagonal.
    pub offsets: Vec<Vec<f64>>,
    /// Peak-sharpness confidence per pair, 1.0 on the diagonal.
    pub confidences: Vec<Vec<f64>>,
    /// Unordered pairs whose correlation peak was flat or tied.
    pub ambiguous_pairs: Vec<(usize, usize)>,
}

impl OffsetMatrix {
    /// Mean pair confidence for one track (diagonal excluded).
    pub fn track_confidence(&self, i: usize) -> f64 {
        let n = self.confidences.len();
        if n < 2 {
            return 1.0;
        }
        let sum: f64 = (0..n)
            .filter(|&j| j != i)
            .map(|j| self.confidences[i][j])
            .sum();
        sum / (n - 1) as f64
    }
}

/// Correlate two descriptor series sampled at the same hop interval.
pub fn correlate(a: &[f64], b: &[f64], hop_secs: f64) -> Correlation {
    if a.is_empty() || b.is_empty() {
        return Correlation::degenerate();
    }
    let corr = cross_correlation(a, b);

    // argmax, first index wins ties
    let mut m = 0usize;
    let mut peak = f64::NEG_INFINITY;
    for (i, &v) in corr.iter().enumerate() {
        if v > peak {
            peak = v;
            m = i;
        }
    }
    if !(peak > 1e-12) {
        // all-zero input or flat correlation: offset is defined as 0
        return Correlation::degenerate();
    }
    let ties = corr.iter().filter(|&&v| v == peak).count();

    // Index-to-time conversion. Index a.len() - 1 is the zero-lag point;
    // larger indices mean b's content sits later than a's. Each branch
    // reads off the series' own time axis, so differing lengths still
    // yield real seconds.
    let la = a.len();
    let offset_secs = if m > la {
        (m - la) as f64 * hop_secs
    } else if m < la {
        -((la - 1 - m) as f64) * hop_secs
    } else {
        0.0
    };

    let confidence = if ties > 1 {
        0.0
    } else {
        peak_sharpness(&corr, m, peak)
    };

    Correlation {
        offset_secs,
        confidence,
        ambiguous: ties > 1,
    }
}

/// Build the full pairwise offset matrix over every unordered pair,
/// correlating in a sized worker pool. Each pair is computed once and
/// mirrored with negation, so skew-symmetry holds exactly.
pub fn build_matrix(series: &[&[f64]], hop_secs: f64, workers: usize) -> OffsetMatrix {
    let n = series.len();
    let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }

    let pb = ProgressBar::new(pairs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} pairs ({eta} remaining)")
            .unwrap()
            .progress_chars("=>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .unwrap();

    let results: Vec<Correlation> = pool.install(|| {
        pairs
            .par_iter()
            .map(|&(i, j)| {
                let corr = correlate(series[i], series[j], hop_secs);
                pb.inc(1);
                corr
            })
            .collect()
    });
    pb.finish_and_clear();

    let mut offsets = vec![vec![0.0; n]; n];
    let mut confidences = vec![vec![1.0; n]; n];
    let mut ambiguous_pairs = Vec::new();
    for (&(i, j), corr) in pairs.iter().zip(results.iter()) {
        offsets[i][j] = corr.offset_secs;
        offsets[j][i] = -corr.offset_secs;
        confidences[i][j] = corr.confidence;
        confidences[j][i] = corr.confidence;
        if corr.ambiguous {
            ambiguous_pairs.push((i, j));
            log::debug!("ambiguous correlation peak for pair ({i}, {j})");
        }
    }

    OffsetMatrix {
        offsets,
        confidences,
        ambiguous_pairs,
    }
}

/// Full linear cross-correlation of length `a.len() + b.len() - 1`,
/// computed via the convolution theorem. Output index `a.len() - 1`
/// corresponds to zero lag; indices above it mean b's content is later.
fn cross_correlation(a: &[f64], b: &[f64]) -> Vec<f64> {
    let la = a.len();
    let lb = b.len();
    let full_len = la + lb - 1;
    let fft_len = full_len.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let mut fa: Vec<Complex<f64>> = a.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fa.resize(fft_len, Complex::new(0.0, 0.0));
    let mut fb: Vec<Complex<f64>> = b.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fb.resize(fft_len, Complex::new(0.0, 0.0));

    fft.process(&mut fa);
    fft.process(&mut fb);

    // r[lag] = sum_j b[j] * a[j - lag]
    let mut product: Vec<Complex<f64>> = fb
        .iter()
        .zip(fa.iter())
        .map(|(x, y)| x * y.conj())
        .collect();
    ifft.process(&mut product);

    let scale = 1.0 / fft_len as f64;
    (0..full_len)
        .map(|k| {
            let lag = (k + fft_len + 1 - la) % fft_len;
            product[lag].re * scale
        })
        .collect()
}

/// 1 − (next-highest local maximum / peak), clamped to [0, 1]. A lone
/// peak with no competing local maximum scores 1.
fn peak_sharpness(corr: &[f64], peak_index: usize, peak: f64) -> f64 {
    let mut second = f64::NEG_INFINITY;
    for i in 1..corr.len().saturating_sub(1) {
        if i == peak_index {
            continue;
        }
        if corr[i] >= corr[i - 1] && corr[i] >= corr[i + 1] && corr[i] > second {
            second = corr[i];
        }
    }
    if second == f64::NEG_INFINITY {
        return 1.0;
    }
    (1.0 - second / peak).clamp(0.0, 1.0)
}
