//! Global offset reconciliation.
//!
//! Pairwise offset estimates are individually noisy: a wrong correlation
//! lock or content mismatch on one pair should not corrupt every track's
//! placement. The solver sweeps the matrix, re-estimating each track's
//! offset as the median of what every other track's current offset
//! implies for it, until the vector stops moving. Medians discard a
//! minority of bad estimates without having to identify them.

use crate::config::SolverConfig;

/// Solved offsets plus fit diagnostics.
#[derive(Debug, Clone)]
pub struct Solution {
    /// One offset per track, seconds, centered so the median is zero.
    pub offsets: Vec<f64>,
    /// Standard deviation of each track's difference vector at the last
    /// sweep. Large values mean that track's pairwise estimates disagreed
    /// and its offset deserves suspicion.
    pub deviations: Vec<f64>,
    /// Sweeps performed.
    pub iterations: usize,
    /// False when the iteration cap was hit before the epsilon test
    /// passed; the last vector is still returned.
    pub converged: bool,
}

/// Reconcile a skew-symmetric pairwise offset matrix into one offset per
/// track. The matrix is read, never mutated.
pub fn solve(matrix: &[Vec<f64>], cfg: &SolverConfig) -> Solution {
    let n = matrix.len();
    if n == 0 {
        return Solution {
            offsets: Vec::new(),
            deviations: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    // track 0's row seeds the working vector; the final centering step
    // removes any dependence on that arbitrary choice
    let mut offsets = matrix[0].clone();
    let mut deviations = vec![0.0; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < cfg.max_iterations {
        iterations += 1;
        let prev = offsets.clone();
        for i in 0..n {
            let diff: Vec<f64> = (0..n).map(|k| prev[k] - matrix[i][k]).collect();
            offsets[i] = median(&diff);
            deviations[i] = std_dev(&diff);
        }
        if offsets
            .iter()
            .zip(prev.iter())
            .all(|(now, before)| (now - before).abs() <= cfg.epsilon)
        {
            converged = true;
            break;
        }
    }
    if !converged {
        log::warn!("offset solver hit the iteration cap ({})", cfg.max_iterations);
    }

    let center = median(&offsets);
    for offset in &mut offsets {
        *offset -= center;
    }

    Solution {
        offsets,
        deviations,
        iterations,
        converged,
    }
}

/// Median; even-length input averages the middle two. Empty input is 0.
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Population standard deviation. Empty input is 0.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values
        .iter()
        .map(|v| (v - mean) * (v - mean))
        .sum::<f64>()
        / values.len() as f64;
    var.sqrt()
}
