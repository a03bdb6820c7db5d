//! Strategy selection and run orchestration.
//!
//! One strategy is chosen before any correlation work begins and holds
//! for the whole run. MutualBestFit correlates every unordered pair of
//! clarity series and reconciles the matrix with the global solver;
//! ReferenceTrack correlates one-vs-all against a declared track and
//! reads the offsets straight off; ClapDetect skips correlation entirely
//! and differences each track's detected lead-in cue time.

use serde::Serialize;
use thiserror::Error;

use crate::config::AppConfig;
use crate::correlate::{build_matrix, correlate};
use crate::features::DescriptorSeries;
use crate::loader::Track;
use crate::solver::{median, solve, std_dev};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no tracks to align")]
    NoTracks,
    #[error("track {0:?} has an empty sample buffer")]
    EmptyTrack(String),
    #[error("reference track {0:?} does not match any loaded track")]
    ReferenceNotFound(String),
}

/// How offsets are estimated for this run.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStrategy {
    /// Full pairwise clarity correlation reconciled by the global solver.
    MutualBestFit,
    /// Correlate every track against the named reference only. The name
    /// matches by suffix, so a bare file name finds a take in a subdir.
    ReferenceTrack(String),
    /// Difference the per-track lead-in cue times; no correlation.
    ClapDetect,
}

impl SyncStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MutualBestFit => "mutual-best-fit",
            Self::ReferenceTrack(_) => "reference-track",
            Self::ClapDetect => "clap-detect",
        }
    }
}

/// Transients from different tracks that landed within the grouping
/// window of each other after cue-zeroing, plus their average time. A
/// later time-warping stage can use these to correct residual drift.
#[derive(Debug, Clone, Serialize)]
pub struct BeatGroup {
    /// (track index, cue-zeroed transient time) per member.
    pub members: Vec<(usize, f64)>,
    /// Mean of the member times.
    pub average: f64,
}

/// Per-run diagnostics. Ambiguity never aborts a run; it is surfaced
/// here for the caller to inspect.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// Solver sweeps performed (0 when no solve was needed).
    pub iterations: usize,
    /// False when the solver hit its iteration cap.
    pub converged: bool,
    /// Per-track fit deviation from the solver, seconds.
    pub deviations: Vec<f64>,
    /// Per-track correlation confidence in [0, 1].
    pub confidences: Vec<f64>,
    /// Tracks whose fit deviation exceeded the configured threshold or
    /// whose correlations were ambiguous.
    pub suspect: Vec<usize>,
    /// Unordered pairs with flat or tied correlation peaks.
    pub ambiguous_pairs: Vec<(usize, usize)>,
    /// Near-matching transient clusters (ClapDetect only).
    pub beat_groups: Vec<BeatGroup>,
}

/// One alignment run's output: zero-centered seconds per track (positive
/// means the track's content starts later and must be advanced), plus
/// diagnostics. ReferenceTrack output is relative to the reference, not
/// centered.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub offsets: Vec<f64>,
    pub diagnostics: Diagnostics,
}

/// Run the chosen strategy over already-extracted descriptor series.
pub fn align(
    tracks: &[Track],
    series: &[DescriptorSeries],
    strategy: &SyncStrategy,
    cfg: &AppConfig,
    workers: usize,
) -> Result<Alignment, SyncError> {
    if tracks.is_empty() {
        return Err(SyncError::NoTracks);
    }
    if let Some(track) = tracks.iter().find(|t| t.samples.is_empty()) {
        return Err(SyncError::EmptyTrack(track.name.clone()));
    }
    debug_assert_eq!(tracks.len(), series.len());

    let alignment = match strategy {
        SyncStrategy::MutualBestFit => mutual_best_fit(series, cfg, workers),
        SyncStrategy::ReferenceTrack(name) => {
            let reference = tracks
                .iter()
                .position(|t| t.name.ends_with(name.as_str()))
                .ok_or_else(|| SyncError::ReferenceNotFound(name.clone()))?;
            log::info!("reference track: {} (index {})", tracks[reference].name, reference);
            one_vs_all(series, reference, cfg)
        }
        SyncStrategy::ClapDetect => clap_detect(series, cfg),
    };

    for &i in &alignment.diagnostics.suspect {
        log::warn!(
            "track {} ({}) has a low-confidence offset, treat with suspicion",
            i,
            tracks[i].name
        );
    }
    Ok(alignment)
}

fn mutual_best_fit(series: &[DescriptorSeries], cfg: &AppConfig, workers: usize) -> Alignment {
    let metrics: Vec<&[f64]> = series.iter().map(|s| s.clarity.as_slice()).collect();
    let matrix = build_matrix(&metrics, cfg.hop_secs(), workers);
    let solution = solve(&matrix.offsets, &cfg.solver);

    let confidences: Vec<f64> = (0..series.len())
        .map(|i| matrix.track_confidence(i))
        .collect();
    let suspect = flag_suspects(&solution.deviations, &matrix.ambiguous_pairs, cfg);

    Alignment {
        offsets: solution.offsets,
        diagnostics: Diagnostics {
            iterations: solution.iterations,
            converged: solution.converged,
            deviations: solution.deviations,
            confidences,
            suspect,
            ambiguous_pairs: matrix.ambiguous_pairs,
            beat_groups: Vec::new(),
        },
    }
}

fn one_vs_all(series: &[DescriptorSeries], reference: usize, cfg: &AppConfig) -> Alignment {
    let hop = cfg.hop_secs();
    let ref_clarity = series[reference].clarity.as_slice();

    let mut offsets = Vec::with_capacity(series.len());
    let mut confidences = Vec::with_capacity(series.len());
    let mut ambiguous_pairs = Vec::new();
    for (i, s) in series.iter().enumerate() {
        let corr = correlate(ref_clarity, &s.clarity, hop);
        offsets.push(corr.offset_secs);
        confidences.push(corr.confidence);
        if corr.ambiguous && i != reference {
            ambiguous_pairs.push((reference.min(i), reference.max(i)));
        }
    }

    let suspect = flag_suspects(&vec![0.0; series.len()], &ambiguous_pairs, cfg);
    Alignment {
        offsets,
        diagnostics: Diagnostics {
            iterations: 0,
            converged: true,
            deviations: vec![0.0; series.len()],
            confidences,
            suspect,
            ambiguous_pairs,
            beat_groups: Vec::new(),
        },
    }
}

fn clap_detect(series: &[DescriptorSeries], cfg: &AppConfig) -> Alignment {
    let n = series.len();
    let cues: Vec<Option<f64>> = series.iter().map(|s| detect_cue(s, cfg)).collect();

    let mut cue_times = Vec::with_capacity(n);
    let mut confidences = Vec::with_capacity(n);
    let mut suspect = Vec::new();
    for (i, cue) in cues.iter().enumerate() {
        match cue {
            Some(time) => {
                log::debug!("track {i}: lead-in cue at {time:.3}s");
                cue_times.push(*time);
                confidences.push(1.0);
            }
            None => {
                log::warn!("track {i}: no lead-in cue detected, assuming start of file");
                cue_times.push(0.0);
                confidences.push(0.0);
                suspect.push(i);
            }
        }
    }

    // each track's cue is its time zero; center like the solver does
    let center = median(&cue_times);
    let offsets: Vec<f64> = cue_times.iter().map(|t| t - center).collect();

    // secondary pass: cluster transients that nearly coincide after
    // cue-zeroing, for the downstream drift-correction stage. A track
    // without a cue zeroes on its first transient instead.
    let transients: Vec<Vec<f64>> = series
        .iter()
        .zip(cues.iter())
        .map(|(s, cue)| {
            let raw = detect_transients(&s.onset, s.hop_secs);
            let zero = cue.unwrap_or_else(|| raw.first().copied().unwrap_or(0.0));
            raw.iter().map(|t| t - zero).collect()
        })
        .collect();
    let beat_groups = group_transients(&transients, cfg.clap.group_window_secs);
    log::info!("{} near-matching transient groups", beat_groups.len());

    Alignment {
        offsets,
        diagnostics: Diagnostics {
            iterations: 0,
            converged: true,
            deviations: vec![0.0; n],
            confidences,
            suspect,
            ambiguous_pairs: Vec::new(),
            beat_groups,
        },
    }
}

/// Find the first sustained burst of clarity energy: frames are gated at
/// a fraction of the clarity standard deviation and accumulated until the
/// running sum clears a multiple of the track's peak frame clarity.
/// Returns the trigger time, or None for a track that never gets there.
fn detect_cue(series: &DescriptorSeries, cfg: &AppConfig) -> Option<f64> {
    let clarity = &series.clarity;
    let gate = cfg.clap.gate_sigma * std_dev(clarity);
    let peak = clarity.iter().cloned().fold(0.0f64, f64::max);
    if peak <= 0.0 {
        return None;
    }
    let threshold = cfg.clap.energy_factor * peak;
    let mut accum = 0.0;
    for (j, &c) in clarity.iter().enumerate() {
        if c > gate {
            accum += c;
        }
        if accum > threshold {
            return Some(series.time(j));
        }
    }
    None
}

/// Pick transient times off an onset-strength curve: a run of frames
/// above five standard deviations is one transient, reported at its
/// maximum.
pub(crate) fn detect_transients(onset: &[f64], hop_secs: f64) -> Vec<f64> {
    let threshold = 5.0 * std_dev(onset);
    if threshold <= 0.0 {
        return Vec::new();
    }
    let mut times = Vec::new();
    let mut in_beat = false;
    let mut beat_max = 0.0;
    let mut beat_time = 0.0;
    for (i, &v) in onset.iter().enumerate() {
        if v > threshold {
            if !in_beat {
                in_beat = true;
                beat_max = 0.0;
            }
            if v > beat_max {
                beat_max = v;
                beat_time = i as f64 * hop_secs;
            }
        } else if in_beat {
            times.push(beat_time);
            in_beat = false;
        }
    }
    if in_beat {
        times.push(beat_time);
    }
    times
}

/// Greedily cluster transient times across tracks: each unconsumed time
/// seeds a group, later tracks contribute every time within the window,
/// and only groups with more than one member survive.
pub(crate) fn group_transients(transients: &[Vec<f64>], window_secs: f64) -> Vec<BeatGroup> {
    let mut consumed: Vec<Vec<bool>> = transients.iter().map(|t| vec![false; t.len()]).collect();
    let mut groups = Vec::new();
    for i in 0..transients.len().saturating_sub(1) {
        for (a, &t1) in transients[i].iter().enumerate() {
            if consumed[i][a] {
                continue;
            }
            let mut members = vec![(i, t1)];
            for j in (i + 1)..transients.len() {
                for (b, &t2) in transients[j].iter().enumerate() {
                    if !consumed[j][b] && (t1 - t2).abs() < window_secs {
                        members.push((j, t2));
                        consumed[j][b] = true;
                    }
                }
            }
            if members.len() > 1 {
                let average = members.iter().map(|(_, t)| t).sum::<f64>() / members.len() as f64;
                groups.push(BeatGroup { members, average });
            }
        }
    }
    groups
}

fn flag_suspects(
    deviations: &[f64],
    ambiguous_pairs: &[(usize, usize)],
    cfg: &AppConfig,
) -> Vec<usize> {
    let mut suspect: Vec<usize> = deviations
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d > cfg.solver.deviation_threshold)
        .map(|(i, _)| i)
        .collect();
    for &(i, j) in ambiguous_pairs {
        if !suspect.contains(&i) {
            suspect.push(i);
        }
        if !suspect.contains(&j) {
            suspect.push(j);
        }
    }
    suspect.sort_unstable();
    suspect
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    use crate::features::extract;

    const RATE: u32 = 48000;

    /// Repeated sine bursts at aperiodic times, shifted by `delay`
    /// seconds. All tracks carry the same performance; a positive delay
    /// means the content starts later in the file. Phase is computed in
    /// f64 because f32 loses it entirely a few seconds in.
    fn burst_track(name: &str, delay: f64, secs: f64) -> Track {
        let n = (RATE as f64 * secs) as usize;
        let mut samples = vec![0.0f32; n];
        for start in [0.5, 1.3, 2.0, 3.1, 4.2] {
            let t0 = ((start + delay) * RATE as f64) as usize;
            for k in 0..(RATE as usize / 10) {
                let i = t0 + k;
                if i < n {
                    samples[i] =
                        0.8 * (2.0 * PI * 440.0 * i as f64 / RATE as f64).sin() as f32;
                }
            }
        }
        Track {
            name: name.into(),
            sample_rate: RATE,
            samples,
        }
    }

    fn extract_all(tracks: &[Track]) -> Vec<DescriptorSeries> {
        let cfg = AppConfig::default();
        tracks.iter().map(|t| extract(t, &cfg)).collect()
    }

    #[test]
    fn test_mutual_best_fit_recovers_shifts() {
        let tracks = vec![
            burst_track("one.wav", 0.3, 6.0),
            burst_track("two.wav", 0.7, 6.0),
            burst_track("three.wav", 0.05, 6.0),
        ];
        let series = extract_all(&tracks);
        let cfg = AppConfig::default();
        let alignment =
            align(&tracks, &series, &SyncStrategy::MutualBestFit, &cfg, 1).unwrap();

        assert!(alignment.diagnostics.converged);
        // delays 0.3/0.7/0.05 relative to the median (0.3): 0, 0.4, -0.25
        assert!((alignment.offsets[0] - 0.0).abs() < 0.02, "{:?}", alignment.offsets);
        assert!((alignment.offsets[1] - 0.4).abs() < 0.02, "{:?}", alignment.offsets);
        assert!((alignment.offsets[2] + 0.25).abs() < 0.02, "{:?}", alignment.offsets);
    }

    #[test]
    fn test_reference_track_mode() {
        let tracks = vec![
            burst_track("lead/one.wav", 0.3, 6.0),
            burst_track("two.wav", 0.7, 6.0),
            burst_track("three.wav", 0.05, 6.0),
        ];
        let series = extract_all(&tracks);
        let cfg = AppConfig::default();
        let strategy = SyncStrategy::ReferenceTrack("one.wav".into());
        let alignment = align(&tracks, &series, &strategy, &cfg, 1).unwrap();

        // the reference is exactly zero, the others are relative to it
        assert_eq!(alignment.offsets[0], 0.0);
        assert!((alignment.offsets[1] - 0.4).abs() < 0.02, "{:?}", alignment.offsets);
        assert!((alignment.offsets[2] + 0.25).abs() < 0.02, "{:?}", alignment.offsets);
    }

    #[test]
    fn test_reference_not_found() {
        let tracks = vec![burst_track("one.wav", 0.0, 2.0)];
        let series = extract_all(&tracks);
        let cfg = AppConfig::default();
        let strategy = SyncStrategy::ReferenceTrack("missing.wav".into());
        let err = align(&tracks, &series, &strategy, &cfg, 1).unwrap_err();
        assert!(matches!(err, SyncError::ReferenceNotFound(name) if name == "missing.wav"));
    }

    #[test]
    fn test_all_zero_track_survives() {
        let silent = Track {
            name: "silent.wav".into(),
            sample_rate: RATE,
            samples: vec![0.0; 6 * RATE as usize],
        };
        let tracks = vec![
            burst_track("one.wav", 0.1, 6.0),
            burst_track("two.wav", 0.4, 6.0),
            silent,
        ];
        let series = extract_all(&tracks);
        let cfg = AppConfig::default();
        let alignment =
            align(&tracks, &series, &SyncStrategy::MutualBestFit, &cfg, 1).unwrap();

        assert!(alignment.offsets.iter().all(|o| o.is_finite()));
        // the silent track's pairs are degenerate and get flagged
        assert!(alignment.diagnostics.suspect.contains(&2));
        assert!(!alignment.diagnostics.ambiguous_pairs.is_empty());
        assert!((alignment.diagnostics.confidences[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_track_list() {
        let cfg = AppConfig::default();
        let err = align(&[], &[], &SyncStrategy::MutualBestFit, &cfg, 1).unwrap_err();
        assert!(matches!(err, SyncError::NoTracks));
    }

    #[test]
    fn test_empty_buffer_is_fatal() {
        let tracks = vec![Track {
            name: "broken.wav".into(),
            sample_rate: RATE,
            samples: Vec::new(),
        }];
        let series = extract_all(&tracks);
        let cfg = AppConfig::default();
        let err = align(&tracks, &series, &SyncStrategy::MutualBestFit, &cfg, 1).unwrap_err();
        assert!(matches!(err, SyncError::EmptyTrack(name) if name == "broken.wav"));
    }

    #[test]
    fn test_deviation_over_threshold_is_suspect() {
        let cfg = AppConfig::default();
        assert_eq!(flag_suspects(&[0.01, 0.5, 0.02], &[], &cfg), vec![1]);

        // through the solver: corrupt every estimate involving the last
        // track so its fit deviation clears the threshold
        let delays = [0.0, 0.3, -0.2, 0.65, -0.5, 0.1];
        let n = delays.len();
        let mut matrix: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| delays[j] - delays[i]).collect())
            .collect();
        let junk = [3.1, -2.4, 5.9, -4.2, 2.7];
        for (j, &e) in junk.iter().enumerate() {
            matrix[5][j] += e;
            matrix[j][5] -= e;
        }
        let solution = solve(&matrix, &cfg.solver);
        assert!(solution.deviations[5] > cfg.solver.deviation_threshold);
        assert!(flag_suspects(&solution.deviations, &[], &cfg).contains(&5));
    }

    #[test]
    fn test_clap_detect_differences_cues() {
        let tracks = vec![
            burst_track("one.wav", 0.2, 6.0),
            burst_track("two.wav", 0.5, 6.0),
            burst_track("three.wav", 0.35, 6.0),
        ];
        let series = extract_all(&tracks);
        let cfg = AppConfig::default();
        let alignment = align(&tracks, &series, &SyncStrategy::ClapDetect, &cfg, 1).unwrap();

        // centered cue differences: delays relative to the median delay
        assert!((alignment.offsets[0] + 0.15).abs() < 0.03, "{:?}", alignment.offsets);
        assert!((alignment.offsets[1] - 0.15).abs() < 0.03, "{:?}", alignment.offsets);
        assert!(alignment.offsets[2].abs() < 0.03, "{:?}", alignment.offsets);
        assert_eq!(alignment.diagnostics.iterations, 0);
    }

    #[test]
    fn test_clap_grouping_zeroes_on_cue() {
        let hop = 0.01;
        let make = |cue_frame: usize, spike_frames: &[usize]| {
            let mut clarity = vec![0.0; 400];
            for c in clarity[cue_frame..cue_frame + 10].iter_mut() {
                *c = 1.0;
            }
            let mut onset = vec![0.0; 400];
            for &f in spike_frames {
                onset[f] = 10.0;
            }
            DescriptorSeries {
                onset,
                intensity: vec![0.0; 400],
                clarity,
                hop_secs: hop,
            }
        };
        // the second track has a stray transient well before its cue
        let series = vec![
            make(100, &[100, 150, 300]),
            make(150, &[20, 150, 200, 350]),
        ];
        let cfg = AppConfig::default();
        let alignment = clap_detect(&series, &cfg);

        // cue times 1.0 and 1.5, centered
        assert!((alignment.offsets[0] + 0.25).abs() < 1e-9);
        assert!((alignment.offsets[1] - 0.25).abs() < 1e-9);

        // transients are zeroed on each track's cue time, so the shared
        // beats at cue+0.5 and cue+2.0 cluster despite the stray
        for want in [0.0, 0.5, 2.0] {
            let group = alignment
                .diagnostics
                .beat_groups
                .iter()
                .find(|g| (g.average - want).abs() < 0.05)
                .unwrap_or_else(|| panic!("no group near {want}"));
            assert_eq!(group.members.len(), 2);
        }
    }

    #[test]
    fn test_grouping_clusters_near_matches() {
        let transients = vec![
            vec![0.0, 1.00, 2.50, 4.00],
            vec![0.0, 1.05, 2.44, 7.00],
            vec![0.0, 1.10, 3.30],
        ];
        let groups = group_transients(&transients, 0.15);

        // t=0 cues cluster across all three tracks
        let zero = groups.iter().find(|g| g.average.abs() < 1e-9).unwrap();
        assert_eq!(zero.members.len(), 3);

        // the ~1.0s beats cluster; 1.10 is within 0.15 of 1.00
        let one = groups
            .iter()
            .find(|g| (g.average - 1.05).abs() < 0.05)
            .unwrap();
        assert_eq!(one.members.len(), 3);

        // 4.00 vs 7.00 vs 3.30 match nothing
        assert!(groups.iter().all(|g| g.members.iter().all(|(_, t)| *t < 3.0)));
    }

    #[test]
    fn test_detect_transients() {
        let mut onset = vec![0.0; 200];
        onset[40] = 10.0;
        onset[41] = 14.0;
        onset[120] = 12.0;
        let hop = 0.01;
        let times = detect_transients(&onset, hop);
        assert_eq!(times.len(), 2);
        assert!((times[0] - 0.41).abs() < 1e-9);
        assert!((times[1] - 1.20).abs() < 1e-9);
    }
}
