//! Per-track descriptor extraction.
//!
//! Turns one loaded take into three time-aligned series sampled at the
//! descriptor hop rate: onset strength, intensity envelope, and the
//! clarity score. Extraction is pure per track and runs in a parallel
//! worker pool; results can be cached on disk keyed by source mtime.

pub mod chroma;
pub mod onset;

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::filter::band_pass;
use crate::loader::Track;
use crate::solver::std_dev;

/// Three parallel descriptor series for one track, truncated to a common
/// length and sharing the time axis `time(i) = i * hop_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorSeries {
    /// Spectral-flux onset strength per frame, non-negative.
    pub onset: Vec<f64>,
    /// Peak absolute sample value within each hop window.
    pub intensity: Vec<f64>,
    /// Pitch-class sparsity times intensity; the primary sync feature.
    pub clarity: Vec<f64>,
    /// Descriptor frame interval in seconds.
    pub hop_secs: f64,
}

impl DescriptorSeries {
    /// Common frame count.
    pub fn len(&self) -> usize {
        self.clarity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clarity.is_empty()
    }

    /// Time of frame `i` on this series' own axis.
    pub fn time(&self, i: usize) -> f64 {
        i as f64 * self.hop_secs
    }

    /// RMS over the intensity envelope restricted to frames whose clarity
    /// clears a small fraction of its standard deviation. Published as a
    /// gain-balancing hint for the downstream mixer; silence and noise
    /// floors are excluded so quiet singers aren't under-weighted.
    pub fn rms_hint(&self) -> f64 {
        let threshold = 0.1 * std_dev(&self.clarity);
        let mut sum = 0.0;
        let mut count = 0usize;
        for (clarity, intensity) in self.clarity.iter().zip(self.intensity.iter()) {
            if *clarity >= threshold {
                sum += intensity * intensity;
                count += 1;
            }
        }
        if count > 0 {
            (sum / count as f64).sqrt()
        } else {
            0.0
        }
    }
}

/// Extract the descriptor series for one track. Pure function of the
/// input; a degenerate (empty or silent) buffer yields all-zero series,
/// not an error.
pub fn extract(track: &Track, cfg: &AppConfig) -> DescriptorSeries {
    let hop = cfg.hop_length;
    let filtered = band_pass(
        &track.samples,
        track.sample_rate,
        cfg.band_low_hz,
        cfg.band_high_hz,
    );

    let onset = onset::onset_strength(&filtered, hop);
    let intensity: Vec<f64> = filtered
        .chunks(hop)
        .map(|w| w.iter().fold(0.0f64, |m, &s| m.max(s.abs() as f64)))
        .collect();
    let clarity = chroma::clarity_series(&filtered, track.sample_rate, hop, &intensity);

    // truncate to the common minimum before any cross-track comparison
    let n = onset.len().min(intensity.len()).min(clarity.len());
    let mut onset = onset;
    let mut intensity = intensity;
    let mut clarity = clarity;
    onset.truncate(n);
    intensity.truncate(n);
    clarity.truncate(n);

    DescriptorSeries {
        onset,
        intensity,
        clarity,
        hop_secs: hop as f64 / track.sample_rate as f64,
    }
}

/// Extract all tracks in a sized worker pool, consulting the cache when
/// one is given. Results come back in track order.
pub fn extract_all(
    tracks: &[Track],
    cache: Option<&FeatureCache>,
    cfg: &AppConfig,
    workers: usize,
) -> Vec<DescriptorSeries> {
    let pb = ProgressBar::new(tracks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} tracks ({eta} remaining)")
            .unwrap()
            .progress_chars("=>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .unwrap();

    let series = pool.install(|| {
        tracks
            .par_iter()
            .map(|track| {
                if let Some(cache) = cache {
                    if let Some(series) = cache.load_fresh(&track.name, cfg) {
                        pb.inc(1);
                        return series;
                    }
                }
                let series = extract(track, cfg);
                if let Some(cache) = cache {
                    cache.store(&track.name, &series, cfg);
                }
                pb.inc(1);
                series
            })
            .collect()
    });
    pb.finish_and_clear();
    series
}

/// On-disk descriptor cache under `<project>/cache/`, one JSON file per
/// take, recomputed whenever the source file is newer than its entry or
/// the analysis tunables it was computed under have changed.
pub struct FeatureCache {
    project: PathBuf,
    dir: PathBuf,
}

/// Cache entry: the series plus the tunables that shaped it. An entry
/// computed under different corners or rates is stale even when the
/// source file hasn't moved.
#[derive(Serialize, Deserialize)]
struct CacheEntry {
    sample_rate: u32,
    band_low_hz: f32,
    band_high_hz: f32,
    series: DescriptorSeries,
}

impl FeatureCache {
    /// Open (creating if needed) the cache directory for a project.
    pub fn open(project: &Path) -> std::io::Result<Self> {
        let dir = project.join("cache");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            project: project.to_path_buf(),
            dir,
        })
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        // flatten subdirectory names into one cache file name
        let key = name.replace(['/', '\\'], "__");
        self.dir.join(format!("{key}.features.json"))
    }

    /// Load the cached series for a take if the entry is at least as new
    /// as the source file and was computed under the current hop interval,
    /// sample rate, and band corners. Corrupt entries are treated as
    /// missing.
    pub fn load_fresh(&self, name: &str, cfg: &AppConfig) -> Option<DescriptorSeries> {
        let path = self.entry_path(name);
        let source = self.project.join(name);
        let entry_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let source_mtime = std::fs::metadata(&source).and_then(|m| m.modified()).ok()?;
        if entry_mtime < source_mtime {
            return None;
        }
        let contents = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                return None;
            }
        };
        if entry.sample_rate != cfg.sample_rate
            || entry.band_low_hz != cfg.band_low_hz
            || entry.band_high_hz != cfg.band_high_hz
            || (entry.series.hop_secs - cfg.hop_secs()).abs() > 1e-9
        {
            return None;
        }
        log::debug!("cache hit: {name}");
        Some(entry.series)
    }

    /// Persist a computed series. Failures are logged, never fatal.
    pub fn store(&self, name: &str, series: &DescriptorSeries, cfg: &AppConfig) {
        let path = self.entry_path(name);
        let entry = CacheEntry {
            sample_rate: cfg.sample_rate,
            band_low_hz: cfg.band_low_hz,
            band_high_hz: cfg.band_high_hz,
            series: series.clone(),
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Failed to serialize cache entry for {name}: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, json) {
            log::warn!("Failed to write cache entry {}: {}", path.display(), e);
        }
    }
}
