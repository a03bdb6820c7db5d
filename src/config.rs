use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Canonical analysis sample rate in Hz. Every take is resampled to
    /// this rate on load so descriptor frames are comparable across tracks.
    pub sample_rate: u32,
    /// Raw samples per descriptor frame (~10.7 ms at 48 kHz).
    pub hop_length: usize,
    /// Band-pass low corner in Hz (C3) applied before feature extraction.
    pub band_low_hz: f32,
    /// Band-pass high corner in Hz (C5).
    pub band_high_hz: f32,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Solver settings.
    pub solver: SolverConfig,
    /// Clap-detect settings.
    pub clap: ClapConfig,
}

/// Global offset solver tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Convergence epsilon in seconds.
    pub epsilon: f64,
    /// Iteration cap before giving up and returning the last vector.
    pub max_iterations: usize,
    /// Per-track fit deviation (seconds) above which the result is flagged
    /// as ambiguous in the diagnostics.
    pub deviation_threshold: f64,
}

/// Lead-in clap detection tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClapConfig {
    /// A frame's clarity must exceed this many standard deviations before
    /// it counts toward the accumulated lead-in energy.
    pub gate_sigma: f64,
    /// Cue trigger: accumulated gated clarity as a multiple of the
    /// track's peak frame clarity.
    pub energy_factor: f64,
    /// Transients within this many seconds of each other (after cue
    /// zeroing) are clustered into one beat group.
    pub group_window_secs: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            hop_length: 512,
            band_low_hz: 130.0,
            band_high_hz: 523.0,
            workers: 0,
            solver: SolverConfig::default(),
            clap: ClapConfig::default(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.0005,
            max_iterations: 1000,
            deviation_threshold: 0.1,
        }
    }
}

impl Default for ClapConfig {
    fn default() -> Self {
        Self {
            gate_sigma: 0.25,
            energy_factor: 0.25,
            group_window_secs: 0.15,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/choirsync/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Descriptor frame interval in seconds.
    pub fn hop_secs(&self) -> f64 {
        self.hop_length as f64 / self.sample_rate as f64
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
