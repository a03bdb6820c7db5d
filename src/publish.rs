//! Offset publication.
//!
//! One signed value per track, in seconds, is the whole contract: positive
//! means the track's content starts later than the group and must be
//! advanced (left-trimmed) by that amount. The mixer view is the same
//! value in milliseconds and the video view is the seconds value
//! unchanged; no consumer-specific negation anywhere. Offsets persist as an
//! Audacity-importable `.lof` file, the de facto sync session format, and
//! a JSON diagnostics report rides alongside.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::strategy::{Alignment, BeatGroup};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad lof syntax at line {line}: {content:?}")]
    Parse { line: usize, content: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One track's published offset.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetEntry {
    pub name: String,
    pub offset_secs: f64,
}

impl OffsetEntry {
    /// Mixer view: same sign, milliseconds.
    pub fn offset_ms(&self) -> f64 {
        self.offset_secs * 1000.0
    }
}

/// The solved offsets in publishable form.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetSet {
    entries: Vec<OffsetEntry>,
}

impl OffsetSet {
    pub fn new(names: &[String], offsets: &[f64]) -> Self {
        let entries = names
            .iter()
            .zip(offsets.iter())
            .map(|(name, &offset_secs)| OffsetEntry {
                name: name.clone(),
                offset_secs,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[OffsetEntry] {
        &self.entries
    }

    /// Video renderer view: seconds, unchanged.
    pub fn seconds(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.offset_secs).collect()
    }

    /// Mixer view: milliseconds, same sign.
    pub fn milliseconds(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.offset_ms()).collect()
    }

    /// Render the line-oriented interchange format, one record per track:
    /// `file "<name>" offset <value>` with three decimal places.
    pub fn to_lof_string(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "file \"{}\" offset {:.3}",
                entry.name, entry.offset_secs
            );
        }
        out
    }

    pub fn write_lof(&self, path: &Path) -> Result<(), PublishError> {
        std::fs::write(path, self.to_lof_string())?;
        log::info!("wrote {}", path.display());
        Ok(())
    }

    /// Parse the interchange format back. Blank lines are skipped;
    /// anything else that doesn't match the record shape is an error.
    pub fn from_lof_str(contents: &str) -> Result<Self, PublishError> {
        let mut entries = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = parse_lof_line(line);
            match parsed {
                Some((name, offset_secs)) => entries.push(OffsetEntry { name, offset_secs }),
                None => {
                    return Err(PublishError::Parse {
                        line: idx + 1,
                        content: line.to_string(),
                    })
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn read_lof(path: &Path) -> Result<Self, PublishError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_lof_str(&contents)
    }
}

/// `file "<name>" offset <float>`; the name is quoted and may contain
/// spaces.
fn parse_lof_line(line: &str) -> Option<(String, f64)> {
    let rest = line.trim().strip_prefix("file \"")?;
    let quote = rest.rfind('"')?;
    let name = &rest[..quote];
    let offset = rest[quote + 1..]
        .trim()
        .strip_prefix("offset ")?
        .trim()
        .parse::<f64>()
        .ok()?;
    Some((name.to_string(), offset))
}

/// Machine-readable run summary written next to the `.lof` file.
#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub strategy: String,
    pub iterations: usize,
    pub converged: bool,
    pub tracks: Vec<TrackReport>,
    pub ambiguous_pairs: Vec<(usize, usize)>,
    pub beat_groups: Vec<BeatGroup>,
}

#[derive(Debug, Serialize)]
pub struct TrackReport {
    pub name: String,
    pub offset_secs: f64,
    pub offset_ms: f64,
    /// Solver fit deviation; large means the track's pairwise estimates
    /// disagreed.
    pub deviation: f64,
    pub confidence: f64,
    /// True when the track was flagged low-confidence.
    pub suspect: bool,
    /// RMS over clarity-active frames, a gain hint for the mixer.
    pub rms_hint: f64,
}

impl Report {
    pub fn build(
        strategy_label: &str,
        offsets: &OffsetSet,
        alignment: &Alignment,
        rms_hints: &[f64],
    ) -> Self {
        let diag = &alignment.diagnostics;
        let tracks = offsets
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| TrackReport {
                name: entry.name.clone(),
                offset_secs: entry.offset_secs,
                offset_ms: entry.offset_ms(),
                deviation: diag.deviations.get(i).copied().unwrap_or(0.0),
                confidence: diag.confidences.get(i).copied().unwrap_or(0.0),
                suspect: diag.suspect.contains(&i),
                rms_hint: rms_hints.get(i).copied().unwrap_or(0.0),
            })
            .collect();
        Report {
            generated_at: Utc::now(),
            strategy: strategy_label.to_string(),
            iterations: diag.iterations,
            converged: diag.converged,
            tracks,
            ambiguous_pairs: diag.ambiguous_pairs.clone(),
            beat_groups: diag.beat_groups.clone(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), PublishError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        log::info!("wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> OffsetSet {
        OffsetSet::new(
            &[
                "alto/anna take 2.mp4".to_string(),
                "bass.wav".to_string(),
                "tenor.m4a".to_string(),
            ],
            &[0.4005, -0.25, 0.0],
        )
    }

    #[test]
    fn test_lof_format() {
        let lof = sample_set().to_lof_string();
        assert_eq!(
            lof,
            "file \"alto/anna take 2.mp4\" offset 0.400\n\
             file \"bass.wav\" offset -0.250\n\
             file \"tenor.m4a\" offset 0.000\n"
        );
    }

    #[test]
    fn test_lof_round_trip() {
        let set = sample_set();
        let parsed = OffsetSet::from_lof_str(&set.to_lof_string()).unwrap();
        assert_eq!(parsed.entries().len(), 3);
        for (orig, round) in set.entries().iter().zip(parsed.entries()) {
            assert_eq!(orig.name, round.name);
            // 3-decimal precision survives
            assert!((orig.offset_secs - round.offset_secs).abs() < 0.0005 + 1e-12);
        }
    }

    #[test]
    fn test_lof_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audacity_import.lof");
        let set = sample_set();
        set.write_lof(&path).unwrap();
        let parsed = OffsetSet::read_lof(&path).unwrap();
        assert_eq!(parsed.entries()[1].name, "bass.wav");
        assert!((parsed.entries()[1].offset_secs + 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_lof_bad_syntax() {
        let err = OffsetSet::from_lof_str("file \"x.wav\" offset 0.1\nnot a record\n").unwrap_err();
        assert!(matches!(err, PublishError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_lof_skips_blank_lines() {
        let set = OffsetSet::from_lof_str("\nfile \"x.wav\" offset 1.5\n\n").unwrap();
        assert_eq!(set.entries().len(), 1);
        assert_eq!(set.entries()[0].offset_secs, 1.5);
    }

    #[test]
    fn test_unit_views_share_sign() {
        let set = sample_set();
        let secs = set.seconds();
        let ms = set.milliseconds();
        for (s, m) in secs.iter().zip(ms.iter()) {
            assert!((m - s * 1000.0).abs() < 1e-9);
            assert_eq!(s.signum(), m.signum());
        }
    }
}
