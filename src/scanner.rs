use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{AUDIO_EXTENSIONS, VIDEO_EXTENSIONS};

/// Subdirectories that hold our own outputs, never takes.
const SKIP_DIRS: &[&str] = &["cache", "results"];

/// File stems that are products of a previous run.
const IGNORE_STEMS: &[&str] = &["gridded_video", "mixed_audio", "silent_video"];

/// One candidate take found in the project directory.
#[derive(Debug, Clone)]
pub struct TakeFile {
    /// Path relative to the project root (used as the track name).
    pub name: String,
    /// Absolute path for loading.
    pub path: PathBuf,
    /// True if this is a video container (audio stream still analyzed).
    pub is_video: bool,
}

/// Scan a project directory for audio/video takes.
///
/// Walks recursively, skipping `cache/` and `results/` output directories
/// and known generated files. Returns takes sorted by relative name so
/// track indices are stable across runs.
pub fn scan_project(project: &Path) -> Vec<TakeFile> {
    let mut takes: Vec<TakeFile> = Vec::new();

    for entry in WalkDir::new(project)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .map(|n| SKIP_DIRS.contains(&n))
                    .unwrap_or(false))
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        if IGNORE_STEMS.contains(&stem.as_str()) {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let is_video = VIDEO_EXTENSIONS.contains(&ext.as_str());
        if !is_video && !AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            log::debug!("Skipping non-media file: {}", path.display());
            continue;
        }
        let name = path
            .strip_prefix(project)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        takes.push(TakeFile {
            name,
            path: path.to_path_buf(),
            is_video,
        });
    }

    takes.sort_by(|a, b| a.name.cmp(&b.name));
    takes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("bravo.wav"), b"x").unwrap();
        fs::write(root.join("alpha.mp4"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();
        fs::write(root.join("mixed_audio.mp3"), b"x").unwrap();
        fs::create_dir(root.join("cache")).unwrap();
        fs::write(root.join("cache/alpha.wav"), b"x").unwrap();

        let takes = scan_project(root);
        let names: Vec<&str> = takes.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.mp4", "bravo.wav"]);
        assert!(takes[0].is_video);
        assert!(!takes[1].is_video);
    }

    #[test]
    fn test_scan_recurses_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("sopranos")).unwrap();
        fs::write(root.join("sopranos/take1.wav"), b"x").unwrap();

        let takes = scan_project(root);
        assert_eq!(takes.len(), 1);
        assert_eq!(takes[0].name, "sopranos/take1.wav");
    }
}
