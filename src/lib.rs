pub mod config;
pub mod correlate;
pub mod features;
pub mod filter;
pub mod loader;
pub mod publish;
pub mod scanner;
pub mod solver;
pub mod strategy;

/// Audio take extensions we accept (decoded natively or via ffmpeg)
pub const AUDIO_EXTENSIONS: &[&str] = &[
    // Native (hound)
    "wav",
    // ffmpeg fallback
    "aac", "aif", "aiff", "flac", "m4a", "mp3", "ogg", "opus",
];

/// Video take extensions — their audio stream joins the alignment
pub const VIDEO_EXTENSIONS: &[&str] = &["avi", "mkv", "mov", "mp4", "webm"];

/// Application name for XDG paths
pub const APP_NAME: &str = "choirsync";
