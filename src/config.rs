use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::library::SegmentConfig;
use crate::matcher::MatchConfig;
use crate::matcher::scoring::AlignmentScorer;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of reference MIDI files (used when `--library` is not given).
    pub library_dir: Option<PathBuf>,
    /// Number of parallel workers. 0 = one per core.
    pub workers: usize,
    /// How many distinct tracks a search returns.
    pub top_n: Option<usize>,
    pub segment: SegmentSettings,
    pub matching: MatchingSettings,
}

/// Chunking of reference tracks.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SegmentSettings {
    /// Window length in seconds.
    pub chunk_length: f64,
    /// Seconds shared by consecutive windows.
    pub overlap: f64,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        let defaults = SegmentConfig::default();
        Self {
            chunk_length: defaults.chunk_length,
            overlap: defaults.overlap,
        }
    }
}

/// Alignment scoring.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    pub semitone_range: Vec<i32>,
    pub use_duration_weighting: bool,
    pub weight_exponent: f64,
    pub reward_factor: f64,
    pub dtw_radius: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        let match_defaults = MatchConfig::default();
        let scorer = AlignmentScorer::default();
        Self {
            semitone_range: match_defaults.semitone_range,
            use_duration_weighting: scorer.use_duration_weighting,
            weight_exponent: scorer.weight_exponent,
            reward_factor: scorer.reward_factor,
            dtw_radius: scorer.radius,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/hummatch/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path, falling back to defaults on error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
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
        }
    }

    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            chunk_length: self.segment.chunk_length,
            overlap: self.segment.overlap,
            show_progress: false,
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        let defaults = MatchConfig::default();
        MatchConfig {
            top_n: self.top_n.unwrap_or(defaults.top_n),
            semitone_range: self.matching.semitone_range.clone(),
            scorer: AlignmentScorer {
                use_duration_weighting: self.matching.use_duration_weighting,
                weight_exponent: self.matching.weight_exponent,
                reward_factor: self.matching.reward_factor,
                radius: self.matching.dtw_radius,
            },
            workers: self.workers,
            show_progress: false,
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
