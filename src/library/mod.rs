pub mod midi;

use crate::SUPPORTED_EXTENSIONS;
use crate::sequence::PitchSequence;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Most windows a single track may be cut into.
pub const MAX_CHUNKS_PER_TRACK: usize = 100_000;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Invalid segment config: {0}")]
    InvalidConfig(String),
    #[error("Library directory not found: {0}")]
    NotADirectory(PathBuf),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(
        "{track}: {count:.0} chunks exceeds the limit of {limit}; \
         use a larger chunk_length - overlap"
    )]
    TooManyChunks {
        track: String,
        count: f64,
        limit: usize,
    },
}

/// How reference tracks are tiled into searchable chunks.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Window length in seconds.
    pub chunk_length: f64,
    /// Seconds shared by consecutive windows. Must be in `[0, chunk_length)`.
    pub overlap: f64,
    pub show_progress: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            chunk_length: 20.0,
            overlap: 10.0,
            show_progress: false,
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<(), LibraryError> {
        if !self.chunk_length.is_finite() || self.chunk_length <= 0.0 {
            return Err(LibraryError::InvalidConfig(format!(
                "chunk_length must be positive, got {}",
                self.chunk_length
            )));
        }
        if !self.overlap.is_finite() || self.overlap < 0.0 {
            return Err(LibraryError::InvalidConfig(format!(
                "overlap must be non-negative, got {}",
                self.overlap
            )));
        }
        if self.overlap >= self.chunk_length {
            return Err(LibraryError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_length ({})",
                self.overlap, self.chunk_length
            )));
        }
        Ok(())
    }

    fn step(&self) -> f64 {
        self.chunk_length - self.overlap
    }
}

/// One window of a reference track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub pitches: Vec<i32>,
    /// Offset of the window into its track, in seconds.
    pub start_time: f64,
    pub track_name: String,
}

/// A reference file that could not be loaded.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Every chunk of every loaded reference track.
#[derive(Debug, Default)]
pub struct Library {
    pub chunks: Vec<Chunk>,
    pub tracks_loaded: usize,
    pub failures: Vec<LoadFailure>,
}

impl Library {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Distinct track names, in load order.
    pub fn track_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for chunk in &self.chunks {
            if names.last() != Some(&chunk.track_name.as_str()) {
                names.push(&chunk.track_name);
            }
        }
        names
    }
}

/// Tile a track into windows `[t, t + chunk_length)` advancing by
/// `chunk_length - overlap`. Windows are emitted only while they end at or
/// before the final onset, so a track shorter than one window yields nothing.
/// A step so small that the track would need more than
/// [`MAX_CHUNKS_PER_TRACK`] windows is rejected.
pub fn segment_track(
    track_name: &str,
    sequence: &PitchSequence,
    config: &SegmentConfig,
) -> Result<Vec<Chunk>, LibraryError> {
    config.validate()?;

    let last_onset = match sequence.last_onset() {
        Some(t) if t >= config.chunk_length => t,
        _ => return Ok(Vec::new()),
    };

    let step = config.step();
    let windows = ((last_onset - config.chunk_length) / step).floor() + 1.0;
    if windows > MAX_CHUNKS_PER_TRACK as f64 {
        return Err(LibraryError::TooManyChunks {
            track: track_name.to_string(),
            count: windows,
            limit: MAX_CHUNKS_PER_TRACK,
        });
    }
    let count = windows as usize;
    let notes = sequence.notes();

    let chunks = (0..count)
        .map(|i| {
            let start_time = i as f64 * step;
            let end_time = start_time + config.chunk_length;
            // Onsets are sorted, so the window is a contiguous slice.
            let lo = notes.partition_point(|n| n.onset < start_time);
            let hi = notes.partition_point(|n| n.onset < end_time);
            Chunk {
                pitches: notes[lo..hi].iter().map(|n| n.pitch).collect(),
                start_time,
                track_name: track_name.to_string(),
            }
        })
        .collect();

    Ok(chunks)
}

/// Load every MIDI file under `dir` and tile it into chunks.
///
/// Files that fail to parse are logged and recorded in `Library::failures`;
/// they never abort the load. Each track is named by its path relative to
/// `dir` (see [`library_track_name`]), and files are visited in sorted path
/// order so the chunk list is reproducible.
pub fn segment_library(dir: &Path, config: &SegmentConfig) -> Result<Library, LibraryError> {
    config.validate()?;

    if !dir.is_dir() {
        return Err(LibraryError::NotADirectory(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            files.push(entry.into_path());
        }
    }

    log::info!("Loading {} reference files from {}", files.len(), dir.display());

    let pb = if config.show_progress {
        ProgressBar::new(files.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }

    let loaded: Vec<Result<(String, Vec<Chunk>), LoadFailure>> = files
        .par_iter()
        .map(|path| {
            let result = load_track(dir, path, config);
            pb.inc(1);
            result
        })
        .collect();

    pb.finish_and_clear();

    let mut library = Library::default();
    for result in loaded {
        match result {
            Ok((name, chunks)) => {
                log::debug!("{}: {} chunks", name, chunks.len());
                library.tracks_loaded += 1;
                library.chunks.extend(chunks);
            }
            Err(failure) => {
                log::warn!("Skipping {}: {}", failure.path.display(), failure.reason);
                library.failures.push(failure);
            }
        }
    }

    log::info!(
        "Library: {} tracks, {} chunks, {} failed",
        library.tracks_loaded,
        library.chunks.len(),
        library.failures.len()
    );

    Ok(library)
}

fn load_track(
    root: &Path,
    path: &Path,
    config: &SegmentConfig,
) -> Result<(String, Vec<Chunk>), LoadFailure> {
    let fail = |reason: String| LoadFailure {
        path: path.to_path_buf(),
        reason,
    };
    let name = library_track_name(root, path);
    let sequence = midi::load_pitch_sequence(path).map_err(|e| fail(e.to_string()))?;
    let chunks = segment_track(&name, &sequence, config).map_err(|e| fail(e.to_string()))?;
    Ok((name, chunks))
}

/// Display name for a single file: its stem, lossily decoded.
pub fn track_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Name of a track found under `root`: the path relative to `root` without
/// its extension, `/`-separated. `root/artist_a/intro.mid` is
/// `artist_a/intro`, so same-named files in different folders stay distinct.
pub fn library_track_name(root: &Path, path: &Path) -> String {
    let Ok(relative) = path.strip_prefix(root) else {
        return track_name(path);
    };
    let parts: Vec<String> = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        track_name(path)
    } else {
        parts.join("/")
    }
}
