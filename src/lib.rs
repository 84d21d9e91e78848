pub mod config;
pub mod library;
pub mod matcher;
pub mod sequence;

pub use library::{Chunk, Library, SegmentConfig, segment_library, segment_track};
pub use matcher::{Candidate, CancelToken, MatchConfig, SearchOutcome, search, search_with_cancel};
pub use sequence::PitchSequence;

/// Symbolic reference formats we load
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mid", "midi"];

/// Application name for XDG paths
pub const APP_NAME: &str = "hummatch";

/// `mm:ss` for a time offset in seconds.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}
