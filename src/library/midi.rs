//! Standard MIDI File loading.
//!
//! Reference tracks and queries arrive as SMF files. Only note-on events with
//! non-zero velocity are kept; their tick positions are converted to seconds
//! through the file's tempo map so chunk windows line up with wall-clock time.

use crate::sequence::{Note, PitchSequence, SequenceError};
use midly::num::{u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// 120 BPM, the SMF default when no Set Tempo event is present.
const DEFAULT_TEMPO_US: u32 = 500_000;

const MAX_DELTA: u32 = 0x0FFF_FFFF;

/// Slack for float error when mapping seconds onto whole ticks.
const TICK_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum MidiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI parse error: {0}")]
    Parse(#[from] midly::Error),
    #[error("Invalid note sequence: {0}")]
    Sequence(#[from] SequenceError),
    #[error("Invalid excerpt window: start {start}s, duration {duration}s")]
    InvalidWindow { start: f64, duration: f64 },
}

/// Converts tick positions to seconds and back.
#[derive(Debug, Clone)]
struct TempoMap {
    base: TimeBase,
    /// (absolute tick, microseconds per beat), sorted by tick, first entry at 0.
    changes: Vec<(u64, u32)>,
}

#[derive(Debug, Clone, Copy)]
enum TimeBase {
    Metrical { ticks_per_beat: f64 },
    Timecode { ticks_per_second: f64 },
}

impl TempoMap {
    fn from_smf(smf: &Smf) -> Self {
        let base = match smf.header.timing {
            Timing::Metrical(tpb) => TimeBase::Metrical {
                ticks_per_beat: f64::from(tpb.as_int().max(1)),
            },
            Timing::Timecode(fps, sub) => TimeBase::Timecode {
                ticks_per_second: (f64::from(fps.as_f32()) * f64::from(sub)).max(1.0),
            },
        };

        let mut changes: Vec<(u64, u32)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += u64::from(event.delta.as_int());
                if let TrackEventKind::Meta(MetaMessage::Tempo(us)) = event.kind {
                    changes.push((tick, us.as_int()));
                }
            }
        }
        // Stable: for equal ticks the later track wins, as in a merged stream.
        changes.sort_by_key(|&(tick, _)| tick);
        if changes.first().is_none_or(|&(tick, _)| tick > 0) {
            changes.insert(0, (0, DEFAULT_TEMPO_US));
        }

        Self { base, changes }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        let ticks_per_beat = match self.base {
            TimeBase::Timecode { ticks_per_second } => return tick as f64 / ticks_per_second,
            TimeBase::Metrical { ticks_per_beat } => ticks_per_beat,
        };

        let mut seconds = 0.0;
        for (i, &(from, tempo)) in self.changes.iter().enumerate() {
            if from >= tick {
                break;
            }
            let until = self
                .changes
                .get(i + 1)
                .map_or(tick, |&(next, _)| next.min(tick));
            seconds += (until - from) as f64 * f64::from(tempo) / 1e6 / ticks_per_beat;
        }
        seconds
    }

    /// First tick at or after `seconds`.
    fn tick_at(&self, seconds: f64) -> u64 {
        let ticks_per_beat = match self.base {
            TimeBase::Timecode { ticks_per_second } => {
                return (seconds * ticks_per_second - TICK_EPSILON).ceil().max(0.0) as u64;
            }
            TimeBase::Metrical { ticks_per_beat } => ticks_per_beat,
        };

        let mut elapsed = 0.0;
        for (i, &(from, tempo)) in self.changes.iter().enumerate() {
            let seconds_per_tick = f64::from(tempo) / 1e6 / ticks_per_beat;
            let segment_end = self.changes.get(i + 1).map(|&(next, _)| next);
            let remaining = seconds - elapsed;
            match segment_end {
                Some(next) if (next - from) as f64 * seconds_per_tick < remaining => {
                    elapsed += (next - from) as f64 * seconds_per_tick;
                }
                _ => {
                    let ticks = (remaining / seconds_per_tick - TICK_EPSILON).ceil();
                    return from + ticks.max(0.0) as u64;
                }
            }
        }
        0
    }

    fn tempo_at(&self, tick: u64) -> u32 {
        self.changes
            .iter()
            .take_while(|&&(from, _)| from <= tick)
            .last()
            .map_or(DEFAULT_TEMPO_US, |&(_, tempo)| tempo)
    }
}

/// Load a MIDI file as a monophonic pitch sequence.
pub fn load_pitch_sequence(path: &Path) -> Result<PitchSequence, MidiError> {
    let data = std::fs::read(path)?;
    parse_pitch_sequence(&data)
}

/// Parse SMF bytes into a pitch sequence: every sounding note-on across all
/// tracks, merged in time order.
pub fn parse_pitch_sequence(data: &[u8]) -> Result<PitchSequence, MidiError> {
    let smf = Smf::parse(data)?;
    let tempo = TempoMap::from_smf(&smf);

    let mut onsets: Vec<(u64, u8)> = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } = event.kind
            {
                if vel.as_int() > 0 {
                    onsets.push((tick, key.as_int()));
                }
            }
        }
    }
    onsets.sort_by_key(|&(tick, _)| tick);

    log::debug!(
        "Parsed {} tracks, {} note onsets",
        smf.tracks.len(),
        onsets.len()
    );

    let notes = onsets
        .into_iter()
        .map(|(tick, key)| Note {
            pitch: i32::from(key),
            onset: tempo.seconds_at(tick),
        })
        .collect();

    Ok(PitchSequence::from_notes(notes)?)
}

/// Copy the events of `source` that fall in `[start, start + duration]`
/// seconds into a new file at `dest`, rebased to begin at zero. The tempo in
/// force at `start` is written at the head of the first track. Returns the
/// number of events copied.
pub fn write_excerpt(
    source: &Path,
    dest: &Path,
    start: f64,
    duration: f64,
) -> Result<usize, MidiError> {
    if !start.is_finite() || start < 0.0 || !duration.is_finite() || duration <= 0.0 {
        return Err(MidiError::InvalidWindow { start, duration });
    }

    let data = std::fs::read(source)?;
    let smf = Smf::parse(&data)?;
    let tempo = TempoMap::from_smf(&smf);
    let start_tick = tempo.tick_at(start);
    let end = start + duration;

    let mut excerpt = Smf::new(Header::new(
        if smf.tracks.len() > 1 { Format::Parallel } else { Format::SingleTrack },
        smf.header.timing,
    ));
    let mut copied = 0usize;

    for (index, track) in smf.tracks.iter().enumerate() {
        let mut events: Vec<TrackEvent> = Vec::new();
        if index == 0 {
            events.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(
                    tempo.tempo_at(start_tick),
                ))),
            });
        }

        let mut tick = 0u64;
        let mut last_written = start_tick;
        for event in track {
            tick += u64::from(event.delta.as_int());
            if matches!(event.kind, TrackEventKind::Meta(MetaMessage::EndOfTrack)) {
                continue;
            }
            if tick < start_tick || tempo.seconds_at(tick) > end + 1e-9 {
                continue;
            }
            let delta = (tick - last_written).min(u64::from(MAX_DELTA)) as u32;
            events.push(TrackEvent {
                delta: u28::new(delta),
                kind: event.kind,
            });
            last_written = tick;
            copied += 1;
        }

        events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        excerpt.tracks.push(events);
    }

    excerpt.save(dest)?;
    log::info!(
        "Wrote {} events ({:.1}s-{:.1}s) to {}",
        copied,
        start,
        end,
        dest.display()
    );
    Ok(copied)
}

static UNSAFE_FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).unwrap());

/// File name for an excerpt of `track_name` starting at `start` seconds.
pub fn excerpt_file_name(track_name: &str, start: f64) -> String {
    let safe = UNSAFE_FILENAME_RE.replace_all(track_name, "_");
    format!("{}_{}.mid", safe, crate::format_time(start).replace(':', "m"))
}
