use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SequenceError {
    #[error("pitch/time length mismatch: {pitches} pitches, {times} onsets")]
    LengthMismatch { pitches: usize, times: usize },
    #[error("onset {index} is not finite or negative ({onset})")]
    InvalidOnset { index: usize, onset: f64 },
    #[error("onset {index} ({onset}s) is earlier than the previous note ({previous}s)")]
    NonMonotonicOnset {
        index: usize,
        onset: f64,
        previous: f64,
    },
}

/// A single note: MIDI note number and onset in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Note {
    pub pitch: i32,
    pub onset: f64,
}

/// Time-ordered monophonic pitch sequence. Onsets are finite, non-negative
/// and non-decreasing; the constructors enforce this.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PitchSequence {
    notes: Vec<Note>,
}

impl PitchSequence {
    /// Build from parallel pitch and onset arrays.
    pub fn new(pitches: &[i32], times: &[f64]) -> Result<Self, SequenceError> {
        if pitches.len() != times.len() {
            return Err(SequenceError::LengthMismatch {
                pitches: pitches.len(),
                times: times.len(),
            });
        }
        let notes = pitches
            .iter()
            .zip(times)
            .map(|(&pitch, &onset)| Note { pitch, onset })
            .collect();
        Self::from_notes(notes)
    }

    pub fn from_notes(notes: Vec<Note>) -> Result<Self, SequenceError> {
        let mut previous = 0.0_f64;
        for (index, note) in notes.iter().enumerate() {
            if !note.onset.is_finite() || note.onset < 0.0 {
                return Err(SequenceError::InvalidOnset {
                    index,
                    onset: note.onset,
                });
            }
            if note.onset < previous {
                return Err(SequenceError::NonMonotonicOnset {
                    index,
                    onset: note.onset,
                    previous,
                });
            }
            previous = note.onset;
        }
        Ok(Self { notes })
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn pitches(&self) -> Vec<i32> {
        self.notes.iter().map(|n| n.pitch).collect()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Onset of the final note, or `None` for an empty sequence.
    pub fn last_onset(&self) -> Option<f64> {
        self.notes.last().map(|n| n.onset)
    }
}
