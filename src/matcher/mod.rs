pub mod dtw;
pub mod normalize;
pub mod scoring;
pub mod select;

use crate::library::Chunk;
use crate::sequence::PitchSequence;
use indicatif::{ProgressBar, ProgressStyle};
use normalize::{median, normalize_around};
use rayon::prelude::*;
use scoring::AlignmentScorer;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub use select::select_top;

/// Chunks handed to the pool per worker between cancellation checks.
const CHUNKS_PER_WORKER: usize = 64;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Invalid match config: {0}")]
    InvalidConfig(String),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Search cancelled")]
    Cancelled,
}

/// Search parameters. Nothing here is read from the environment; callers
/// build it (the CLI from `AppConfig` and flags).
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Number of distinct tracks to return.
    pub top_n: usize,
    /// Semitone offsets tried on the normalised query for every chunk.
    pub semitone_range: Vec<i32>,
    pub scorer: AlignmentScorer,
    /// Worker threads. 0 = one per available core.
    pub workers: usize,
    pub show_progress: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            semitone_range: vec![-1, 0, 1],
            scorer: AlignmentScorer::default(),
            workers: 0,
            show_progress: false,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.semitone_range.is_empty() {
            return Err(MatchError::InvalidConfig(
                "semitone_range must contain at least one shift".into(),
            ));
        }
        if !self.scorer.weight_exponent.is_finite() {
            return Err(MatchError::InvalidConfig(format!(
                "weight_exponent must be finite, got {}",
                self.scorer.weight_exponent
            )));
        }
        if !self.scorer.reward_factor.is_finite() {
            return Err(MatchError::InvalidConfig(format!(
                "reward_factor must be finite, got {}",
                self.scorer.reward_factor
            )));
        }
        Ok(())
    }

    /// Resolve worker count: 0 → available parallelism.
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// A scored hypothesis: where in which track the query fits, and how well.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Lower is better. Negative when long exact matches outweigh the cost.
    pub distance: f64,
    pub start_time: f64,
    /// Shift added to the normalised query that produced `distance`.
    pub semitone_shift: i32,
    /// Chunk median minus query median, rounded half away from zero
    /// (`-3.5` becomes `-4`).
    pub median_pitch_difference: i32,
    pub track_name: String,
}

impl Candidate {
    /// Semitones the query must be raised to sit on the reference.
    pub fn transposition(&self) -> i32 {
        self.median_pitch_difference + self.semitone_shift
    }
}

/// A chunk whose scoring panicked. Its contribution is dropped.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub track_name: String,
    pub message: String,
}

/// Ranked matches plus what happened to the chunks that did not produce one.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub matches: Vec<Candidate>,
    pub chunks_scored: usize,
    /// Chunks with no notes.
    pub chunks_skipped: usize,
    pub failures: Vec<ChunkFailure>,
}

/// Shared flag a caller can set to stop a running search at the next batch
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum ChunkOutcome {
    Scored(Candidate),
    Skipped,
    Failed(ChunkFailure),
}

/// Find the `top_n` tracks whose chunks best match `query`.
pub fn search(
    query: &PitchSequence,
    chunks: &[Chunk],
    config: &MatchConfig,
) -> Result<SearchOutcome, MatchError> {
    search_with_cancel(query, chunks, config, &CancelToken::new())
}

/// [`search`], checking `cancel` between batches. A cancelled search returns
/// `MatchError::Cancelled` and discards partial results.
pub fn search_with_cancel(
    query: &PitchSequence,
    chunks: &[Chunk],
    config: &MatchConfig,
    cancel: &CancelToken,
) -> Result<SearchOutcome, MatchError> {
    config.validate()?;

    let query_pitches = query.pitches();
    let Some(query_median) = median(&query_pitches) else {
        log::warn!("Query has no notes; nothing to match");
        return Ok(SearchOutcome {
            chunks_skipped: chunks.len(),
            ..Default::default()
        });
    };

    if chunks.is_empty() {
        log::info!("Library is empty; nothing to match");
        return Ok(SearchOutcome::default());
    }

    // One normalised copy of the query per shift, shared read-only by workers.
    let shifted_queries: Vec<(i32, Vec<f64>)> = config
        .semitone_range
        .iter()
        .map(|&shift| (shift, normalize_around(&query_pitches, query_median, shift)))
        .collect();

    let workers = config.resolve_workers();
    log::info!(
        "Searching {} chunks with {} workers ({} query notes, shifts {:?})",
        chunks.len(),
        workers,
        query_pitches.len(),
        config.semitone_range
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;

    let pb = if config.show_progress {
        ProgressBar::new(chunks.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }

    let batch_size = workers * CHUNKS_PER_WORKER;
    let results = run_batches(&pool, chunks, batch_size, cancel, &pb, |index, chunk| {
        guarded(index, &chunk.track_name, || {
            score_chunk(chunk, &shifted_queries, query_median, &config.scorer)
        })
    })?;

    let mut outcome = SearchOutcome::default();
    let mut candidates: Vec<Candidate> = Vec::with_capacity(results.len());
    for result in results {
        match result {
            ChunkOutcome::Scored(candidate) => {
                outcome.chunks_scored += 1;
                candidates.push(candidate);
            }
            ChunkOutcome::Skipped => outcome.chunks_skipped += 1,
            ChunkOutcome::Failed(failure) => {
                log::warn!(
                    "Chunk {} of {} failed: {}",
                    failure.chunk_index,
                    failure.track_name,
                    failure.message
                );
                outcome.failures.push(failure);
            }
        }
    }

    pb.finish_and_clear();

    outcome.matches = select_top(candidates, config.top_n);
    log::info!(
        "Scored {} chunks ({} skipped, {} failed), {} matches",
        outcome.chunks_scored,
        outcome.chunks_skipped,
        outcome.failures.len(),
        outcome.matches.len()
    );
    Ok(outcome)
}

/// Score `chunks` on `pool` in batches of `batch_size`, checking `cancel`
/// before each batch. Outcomes are returned in chunk order; a cancelled run
/// returns `MatchError::Cancelled` and drops whatever was already scored.
fn run_batches<F>(
    pool: &rayon::ThreadPool,
    chunks: &[Chunk],
    batch_size: usize,
    cancel: &CancelToken,
    pb: &ProgressBar,
    score: F,
) -> Result<Vec<ChunkOutcome>, MatchError>
where
    F: Fn(usize, &Chunk) -> ChunkOutcome + Sync,
{
    let batch_size = batch_size.max(1);
    let mut outcomes = Vec::with_capacity(chunks.len());

    for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        if cancel.is_cancelled() {
            pb.abandon();
            log::info!("Search cancelled after {} chunks", offset);
            return Err(MatchError::Cancelled);
        }

        let results: Vec<ChunkOutcome> = pool.install(|| {
            batch
                .par_iter()
                .enumerate()
                .map(|(i, chunk)| {
                    let result = score(offset + i, chunk);
                    pb.inc(1);
                    result
                })
                .collect()
        });
        // Results come back in enumeration order, whatever order workers ran in.
        outcomes.extend(results);
    }

    Ok(outcomes)
}

/// Best shift for one chunk, or `None` if the chunk has no notes.
fn score_chunk(
    chunk: &Chunk,
    shifted_queries: &[(i32, Vec<f64>)],
    query_median: f64,
    scorer: &AlignmentScorer,
) -> Option<Candidate> {
    let chunk_median = median(&chunk.pitches)?;
    let reference = normalize_around(&chunk.pitches, chunk_median, 0);

    let mut best_distance = f64::INFINITY;
    let mut best_shift = shifted_queries.first().map_or(0, |(shift, _)| *shift);
    for (shift, query) in shifted_queries {
        let distance = scorer.distance(query, &reference);
        if distance < best_distance {
            best_distance = distance;
            best_shift = *shift;
        }
    }

    Some(Candidate {
        distance: best_distance,
        start_time: chunk.start_time,
        semitone_shift: best_shift,
        median_pitch_difference: (chunk_median - query_median).round() as i32,
        track_name: chunk.track_name.clone(),
    })
}

/// Run one unit of work, turning a panic into a `ChunkFailure`.
fn guarded<F>(chunk_index: usize, track_name: &str, work: F) -> ChunkOutcome
where
    F: FnOnce() -> Option<Candidate>,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Some(candidate)) => ChunkOutcome::Scored(candidate),
        Ok(None) => ChunkOutcome::Skipped,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ChunkOutcome::Failed(ChunkFailure {
                chunk_index,
                track_name: track_name.to_string(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn chunk(track: &str, start_time: f64, pitches: &[i32]) -> Chunk {
        Chunk {
            pitches: pitches.to_vec(),
            start_time,
            track_name: track.to_string(),
        }
    }

    fn query(pitches: &[i32]) -> PitchSequence {
        let times: Vec<f64> = (0..pitches.len()).map(|i| i as f64).collect();
        PitchSequence::new(pitches, &times).unwrap()
    }

    fn config(top_n: usize) -> MatchConfig {
        MatchConfig {
            top_n,
            workers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn transposed_reference_is_found() {
        let q = query(&[60, 62, 64, 62, 60]);
        let chunks = vec![
            chunk("noise", 0.0, &[70, 55, 80, 61, 49, 75, 58]),
            chunk("target", 30.0, &[62, 64, 66, 64, 62]),
        ];
        let outcome = search(&q, &chunks, &config(2)).unwrap();
        let best = &outcome.matches[0];
        assert_eq!(best.track_name, "target");
        assert_eq!(best.start_time, 30.0);
        assert_eq!(best.semitone_shift, 0);
        assert_eq!(best.median_pitch_difference, 2);
        assert_eq!(best.transposition(), 2);
        assert!(best.distance <= 0.0);
        assert!(outcome.matches[1].distance > best.distance);
    }

    #[test]
    fn keeps_lowest_shift_per_chunk() {
        let q = query(&[60, 62, 63, 67, 65, 62]);
        let reference = [57, 59, 61, 64, 62, 59, 57, 55];
        let scorer = AlignmentScorer::default();
        let ref_norm = normalize::normalize(&reference, 0).unwrap();
        let q_median = median(&q.pitches()).unwrap();
        let shifted: Vec<(i32, Vec<f64>)> = [-1, 0, 1]
            .iter()
            .map(|&s| (s, normalize_around(&q.pitches(), q_median, s)))
            .collect();

        let mut expected = (f64::INFINITY, 0);
        for (shift, qn) in &shifted {
            let d = scorer.distance(qn, &ref_norm);
            if d < expected.0 {
                expected = (d, *shift);
            }
        }

        let c = score_chunk(&chunk("r", 5.0, &reference), &shifted, q_median, &scorer).unwrap();
        assert_eq!((c.distance, c.semitone_shift), expected);
        // 59 - 62.5 rounds away from zero.
        assert_eq!(c.median_pitch_difference, -4);
        assert_eq!(c.start_time, 5.0);
    }

    #[test]
    fn single_note_prefers_zero_shift() {
        let q = query(&[67]);
        let outcome = search(&q, &[chunk("a", 0.0, &[60])], &config(1)).unwrap();
        assert_eq!(outcome.matches[0].semitone_shift, 0);
        assert_eq!(outcome.matches[0].median_pitch_difference, -7);
        assert_eq!(outcome.matches[0].transposition(), -7);
    }

    #[test]
    fn empty_library_gives_empty_result() {
        let outcome = search(&query(&[60, 62]), &[], &config(3)).unwrap();
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.chunks_scored, 0);
    }

    #[test]
    fn empty_chunks_are_skipped() {
        let chunks = vec![chunk("a", 0.0, &[]), chunk("b", 0.0, &[60, 62, 64])];
        let outcome = search(&query(&[60, 62, 64]), &chunks, &config(3)).unwrap();
        assert_eq!(outcome.chunks_skipped, 1);
        assert_eq!(outcome.chunks_scored, 1);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].track_name, "b");
    }

    #[test]
    fn all_chunks_empty_is_not_an_error() {
        let chunks = vec![chunk("a", 0.0, &[]), chunk("a", 10.0, &[])];
        let outcome = search(&query(&[60]), &chunks, &config(3)).unwrap();
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.chunks_skipped, 2);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let chunks = vec![chunk("a", 0.0, &[60, 62])];
        let outcome = search(&PitchSequence::default(), &chunks, &config(3)).unwrap();
        assert!(outcome.matches.is_empty());
    }

    #[test]
    fn one_result_per_track() {
        let q = query(&[60, 62, 64, 65, 67]);
        let chunks = vec![
            chunk("a", 0.0, &[60, 62, 64, 65, 67]),
            chunk("a", 10.0, &[60, 62, 64, 65, 66]),
            chunk("b", 0.0, &[60, 63, 64, 65, 67]),
            chunk("b", 10.0, &[72, 50, 64, 61, 80]),
            chunk("a", 20.0, &[40, 90, 41, 88, 42]),
        ];
        let outcome = search(&q, &chunks, &config(2)).unwrap();
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.matches[0].track_name, "a");
        assert_eq!(outcome.matches[0].start_time, 0.0);
        assert_eq!(outcome.matches[1].track_name, "b");
        assert_eq!(outcome.matches[1].start_time, 0.0);
    }

    #[test]
    fn repeated_search_is_identical() {
        let q = query(&[60, 62, 64, 62, 60, 59, 57]);
        let chunks: Vec<Chunk> = (0..300)
            .map(|i| {
                let pitches: Vec<i32> = (0..8)
                    .map(|k| 55 + ((i * 7 + k * 5) % 17) as i32)
                    .collect();
                chunk(&format!("t{}", i % 13), (i % 20) as f64 * 10.0, &pitches)
            })
            .collect();
        let mut cfg = config(5);
        cfg.workers = 4;
        let first = search(&q, &chunks, &cfg).unwrap();
        let second = search(&q, &chunks, &cfg).unwrap();
        assert_eq!(first.matches, second.matches);
        cfg.workers = 1;
        assert_eq!(search(&q, &chunks, &cfg).unwrap().matches, first.matches);
    }

    #[test]
    fn cancelled_search_returns_error() {
        let token = CancelToken::new();
        token.cancel();
        let chunks = vec![chunk("a", 0.0, &[60, 62])];
        let result = search_with_cancel(&query(&[60, 62]), &chunks, &config(1), &token);
        assert!(matches!(result, Err(MatchError::Cancelled)));
    }

    fn single_worker_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    #[test]
    fn cancel_between_batches_discards_scored_chunks() {
        let chunks: Vec<Chunk> = (0..200).map(|i| chunk("t", i as f64, &[60])).collect();
        let token = CancelToken::new();
        let visited = AtomicUsize::new(0);

        let result = run_batches(
            &single_worker_pool(),
            &chunks,
            CHUNKS_PER_WORKER,
            &token,
            &ProgressBar::hidden(),
            |index, _| {
                visited.fetch_add(1, Ordering::SeqCst);
                if index == 10 {
                    token.cancel();
                }
                ChunkOutcome::Skipped
            },
        );

        assert!(matches!(result, Err(MatchError::Cancelled)));
        // The first batch runs to completion; nothing after it starts.
        assert_eq!(visited.load(Ordering::SeqCst), CHUNKS_PER_WORKER);
    }

    #[test]
    fn batches_keep_chunk_order() {
        let chunks: Vec<Chunk> = (0..150).map(|i| chunk("t", i as f64, &[60])).collect();
        let outcomes = run_batches(
            &single_worker_pool(),
            &chunks,
            CHUNKS_PER_WORKER,
            &CancelToken::new(),
            &ProgressBar::hidden(),
            |index, chunk| {
                ChunkOutcome::Failed(ChunkFailure {
                    chunk_index: index,
                    track_name: chunk.track_name.clone(),
                    message: String::new(),
                })
            },
        )
        .unwrap();

        let indices: Vec<usize> = outcomes
            .iter()
            .map(|o| match o {
                ChunkOutcome::Failed(f) => f.chunk_index,
                _ => usize::MAX,
            })
            .collect();
        assert_eq!(indices, (0..150).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_empty_semitone_range() {
        let mut cfg = config(1);
        cfg.semitone_range.clear();
        let result = search(&query(&[60]), &[chunk("a", 0.0, &[60])], &cfg);
        assert!(matches!(result, Err(MatchError::InvalidConfig(_))));
    }

    #[test]
    fn panicking_work_becomes_failure() {
        let outcome = guarded(7, "boom", || panic!("bad chunk"));
        match outcome {
            ChunkOutcome::Failed(f) => {
                assert_eq!(f.chunk_index, 7);
                assert_eq!(f.track_name, "boom");
                assert_eq!(f.message, "bad chunk");
            }
            _ => panic!("expected a failure"),
        }
        assert!(matches!(guarded(0, "ok", || None), ChunkOutcome::Skipped));
    }
}
