use super::Candidate;
use std::collections::HashSet;

/// Rank candidates by ascending distance and keep the best one per track,
/// stopping once `top_n` tracks are collected.
///
/// The sort is stable, so equal distances keep their enumeration order and the
/// result never depends on which worker finished first.
pub fn select_top(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let mut seen: HashSet<String> = HashSet::new();
    let mut selected = Vec::with_capacity(top_n.min(candidates.len()));
    for candidate in candidates {
        if selected.len() == top_n {
            break;
        }
        if seen.insert(candidate.track_name.clone()) {
            selected.push(candidate);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(track: &str, distance: f64, start_time: f64) -> Candidate {
        Candidate {
            distance,
            start_time,
            semitone_shift: 0,
            median_pitch_difference: 0,
            track_name: track.to_string(),
        }
    }

    #[test]
    fn keeps_best_chunk_per_track() {
        let candidates = vec![
            candidate("a", 3.0, 0.0),
            candidate("b", 1.5, 10.0),
            candidate("a", 0.5, 20.0),
            candidate("b", 4.0, 30.0),
            candidate("a", 2.0, 40.0),
        ];
        let top = select_top(candidates, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].track_name, "a");
        assert_eq!(top[0].start_time, 20.0);
        assert_eq!(top[1].track_name, "b");
        assert_eq!(top[1].start_time, 10.0);
    }

    #[test]
    fn output_is_sorted_and_unique() {
        let candidates: Vec<Candidate> = (0..40)
            .map(|i| candidate(&format!("t{}", i % 7), ((i * 37) % 23) as f64 - 5.0, i as f64))
            .collect();
        let top = select_top(candidates, 5);
        assert_eq!(top.len(), 5);
        assert!(top.windows(2).all(|w| w[0].distance <= w[1].distance));
        let names: HashSet<&str> = top.iter().map(|c| c.track_name.as_str()).collect();
        assert_eq!(names.len(), top.len());
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let candidates = vec![
            candidate("x", 1.0, 0.0),
            candidate("y", 1.0, 0.0),
            candidate("x", 1.0, 10.0),
        ];
        let top = select_top(candidates, 3);
        let names: Vec<&str> = top.iter().map(|c| c.track_name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(top[0].start_time, 0.0);
    }

    #[test]
    fn unmatchable_candidates_sort_last() {
        let candidates = vec![
            candidate("inf", f64::INFINITY, 0.0),
            candidate("neg", -3.0, 0.0),
            candidate("pos", 2.0, 0.0),
        ];
        let names: Vec<String> = select_top(candidates, 10)
            .into_iter()
            .map(|c| c.track_name)
            .collect();
        assert_eq!(names, vec!["neg", "pos", "inf"]);
    }

    #[test]
    fn empty_and_zero_requests() {
        assert!(select_top(Vec::new(), 3).is_empty());
        assert!(select_top(vec![candidate("a", 0.0, 0.0)], 0).is_empty());
    }
}
