use super::dtw;

/// Duration-weighted DTW distance between two normalised pitch sequences.
#[derive(Debug, Clone)]
pub struct AlignmentScorer {
    /// Scale each paired cost by how long the paired notes are held.
    pub use_duration_weighting: bool,
    /// Exponent `p` on the summed weights in `diff² · (w_a + w_b)^p`.
    pub weight_exponent: f64,
    /// Subtracted once per exactly-matching pair, times the pair's weight.
    pub reward_factor: f64,
    /// Band half-width for the multi-resolution alignment.
    pub radius: usize,
}

impl Default for AlignmentScorer {
    fn default() -> Self {
        Self {
            use_duration_weighting: true,
            weight_exponent: 2.0,
            reward_factor: 2.0,
            radius: 1,
        }
    }
}

impl AlignmentScorer {
    /// Distance between `query` and `reference` (lower is better, may be
    /// negative). `f64::INFINITY` when either side is empty.
    ///
    /// With weighting off this is the plain DTW cost. With weighting on,
    /// every pair on the alignment path contributes
    /// `diff² · (w_q + w_r)^p`, minus `reward_factor · (w_q + w_r)` when the
    /// two pitches are identical.
    pub fn distance(&self, query: &[f64], reference: &[f64]) -> f64 {
        let Some(alignment) = dtw::align(query, reference, self.radius) else {
            return f64::INFINITY;
        };

        if !self.use_duration_weighting {
            return alignment.cost;
        }

        let wq = duration_weights(query);
        let wr = duration_weights(reference);

        alignment
            .path
            .iter()
            .map(|&(i, j)| {
                let diff = query[i] - reference[j];
                let weight = wq[i] + wr[j];
                let mut d = diff * diff * weight.powf(self.weight_exponent);
                if query[i] == reference[j] {
                    d -= self.reward_factor * weight;
                }
                d
            })
            .sum()
    }
}

/// Weight of each note = length of the run of identical pitches it sits in,
/// scaled so the weights sum to 1.
pub fn duration_weights(pitches: &[f64]) -> Vec<f64> {
    let mut weights = Vec::with_capacity(pitches.len());
    let mut start = 0;
    while start < pitches.len() {
        let run = pitches[start..]
            .iter()
            .take_while(|&&p| p == pitches[start])
            .count();
        weights.extend(std::iter::repeat_n(run as f64, run));
        start += run;
    }

    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in &mut weights {
            *w /= total;
        }
    }
    weights
}
