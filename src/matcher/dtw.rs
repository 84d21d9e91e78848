//! Dynamic time warping over 1-D pitch sequences.
//!
//! Long sequences use the multi-resolution approximation (FastDTW): align
//! half-resolution copies, project the coarse path back onto the full grid,
//! widen it by `radius` cells and run DTW restricted to that band. Short
//! sequences are aligned exactly.
//!
//! Tie-breaking is fixed (vertical, then horizontal, then diagonal
//! predecessor) so the same inputs always produce the same path.

/// Sequences shorter than this on either side are aligned exactly.
pub const EXACT_BELOW: usize = 16;

/// An alignment path from `(0, 0)` to `(n - 1, m - 1)` and its summed cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub cost: f64,
    pub path: Vec<(usize, usize)>,
}

#[derive(Clone, Copy)]
enum Step {
    Start,
    Up,
    Left,
    Diagonal,
}

#[inline]
fn local_cost(a: f64, b: f64) -> f64 {
    (a - b) * (a - b)
}

/// Align `x` against `y` with squared-difference local cost.
/// Returns `None` if either sequence is empty.
pub fn align(x: &[f64], y: &[f64], radius: usize) -> Option<Alignment> {
    if x.is_empty() || y.is_empty() {
        return None;
    }
    Some(fast_dtw(x, y, radius))
}

/// Exact DTW over the full grid.
pub fn full_dtw(x: &[f64], y: &[f64]) -> Option<Alignment> {
    if x.is_empty() || y.is_empty() {
        return None;
    }
    let window = vec![(0, y.len() - 1); x.len()];
    windowed_dtw(x, y, &window)
}

fn fast_dtw(x: &[f64], y: &[f64], radius: usize) -> Alignment {
    let min_len = (radius + 2).max(EXACT_BELOW);
    let exact = || {
        full_dtw(x, y).unwrap_or(Alignment {
            cost: f64::INFINITY,
            path: Vec::new(),
        })
    };
    if x.len() < min_len || y.len() < min_len {
        return exact();
    }

    let coarse = fast_dtw(&reduce_by_half(x), &reduce_by_half(y), radius);
    let window = expand_window(&coarse.path, x.len(), y.len(), radius);
    // A band that does not connect the corners cannot happen for a valid
    // coarse path; fall back to the exact grid rather than fail.
    windowed_dtw(x, y, &window).unwrap_or_else(exact)
}

fn reduce_by_half(x: &[f64]) -> Vec<f64> {
    x.chunks_exact(2).map(|p| (p[0] + p[1]) / 2.0).collect()
}

/// Project a coarse path onto a grid of `len_x × len_y`, widened by `radius`.
/// Returns one inclusive column range per row.
fn expand_window(
    path: &[(usize, usize)],
    len_x: usize,
    len_y: usize,
    radius: usize,
) -> Vec<(usize, usize)> {
    // A monotone path widened by `radius` covers one contiguous column span
    // per coarse row.
    let coarse_rows = len_x.div_ceil(2);
    let mut spans: Vec<Option<(usize, usize)>> = vec![None; coarse_rows];
    for &(i, j) in path {
        let (lo, hi) = (j.saturating_sub(radius), j + radius);
        for span in spans
            .iter_mut()
            .take(i + radius + 1)
            .skip(i.saturating_sub(radius))
        {
            *span = Some(match *span {
                Some((a, b)) => (a.min(lo), b.max(hi)),
                None => (lo, hi),
            });
        }
    }

    let mut window = Vec::with_capacity(len_x);
    let mut start_j = 0;
    for i in 0..len_x {
        let row = spans[i / 2]
            .map(|(lo, hi)| ((2 * lo).max(start_j), (2 * hi + 1).min(len_y - 1)))
            .filter(|&(lo, hi)| lo <= hi);
        match row {
            Some((lo, hi)) => {
                window.push((lo, hi));
                start_j = lo;
            }
            None => window.push((start_j, len_y - 1)),
        }
    }
    window
}

/// Per-row column ranges with their cells stored back to back, so a narrow
/// band costs memory in proportion to its width rather than to `n × m`.
struct Band {
    rows: Vec<(usize, usize)>,
    offsets: Vec<usize>,
    cells: usize,
}

impl Band {
    fn new(window: &[(usize, usize)], m: usize) -> Self {
        let rows: Vec<(usize, usize)> = window
            .iter()
            .map(|&(lo, hi)| (lo, hi.min(m - 1)))
            .collect();
        let mut offsets = Vec::with_capacity(rows.len());
        let mut cells = 0;
        for &(lo, hi) in &rows {
            offsets.push(cells);
            cells += (hi + 1).saturating_sub(lo);
        }
        Self {
            rows,
            offsets,
            cells,
        }
    }

    fn index(&self, i: usize, j: usize) -> Option<usize> {
        let (lo, hi) = self.rows[i];
        (lo <= j && j <= hi).then(|| self.offsets[i] + j - lo)
    }

    /// Accumulated cost at `(i, j)`, infinite outside the band.
    fn cost(&self, acc: &[f64], i: usize, j: usize) -> f64 {
        self.index(i, j).map_or(f64::INFINITY, |k| acc[k])
    }
}

/// DTW restricted to `window[i] = (lo, hi)` columns per row.
/// `None` if the band does not connect `(0, 0)` to the far corner.
fn windowed_dtw(x: &[f64], y: &[f64], window: &[(usize, usize)]) -> Option<Alignment> {
    let (n, m) = (x.len(), y.len());
    debug_assert_eq!(window.len(), n);
    let band = Band::new(window, m);
    let mut acc = vec![f64::INFINITY; band.cells];
    let mut steps = vec![Step::Start; band.cells];

    for i in 0..n {
        let (lo, hi) = band.rows[i];
        for j in lo..=hi {
            let here = band.offsets[i] + j - lo;
            let cost = local_cost(x[i], y[j]);
            if i == 0 && j == 0 {
                acc[here] = cost;
                continue;
            }
            let mut best = f64::INFINITY;
            let mut step = Step::Start;
            if i > 0 && band.cost(&acc, i - 1, j) < best {
                best = band.cost(&acc, i - 1, j);
                step = Step::Up;
            }
            if j > 0 && band.cost(&acc, i, j - 1) < best {
                best = band.cost(&acc, i, j - 1);
                step = Step::Left;
            }
            if i > 0 && j > 0 && band.cost(&acc, i - 1, j - 1) < best {
                best = band.cost(&acc, i - 1, j - 1);
                step = Step::Diagonal;
            }
            acc[here] = best + cost;
            steps[here] = step;
        }
    }

    let cost = band.cost(&acc, n - 1, m - 1);
    if !cost.is_finite() {
        return None;
    }

    let mut path = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n - 1, m - 1);
    path.push((i, j));
    while i > 0 || j > 0 {
        match steps[band.index(i, j)?] {
            Step::Up => i -= 1,
            Step::Left => j -= 1,
            Step::Diagonal => {
                i -= 1;
                j -= 1;
            }
            Step::Start => return None,
        }
        path.push((i, j));
    }
    path.reverse();

    Some(Alignment { cost, path })
}
