/// Median pitch, or `None` for an empty slice. Even-length slices take the
/// mean of the two middle values.
pub fn median(pitches: &[i32]) -> Option<f64> {
    if pitches.is_empty() {
        return None;
    }
    let mut sorted = pitches.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0)
    } else {
        Some(f64::from(sorted[mid]))
    }
}

/// Centre `pitches` on their median and raise them by `shift` semitones.
/// Returns `None` when there is no median to centre on.
pub fn normalize(pitches: &[i32], shift: i32) -> Option<Vec<f64>> {
    median(pitches).map(|m| normalize_around(pitches, m, shift))
}

/// Same as [`normalize`] with a precomputed median.
pub fn normalize_around(pitches: &[i32], median: f64, shift: i32) -> Vec<f64> {
    let offset = f64::from(shift) - median;
    pitches.iter().map(|&p| f64::from(p) + offset).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_and_even_medians() {
        assert_eq!(median(&[64, 60, 62]), Some(62.0));
        assert_eq!(median(&[60, 61, 70, 72]), Some(65.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn median_ignores_outliers() {
        assert_eq!(median(&[60, 61, 62, 127, 0]), Some(61.0));
    }

    #[test]
    fn normalized_sequence_is_key_free() {
        let low = normalize(&[60, 62, 64, 62, 60], 0).unwrap();
        let high = normalize(&[67, 69, 71, 69, 67], 0).unwrap();
        assert_eq!(low, high);
        assert_eq!(low, vec![-2.0, 0.0, 2.0, 0.0, -2.0]);
    }

    #[test]
    fn shift_raises_every_note() {
        let shifted = normalize(&[60, 62, 64], 1).unwrap();
        assert_eq!(shifted, vec![-1.0, 1.0, 3.0]);
        assert_eq!(normalize(&[60, 62, 64], -1).unwrap(), vec![-3.0, -1.0, 1.0]);
    }

    #[test]
    fn empty_has_no_normal_form() {
        assert_eq!(normalize(&[], 0), None);
    }
}
