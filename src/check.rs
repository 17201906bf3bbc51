//! Probability-ratio check: does a candidate subset look like the population?
//!
//! For every instrument we compare the subset's positive and negative rates
//! against the full corpus, restricted to cells that were actually annotated.
//! A candidate split side passes only if, for every instrument Y:
//!
//! ```text
//! P[Y present | x in subset] >= P[Y present] * lo   // positives not too rare
//! P[Y present | x in subset] <= P[Y present] * hi   // or too common
//! P[Y absent  | x in subset] >= P[Y absent]  * lo   // likewise for negatives
//! P[Y absent  | x in subset] <= P[Y absent]  * hi
//! ```
//!
//! with `lo = min(r, 1/r)` and `hi = max(r, 1/r)` for the configured
//! tolerance ratio `r`. Cells are counted over observed annotations only:
//! a never-annotated (sample, instrument) pair contributes to neither the
//! numerator nor the denominator.

use crate::labels::LabelMatrix;

/// Per-instrument positive/negative rates over some set of rows.
#[derive(Debug, Clone)]
pub struct ClassRates {
    positive: Vec<f64>,
    negative: Vec<f64>,
    observed: Vec<usize>,
}

impl ClassRates {
    /// Rates over a set of sample rows. Pass every row for the population
    /// rates; these are computed once per run and reused for every candidate.
    pub fn over_rows(matrix: &LabelMatrix, rows: impl IntoIterator<Item = usize>) -> Self {
        let n = matrix.n_instruments();
        let mut positives = vec![0usize; n];
        let mut observed = vec![0usize; n];
        for row in rows {
            for (instrument, value) in matrix.row_cells(row) {
                observed[instrument] += 1;
                if value > 0.0 {
                    positives[instrument] += 1;
                }
            }
        }
        let rate = |count: usize, total: usize| {
            if total == 0 { 0.0 } else { count as f64 / total as f64 }
        };
        ClassRates {
            positive: (0..n).map(|i| rate(positives[i], observed[i])).collect(),
            negative: (0..n).map(|i| rate(observed[i] - positives[i], observed[i])).collect(),
            observed,
        }
    }

    pub fn population(matrix: &LabelMatrix) -> Self {
        Self::over_rows(matrix, 0..matrix.n_samples())
    }
}

/// True if the subset's label distribution is within tolerance of the
/// population for every instrument.
///
/// An instrument with zero observed cells in the subset is vacuously within
/// tolerance: there is no rate to compare, and failing (or crashing on the
/// zero denominator) would reject otherwise sound candidates.
pub fn within_tolerance(
    matrix: &LabelMatrix,
    rows: &[usize],
    population: &ClassRates,
    prob_ratio: f64,
) -> bool {
    let (lo, hi) = if prob_ratio <= 1.0 / prob_ratio {
        (prob_ratio, 1.0 / prob_ratio)
    } else {
        (1.0 / prob_ratio, prob_ratio)
    };

    let subset = ClassRates::over_rows(matrix, rows.iter().copied());
    for instrument in 0..matrix.n_instruments() {
        if subset.observed[instrument] == 0 {
            continue;
        }
        let in_band = |sub: f64, pop: f64| lo * pop <= sub && sub <= hi * pop;
        if !in_band(subset.positive[instrument], population.positive[instrument])
            || !in_band(subset.negative[instrument], population.negative[instrument])
        {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::build_label_matrix;
    use crate::loader::{LabelRecord, MetadataRecord};

    fn matrix(rows: &[(&str, &str, &str, f64)]) -> LabelMatrix {
        let mut meta: Vec<MetadataRecord> = Vec::new();
        let mut labels = Vec::new();
        for &(sample_key, artist_id, instrument, relevance) in rows {
            if !meta.iter().any(|m: &MetadataRecord| m.sample_key == sample_key) {
                meta.push(MetadataRecord {
                    sample_key: sample_key.into(),
                    artist_id: artist_id.into(),
                });
            }
            labels.push(LabelRecord {
                sample_key: sample_key.into(),
                instrument: instrument.into(),
                relevance,
            });
        }
        build_label_matrix(&meta, &labels, None).unwrap().0
    }

    #[test]
    fn population_rates_skip_unobserved_cells() {
        let matrix = matrix(&[
            ("s1", "a", "guitar", 1.0),
            ("s2", "a", "guitar", -1.0),
            ("s3", "b", "guitar", 1.0),
            // voice is only annotated on two of three samples
            ("s1", "a", "voice", 1.0),
            ("s3", "b", "voice", 1.0),
        ]);
        let rates = ClassRates::population(&matrix);
        assert_eq!(rates.positive[0], 2.0 / 3.0);
        assert_eq!(rates.negative[0], 1.0 / 3.0);
        assert_eq!(rates.positive[1], 1.0);
        assert_eq!(rates.observed[1], 2);
    }

    #[test]
    fn balanced_subset_passes() {
        let matrix = matrix(&[
            ("s1", "a", "guitar", 1.0),
            ("s2", "a", "guitar", -1.0),
            ("s3", "b", "guitar", 1.0),
            ("s4", "b", "guitar", -1.0),
        ]);
        let population = ClassRates::population(&matrix);
        // {s1, s2} has exactly the population's 50/50 rate.
        assert!(within_tolerance(&matrix, &[0, 1], &population, 0.9));
        // {s1, s3} is all-positive, far outside a 0.9 band.
        assert!(!within_tolerance(&matrix, &[0, 2], &population, 0.9));
    }

    #[test]
    fn unobserved_instrument_in_subset_is_vacuously_ok() {
        let matrix = matrix(&[
            ("s1", "a", "guitar", 1.0),
            ("s2", "b", "guitar", -1.0),
            ("s3", "a", "voice", 1.0),
            ("s4", "b", "voice", 1.0),
        ]);
        let population = ClassRates::population(&matrix);
        // {s3, s4} has no guitar cells at all; only voice is checked.
        assert!(within_tolerance(&matrix, &[2, 3], &population, 0.9));
    }

    #[test]
    fn tolerance_band_is_symmetric_in_the_ratio() {
        let matrix = matrix(&[
            ("s1", "a", "guitar", 1.0),
            ("s2", "a", "guitar", 1.0),
            ("s3", "b", "guitar", 1.0),
            ("s4", "b", "guitar", -1.0),
        ]);
        let population = ClassRates::population(&matrix);
        // r and 1/r describe the same band.
        for rows in [[0usize, 3], [1, 2]] {
            assert_eq!(
                within_tolerance(&matrix, &rows, &population, 0.5),
                within_tolerance(&matrix, &rows, &population, 2.0),
            );
        }
    }
}
