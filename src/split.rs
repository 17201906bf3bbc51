//! Constrained stratified train/test partitioning.
//!
//! Splitting happens at the artist level so that no artist ever has samples
//! on both sides of the boundary. Candidates are drawn by stratified
//! shuffling (one stratum per dominant label), then kept only if both sides
//! pass the probability-ratio check against the full sample-level matrix.
//!
//! The sampling procedure is deliberately simple and fully specified, so a
//! run is reproducible from its seed:
//!
//! 1. One `ChaCha20Rng` is seeded from the configured seed and consumed
//!    strictly sequentially, candidate by candidate.
//! 2. Strata are processed in matrix column order (instruments
//!    lexicographically, the negative label last).
//! 3. Each stratum's train quota comes from largest-remainder apportionment
//!    of `round(train_ratio * n_artists)`, then gets clamped to
//!    `[1, stratum_size - 1]` so neither side of any stratum is empty.
//! 4. Per candidate, each stratum's artist list is Fisher-Yates shuffled and
//!    the first `quota` artists go to train, the rest to test.
//!
//! The search is bounded: after `num_splits * OVERSAMPLE_FACTOR` candidates
//! the partitioner gives up with an error rather than looping forever or
//! returning fewer splits than requested.

use std::collections::{HashMap, HashSet};

use indicatif::ProgressBar;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;

use crate::check::{ClassRates, within_tolerance};
use crate::config::OVERSAMPLE_FACTOR;
use crate::error::PrepError;
use crate::labels::{ArtistLabels, LabelMatrix};

/// Partitioning parameters. `seed` makes runs reproducible; `train_ratio` is
/// the fraction of artists assigned to the train side; `prob_ratio` is the
/// tolerance of the probability-ratio check.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub seed: u64,
    pub num_splits: usize,
    pub train_ratio: f64,
    pub prob_ratio: f64,
}

impl SplitConfig {
    pub fn validate(&self) -> Result<(), PrepError> {
        if self.num_splits < 1 {
            return Err(PrepError::Config("num_splits must be at least 1".into()));
        }
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(PrepError::Config(format!(
                "train_ratio must be in (0, 1), got {}",
                self.train_ratio
            )));
        }
        if !(self.prob_ratio > 0.0 && self.prob_ratio <= 1.0) {
            return Err(PrepError::Config(format!(
                "probability ratio must be in (0, 1], got {}",
                self.prob_ratio
            )));
        }
        Ok(())
    }
}

/// One accepted train/test partition: lexicographically sorted, disjoint
/// sample-key lists. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<String>,
    pub test: Vec<String>,
}

/// Lazily yields stratified candidate splits over artist row indices,
/// up to a fixed budget.
struct CandidateSplits {
    strata: Vec<Vec<usize>>,
    quotas: Vec<usize>,
    rng: ChaCha20Rng,
    remaining: usize,
}

impl CandidateSplits {
    fn new(
        artists: &ArtistLabels,
        config: &SplitConfig,
        budget: usize,
    ) -> Result<Self, PrepError> {
        // Group artists by dominant label, keeping column order.
        let dominant = artists.dominant_labels();
        let mut by_label: Vec<Vec<usize>> = vec![Vec::new(); artists.columns().len()];
        for (artist, &label) in dominant.iter().enumerate() {
            by_label[label].push(artist);
        }
        let strata: Vec<Vec<usize>> = by_label.into_iter().filter(|s| !s.is_empty()).collect();

        for stratum in &strata {
            if stratum.len() < 2 {
                let artist = &artists.artist_ids()[stratum[0]];
                return Err(PrepError::Data(format!(
                    "artist '{artist}' is alone in its stratum; \
                     every dominant label needs at least 2 artists"
                )));
            }
        }

        let quotas = train_quotas(&strata, config.train_ratio);
        Ok(CandidateSplits {
            strata,
            quotas,
            rng: ChaCha20Rng::seed_from_u64(config.seed),
            remaining: budget,
        })
    }
}

impl Iterator for CandidateSplits {
    /// (train, test) artist row indices.
    type Item = (Vec<usize>, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let mut train = Vec::new();
        let mut test = Vec::new();
        for (stratum, &quota) in self.strata.iter().zip(&self.quotas) {
            let mut shuffled = stratum.clone();
            shuffled.shuffle(&mut self.rng);
            train.extend_from_slice(&shuffled[..quota]);
            test.extend_from_slice(&shuffled[quota..]);
        }
        Some((train, test))
    }
}

/// Largest-remainder apportionment of the train quota across strata.
///
/// Every stratum keeps at least one artist on each side, so the realized
/// ratio can deviate slightly from the requested one when strata are tiny.
fn train_quotas(strata: &[Vec<usize>], train_ratio: f64) -> Vec<usize> {
    let total: usize = strata.iter().map(|s| s.len()).sum();
    let target = (train_ratio * total as f64).round() as usize;

    let mut quotas: Vec<usize> = Vec::with_capacity(strata.len());
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(strata.len());
    for (i, stratum) in strata.iter().enumerate() {
        let exact = train_ratio * stratum.len() as f64;
        quotas.push((exact.floor() as usize).clamp(1, stratum.len() - 1));
        remainders.push((i, exact.fract()));
    }

    // Hand out leftover seats to the largest remainders first, skipping
    // strata that are already at their cap; ties go to the earlier stratum
    // so the allocation stays deterministic.
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut assigned: usize = quotas.iter().sum();
    for &(i, _) in &remainders {
        if assigned >= target {
            break;
        }
        if quotas[i] < strata[i].len() - 1 {
            quotas[i] += 1;
            assigned += 1;
        }
    }
    // Clamping tiny strata up to 1 can overshoot; take those seats back from
    // the smallest remainders that still have room.
    for &(i, _) in remainders.iter().rev() {
        if assigned <= target {
            break;
        }
        if quotas[i] > 1 {
            quotas[i] -= 1;
            assigned -= 1;
        }
    }
    quotas
}

/// Search for `num_splits` acceptable partitions.
///
/// All-or-nothing: either every requested split is found and returned, or
/// the whole run fails. If a progress bar is supplied it advances once per
/// accepted split.
pub fn make_partitions(
    matrix: &LabelMatrix,
    artists: &ArtistLabels,
    config: &SplitConfig,
    progress: Option<&ProgressBar>,
) -> Result<Vec<Split>, PrepError> {
    config.validate()?;

    let budget = config.num_splits * OVERSAMPLE_FACTOR;
    let population = ClassRates::population(matrix);

    // Expansion table: artist id -> sample rows.
    let mut rows_by_artist: HashMap<&str, Vec<usize>> = HashMap::new();
    for (row, artist) in matrix.artist_ids().iter().enumerate() {
        rows_by_artist.entry(artist).or_default().push(row);
    }

    let mut accepted = Vec::with_capacity(config.num_splits);
    for (train_artists, test_artists) in CandidateSplits::new(artists, config, budget)? {
        let (train_rows, train_keys) = expand(matrix, artists, &rows_by_artist, &train_artists);
        let (test_rows, test_keys) = expand(matrix, artists, &rows_by_artist, &test_artists);

        // Partitioning whole artists makes overlap structurally impossible,
        // but a corrupt dedupe table would break that quietly, so check.
        let train_set: HashSet<&str> = train_keys.iter().map(|k| k.as_str()).collect();
        if let Some(common) = test_keys.iter().find(|k| train_set.contains(k.as_str())) {
            return Err(PrepError::InvariantViolation(format!(
                "sample '{common}' appears in both train and test"
            )));
        }

        if within_tolerance(matrix, &train_rows, &population, config.prob_ratio)
            && within_tolerance(matrix, &test_rows, &population, config.prob_ratio)
        {
            accepted.push(Split {
                train: train_keys,
                test: test_keys,
            });
            if let Some(pb) = progress {
                pb.inc(1);
            }
            if accepted.len() == config.num_splits {
                return Ok(accepted);
            }
        }
    }

    Err(PrepError::InsufficientSplits {
        requested: config.num_splits,
        accepted: accepted.len(),
        budget,
    })
}

/// Expand an artist-level assignment to sample rows and sorted sample keys.
fn expand(
    matrix: &LabelMatrix,
    artists: &ArtistLabels,
    rows_by_artist: &HashMap<&str, Vec<usize>>,
    artist_indices: &[usize],
) -> (Vec<usize>, Vec<String>) {
    let mut rows = Vec::new();
    for &artist in artist_indices {
        if let Some(artist_rows) = rows_by_artist.get(artists.artist_ids()[artist].as_str()) {
            rows.extend_from_slice(artist_rows);
        }
    }
    let mut keys: Vec<String> = rows
        .iter()
        .map(|&row| matrix.sample_keys()[row].clone())
        .collect();
    keys.sort();
    (rows, keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::build_label_matrix;
    use crate::loader::{LabelRecord, MetadataRecord};

    fn fixture(
        meta: &[(&str, &str)],
        labels: &[(&str, &str, f64)],
    ) -> (LabelMatrix, ArtistLabels) {
        let meta: Vec<MetadataRecord> = meta
            .iter()
            .map(|&(sample_key, artist_id)| MetadataRecord {
                sample_key: sample_key.into(),
                artist_id: artist_id.into(),
            })
            .collect();
        let labels: Vec<LabelRecord> = labels
            .iter()
            .map(|&(sample_key, instrument, relevance)| LabelRecord {
                sample_key: sample_key.into(),
                instrument: instrument.into(),
                relevance,
            })
            .collect();
        build_label_matrix(&meta, &labels, None).unwrap()
    }

    /// Two artists with five samples each, a 50% positive guitar rate in the
    /// population, and voice everywhere as the shared dominant label.
    fn two_artist_fixture() -> (LabelMatrix, ArtistLabels) {
        let meta = [
            ("a0", "a"), ("a1", "a"), ("a2", "a"), ("a3", "a"), ("a4", "a"),
            ("b0", "b"), ("b1", "b"), ("b2", "b"), ("b3", "b"), ("b4", "b"),
        ];
        let mut labels = vec![
            ("a0", "guitar", 1.0), ("a1", "guitar", 1.0), ("a2", "guitar", 1.0),
            ("a3", "guitar", -1.0), ("a4", "guitar", -1.0),
            ("b0", "guitar", 1.0), ("b1", "guitar", 1.0),
            ("b2", "guitar", -1.0), ("b3", "guitar", -1.0), ("b4", "guitar", -1.0),
        ];
        for (sample_key, _) in meta {
            labels.push((sample_key, "voice", 1.0));
        }
        fixture(&meta, &labels)
    }

    fn config(num_splits: usize, prob_ratio: f64) -> SplitConfig {
        SplitConfig {
            seed: 20180903,
            num_splits,
            train_ratio: 0.75,
            prob_ratio,
        }
    }

    #[test]
    fn rejects_bad_config() {
        let bad = [
            SplitConfig { num_splits: 0, ..config(1, 0.5) },
            SplitConfig { train_ratio: 0.0, ..config(1, 0.5) },
            SplitConfig { train_ratio: 1.0, ..config(1, 0.5) },
            SplitConfig { prob_ratio: 0.0, ..config(1, 0.5) },
            SplitConfig { prob_ratio: 1.5, ..config(1, 0.5) },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(PrepError::Config(_))));
        }
    }

    #[test]
    fn synthetic_scenario_yields_one_balanced_split() {
        let (matrix, artists) = two_artist_fixture();
        let splits = make_partitions(&matrix, &artists, &config(1, 0.5), None).unwrap();

        assert_eq!(splits.len(), 1);
        let split = &splits[0];
        // One artist per side, five samples each.
        assert_eq!(split.train.len(), 5);
        assert_eq!(split.test.len(), 5);

        // Both sides' guitar rates sit inside [0.5 * 0.5, 2 * 0.5] of the
        // 0.5 population rate: 0.6 and 0.4.
        let population = ClassRates::population(&matrix);
        for side in [&split.train, &split.test] {
            let rows: Vec<usize> = matrix
                .sample_keys()
                .iter()
                .enumerate()
                .filter(|(_, k)| side.contains(k))
                .map(|(row, _)| row)
                .collect();
            assert!(within_tolerance(&matrix, &rows, &population, 0.5));
        }
    }

    #[test]
    fn splits_are_disjoint_and_sorted() {
        let (matrix, artists) = two_artist_fixture();
        let splits = make_partitions(&matrix, &artists, &config(1, 0.5), None).unwrap();
        let split = &splits[0];

        let train: HashSet<_> = split.train.iter().collect();
        assert!(split.test.iter().all(|k| !train.contains(k)));
        assert!(split.train.windows(2).all(|w| w[0] < w[1]));
        assert!(split.test.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn coverage_never_exceeds_the_population() {
        let (matrix, artists) = two_artist_fixture();
        let splits = make_partitions(&matrix, &artists, &config(1, 0.5), None).unwrap();
        let split = &splits[0];
        assert!(split.train.len() + split.test.len() <= matrix.n_samples());
    }

    #[test]
    fn same_seed_reproduces_the_same_splits() {
        let (matrix, artists) = two_artist_fixture();
        let first = make_partitions(&matrix, &artists, &config(1, 0.5), None).unwrap();
        let second = make_partitions(&matrix, &artists, &config(1, 0.5), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn impossible_tolerance_exhausts_the_budget() {
        // Four artists in one stratum; any 3/1 split of the skewed guitar
        // labels lands far outside a near-exact tolerance band.
        let meta = [("s1", "a"), ("s2", "b"), ("s3", "c"), ("s4", "d")];
        let mut labels = vec![
            ("s1", "guitar", 1.0),
            ("s2", "guitar", 1.0),
            ("s3", "guitar", 1.0),
            ("s4", "guitar", -1.0),
        ];
        for (sample_key, _) in meta {
            // Strictly above every guitar score, so all four artists share
            // the voice stratum.
            labels.push((sample_key, "voice", 2.0));
        }
        let (matrix, artists) = fixture(&meta, &labels);

        let result = make_partitions(&matrix, &artists, &config(1, 0.999999), None);
        match result {
            Err(PrepError::InsufficientSplits { requested, accepted, budget }) => {
                assert_eq!(requested, 1);
                assert_eq!(accepted, 0);
                assert_eq!(budget, OVERSAMPLE_FACTOR);
            }
            other => panic!("expected InsufficientSplits, got {other:?}"),
        }
    }

    #[test]
    fn singleton_stratum_is_a_data_error() {
        // Artist c is the only all-negative artist, so it sits alone in the
        // `_negative` stratum.
        let meta = [("s1", "a"), ("s2", "b"), ("s3", "c"), ("s4", "a"), ("s5", "b")];
        let labels = [
            ("s1", "guitar", 1.0),
            ("s2", "guitar", 1.0),
            ("s3", "guitar", -1.0),
            ("s4", "voice", 1.0),
            ("s5", "voice", 1.0),
        ];
        let (matrix, artists) = fixture(&meta, &labels);
        let result = make_partitions(&matrix, &artists, &config(1, 0.5), None);
        assert!(matches!(result, Err(PrepError::Data(_))));
    }

    #[test]
    fn quotas_respect_ratio_and_leave_both_sides_nonempty() {
        let strata = vec![
            (0..8).collect::<Vec<_>>(),
            (8..12).collect::<Vec<_>>(),
        ];
        let quotas = train_quotas(&strata, 0.75);
        assert_eq!(quotas, vec![6, 3]); // round(0.75 * 12) = 9 seats
        for (quota, stratum) in quotas.iter().zip(&strata) {
            assert!(*quota >= 1 && *quota <= stratum.len() - 1);
        }
    }

    #[test]
    fn tiny_strata_clamp_rather_than_empty_a_side() {
        // 0.9 of a 2-artist stratum would round to both artists; the quota
        // clamps so the test side keeps one.
        let strata = vec![vec![0, 1], vec![2, 3]];
        assert_eq!(train_quotas(&strata, 0.9), vec![1, 1]);
    }
}
