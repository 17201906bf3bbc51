//! Builds the sample- and artist-level label matrices from the raw tables.
//!
//! The label matrix is sparse: a (sample, instrument) cell is either an
//! observed relevance score or absent entirely. Absent is *not* zero -- a
//! zero would mean "annotators looked and were evenly split", while absence
//! means nobody was asked. Both matrices are built once per run and never
//! mutated afterwards.
//!
//! Samples without any annotation are dropped by the metadata/label join.
//! This is intentional: an unannotated sample cannot contribute to the
//! probability check and has no dominant label to stratify on, so it simply
//! never appears in any split.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::config::NEGATIVE_LABEL;
use crate::error::PrepError;
use crate::loader::{DedupeRecord, LabelRecord, MetadataRecord};

/// Sparse sample x instrument relevance matrix.
///
/// Rows follow the metadata file order (restricted to samples that survived
/// the join); instrument columns are in lexicographic order.
#[derive(Debug)]
pub struct LabelMatrix {
    sample_keys: Vec<String>,
    artist_ids: Vec<String>,
    instruments: Vec<String>,
    cells: BTreeMap<(usize, usize), f64>,
}

impl LabelMatrix {
    pub fn n_samples(&self) -> usize {
        self.sample_keys.len()
    }

    pub fn n_instruments(&self) -> usize {
        self.instruments.len()
    }

    pub fn sample_keys(&self) -> &[String] {
        &self.sample_keys
    }

    pub fn artist_ids(&self) -> &[String] {
        &self.artist_ids
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Observed relevance for one cell, or `None` if it was never annotated.
    pub fn get(&self, row: usize, instrument: usize) -> Option<f64> {
        self.cells.get(&(row, instrument)).copied()
    }

    /// All observed cells of one sample row, as (instrument column, value).
    pub fn row_cells(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cells
            .range((row, 0)..(row + 1, 0))
            .map(|(&(_, instrument), &value)| (instrument, value))
    }
}

/// Artist x instrument matrix: each cell is the mean of that artist's
/// observed sample cells for the instrument. Carries one extra column,
/// [`NEGATIVE_LABEL`], which is always observed (0.0 or 1.0) and sits last.
#[derive(Debug)]
pub struct ArtistLabels {
    artist_ids: Vec<String>,
    columns: Vec<String>,
    cells: BTreeMap<(usize, usize), f64>,
}

impl ArtistLabels {
    pub fn n_artists(&self) -> usize {
        self.artist_ids.len()
    }

    pub fn artist_ids(&self) -> &[String] {
        &self.artist_ids
    }

    /// Instrument columns plus the trailing negative column.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, artist: usize, column: usize) -> Option<f64> {
        self.cells.get(&(artist, column)).copied()
    }

    /// The dominant label per artist, as a column index.
    ///
    /// This is the stratification key and nothing more; it is never persisted
    /// as ground truth. Ties are broken by column order (instruments
    /// lexicographically, the negative column last): the first column
    /// attaining the maximum wins, which keeps the assignment deterministic.
    pub fn dominant_labels(&self) -> Vec<usize> {
        let mut labels = Vec::with_capacity(self.artist_ids.len());
        for artist in 0..self.artist_ids.len() {
            let mut best: Option<(usize, f64)> = None;
            for column in 0..self.columns.len() {
                if let Some(value) = self.get(artist, column) {
                    match best {
                        Some((_, max)) if value <= max => {}
                        _ => best = Some((column, value)),
                    }
                }
            }
            // The negative column is observed for every artist, so `best`
            // can never be empty here.
            labels.push(best.map(|(column, _)| column).unwrap_or(self.columns.len() - 1));
        }
        labels
    }
}

/// Joins metadata with the sparse labels and derives both matrices.
///
/// If a de-duplication table is supplied, it overrides the artist id of every
/// sample it names; samples it does not name keep their metadata artist id,
/// and a row naming an unknown sample key is a configuration error.
pub fn build_label_matrix(
    metadata: &[MetadataRecord],
    labels: &[LabelRecord],
    dedupe: Option<&[DedupeRecord]>,
) -> Result<(LabelMatrix, ArtistLabels), PrepError> {
    // Resolve each sample's artist, applying dedupe overrides.
    let mut artist_of: HashMap<&str, &str> = HashMap::with_capacity(metadata.len());
    for record in metadata {
        if artist_of.insert(&record.sample_key, &record.artist_id).is_some() {
            return Err(PrepError::Data(format!(
                "duplicate sample_key in metadata: {}",
                record.sample_key
            )));
        }
    }
    if let Some(dedupe) = dedupe {
        for record in dedupe {
            match artist_of.get_mut(record.sample_key.as_str()) {
                Some(artist) => *artist = &record.artist_id,
                None => {
                    return Err(PrepError::Config(format!(
                        "dedupe table references unknown sample_key: {}",
                        record.sample_key
                    )));
                }
            }
        }
    }

    // Instrument columns come from the union of all annotations, sorted.
    let instrument_set: BTreeSet<&str> =
        labels.iter().map(|record| record.instrument.as_str()).collect();
    let instruments: Vec<String> = instrument_set.iter().map(|s| s.to_string()).collect();
    let instrument_index: HashMap<&str, usize> = instrument_set
        .iter()
        .enumerate()
        .map(|(i, &name)| (name, i))
        .collect();

    // Group annotations by sample. Upstream aggregation should leave at most
    // one score per (sample, instrument); if duplicates slip through anyway
    // we average them, matching a mean-aggregating pivot.
    let mut by_sample: HashMap<&str, BTreeMap<usize, (f64, usize)>> = HashMap::new();
    for record in labels {
        if !artist_of.contains_key(record.sample_key.as_str()) {
            // Label for a sample the metadata does not know about; the inner
            // join drops it.
            continue;
        }
        let instrument = instrument_index[record.instrument.as_str()];
        let entry = by_sample
            .entry(&record.sample_key)
            .or_default()
            .entry(instrument)
            .or_insert((0.0, 0));
        entry.0 += record.relevance;
        entry.1 += 1;
    }

    // Inner join: keep metadata rows (in file order) that have annotations.
    let mut sample_keys = Vec::new();
    let mut artist_ids = Vec::new();
    let mut cells = BTreeMap::new();
    for record in metadata {
        let Some(observed) = by_sample.get(record.sample_key.as_str()) else {
            continue;
        };
        let row = sample_keys.len();
        for (&instrument, &(sum, count)) in observed {
            cells.insert((row, instrument), sum / count as f64);
        }
        sample_keys.push(record.sample_key.clone());
        artist_ids.push(artist_of[record.sample_key.as_str()].to_string());
    }

    if sample_keys.is_empty() {
        return Err(PrepError::Data(
            "metadata/label join produced no rows; do the sample keys match?".into(),
        ));
    }

    let matrix = LabelMatrix {
        sample_keys,
        artist_ids,
        instruments,
        cells,
    };

    // Stratification needs at least two artists per instrument.
    let mut artists_per_instrument: Vec<HashSet<&str>> =
        vec![HashSet::new(); matrix.instruments.len()];
    for (&(row, instrument), _) in &matrix.cells {
        artists_per_instrument[instrument].insert(&matrix.artist_ids[row]);
    }
    for (instrument, artists) in matrix.instruments.iter().zip(&artists_per_instrument) {
        if artists.len() < 2 {
            return Err(PrepError::Data(format!(
                "instrument '{}' is annotated for only {} artist(s); \
                 at least 2 are required for stratification",
                instrument,
                artists.len()
            )));
        }
    }

    let artists = build_artist_labels(&matrix);
    Ok((matrix, artists))
}

/// Collapse the sample-level matrix to one row per artist by averaging each
/// artist's observed cells per instrument, then attach the negative column.
fn build_artist_labels(matrix: &LabelMatrix) -> ArtistLabels {
    let mut rows_by_artist: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (row, artist) in matrix.artist_ids.iter().enumerate() {
        rows_by_artist.entry(artist).or_default().push(row);
    }

    let artist_ids: Vec<String> = rows_by_artist.keys().map(|s| s.to_string()).collect();
    let mut columns = matrix.instruments.to_vec();
    columns.push(NEGATIVE_LABEL.to_string());
    let negative_column = columns.len() - 1;

    let mut cells = BTreeMap::new();
    for (artist, (_, rows)) in rows_by_artist.iter().enumerate() {
        // Mean over observed cells only; an instrument nobody annotated for
        // this artist stays unobserved at the artist level too.
        let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
        for &row in rows {
            for (instrument, value) in matrix.row_cells(row) {
                let entry = sums.entry(instrument).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        let mut row_max: Option<f64> = None;
        for (instrument, (sum, count)) in sums {
            let mean = sum / count as f64;
            row_max = Some(row_max.map_or(mean, |m: f64| m.max(mean)));
            cells.insert((artist, instrument), mean);
        }
        // Artists with no positive association (or, defensively, no observed
        // cells at all) become negative examples so that every artist has a
        // dominant label.
        let negative = match row_max {
            Some(max) if max >= 0.0 => 0.0,
            _ => 1.0,
        };
        cells.insert((artist, negative_column), negative);
    }

    ArtistLabels {
        artist_ids,
        columns,
        cells,
    }
}
