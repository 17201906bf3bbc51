//! CSV record types and readers for the three input tables.
//!
//! All readers take an `io::Read` rather than a path so the rest of the
//! pipeline can be exercised from in-memory fixtures; the binaries open the
//! actual files. Extra columns in the input CSVs (the released metadata file
//! carries track titles, URLs, and so on) are ignored by serde.

use std::io;

use serde::Deserialize;

use crate::error::PrepError;

/// One row of `metadata.csv`: a sample and the artist it belongs to.
/// `sample_key` is unique across the corpus.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataRecord {
    pub sample_key: String,
    pub artist_id: String,
}

/// One row of the sparse label table: an already-aggregated relevance score
/// for a (sample, instrument) pair. Relevance is signed: `> 0` means the
/// instrument is present, `<= 0` means it is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelRecord {
    pub sample_key: String,
    pub instrument: String,
    pub relevance: f64,
}

/// One row of the optional de-duplication table, overriding the artist id
/// a sample was originally credited to.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupeRecord {
    pub sample_key: String,
    pub artist_id: String,
}

pub fn read_metadata<R: io::Read>(reader: R) -> Result<Vec<MetadataRecord>, PrepError> {
    read_records(reader)
}

pub fn read_labels<R: io::Read>(reader: R) -> Result<Vec<LabelRecord>, PrepError> {
    read_records(reader)
}

pub fn read_dedupe<R: io::Read>(reader: R) -> Result<Vec<DedupeRecord>, PrepError> {
    read_records(reader)
}

fn read_records<R: io::Read, T: for<'de> Deserialize<'de>>(
    reader: R,
) -> Result<Vec<T>, PrepError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut records = Vec::new();
    for row in rdr.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata_with_extra_columns() {
        let csv = "track_id,sample_key,artist_id,url\n\
                   1234,000046_3840,artist_01,http://example.com\n\
                   5678,000135_483840,artist_02,http://example.com\n";
        let records = read_metadata(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sample_key, "000046_3840");
        assert_eq!(records[1].artist_id, "artist_02");
    }

    #[test]
    fn parses_signed_relevance() {
        let csv = "sample_key,instrument,relevance,num_responses\n\
                   000046_3840,guitar,0.8,3\n\
                   000046_3840,voice,-0.5,3\n";
        let records = read_labels(csv.as_bytes()).unwrap();
        assert_eq!(records[0].relevance, 0.8);
        assert_eq!(records[1].relevance, -0.5);
    }

    #[test]
    fn rejects_malformed_rows() {
        let csv = "sample_key,instrument,relevance\nabc,guitar,not-a-number\n";
        assert!(read_labels(csv.as_bytes()).is_err());
    }
}
