//! Parses raw crowd-sourcing exports into the corpus label tables.
//!
//! The annotation platform emits one CSV per job, with the yes/no answer in a
//! per-instrument column named `does_this_recording_contain_<instrument>` and
//! the aggregate confidence next to it in `<...>:confidence`. Two products
//! come out of these files:
//!
//! - the aggregated sparse label table, mapping a yes/no answer and its
//!   confidence onto a single relevance score in [0, 1]:
//!   `relevance = 0.5 + sign * confidence / 2` with yes -> +1, no -> -1;
//! - the individual response table, one row per annotator judgment, with
//!   worker and channel identifiers replaced by random tokens before the
//!   table ever leaves the building.

use std::collections::{HashMap, HashSet};
use std::io;

use rand::Rng;
use serde::Serialize;

use crate::config::ANONYMIZE_RETRIES;
use crate::error::PrepError;

const CONTAIN_COL: &str = "does_this_recording_contain_";
const CONFIDENCE_SUFFIX: &str = ":confidence";

/// One aggregated (sample, instrument) relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct SparseLabelRecord {
    pub sample_key: String,
    pub instrument: String,
    pub relevance: f64,
    pub num_responses: u32,
}

/// One raw annotator judgment, with identifying fields still in the clear.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub sample_key: String,
    pub worker_id: String,
    pub worker_trust: f64,
    pub channel: String,
    pub instrument: String,
    /// 1 = yes, 0 = no; `None` when the platform emitted a null answer.
    pub response: Option<u8>,
}

/// Map a yes/no answer and its confidence to a relevance score.
fn relevance(answer: &str, confidence: f64) -> Result<f64, PrepError> {
    let sign = match answer {
        "yes" => 1.0,
        "no" => -1.0,
        other => {
            return Err(PrepError::Data(format!(
                "unrecognized contain answer '{other}' (expected yes/no)"
            )));
        }
    };
    Ok(0.5 + sign * confidence / 2.0)
}

/// Parse one aggregated crowd CSV into sparse label records.
pub fn parse_aggregated<R: io::Read>(reader: R) -> Result<Vec<SparseLabelRecord>, PrepError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let columns = column_index(&mut rdr)?;

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let field = |name: &str| field_of(&row, &columns, name);

        let instrument = field("instrument")?.to_string();
        let answer = field(&format!("{CONTAIN_COL}{instrument}"))?;
        let confidence: f64 = field(&format!("{CONTAIN_COL}{instrument}{CONFIDENCE_SUFFIX}"))?
            .parse()
            .map_err(|_| PrepError::Data(format!("bad confidence for {instrument}")))?;
        let num_responses: u32 = field("_trusted_judgments")?
            .parse()
            .map_err(|_| PrepError::Data("bad _trusted_judgments value".into()))?;

        records.push(SparseLabelRecord {
            sample_key: field("sample_key")?.to_string(),
            relevance: relevance(answer, confidence)?,
            instrument,
            num_responses,
        });
    }
    Ok(records)
}

/// Parse one per-annotator crowd CSV into response records.
pub fn parse_individual<R: io::Read>(reader: R) -> Result<Vec<ResponseRecord>, PrepError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let columns = column_index(&mut rdr)?;

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let field = |name: &str| field_of(&row, &columns, name);

        let instrument = field("instrument")?.to_string();
        let response = match field(&format!("{CONTAIN_COL}{instrument}"))? {
            "yes" => Some(1),
            "no" => Some(0),
            _ => None, // null answers survive as empty cells downstream
        };

        records.push(ResponseRecord {
            sample_key: field("sample_key")?.to_string(),
            worker_id: field("_worker_id")?.to_string(),
            worker_trust: field("_trust")?
                .parse()
                .map_err(|_| PrepError::Data("bad _trust value".into()))?,
            channel: field("_channel")?.to_string(),
            instrument,
            response,
        });
    }
    Ok(records)
}

/// Replace each distinct value with a random hex token of `token_len`
/// nibbles, returning the mapping so it can be escrowed separately.
///
/// Tokens are drawn fresh on collision, up to a few retries; a token length
/// too short for the value population is an error rather than a silent
/// de-anonymization hazard.
pub fn anonymize_values<R: Rng>(
    values: &[String],
    token_len: usize,
    rng: &mut R,
) -> Result<HashMap<String, String>, PrepError> {
    let unique: HashSet<&String> = values.iter().collect();

    for _ in 0..ANONYMIZE_RETRIES {
        let mut mapping = HashMap::with_capacity(unique.len());
        let mut used = HashSet::with_capacity(unique.len());
        for &value in &unique {
            let mut bytes = vec![0u8; token_len.div_ceil(2)];
            rng.fill(bytes.as_mut_slice());
            let token: String = hex::encode(bytes).chars().take(token_len).collect();
            used.insert(token.clone());
            mapping.insert(value.clone(), token);
        }
        if used.len() == unique.len() {
            return Ok(mapping);
        }
    }
    Err(PrepError::Config(format!(
        "token length {token_len} keeps colliding over {} values; increase it",
        unique.len()
    )))
}

fn column_index<R: io::Read>(
    rdr: &mut csv::Reader<R>,
) -> Result<HashMap<String, usize>, PrepError> {
    Ok(rdr
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect())
}

fn field_of<'a>(
    row: &'a csv::StringRecord,
    columns: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, PrepError> {
    columns
        .get(name)
        .and_then(|&i| row.get(i))
        .ok_or_else(|| PrepError::Data(format!("missing column '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const AGGREGATED: &str = "\
sample_key,instrument,_trusted_judgments,does_this_recording_contain_guitar,does_this_recording_contain_guitar:confidence
000046_3840,guitar,3,yes,1.0
000135_483840,guitar,4,no,0.6
";

    #[test]
    fn aggregated_relevance_mapping() {
        let records = parse_aggregated(AGGREGATED.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        // yes at full confidence -> 1.0
        assert_eq!(records[0].relevance, 1.0);
        assert_eq!(records[0].num_responses, 3);
        // no at 0.6 confidence -> 0.5 - 0.3
        assert!((records[1].relevance - 0.2).abs() < 1e-12);
    }

    #[test]
    fn aggregated_rejects_garbage_answers() {
        let csv = "\
sample_key,instrument,_trusted_judgments,does_this_recording_contain_guitar,does_this_recording_contain_guitar:confidence
000046_3840,guitar,3,maybe,1.0
";
        assert!(matches!(
            parse_aggregated(csv.as_bytes()),
            Err(PrepError::Data(_))
        ));
    }

    #[test]
    fn individual_responses_keep_null_answers() {
        let csv = "\
sample_key,instrument,_worker_id,_trust,_channel,does_this_recording_contain_banjo
000046_3840,banjo,w1,0.9,ch1,yes
000135_483840,banjo,w2,0.8,ch1,
";
        let records = parse_individual(csv.as_bytes()).unwrap();
        assert_eq!(records[0].response, Some(1));
        assert_eq!(records[1].response, None);
        assert_eq!(records[1].worker_trust, 0.8);
    }

    #[test]
    fn anonymization_is_injective_and_sized() {
        let values: Vec<String> = (0..200).map(|i| format!("worker_{i}")).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let mapping = anonymize_values(&values, 8, &mut rng).unwrap();

        assert_eq!(mapping.len(), 200);
        let tokens: HashSet<&String> = mapping.values().collect();
        assert_eq!(tokens.len(), 200);
        assert!(tokens.iter().all(|t| t.len() == 8));
    }

    #[test]
    fn short_tokens_over_many_values_fail_loudly() {
        // 17 values cannot fit injectively into one hex nibble.
        let values: Vec<String> = (0..17).map(|i| i.to_string()).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        assert!(matches!(
            anonymize_values(&values, 1, &mut rng),
            Err(PrepError::Config(_))
        ));
    }
}
