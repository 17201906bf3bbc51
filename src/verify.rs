//! Integrity checks for a prepared corpus release.
//!
//! Three kinds of checks, each cheap enough to run over the whole corpus
//! before shipping it:
//!
//! - MD5 checksums of every file against the published manifest,
//! - clip durations read from container metadata (no decoding),
//! - VGGish feature-file shapes (frames x dimensions).
//!
//! Failing checks are reported and folded into a boolean verdict rather than
//! aborting the phase, so one bad file still yields a complete report of
//! everything else that is wrong.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use md5::{Digest, Md5};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Deserialize;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::PrepError;

/// The file's key in the checksum manifest: its base name without extension.
pub fn file_key(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn md5_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn md5_file(path: &Path) -> Result<String, PrepError> {
    // Clips are ~10s of audio; reading whole files is fine.
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(md5_bytes(&bytes))
}

/// Load a checksum manifest: first column is the file key, `md5` column (or
/// the second column) is the expected digest.
pub fn read_checksums<R: Read>(reader: R) -> Result<BTreeMap<String, String>, PrepError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let md5_column = rdr
        .headers()?
        .iter()
        .position(|name| name == "md5")
        .unwrap_or(1);

    let mut checksums = BTreeMap::new();
    for row in rdr.records() {
        let row = row?;
        let key = row
            .get(0)
            .ok_or_else(|| PrepError::Data("empty checksum row".into()))?;
        let digest = row
            .get(md5_column)
            .ok_or_else(|| PrepError::Data(format!("missing md5 for '{key}'")))?;
        checksums.insert(key.to_string(), digest.to_string());
    }
    Ok(checksums)
}

/// Hash every file in parallel and compare against the manifest.
///
/// Both directions of the key join are checked by name: a file missing from
/// the manifest and a manifest entry with no file are each failures, as is a
/// file that cannot be read.
pub fn check_md5(
    files: &[PathBuf],
    expected: &BTreeMap<String, String>,
    progress: &ProgressBar,
) -> bool {
    let hashed: BTreeMap<String, String> = files
        .par_iter()
        .progress_with(progress.clone())
        .filter_map(|path| match md5_file(path) {
            Ok(digest) => Some((file_key(path), digest)),
            Err(err) => {
                println!("  !! {}: {err}", path.display());
                None
            }
        })
        .collect();

    let mut success = hashed.len() == files.len();

    let mut mismatched = 0usize;
    for (key, digest) in &hashed {
        match expected.get(key) {
            Some(want) if want == digest => {}
            Some(_) => mismatched += 1,
            None => {
                println!("  !! '{key}' is not in the checksum manifest");
                success = false;
            }
        }
    }
    for key in expected.keys() {
        if !hashed.contains_key(key) {
            println!("  !! '{key}' is in the manifest but has no file on disk");
            success = false;
        }
    }
    if mismatched > 0 {
        println!(
            "  !! MD5 mismatch on {:.2}% of records ({mismatched} of {})",
            100.0 * mismatched as f64 / hashed.len() as f64,
            hashed.len()
        );
        success = false;
    }
    success
}

/// Clip length in seconds, from container metadata only.
pub fn clip_duration_secs(path: &Path) -> Result<f64, PrepError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PrepError::Data(format!("{}: no audio track", path.display())))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PrepError::Data(format!("{}: missing sample rate", path.display())))?;
    let n_frames = track
        .codec_params
        .n_frames
        .ok_or_else(|| PrepError::Data(format!("{}: unknown frame count", path.display())))?;

    Ok(n_frames as f64 / sample_rate as f64)
}

/// Every clip must be `expected +- tolerance` seconds long.
pub fn check_durations(
    files: &[PathBuf],
    expected: f64,
    tolerance: f64,
    progress: &ProgressBar,
) -> bool {
    files
        .par_iter()
        .progress_with(progress.clone())
        .map(|path| match clip_duration_secs(path) {
            Ok(duration) => {
                let ok = (duration - expected).abs() < tolerance;
                if !ok {
                    println!(
                        "  !! {} is {duration:.3}s, expected {expected:.3}s",
                        path.display()
                    );
                }
                ok
            }
            Err(err) => {
                println!("  !! {}: {err}", path.display());
                false
            }
        })
        .reduce(|| true, |a, b| a && b)
}

/// On-disk layout of one VGGish feature file.
#[derive(Debug, Deserialize)]
pub struct VggishFeatures {
    pub time_points: Vec<f64>,
    pub features: Vec<Vec<f64>>,
}

impl VggishFeatures {
    /// True if the file holds `frames` time points and a `frames x dim`
    /// feature array.
    pub fn has_shape(&self, frames: usize, dim: usize) -> bool {
        self.time_points.len() == frames
            && self.features.len() == frames
            && self.features.iter().all(|row| row.len() == dim)
    }
}

/// Every feature file must parse and have the expected shape.
pub fn check_shapes(
    files: &[PathBuf],
    frames: usize,
    dim: usize,
    progress: &ProgressBar,
) -> bool {
    files
        .par_iter()
        .progress_with(progress.clone())
        .map(|path| {
            let parsed = File::open(path)
                .map_err(PrepError::from)
                .and_then(|file| {
                    serde_json::from_reader::<_, VggishFeatures>(file).map_err(PrepError::from)
                });
            let features = match parsed {
                Ok(features) => features,
                Err(err) => {
                    println!("  !! {}: {err}", path.display());
                    return false;
                }
            };
            let ok = features.has_shape(frames, dim);
            if !ok {
                println!(
                    "  !! {} has shape ({}, {}), expected ({frames}, {dim})",
                    path.display(),
                    features.time_points.len(),
                    features.features.first().map_or(0, |row| row.len()),
                );
            }
            ok
        })
        .reduce(|| true, |a, b| a && b)
}

/// Check a single file (e.g. the sparse label CSV) against a known digest.
pub fn verify_single(path: &Path, checksum: &str) -> Result<bool, PrepError> {
    let digest = md5_file(path)?;
    if digest != checksum {
        println!(
            "  !! {} hashes to {digest}, expected {checksum}",
            path.display()
        );
    }
    Ok(digest == checksum)
}

pub fn bar_style() -> Result<ProgressStyle, indicatif::style::TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:15.bold.dim} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
        .progress_chars("#>-"))
}
