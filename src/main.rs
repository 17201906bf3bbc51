//! Train/test partitioning for the OpenMIC corpus.
//!
//! Reads the metadata and sparse label CSVs (plus an optional artist
//! de-duplication table), builds the label matrices, and searches for
//! stratified splits whose per-instrument label distributions stay within
//! the configured probability ratio of the population, on both sides.
//!
//! Output is all-or-nothing: split files are only written once every
//! requested split has been found, so a failed run leaves no partial set
//! behind.

use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use openmic_prep::config::DEFAULT_SEED;
use openmic_prep::labels::build_label_matrix;
use openmic_prep::loader;
use openmic_prep::split::{SplitConfig, make_partitions};

#[derive(Parser, Debug)]
#[command(about = "Split OpenMIC data into train and test")]
struct Args {
    /// Path to metadata.csv
    metadata: PathBuf,

    /// Path to sparse-labels.csv
    labels: PathBuf,

    /// Path to a track de-duplication index
    #[arg(long = "dupes")]
    dupe_file: Option<PathBuf>,

    /// Random seed
    #[arg(short, long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Number of splits to generate
    #[arg(short, long = "num-splits", default_value_t = 1)]
    num_splits: usize,

    /// Fraction of data for training
    #[arg(short = 'r', long = "split-ratio", default_value_t = 0.75)]
    ratio: f64,

    /// Max/min allowable deviation of p(Y | train) / p(Y)
    #[arg(short = 'p', long = "probability-ratio", default_value_t = 0.875)]
    prob_ratio: f64,

    /// Directory to write the split files into
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let start_time = Instant::now();

    // --- Step 1: Load the input tables. ---
    let metadata = loader::read_metadata(
        File::open(&args.metadata)
            .with_context(|| format!("opening {}", args.metadata.display()))?,
    )?;
    let labels = loader::read_labels(
        File::open(&args.labels).with_context(|| format!("opening {}", args.labels.display()))?,
    )?;
    let dedupe = match &args.dupe_file {
        Some(path) => Some(loader::read_dedupe(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )?),
        None => None,
    };
    println!(
        "Loaded {} metadata rows and {} label rows",
        metadata.len(),
        labels.len()
    );

    // --- Step 2: Build the label matrices. ---
    let (matrix, artists) = build_label_matrix(&metadata, &labels, dedupe.as_deref())?;
    println!(
        "  -> {} annotated samples, {} artists, {} instruments",
        matrix.n_samples(),
        artists.n_artists(),
        matrix.n_instruments()
    );

    // --- Step 3: Search for acceptable splits. ---
    let config = SplitConfig {
        seed: args.seed,
        num_splits: args.num_splits,
        train_ratio: args.ratio,
        prob_ratio: args.prob_ratio,
    };

    let pb = ProgressBar::new(args.num_splits as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:15.bold.dim} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );
    pb.set_prefix("Accepted splits");

    let splits = make_partitions(&matrix, &artists, &config, Some(&pb))?;
    pb.finish();

    // --- Step 4: Write the split files, now that all of them are accepted. ---
    fs::create_dir_all(&args.output)?;
    for (fold, split) in splits.iter().enumerate() {
        let fold = fold + 1;
        write_split(&args.output.join(format!("split{fold:02}_train.csv")), &split.train)?;
        write_split(&args.output.join(format!("split{fold:02}_test.csv")), &split.test)?;
        println!(
            "  -> split {fold:02}: {} train / {} test samples",
            split.train.len(),
            split.test.len()
        );
    }

    println!(
        "\n✅ Wrote {} split(s) to '{}' in {:?}",
        splits.len(),
        args.output.display(),
        start_time.elapsed()
    );
    Ok(())
}

/// One sample key per row, under a `sample_key` header.
fn write_split(path: &PathBuf, sample_keys: &[String]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["sample_key"])?;
    for key in sample_keys {
        writer.write_record([key])?;
    }
    writer.flush()?;
    Ok(())
}
