//! Turns raw crowd-sourcing CSV exports into the corpus label tables.
//!
//! Default mode writes the aggregated sparse label CSV consumed by
//! `openmic-split`. With `--individual`, writes one row per annotator
//! judgment instead, with worker and channel identifiers replaced by random
//! tokens (optionally escrowing the token maps to a JSON file).

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rng;
use serde_json::json;

use openmic_prep::responses::{
    ResponseRecord, SparseLabelRecord, anonymize_values, parse_aggregated, parse_individual,
};

#[derive(Parser, Debug)]
#[command(about = "Parse crowd annotation exports into label CSVs")]
struct Args {
    /// Glob-style file pattern for picking up CSV files
    csv_pattern: String,

    /// Output filename for the label CSV
    output: PathBuf,

    /// Emit one row per annotator judgment instead of aggregated labels
    #[arg(long)]
    individual: bool,

    /// Optional file for writing the anonymization token maps to disk
    #[arg(long)]
    hashfile: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let files: Vec<PathBuf> = glob::glob(&args.csv_pattern)?.collect::<Result<_, _>>()?;
    if files.is_empty() {
        bail!("No CSV files found for pattern '{}'", args.csv_pattern);
    }
    println!("Found {} annotation export(s) to parse.", files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Parsing exports [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    if args.individual {
        write_individual(&args, &files, &pb)
    } else {
        write_aggregated(&args, &files, &pb)
    }
}

fn write_aggregated(args: &Args, files: &[PathBuf], pb: &ProgressBar) -> Result<()> {
    let mut records: Vec<SparseLabelRecord> = Vec::new();
    for path in files {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        records.extend(parse_aggregated(file)?);
        pb.inc(1);
    }
    pb.finish();
    println!("Loaded {} records", records.len());

    records.sort_by(|a, b| a.sample_key.cmp(&b.sample_key));

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    println!("\n✅ Wrote sparse labels to '{}'", args.output.display());
    Ok(())
}

fn write_individual(args: &Args, files: &[PathBuf], pb: &ProgressBar) -> Result<()> {
    let mut records: Vec<ResponseRecord> = Vec::new();
    for path in files {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        records.extend(parse_individual(file)?);
        pb.inc(1);
    }
    pb.finish();
    println!("Loaded {} records", records.len());

    records.sort_by(|a, b| a.sample_key.cmp(&b.sample_key));

    // Swap real worker and channel identifiers for random tokens before the
    // table is written anywhere.
    let mut rng = rng();
    let workers: Vec<String> = records.iter().map(|r| r.worker_id.clone()).collect();
    let worker_map = anonymize_values(&workers, 8, &mut rng)?;
    let channels: Vec<String> = records.iter().map(|r| r.channel.clone()).collect();
    let channel_map = anonymize_values(&channels, 4, &mut rng)?;
    for record in &mut records {
        record.worker_id = worker_map[&record.worker_id].clone();
        record.channel = channel_map[&record.channel].clone();
    }
    println!(
        "  -> anonymized {} workers and {} channels",
        worker_map.len(),
        channel_map.len()
    );

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    if let Some(hashfile) = &args.hashfile {
        let file = File::create(hashfile)
            .with_context(|| format!("creating {}", hashfile.display()))?;
        serde_json::to_writer(
            file,
            &json!({ "worker_ids": worker_map, "channels": channel_map }),
        )?;
        println!("  -> token maps escrowed to '{}'", hashfile.display());
    }

    println!("\n✅ Wrote individual responses to '{}'", args.output.display());
    Ok(())
}
