//! Data integrity checks for a prepared OpenMIC release.
//!
//! Verifies, in order: audio clips (MD5 manifest + duration), VGGish feature
//! files (MD5 manifest + shape), and the sparse label CSV (single MD5).
//! Every phase runs to completion so the report is complete even when
//! something is wrong; the process then exits non-zero if any phase failed.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::ProgressBar;
use rayon::ThreadPoolBuilder;

use openmic_prep::config::{
    DURATION_TOLERANCE, EXPECTED_CLIP_SECONDS, LABELS_CHECKSUM, VGGISH_DIM, VGGISH_FRAMES,
};
use openmic_prep::verify::{
    bar_style, check_durations, check_md5, check_shapes, read_checksums, verify_single,
};

#[derive(Parser, Debug)]
#[command(about = "Verify that the openmic dataset meets expectations")]
struct Args {
    /// Path to the uncompressed openmic dataset
    openmic_dir: PathBuf,

    /// Path to a directory of checksum CSV files
    checksum_dir: PathBuf,

    /// Number of worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    n_jobs: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.n_jobs > 0 {
        ThreadPoolBuilder::new()
            .num_threads(args.n_jobs)
            .build_global()?;
    }

    let mut success = true;

    println!("--- Verifying audio ---");
    let audio_files = collect(&args.openmic_dir, "audio/*/*.ogg")?;
    let manifest = load_manifest(&args.checksum_dir, "openmic-2018-audio.csv")?;
    success &= check_md5(&audio_files, &manifest, &bar("Hashing audio", &audio_files)?);
    success &= check_durations(
        &audio_files,
        EXPECTED_CLIP_SECONDS,
        DURATION_TOLERANCE,
        &bar("Durations", &audio_files)?,
    );

    println!("--- Verifying VGGish features ---");
    let vggish_files = collect(&args.openmic_dir, "vggish/*/*.json")?;
    let manifest = load_manifest(&args.checksum_dir, "openmic-2018-vggish.csv")?;
    success &= check_md5(&vggish_files, &manifest, &bar("Hashing vggish", &vggish_files)?);
    success &= check_shapes(
        &vggish_files,
        VGGISH_FRAMES,
        VGGISH_DIM,
        &bar("Shapes", &vggish_files)?,
    );

    println!("--- Verifying labels ---");
    success &= verify_single(
        &args.openmic_dir.join("openmic-20k-sparse-labels.csv"),
        LABELS_CHECKSUM,
    )?;

    if !success {
        bail!("dataset verification failed, see the report above");
    }
    println!("\n✅ Dataset verified.");
    Ok(())
}

fn collect(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{}", root.display(), pattern);
    let files: Vec<PathBuf> = glob::glob(&full)?.collect::<Result<_, _>>()?;
    if files.is_empty() {
        bail!("No files found for glob: {}", full);
    }
    Ok(files)
}

fn load_manifest(
    checksum_dir: &Path,
    name: &str,
) -> Result<std::collections::BTreeMap<String, String>> {
    let path = checksum_dir.join(name);
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(read_checksums(file)?)
}

fn bar(prefix: &str, files: &[PathBuf]) -> Result<ProgressBar> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(bar_style()?);
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}
