//! Toolkit-wide constants.
//!
//! These mirror the published OpenMIC-2018 release: 10-second clips, VGGish
//! features at 10 frames of 128 dimensions each, and the MD5 manifest of the
//! sparse label file. Change these only if you are preparing a different
//! release of the corpus.

/// Synthetic label assigned to artists with no positive instrument
/// association, so that every artist has exactly one dominant label
/// to stratify on.
pub const NEGATIVE_LABEL: &str = "_negative";

/// How many stratified candidates to draw per requested split before
/// giving up. Most candidates fail the probability-ratio check at strict
/// tolerances, so we oversample generously.
pub const OVERSAMPLE_FACTOR: usize = 1000;

/// Default random seed for partitioning. Matches the seed the published
/// splits were generated with.
pub const DEFAULT_SEED: u64 = 20180903;

/// Every clip in the corpus is expected to be this long.
pub const EXPECTED_CLIP_SECONDS: f64 = 10.0;
/// Allowed deviation from the expected clip length, in seconds.
pub const DURATION_TOLERANCE: f64 = 0.01;

/// Shape of one VGGish feature file: frames x feature dimensions.
pub const VGGISH_FRAMES: usize = 10;
pub const VGGISH_DIM: usize = 128;

/// MD5 of the released sparse label CSV.
pub const LABELS_CHECKSUM: &str = "3bbc4f1941fb526d1c9c86b9ece667e7";

/// How many times to re-draw the anonymization token map before declaring
/// the token length too short to avoid collisions.
pub const ANONYMIZE_RETRIES: usize = 5;
