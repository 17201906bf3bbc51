//! Error taxonomy for the preparation pipeline.
//!
//! Every variant aborts the run that raised it. The only retry-like behavior
//! anywhere in the toolkit is the bounded candidate search in the
//! partitioner, which is part of the algorithm rather than error recovery:
//! when even that budget runs out, the failure surfaces here as
//! [`PrepError::InsufficientSplits`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepError {
    /// Invalid configuration: bad ratios, a zero split count, or a
    /// de-duplication table that references unknown sample keys.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Structural problem in the input tables: an empty metadata/label join,
    /// or an instrument annotated for fewer than two distinct artists.
    #[error("bad input data: {0}")]
    Data(String),

    /// The candidate budget ran out before enough splits passed the
    /// probability-ratio check. A partial set of splits is never returned.
    #[error(
        "only {accepted} of {requested} requested splits passed within {budget} candidates; \
         try lowering the probability ratio tolerance"
    )]
    InsufficientSplits {
        requested: usize,
        accepted: usize,
        budget: usize,
    },

    /// An internal consistency check failed. This indicates a logic bug or
    /// corrupt upstream data, never a tunable condition, so it is fatal.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Audio(#[from] symphonia::core::errors::Error),
}
