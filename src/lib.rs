//! Dataset-preparation toolkit for the OpenMIC instrument-tagging corpus.
//!
//! Three tools share this library:
//!
//! - `openmic-split` (src/main.rs) partitions the corpus into train/test
//!   splits, stratified over artists and constrained so that each side's
//!   per-instrument label distribution stays close to the population's.
//! - `parse_responses` turns raw crowd-sourcing CSV exports into the sparse
//!   label table (and, optionally, an anonymized per-annotator table).
//! - `verify` checks a prepared release: MD5 manifests, clip durations, and
//!   VGGish feature shapes.
//!
//! The computational core (label matrices, the probability-ratio check, and
//! the partitioner) is pure: it works over in-memory tables and does no I/O,
//! so every piece of split logic can be tested from small fixtures.

pub mod check;
pub mod config;
pub mod error;
pub mod labels;
pub mod loader;
pub mod responses;
pub mod split;
pub mod verify;
