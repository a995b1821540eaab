//! Estimation toolkit for back-off word n-gram language models.
//!
//! The crate builds n-gram models from text corpora, count files or ARPA
//! files, smooths them with maximum-likelihood or interpolated Kneser-Ney
//! estimators, linearly or log-linearly interpolates several component
//! models over a merged index space, and tunes the free parameters of any
//! of these estimators against perplexity or lattice-based objectives.
//!
//! The central data structure is a trie stored as one [`NgramVector`] per
//! order: a hash-indexed `(history, word) -> index` table with dense
//! index-aligned side vectors for counts, probabilities and back-off
//! weights. Everything downstream (smoothing, interpolation, evaluation
//! masks) operates on those aligned vectors.

pub mod binio;
pub mod features;
mod hash;
pub mod lattice;
pub mod lm;
pub mod mask;
pub mod ngram;
pub mod optimize;
pub mod perplexity;
pub mod reader;
pub mod smooth;
pub mod types;
pub mod vocab;
pub mod wer;
pub mod zio;

pub use lm::{InterpolatedNgramLm, NgramLm};
pub use ngram::{NgramModel, NgramVector};
pub use smooth::Smoothing;
pub use vocab::Vocab;

use reader::arpa::ArpaReadError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error(transparent)]
    ArpaError(#[from] ArpaReadError),
    #[error("Counts line {line} is malformed: {reason}")]
    CountsFormatError { line: usize, reason: String },
    #[error("Feature specification `{0}` could not be parsed")]
    FeatureSpecError(String),
    #[error("Unknown feature transform `{0}`")]
    UnknownFeatureTransform(String),
    #[error("Lattice file is malformed: {0}")]
    LatticeFormatError(String),
    #[error("Lattice contains the out-of-vocabulary word `{0}`")]
    LatticeOovWord(String),
    #[error("Lattice transitions are not topologically sorted")]
    LatticeNotSorted,
    #[error("Lattice node n-gram history is not unique")]
    LatticeAmbiguousHistory,
    #[error("Unknown smoothing algorithm `{0}`")]
    UnknownSmoothing(String),
    #[error("Unknown interpolation mode `{0}`")]
    UnknownInterpolation(String),
    #[error("Unknown optimization technique `{0}`")]
    UnknownOptimization(String),
    #[error("The file carries version stamp {found:#018x} which this build cannot read")]
    VersionMismatch { found: u64 },
    #[error("Expected binary section `{expected}` but found `{found}`")]
    SectionMismatch { expected: String, found: String },
    #[error("Model invariant violated: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
