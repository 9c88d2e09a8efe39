use thiserror::Error;

use crate::tensor::TensorError;

/// Every failure the membership-inference pipeline can surface.
///
/// Variants carry the names and dimensions needed to act on them without
/// looking at internals (which corpus was empty, which id overflowed, ...).
#[derive(Debug, Error)]
pub enum TraceError {
    /// Invalid hyperparameters or request fields.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A corpus (or the sequences derived from it) has no sentences.
    #[error("corpus '{corpus}' contains no sentences")]
    EmptyCorpus {
        /// Name of the offending corpus.
        corpus: String,
    },

    /// A batch has no real prediction positions, so its loss is undefined.
    #[error("batch {index} has no unmasked prediction positions")]
    EmptyBatch {
        /// Position of the batch within its epoch.
        index: usize,
    },

    /// Training produced a non-finite loss; the run is abandoned.
    #[error("training diverged in epoch {epoch}, batch {index}: loss {loss}")]
    Diverged {
        /// Epoch (1-based) in which the loss blew up.
        epoch: usize,
        /// Position of the batch within that epoch.
        index: usize,
        /// The offending loss value.
        loss: f64,
    },

    /// AUC was requested with one or both label classes empty.
    #[error("cannot compute AUC from {members} member and {non_members} non-member losses")]
    InsufficientData {
        /// Number of member (training) losses supplied.
        members: usize,
        /// Number of non-member (held-out) losses supplied.
        non_members: usize,
    },

    /// A vocabulary id outside `[0, size)` was decoded.
    #[error("token id {id} is out of range for a vocabulary of size {size}")]
    OutOfRangeId {
        /// The id that was looked up.
        id: u32,
        /// Size of the vocabulary.
        size: usize,
    },

    /// Two components disagree about a dimension, usually a checkpoint paired
    /// with the wrong vocabulary.
    #[error("dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being checked.
        what: String,
        /// The dimension the receiver expected (an exclusive bound for ids).
        expected: usize,
        /// The dimension actually seen.
        actual: usize,
    },

    /// A named checkpoint does not exist in the store.
    #[error("checkpoint '{0}' not found")]
    CheckpointNotFound(String),

    /// A named corpus does not exist in the store.
    #[error("corpus '{0}' not found")]
    CorpusNotFound(String),

    /// Shape error raised by the tensor primitives.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// Filesystem failure in the resource store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint blob could not be encoded or decoded.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Attack report could not be encoded.
    #[error("report encoding error: {0}")]
    Report(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type TraceResult<T> = Result<T, TraceError>;

impl TraceError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn dimension(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}
