//! Fixed-shape padded batches.

use crate::error::{TraceError, TraceResult};
use crate::tokenizer::TokenizedSequence;
use crate::vocab::PAD_ID;

/// A rectangular group of sequences padded to a common length.
///
/// `mask[r * cols + c]` is true for real tokens. The model reads a row's real
/// tokens in order and predicts each one from those before it, so masked-out
/// positions never reach the loss or the gradient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    tokens: Vec<u32>,
    mask: Vec<bool>,
    rows: usize,
    cols: usize,
}

impl Batch {
    /// Builds a batch from flat row-major `tokens` and `mask`.
    pub fn new(tokens: Vec<u32>, mask: Vec<bool>, rows: usize, cols: usize) -> TraceResult<Self> {
        if tokens.len() != rows * cols {
            return Err(TraceError::dimension("batch tokens", rows * cols, tokens.len()));
        }
        if mask.len() != tokens.len() {
            return Err(TraceError::dimension("batch mask", tokens.len(), mask.len()));
        }
        Ok(Self {
            tokens,
            mask,
            rows,
            cols,
        })
    }

    /// Pads `sequences` to the longest one with [`PAD_ID`].
    fn pad(sequences: &[TokenizedSequence]) -> Self {
        let rows = sequences.len();
        let cols = sequences.iter().map(TokenizedSequence::len).max().unwrap_or(0);
        let mut tokens = vec![PAD_ID; rows * cols];
        let mut mask = vec![false; rows * cols];
        for (r, seq) in sequences.iter().enumerate() {
            let start = r * cols;
            tokens[start..start + seq.len()].copy_from_slice(seq.ids());
            mask[start..start + seq.len()].iter_mut().for_each(|m| *m = true);
        }
        Self {
            tokens,
            mask,
            rows,
            cols,
        }
    }

    /// Number of sequences.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Padded length shared by every row.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Row `r` including padding.
    #[must_use]
    pub fn row(&self, r: usize) -> &[u32] {
        &self.tokens[r * self.cols..(r + 1) * self.cols]
    }

    /// Mask of row `r`.
    #[must_use]
    pub fn row_mask(&self, r: usize) -> &[bool] {
        &self.mask[r * self.cols..(r + 1) * self.cols]
    }

    /// The real (unmasked) tokens of row `r`, in order.
    #[must_use]
    pub fn real_tokens(&self, r: usize) -> Vec<u32> {
        self.row(r)
            .iter()
            .zip(self.row_mask(r))
            .filter_map(|(&t, &m)| m.then_some(t))
            .collect()
    }

    /// Number of next-word predictions across all rows.
    #[must_use]
    pub fn num_predictions(&self) -> usize {
        (0..self.rows)
            .map(|r| {
                self.row_mask(r)
                    .iter()
                    .filter(|&&m| m)
                    .count()
                    .saturating_sub(1)
            })
            .sum()
    }
}

/// Groups `sequences` in order into batches of `batch_size`.
///
/// The last batch may be shorter and is kept. Fails with
/// [`TraceError::EmptyCorpus`] for no sequences and with
/// [`TraceError::Configuration`] for a zero batch size.
pub fn make_batches(
    corpus: &str,
    sequences: &[TokenizedSequence],
    batch_size: usize,
) -> TraceResult<Vec<Batch>> {
    if batch_size == 0 {
        return Err(TraceError::config("batch size must be positive"));
    }
    if sequences.is_empty() {
        return Err(TraceError::EmptyCorpus {
            corpus: corpus.to_string(),
        });
    }
    let batches: Vec<Batch> = sequences.chunks(batch_size).map(Batch::pad).collect();
    tracing::debug!(
        corpus,
        sequences = sequences.len(),
        batches = batches.len(),
        "batched sequences"
    );
    Ok(batches)
}
